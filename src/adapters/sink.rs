use crate::domain::model::{InvalidEntry, StructuredRecord};
use crate::domain::ports::Emitter;
use crate::utils::error::Result;
use std::io::Write;

/// Keeps everything in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct CollectingEmitter {
    pub records: Vec<StructuredRecord>,
    pub errors: Vec<InvalidEntry>,
}

impl Emitter for CollectingEmitter {
    fn emit(&mut self, record: StructuredRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    fn emit_error(&mut self, error: InvalidEntry) -> Result<()> {
        self.errors.push(error);
        Ok(())
    }
}

/// 以 JSON Lines 格式寫出：正常記錄一個輸出、錯誤記錄另一個輸出
pub struct JsonLinesEmitter<O: Write + Send, E: Write + Send> {
    output: O,
    errors: E,
}

impl<O: Write + Send, E: Write + Send> JsonLinesEmitter<O, E> {
    pub fn new(output: O, errors: E) -> Self {
        Self { output, errors }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush()?;
        self.errors.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> (O, E) {
        (self.output, self.errors)
    }
}

impl<O: Write + Send, E: Write + Send> Emitter for JsonLinesEmitter<O, E> {
    fn emit(&mut self, record: StructuredRecord) -> Result<()> {
        serde_json::to_writer(&mut self.output, &record)?;
        self.output.write_all(b"\n")?;
        Ok(())
    }

    fn emit_error(&mut self, error: InvalidEntry) -> Result<()> {
        serde_json::to_writer(&mut self.errors, &error)?;
        self.errors.write_all(b"\n")?;
        Ok(())
    }
}
