//! Reference page factories for JSON and CSV response bodies.

use crate::core::transform::TRANSFORM_ERROR_CODE;
use crate::domain::model::{FieldType, InvalidEntry, PageEntry, Record, Schema};
use crate::domain::ports::{HttpResponse, Page, PageFactory};
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

/// JSON body: an array of objects, or a single object, optionally nested at
/// `results_path` (a JSON pointer such as `/data/items`).
#[derive(Debug, Clone, Default)]
pub struct JsonPageFactory {
    results_path: Option<String>,
}

impl JsonPageFactory {
    pub fn new(results_path: Option<String>) -> Self {
        Self { results_path }
    }
}

impl PageFactory for JsonPageFactory {
    fn create_page(&self, response: HttpResponse, errored: bool) -> Result<Page> {
        let status = response.status;
        let document: Value = match serde_json::from_slice(&response.body) {
            Ok(document) => document,
            // 錯誤頁面常常不是 JSON，整個 body 當成一筆錯誤
            Err(_) if errored => {
                let entry = error_entry(status, Record::new().with("body", response.text()));
                return Ok(Box::new(std::iter::once(Ok(entry))));
            }
            Err(e) => return Err(e.into()),
        };

        let target = match &self.results_path {
            Some(path) if !errored => document.pointer(path).cloned().ok_or_else(|| {
                EtlError::page(format!("results path '{}' not found in response", path))
            })?,
            _ => document,
        };

        let items = match target {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(EtlError::page(format!(
                    "expected a JSON array or object, got {}",
                    other
                )))
            }
        };

        Ok(Box::new(items.into_iter().map(move |item| {
            let entry = match item {
                Value::Object(map) if errored => error_entry(status, Record::from(map)),
                Value::Object(map) => PageEntry::Data(Record::from(map)),
                other => PageEntry::Error(InvalidEntry::new(
                    TRANSFORM_ERROR_CODE,
                    "Page entry is not a JSON object",
                    Record::new().with("value", other),
                )),
            };
            Ok(entry)
        })))
    }
}

/// CSV body; values are typed by the output schema column of the same name.
#[derive(Debug, Clone)]
pub struct CsvPageFactory {
    schema: Arc<Schema>,
    has_header: bool,
    delimiter: u8,
}

impl CsvPageFactory {
    pub fn new(schema: Arc<Schema>, has_header: bool, delimiter: u8) -> Self {
        Self {
            schema,
            has_header,
            delimiter,
        }
    }
}

impl PageFactory for CsvPageFactory {
    fn create_page(&self, response: HttpResponse, errored: bool) -> Result<Page> {
        let status = response.status;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.has_header)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(Cursor::new(response.body));

        // 沒有標題列時依 schema 欄位順序對應
        let columns: Vec<String> = if self.has_header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            self.schema.fields().iter().map(|f| f.name.clone()).collect()
        };
        let schema = Arc::clone(&self.schema);

        Ok(Box::new(reader.into_records().map(move |row| {
            let row = row?;
            let raw: Record = columns
                .iter()
                .zip(row.iter())
                .fold(Record::new(), |record, (column, value)| {
                    record.with(column.clone(), value)
                });

            if errored {
                return Ok(error_entry(status, raw));
            }

            let mut typed = Record::new();
            for (column, value) in columns.iter().zip(row.iter()) {
                let field_type = schema
                    .field(column)
                    .map(|f| f.field_type)
                    .unwrap_or(FieldType::String);
                match parse_value(value, field_type) {
                    Ok(parsed) => typed.data.insert(column.clone(), parsed),
                    Err(message) => {
                        return Ok(PageEntry::Error(InvalidEntry::new(
                            TRANSFORM_ERROR_CODE,
                            format!("Column '{}': {}", column, message),
                            raw,
                        )))
                    }
                };
            }
            Ok(PageEntry::Data(typed))
        })))
    }
}

/// Picks the page factory named by the `[format]` section.
#[derive(Debug, Clone)]
pub enum FormatPageFactory {
    Json(JsonPageFactory),
    Csv(CsvPageFactory),
}

impl PageFactory for FormatPageFactory {
    fn create_page(&self, response: HttpResponse, errored: bool) -> Result<Page> {
        match self {
            Self::Json(factory) => factory.create_page(response, errored),
            Self::Csv(factory) => factory.create_page(response, errored),
        }
    }
}

fn error_entry(status: u16, record: Record) -> PageEntry {
    PageEntry::Error(InvalidEntry::new(
        i32::from(status),
        format!("HTTP {} response entry routed to error", status),
        record,
    ))
}

fn parse_value(raw: &str, field_type: FieldType) -> std::result::Result<Value, String> {
    if raw.is_empty() && field_type != FieldType::String {
        return Ok(Value::Null);
    }

    match field_type {
        FieldType::String => Ok(Value::String(raw.to_string())),
        FieldType::Int | FieldType::Long => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("cannot convert '{}' to {:?}: {}", raw, field_type, e)),
        FieldType::Float | FieldType::Double => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("cannot convert '{}' to {:?}", raw, field_type)),
        FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot convert '{}' to Boolean", raw)),
        },
    }
}
