use crate::domain::model::{Record, Schema, StructuredRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Output fields whose value is copied from the input record.
///
/// `fields` lists input fields kept under their own name; `renames` maps an
/// input field to a different output field name. The reverse lookup
/// (output → input) is built once here.
#[derive(Debug, Clone, Default)]
pub struct ReusedFields {
    fields: HashSet<String>,
    renamed_inputs: HashSet<String>,
    reverse: HashMap<String, String>,
}

impl ReusedFields {
    pub fn new(fields: Vec<String>, renames: Vec<(String, String)>) -> Self {
        let mut reverse = HashMap::new();
        let mut renamed_inputs = HashSet::new();
        for (input, output) in renames {
            // uniqueness is checked by config validation; duplicates here: last one wins
            if let Some(previous) = reverse.insert(output.clone(), input.clone()) {
                tracing::warn!(
                    "Output field '{}' is reused from both '{}' and '{}'",
                    output,
                    previous,
                    input
                );
            }
            renamed_inputs.insert(input);
        }

        Self {
            fields: fields.into_iter().collect(),
            renamed_inputs,
            reverse,
        }
    }

    pub fn is_reused(&self, output_field: &str) -> bool {
        self.reverse.contains_key(output_field)
            || (self.fields.contains(output_field) && !self.renamed_inputs.contains(output_field))
    }

    /// Input field that feeds `output_field`.
    pub fn input_field_for<'a>(&'a self, output_field: &'a str) -> &'a str {
        self.reverse
            .get(output_field)
            .map(String::as_str)
            .unwrap_or(output_field)
    }
}

/// 依輸出 schema 組合記錄：reused 欄位取自輸入，其餘取自擷取到的資料
#[derive(Debug, Clone)]
pub struct RecordMerger {
    schema: Arc<Schema>,
    reused: ReusedFields,
}

impl RecordMerger {
    pub fn new(schema: Arc<Schema>, reused: ReusedFields) -> Self {
        Self { schema, reused }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn merge(&self, input: &Record, retrieved: &Record) -> StructuredRecord {
        let values = self
            .schema
            .fields()
            .iter()
            .map(|field| {
                let value = if self.reused.is_reused(&field.name) {
                    input.get(self.reused.input_field_for(&field.name))
                } else {
                    retrieved.get(&field.name)
                };
                value.cloned().unwrap_or(serde_json::Value::Null)
            })
            .collect();

        StructuredRecord::new(Arc::clone(&self.schema), values)
    }
}
