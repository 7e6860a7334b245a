use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// 輸入或擷取到的資料記錄，欄位以名稱存取
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub data: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }

    /// 欄位的字串表示；null 或不存在時回傳 None
    pub fn get_string(&self, field: &str) -> Option<String> {
        match self.data.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            data: map.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Ordered list of output fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A record shaped by an output schema: exactly one value per schema field.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRecord {
    schema: Arc<Schema>,
    values: Vec<serde_json::Value>,
}

impl StructuredRecord {
    /// Values must line up with `schema.fields()`; missing trailing values become null.
    pub fn new(schema: Arc<Schema>, mut values: Vec<serde_json::Value>) -> Self {
        values.resize(schema.fields().len(), serde_json::Value::Null);
        Self { schema, values }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.schema.index_of(field).map(|i| &self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }
}

// 依 schema 欄位順序序列化
impl Serialize for StructuredRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A per-record or per-entry failure routed to the error sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidEntry {
    pub code: i32,
    pub message: String,
    pub record: Record,
}

impl InvalidEntry {
    pub fn new(code: i32, message: impl Into<String>, record: Record) -> Self {
        Self {
            code,
            message: message.into(),
            record,
        }
    }
}

/// One unit produced while iterating a response page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEntry {
    Data(Record),
    Error(InvalidEntry),
}

impl PageEntry {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("name", FieldType::String),
            Field::new("id", FieldType::String),
        ]))
    }

    #[test]
    fn structured_record_serializes_in_schema_order() {
        let record = StructuredRecord::new(schema(), vec![json!("Alice"), json!("42")]);
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"name":"Alice","id":"42"}"#);
    }

    #[test]
    fn structured_record_pads_missing_values_with_null() {
        let record = StructuredRecord::new(schema(), vec![json!("Alice")]);
        assert_eq!(record.get("id"), Some(&serde_json::Value::Null));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn get_string_renders_scalars() {
        let record = Record::new()
            .with("s", "abc")
            .with("n", 42)
            .with("b", true)
            .with("null", serde_json::Value::Null);

        assert_eq!(record.get_string("s").as_deref(), Some("abc"));
        assert_eq!(record.get_string("n").as_deref(), Some("42"));
        assert_eq!(record.get_string("b").as_deref(), Some("true"));
        assert_eq!(record.get_string("null"), None);
        assert_eq!(record.get_string("absent"), None);
    }
}
