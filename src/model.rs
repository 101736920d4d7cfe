use std::fmt;

use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Real(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(value) => serde_json::Value::String(value.clone()),
        }
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Text(format!("<blob {} bytes>", bytes.len())),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowField {
    pub name: String,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRow {
    pub source_table: String,
    pub field_values: Vec<RowField>,
}

impl IndexedRow {
    pub fn to_json_object(&self) -> serde_json::Value {
        let object = self
            .field_values
            .iter()
            .map(|field| (field.name.clone(), field.value.to_json()))
            .collect::<serde_json::Map<String, serde_json::Value>>();
        serde_json::Value::Object(object)
    }

    pub fn preview(&self, max_items: usize, max_value_chars: usize) -> String {
        let mut parts = Vec::<String>::new();
        for (index, field) in self.field_values.iter().enumerate() {
            if index >= max_items {
                parts.push("…".to_string());
                break;
            }
            let rendered = field.value.to_string();
            let value = if rendered.chars().count() > max_value_chars {
                let kept = rendered
                    .chars()
                    .take(max_value_chars.saturating_sub(1))
                    .collect::<String>();
                format!("{kept}…")
            } else {
                rendered
            };
            parts.push(format!("{}={}", field.name, value));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceHit {
    pub position: usize,
    pub table: String,
    pub distance: f32,
    pub similarity_score: f64,
    pub row_preview: String,
    pub raw_row: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Empty,
    Integer,
    Real,
    Numeric,
    Text,
    Mixed,
}

impl StorageClass {
    pub fn observe(self, value: &CellValue) -> Self {
        let observed = match value {
            CellValue::Null => return self,
            CellValue::Integer(_) => Self::Integer,
            CellValue::Real(_) => Self::Real,
            CellValue::Text(_) => Self::Text,
        };

        match (self, observed) {
            (Self::Empty, next) => next,
            (current, next) if current == next => current,
            (Self::Integer | Self::Real | Self::Numeric, Self::Integer | Self::Real) => {
                Self::Numeric
            }
            _ => Self::Mixed,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Numeric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub declared_type: Option<String>,
    pub storage: StorageClass,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, declared_type: Option<&str>, storage: StorageClass) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.map(str::to_string),
            storage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub rows: Vec<Vec<CellValue>>,
    pub columns: Vec<ColumnMeta>,
    pub row_count: usize,
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl ExecutionResult {
    pub fn succeeded(
        columns: Vec<ColumnMeta>,
        rows: Vec<Vec<CellValue>>,
        row_count: usize,
        duration_ms: f64,
    ) -> Self {
        Self {
            success: true,
            rows,
            columns,
            row_count,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.name.clone())
            .collect()
    }

    pub fn records_json(&self, limit: usize) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.name.clone(), value.to_json()))
                    .collect::<serde_json::Map<String, serde_json::Value>>();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRowCount {
    pub table: String,
    pub rows_read: usize,
    pub rows_embedded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBuildManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub db_path: String,
    pub index_path: String,
    pub metadata_path: String,
    pub model_id: String,
    pub model_name: String,
    pub embedding_dim: usize,
    pub normalization: String,
    pub backend: String,
    pub origin: String,
    pub tables: Vec<TableRowCount>,
    pub indexed_rows: usize,
    pub skipped_rows: usize,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}
