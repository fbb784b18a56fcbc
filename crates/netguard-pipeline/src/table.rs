//! In-memory tables of raw network records.
//!
//! A [`Table`] is an ordered list of column names plus rows of [`Value`]s.
//! Every row holds exactly one value per column. Tables come from the record
//! store (JSON documents) or from CSV uploads handed in by callers.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the cell; text is parsed leniently.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Canonical key used for categorical matching and label mapping.
    ///
    /// Integral numbers render without a fractional part, so `1.0` and the
    /// text `"1"` share the key `1`.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Number(n) => Some(number_key(*n)),
            Self::Text(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(n) if n.is_finite() => Some(number_key(n)),
                    _ => Some(trimmed.to_string()),
                }
            }
        }
    }

    /// Convert a JSON document field. Nested arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Number(if *b { 1.0 } else { 0.0 })),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| format!("number {n} is not representable as f64")),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Array(_) => Err("nested arrays are not supported".to_string()),
            serde_json::Value::Object(_) => Err("nested objects are not supported".to_string()),
        }
    }

    fn from_csv_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(trimmed.to_string()),
        }
    }

    fn to_csv_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(n) => number_key(*n),
            Self::Text(s) => s.clone(),
        }
    }
}

fn number_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A JSON document as delivered by the record store.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> PipelineResult<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from documents using the union of their fields.
    ///
    /// Columns appear in first-seen order. A field missing from a document is
    /// `Null` in that row. `drop_field` (the store identity) is skipped.
    pub fn from_documents(documents: &[Document], drop_field: &str) -> PipelineResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            for name in doc.keys() {
                if name == drop_field || index.contains_key(name) {
                    continue;
                }
                index.insert(name.clone(), columns.len());
                columns.push(name.clone());
            }
        }

        let mut rows = Vec::with_capacity(documents.len());
        for (doc_idx, doc) in documents.iter().enumerate() {
            let mut row = vec![Value::Null; columns.len()];
            for (name, raw) in doc {
                let Some(&col) = index.get(name) else {
                    continue;
                };
                row[col] = Value::from_json(raw).map_err(|detail| PipelineError::SchemaInference {
                    column: format!("document {doc_idx}, field `{name}`"),
                    detail,
                })?;
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Read a CSV with a header row. Empty fields become `Null`.
    pub fn from_csv_reader<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::new(columns);
        for record in rdr.records() {
            let record = record?;
            table.push_row(record.iter().map(Value::from_csv_field).collect())?;
        }
        Ok(table)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> PipelineResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(Value::to_csv_field))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> PipelineResult<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::mismatch(
                format!("row {}", self.rows.len()),
                format!("expected {} values, found {}", self.columns.len(), row.len()),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Append a column, or replace it when a column of that name exists.
    pub fn with_column(mut self, name: &str, values: Vec<Value>) -> PipelineResult<Self> {
        if values.len() != self.rows.len() {
            return Err(PipelineError::mismatch(
                name,
                format!("expected {} values, found {}", self.rows.len(), values.len()),
            ));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(self)
    }

    /// Keep only the given columns (in the given order) and the given rows.
    pub(crate) fn project(&self, columns: &[usize], rows: impl Iterator<Item = usize>) -> Self {
        let names = columns.iter().map(|&c| self.columns[c].clone()).collect();
        let rows = rows
            .map(|r| columns.iter().map(|&c| self.rows[r][c].clone()).collect())
            .collect();
        Self { columns: names, rows }
    }
}
