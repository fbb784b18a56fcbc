//! Feature preprocessing: imputation, scaling and categorical encoding.

use crate::error::{PipelineError, PipelineResult};
use crate::schema::{ColumnKind, ColumnSpec, ExpectedSchema};
use crate::table::{Table, Value};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Numeric model input, one row per record.
pub type FeatureMatrix = Array2<f64>;

/// Label codes (`0` safe, `1` not safe), row-aligned with a [`FeatureMatrix`].
pub type TargetVector = Array1<u8>;

const MISSING_CATEGORY: &str = "__missing__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalEncoding {
    #[default]
    OneHot,
    Ordinal,
}

/// Fitted strategy for one input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ColumnTransform {
    Numeric { column: String, median: f64, mean: f64, scale: f64 },
    Categorical { column: String, mode: String, categories: Vec<String>, encoding: CategoricalEncoding },
}

impl ColumnTransform {
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Numeric { column, .. } | Self::Categorical { column, .. } => column,
        }
    }

    /// Number of output features this column expands to.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Numeric { .. } | Self::Categorical { encoding: CategoricalEncoding::Ordinal, .. } => 1,
            Self::Categorical { categories, encoding: CategoricalEncoding::OneHot, .. } => categories.len(),
        }
    }

    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        match self {
            Self::Numeric { column, .. } | Self::Categorical { column, encoding: CategoricalEncoding::Ordinal, .. } => {
                vec![column.clone()]
            }
            Self::Categorical { column, categories, encoding: CategoricalEncoding::OneHot, .. } => {
                categories.iter().map(|c| format!("{column}={c}")).collect()
            }
        }
    }

    fn write(&self, row: usize, value: &Value, out: &mut [f64]) -> PipelineResult<()> {
        match self {
            Self::Numeric { column, median, mean, scale } => {
                let raw = if value.is_null() {
                    *median
                } else {
                    value.as_f64().ok_or_else(|| {
                        PipelineError::mismatch(column.as_str(), format!("row {row}: value {value:?} is not numeric"))
                    })?
                };
                out[0] = (raw - mean) / scale;
            }
            Self::Categorical { mode, categories, encoding, .. } => {
                let key = value.key().unwrap_or_else(|| mode.clone());
                let position = categories.binary_search(&key).ok();
                match encoding {
                    CategoricalEncoding::OneHot => {
                        out.fill(0.0);
                        if let Some(pos) = position {
                            out[pos] = 1.0;
                        }
                    }
                    CategoricalEncoding::Ordinal => {
                        out[0] = position.map_or(-1.0, |pos| pos as f64);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A fitted, deterministic mapping from raw tables to feature matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingTransform {
    columns: Vec<ColumnTransform>,
    target_column: String,
}

impl PreprocessingTransform {
    pub const PAYLOAD_VERSION: u16 = 1;

    #[must_use]
    pub fn columns(&self) -> &[ColumnTransform] {
        &self.columns
    }

    #[must_use]
    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.columns.iter().map(ColumnTransform::width).sum()
    }

    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().flat_map(ColumnTransform::feature_names).collect()
    }

    /// Apply the fitted strategies to `table`.
    ///
    /// Every fitted column must be present. The target column is ignored when
    /// present; any other unknown column is a schema mismatch.
    pub fn transform(&self, table: &Table) -> PipelineResult<FeatureMatrix> {
        for name in table.columns() {
            if *name != self.target_column && !self.columns.iter().any(|c| c.column() == name) {
                return Err(PipelineError::mismatch(name.as_str(), "column was not seen when the transform was fit"));
            }
        }
        let indices = self
            .columns
            .iter()
            .map(|c| {
                table
                    .column_index(c.column())
                    .ok_or_else(|| PipelineError::mismatch(c.column(), "column is missing from the input"))
            })
            .collect::<PipelineResult<Vec<usize>>>()?;

        let mut matrix = FeatureMatrix::zeros((table.len(), self.n_features()));
        for (row_idx, (row, mut out)) in table.rows().iter().zip(matrix.rows_mut()).enumerate() {
            let out = out.as_slice_mut().ok_or_else(|| {
                PipelineError::Estimator("feature matrix row is not contiguous".to_string())
            })?;
            let mut offset = 0;
            for (col, &idx) in self.columns.iter().zip(&indices) {
                let width = col.width();
                col.write(row_idx, &row[idx], &mut out[offset..offset + width])?;
                offset += width;
            }
        }
        Ok(matrix)
    }

    pub fn encode(&self) -> PipelineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(version: u16, payload: &[u8]) -> PipelineResult<Self> {
        if version != Self::PAYLOAD_VERSION {
            return Err(PipelineError::Estimator(format!("unsupported preprocessor payload version {version}")));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Inference-mode entry point.
pub fn transform(table: &Table, preprocessor: &PreprocessingTransform) -> PipelineResult<FeatureMatrix> {
    preprocessor.transform(table)
}

#[derive(Debug, Clone)]
pub struct DataTransformer {
    schema: ExpectedSchema,
    encoding: CategoricalEncoding,
}

impl DataTransformer {
    #[must_use]
    pub fn new(schema: ExpectedSchema, encoding: CategoricalEncoding) -> Self {
        Self { schema, encoding }
    }

    /// Fit the per-column strategies on `table` and apply them in one pass.
    pub fn fit_transform(&self, table: &Table) -> PipelineResult<(FeatureMatrix, TargetVector, PreprocessingTransform)> {
        let columns = self
            .schema
            .features
            .iter()
            .map(|spec| self.fit_column(table, spec))
            .collect::<PipelineResult<Vec<_>>>()?;

        let target = &self.schema.target;
        let target_values = table
            .column(&target.column)
            .ok_or_else(|| PipelineError::mismatch(target.column.as_str(), "target column is missing"))?;
        let labels = target_values
            .enumerate()
            .map(|(row, value)| {
                target.encode(value).map(crate::schema::Label::code).ok_or_else(|| {
                    PipelineError::mismatch(target.column.as_str(), format!("row {row}: {value:?} is not a known label"))
                })
            })
            .collect::<PipelineResult<Vec<u8>>>()?;

        let preprocessor = PreprocessingTransform { columns, target_column: target.column.clone() };
        let features = preprocessor.transform(&table_without_extras(table, &self.schema))?;
        debug!(rows = features.nrows(), features = features.ncols(), "fitted preprocessing transform");
        Ok((features, TargetVector::from(labels), preprocessor))
    }

    fn fit_column(&self, table: &Table, spec: &ColumnSpec) -> PipelineResult<ColumnTransform> {
        let values = table
            .column(&spec.name)
            .ok_or_else(|| PipelineError::mismatch(spec.name.as_str(), "column is missing"))?;

        match spec.kind {
            ColumnKind::Numeric => {
                let mut observed = Vec::with_capacity(table.len());
                let mut nulls = 0usize;
                for (row, value) in values.enumerate() {
                    if value.is_null() {
                        nulls += 1;
                        continue;
                    }
                    observed.push(value.as_f64().ok_or_else(|| {
                        PipelineError::mismatch(spec.name.as_str(), format!("row {row}: value {value:?} is not numeric"))
                    })?);
                }
                let median = median(&mut observed);
                // Scale parameters are computed after imputation.
                let n = (observed.len() + nulls) as f64;
                let (mean, scale) = if n == 0.0 {
                    (0.0, 1.0)
                } else {
                    let sum = observed.iter().sum::<f64>() + median * nulls as f64;
                    let mean = sum / n;
                    let sq = observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        + (median - mean).powi(2) * nulls as f64;
                    let std = (sq / n).sqrt();
                    (mean, if std > 1e-12 { std } else { 1.0 })
                };
                Ok(ColumnTransform::Numeric { column: spec.name.clone(), median, mean, scale })
            }
            ColumnKind::Categorical => {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for key in values.filter_map(Value::key) {
                    *counts.entry(key).or_default() += 1;
                }
                // Ties resolve to the smallest key.
                let mode = counts
                    .iter()
                    .fold(None::<(&String, usize)>, |best, (key, &count)| match best {
                        Some((_, best_count)) if best_count >= count => best,
                        _ => Some((key, count)),
                    })
                    .map_or_else(|| MISSING_CATEGORY.to_string(), |(key, _)| key.clone());
                counts.entry(mode.clone()).or_default();
                Ok(ColumnTransform::Categorical {
                    column: spec.name.clone(),
                    mode,
                    categories: counts.into_keys().collect(),
                    encoding: self.encoding,
                })
            }
        }
    }
}

fn table_without_extras(table: &Table, schema: &ExpectedSchema) -> Table {
    let keep: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| schema.contains(name))
        .map(|(idx, _)| idx)
        .collect();
    table.project(&keep, 0..table.len())
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TargetSpec;

    fn schema() -> ExpectedSchema {
        ExpectedSchema::new(
            vec![ColumnSpec::numeric("SFH"), ColumnSpec::categorical("protocol")],
            TargetSpec::default(),
        )
    }

    fn training_table() -> Table {
        Table::from_rows(
            vec!["SFH".to_string(), "protocol".to_string(), "Result".to_string()],
            vec![
                vec![Value::Number(1.0), Value::from("tcp"), Value::Number(1.0)],
                vec![Value::Number(3.0), Value::from("udp"), Value::Number(-1.0)],
                vec![Value::Null, Value::from("tcp"), Value::Number(1.0)],
                vec![Value::Number(2.0), Value::Null, Value::Number(-1.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fit_transform_imputes_and_encodes() {
        let transformer = DataTransformer::new(schema(), CategoricalEncoding::OneHot);
        let (x, y, pre) = transformer.fit_transform(&training_table()).unwrap();

        assert_eq!(x.dim(), (4, 3));
        assert_eq!(y.to_vec(), vec![1, 0, 1, 0]);
        assert_eq!(pre.feature_names(), vec!["SFH", "protocol=tcp", "protocol=udp"]);

        match &pre.columns()[0] {
            ColumnTransform::Numeric { median, mean, .. } => {
                assert!((median - 2.0).abs() < 1e-12);
                assert!((mean - 2.0).abs() < 1e-12);
            }
            other => panic!("unexpected strategy {other:?}"),
        }
        // Null SFH is imputed with the median, which equals the mean here.
        assert!(x[[2, 0]].abs() < 1e-12);
        // Null protocol is imputed with the mode (tcp).
        assert_eq!(x[[3, 1]], 1.0);
        assert_eq!(x[[3, 2]], 0.0);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let transformer = DataTransformer::new(schema(), CategoricalEncoding::OneHot);
        let (_, _, pre) = transformer.fit_transform(&training_table()).unwrap();
        let a = pre.transform(&training_table()).unwrap();
        let b = pre.transform(&training_table()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_transform_without_target_column() {
        let transformer = DataTransformer::new(schema(), CategoricalEncoding::Ordinal);
        let (_, _, pre) = transformer.fit_transform(&training_table()).unwrap();
        let input = Table::from_rows(
            vec!["protocol".to_string(), "SFH".to_string()],
            vec![vec![Value::from("icmp"), Value::Number(1.0)]],
        )
        .unwrap();
        let x = pre.transform(&input).unwrap();
        assert_eq!(x.dim(), (1, 2));
        // Unseen category under ordinal encoding.
        assert_eq!(x[[0, 1]], -1.0);
    }

    #[test]
    fn test_transform_rejects_schema_mismatch() {
        let transformer = DataTransformer::new(schema(), CategoricalEncoding::OneHot);
        let (_, _, pre) = transformer.fit_transform(&training_table()).unwrap();

        let missing = Table::from_rows(vec!["SFH".to_string()], vec![vec![Value::Number(1.0)]]).unwrap();
        assert!(matches!(pre.transform(&missing), Err(PipelineError::SchemaMismatch { column, .. }) if column == "protocol"));

        let extra = Table::from_rows(
            vec!["SFH".to_string(), "protocol".to_string(), "bytes".to_string()],
            vec![vec![Value::Number(1.0), Value::from("tcp"), Value::Number(5.0)]],
        )
        .unwrap();
        assert!(matches!(pre.transform(&extra), Err(PipelineError::SchemaMismatch { column, .. }) if column == "bytes"));

        let text = Table::from_rows(
            vec!["SFH".to_string(), "protocol".to_string()],
            vec![vec![Value::from("high"), Value::from("tcp")]],
        )
        .unwrap();
        assert!(matches!(pre.transform(&text), Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_constant_column_keeps_unit_scale() {
        let table = Table::from_rows(
            vec!["SFH".to_string(), "protocol".to_string(), "Result".to_string()],
            vec![
                vec![Value::Number(1.0), Value::from("tcp"), Value::Number(1.0)],
                vec![Value::Number(1.0), Value::from("tcp"), Value::Number(-1.0)],
            ],
        )
        .unwrap();
        let (x, _, _) = DataTransformer::new(schema(), CategoricalEncoding::OneHot).fit_transform(&table).unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_payload_roundtrip() {
        let (_, _, pre) =
            DataTransformer::new(schema(), CategoricalEncoding::OneHot).fit_transform(&training_table()).unwrap();
        let bytes = pre.encode().unwrap();
        let decoded = PreprocessingTransform::decode(PreprocessingTransform::PAYLOAD_VERSION, &bytes).unwrap();
        assert_eq!(decoded, pre);
        assert!(PreprocessingTransform::decode(99, &bytes).is_err());
    }

    #[test]
    fn test_median_even_and_odd() {
        assert!((median(&mut [3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&mut [4.0, 1.0, 2.0, 3.0]) - 2.5).abs() < 1e-12);
        assert!(median(&mut []).abs() < 1e-12);
    }
}
