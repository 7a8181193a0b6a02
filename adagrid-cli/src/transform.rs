//! Discretization of raw CSV columns into integer codes and back.
//!
//! A schema maps column names to one of three encodings:
//! `{"bins": n, "min": lo, "max": hi}` cuts `[lo, hi]` into `n` equal
//! half-open bins, `{"values": [...]}` codes categories by position, and
//! `{"min": lo, "max": hi}` shifts integers by `lo`. Schemas may be wrapped
//! in a top-level `"schema"` key.

use adagrid_core::{Domain, SchemaError, Table};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::io::RawTable;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("column {column}, row {row}: {value:?} {reason}")]
    Value {
        column: String,
        row: usize,
        value: String,
        reason: &'static str,
    },
    #[error("schema column {0} is missing from the table")]
    MissingColumn(String),
    #[error(transparent)]
    Domain(#[from] SchemaError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[default]
    #[serde(alias = "float64", alias = "float32")]
    Float,
    #[serde(alias = "int64", alias = "int32")]
    Int,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Binned {
        bins: usize,
        min: f64,
        max: f64,
        #[serde(default)]
        dtype: Dtype,
    },
    Categorical {
        values: Vec<Value>,
    },
    Offset {
        min: i64,
        max: i64,
    },
}

impl ColumnSpec {
    pub fn cardinality(&self) -> usize {
        match self {
            ColumnSpec::Binned { bins, .. } => *bins,
            ColumnSpec::Categorical { values } => values.len(),
            ColumnSpec::Offset { min, max } => offset_span(*min, *max).unwrap_or(0),
        }
    }

    fn validate(&self, column: &str) -> Result<(), TransformError> {
        let ok = match self {
            ColumnSpec::Binned { bins, min, max, .. } => *bins > 0 && min < max,
            ColumnSpec::Categorical { values } => !values.is_empty(),
            ColumnSpec::Offset { min, max } => offset_span(*min, *max).is_some(),
        };
        if ok {
            Ok(())
        } else {
            Err(TransformError::Schema(format!("column {column} has an empty range")))
        }
    }

    /// `bins + 1` edges from `min` to `max`; inner edges are truncated for
    /// integer columns.
    fn edges(&self) -> Vec<f64> {
        let ColumnSpec::Binned { bins, min, max, dtype } = *self else {
            return Vec::new();
        };
        let step = (max - min) / bins as f64;
        let mut edges: Vec<f64> = (0..bins)
            .map(|i| {
                let edge = min + step * i as f64;
                match dtype {
                    Dtype::Int => edge.trunc(),
                    Dtype::Float => edge,
                }
            })
            .collect();
        edges.push(max);
        edges
    }

    fn encode(&self, cell: &str) -> Result<usize, &'static str> {
        match self {
            ColumnSpec::Binned { .. } => {
                let value: f64 = cell.parse().map_err(|_| "is not a number")?;
                let edges = self.edges();
                edges
                    .windows(2)
                    .position(|w| w[0] <= value && value < w[1])
                    .ok_or("is outside the binned range")
            }
            ColumnSpec::Categorical { values } => values
                .iter()
                .position(|label| label_of(label) == cell)
                .ok_or("is not a listed category"),
            ColumnSpec::Offset { min, max } => {
                let value: i64 = cell.parse().map_err(|_| "is not an integer")?;
                if (*min..=*max).contains(&value) {
                    Ok((value - min) as usize)
                } else {
                    Err("is outside the offset range")
                }
            }
        }
    }

    /// Bin midpoints, except that the outer bins decode to one unit short of
    /// their inner edge rather than the middle of the whole bin.
    fn decode(&self, code: usize) -> Option<String> {
        match self {
            ColumnSpec::Binned { bins, dtype, .. } => {
                let edges = self.edges();
                let (mut lo, mut hi) = (*edges.get(code)?, *edges.get(code + 1)?);
                if *bins > 1 {
                    if code == 0 {
                        lo = hi - 2.0;
                    }
                    if code + 1 == *bins {
                        hi = lo + 2.0;
                    }
                }
                let mid = (lo + hi) / 2.0;
                Some(match dtype {
                    Dtype::Int => (mid.trunc() as i64).to_string(),
                    Dtype::Float => mid.to_string(),
                })
            }
            ColumnSpec::Categorical { values } => values.get(code).map(label_of),
            ColumnSpec::Offset { min, .. } => (code < self.cardinality()).then(|| (min + code as i64).to_string()),
        }
    }
}

/// `max - min + 1` when the range is non-empty and fits in a `usize`.
fn offset_span(min: i64, max: i64) -> Option<usize> {
    let span = max.checked_sub(min)?.checked_add(1)?;
    usize::try_from(span).ok().filter(|span| *span > 0)
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Column encodings in file order.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    columns: Vec<(String, ColumnSpec)>,
}

impl Schema {
    pub fn from_json(text: &str) -> Result<Self, TransformError> {
        let value: Value = serde_json::from_str(text).map_err(|err| TransformError::Schema(err.to_string()))?;
        let value = match value {
            Value::Object(mut map) if map.contains_key("schema") => map.remove("schema").unwrap_or(Value::Null),
            other => other,
        };
        let Value::Object(map) = value else {
            return Err(TransformError::Schema("expected an object of columns".into()));
        };
        let mut columns = Vec::with_capacity(map.len());
        for (name, spec) in map {
            let spec: ColumnSpec = serde_json::from_value(spec)
                .map_err(|err| TransformError::Schema(format!("column {name}: {err}")))?;
            spec.validate(&name)?;
            columns.push((name, spec));
        }
        Ok(Self { columns })
    }

    pub fn get(&self, column: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, spec)| spec)
    }

    pub fn columns(&self) -> &[(String, ColumnSpec)] {
        &self.columns
    }
}

/// Encodes the schema's columns of `raw`, in table order, and derives their
/// domain. Columns the schema does not mention are dropped.
pub fn discretize(raw: &RawTable, schema: &Schema) -> Result<(Table, Domain), TransformError> {
    for (name, _) in schema.columns() {
        if !raw.columns.contains(name) {
            return Err(TransformError::MissingColumn(name.clone()));
        }
    }
    let kept: Vec<(usize, &str, &ColumnSpec)> = raw
        .columns
        .iter()
        .enumerate()
        .filter_map(|(index, name)| schema.get(name).map(|spec| (index, name.as_str(), spec)))
        .collect();
    let mut rows = Vec::with_capacity(raw.rows.len());
    for (row_index, row) in raw.rows.iter().enumerate() {
        let mut codes = Vec::with_capacity(kept.len());
        for &(index, name, spec) in &kept {
            let cell = row.get(index).map(String::as_str).unwrap_or_default();
            let code = spec.encode(cell).map_err(|reason| TransformError::Value {
                column: name.to_string(),
                row: row_index,
                value: cell.to_string(),
                reason,
            })?;
            codes.push(code);
        }
        rows.push(codes);
    }
    let domain = Domain::new(kept.iter().map(|&(_, name, spec)| (name, spec.cardinality())))?;
    let table = Table {
        columns: kept.iter().map(|&(_, name, _)| name.to_string()).collect(),
        rows,
    };
    Ok((table, domain))
}

/// Maps codes back to representative raw values: bin midpoints (outer bins
/// hug their inner edge), category labels and shifted integers. Columns outside the schema pass through.
pub fn undo_discretize(table: &Table, schema: &Schema) -> Result<RawTable, TransformError> {
    let specs: Vec<Option<&ColumnSpec>> = table.columns.iter().map(|name| schema.get(name)).collect();
    let mut rows = Vec::with_capacity(table.rows.len());
    for (row_index, row) in table.rows.iter().enumerate() {
        let mut cells = Vec::with_capacity(row.len());
        for ((code, spec), name) in row.iter().zip(&specs).zip(&table.columns) {
            let cell = match spec {
                Some(spec) => spec.decode(*code).ok_or_else(|| TransformError::Value {
                    column: name.clone(),
                    row: row_index,
                    value: code.to_string(),
                    reason: "is not a valid code",
                })?,
                None => code.to_string(),
            };
            cells.push(cell);
        }
        rows.push(cells);
    }
    Ok(RawTable {
        columns: table.columns.clone(),
        rows,
    })
}
