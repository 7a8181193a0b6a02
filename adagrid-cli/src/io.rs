//! Dataset, domain and report files. Tables are CSV with a header row and
//! integer cells; domains are JSON `{"attr": cardinality}` objects.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use adagrid_core::{Domain, SchemaError, ScoreReport, Table};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unable to access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },
    #[error("{origin}, row {row}, column {column}: {value:?} is not a non-negative integer")]
    Cell {
        origin: String,
        row: usize,
        column: String,
        value: String,
    },
    #[error("unable to encode json for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Header plus untyped cells, used before discretization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn file_error(path: &Path) -> impl FnOnce(std::io::Error) -> IoError + '_ {
    move |source| IoError::File {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_error(origin: &str) -> impl Fn(csv::Error) -> IoError + '_ {
    move |source| IoError::Csv {
        origin: origin.to_string(),
        source,
    }
}

pub fn read_domain(path: &Path) -> Result<Domain, IoError> {
    let text = fs::read_to_string(path).map_err(file_error(path))?;
    Ok(Domain::from_json(&text)?)
}

pub fn write_domain(path: &Path, domain: &Domain) -> Result<(), IoError> {
    write_json(path, &domain.to_json())
}

pub fn read_raw(path: &Path) -> Result<RawTable, IoError> {
    let file = fs::File::open(path).map_err(file_error(path))?;
    raw_from_reader(file, &path.display().to_string())
}

pub fn raw_from_reader<R: Read>(reader: R, origin: &str) -> Result<RawTable, IoError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let columns = csv
        .headers()
        .map_err(csv_error(origin))?
        .iter()
        .map(str::to_string)
        .collect();
    let rows = csv
        .records()
        .map(|record| {
            record
                .map(|record| record.iter().map(str::to_string).collect())
                .map_err(csv_error(origin))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawTable { columns, rows })
}

pub fn write_raw(path: &Path, table: &RawTable) -> Result<(), IoError> {
    let origin = path.display().to_string();
    let mut writer = csv::Writer::from_path(path).map_err(csv_error(&origin))?;
    writer.write_record(&table.columns).map_err(csv_error(&origin))?;
    for row in &table.rows {
        writer.write_record(row).map_err(csv_error(&origin))?;
    }
    writer.flush().map_err(file_error(path))
}

pub fn read_table(path: &Path) -> Result<Table, IoError> {
    let file = fs::File::open(path).map_err(file_error(path))?;
    table_from_reader(file, &path.display().to_string())
}

/// Integer-coded table. Cells written as integral floats (`3.0`) are
/// accepted.
pub fn table_from_reader<R: Read>(reader: R, origin: &str) -> Result<Table, IoError> {
    let raw = raw_from_reader(reader, origin)?;
    let mut rows = Vec::with_capacity(raw.rows.len());
    for (row_index, row) in raw.rows.iter().enumerate() {
        let mut cells = Vec::with_capacity(row.len());
        for (column, cell) in raw.columns.iter().zip(row) {
            cells.push(parse_code(cell).ok_or_else(|| IoError::Cell {
                origin: origin.to_string(),
                row: row_index,
                column: column.clone(),
                value: cell.clone(),
            })?);
        }
        rows.push(cells);
    }
    Ok(Table {
        columns: raw.columns,
        rows,
    })
}

fn parse_code(cell: &str) -> Option<usize> {
    if let Ok(code) = cell.parse::<usize>() {
        return Some(code);
    }
    let value = cell.parse::<f64>().ok()?;
    (value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64).then_some(value as usize)
}

pub fn write_table(path: &Path, table: &Table) -> Result<(), IoError> {
    let raw = RawTable {
        columns: table.columns.clone(),
        rows: table
            .rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect(),
    };
    write_raw(path, &raw)
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IoError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(file_error(path))
}

/// One `marginal,error` row per scored marginal, smallest error first.
pub fn write_score_report(path: &Path, report: &ScoreReport) -> Result<(), IoError> {
    let raw = RawTable {
        columns: vec!["marginal".into(), "error".into()],
        rows: report
            .errors
            .iter()
            .map(|entry| vec![entry.marginal.to_string(), entry.error.to_string()])
            .collect(),
    };
    write_raw(path, &raw)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_integer_and_integral_float_cells() {
        let table = table_from_reader("a, b\n0,2\n1.0,0\n".as_bytes(), "inline").unwrap();
        assert_eq!(table.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.rows, vec![vec![0, 2], vec![1, 0]]);
    }

    #[test]
    fn rejects_negative_and_fractional_cells() {
        for bad in ["a\n-1\n", "a\n0.5\n", "a\nx\n"] {
            assert!(matches!(
                table_from_reader(bad.as_bytes(), "inline"),
                Err(IoError::Cell { row: 0, .. })
            ));
        }
    }

    #[test]
    fn domain_and_table_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let domain = Domain::new([("z", 4), ("a", 2)]).unwrap();
        let domain_path = dir.path().join("domain.json");
        write_domain(&domain_path, &domain).unwrap();
        assert_eq!(read_domain(&domain_path).unwrap(), domain);

        let table = Table {
            columns: vec!["z".into(), "a".into()],
            rows: vec![vec![3, 1], vec![0, 0]],
        };
        let table_path = dir.path().join("data.csv");
        write_table(&table_path, &table).unwrap();
        assert_eq!(read_table(&table_path).unwrap(), table);
    }
}
