//! Plain CSV matrices: one line per row, comma separated, no header.
//! Lines starting with `#` are ignored.

use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array2, ArrayView2};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixIoError {
    #[error("CSV error in '{path}': {source}")]
    Csv { path: String, source: csv::Error },

    #[error("'{path}' line {line}, column {column}: cannot parse '{value}' as a number.")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        value: String,
    },

    #[error("'{path}' line {line} has {found} values, expected {expected}.")]
    Ragged {
        path: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("'{0}' contains no data.")]
    Empty(String),

    #[error("Failed to assemble matrix from '{path}': {source}")]
    Shape {
        path: String,
        source: ndarray::ShapeError,
    },
}

pub fn read_matrix(path: &Path) -> Result<Array2<f64>, MatrixIoError> {
    let display = path.display().to_string();
    let csv_err = |source| MatrixIoError::Csv {
        path: display.clone(),
        source,
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let mut values = Vec::new();
    let mut n_cols = None;
    let mut n_rows = 0;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let line = record.position().map_or(n_rows + 1, |p| p.line() as usize);
        let expected = *n_cols.get_or_insert(record.len());
        if record.len() != expected {
            return Err(MatrixIoError::Ragged {
                path: display.clone(),
                line,
                expected,
                found: record.len(),
            });
        }
        for (column, field) in record.iter().enumerate() {
            let value = field.parse::<f64>().map_err(|_| MatrixIoError::Parse {
                path: display.clone(),
                line,
                column: column + 1,
                value: field.to_string(),
            })?;
            values.push(value);
        }
        n_rows += 1;
    }

    let n_cols = n_cols.filter(|&c| c > 0).ok_or_else(|| MatrixIoError::Empty(display.clone()))?;
    log::debug!("Read {n_rows} x {n_cols} matrix from {display}");
    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|source| MatrixIoError::Shape {
        path: display.clone(),
        source,
    })
}

pub fn write_matrix(path: &Path, matrix: ArrayView2<f64>) -> Result<(), MatrixIoError> {
    let display = path.display().to_string();
    let csv_err = |source| MatrixIoError::Csv {
        path: display.clone(),
        source,
    };
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;
    for row in matrix.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| csv_err(e.into()))?;
    log::debug!("Wrote {} x {} matrix to {display}", matrix.nrows(), matrix.ncols());
    Ok(())
}
