//! Reading and writing sample tables and JSON outputs.
//!
//! Tables are CSV with a header row. Cells are trimmed and may be quoted; rows of differing width
//! are passed through so that the data import can report them.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, Trim, Writer};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors related to sample table files.
pub enum TableError {
    #[error("failed to access {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed table {path:?}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("failed to serialize the output for {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0:?} does not contain a header row")]
    Empty(PathBuf),
}

/// Parses CSV into rows of cells, skipping blank lines.
///
/// # Errors
/// Fails if the input is not valid UTF-8 CSV or cannot be read.
pub fn parse_table<R: io::Read>(reader: R) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(String::from).collect());
    }
    Ok(rows)
}

/// Reads a sample table from a file.
///
/// # Errors
/// Fails if the file cannot be read, is not valid CSV or is empty.
pub fn read_table(path: impl AsRef<Path>) -> Result<Vec<Vec<String>>, TableError> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = parse_table(file).map_err(|source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    if rows.is_empty() {
        return Err(TableError::Empty(path.to_path_buf()));
    }
    debug!("read {} rows from {:?}", rows.len() - 1, path);
    Ok(rows)
}

fn create_parent(path: &Path) -> Result<(), TableError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}

/// Writes rows of cells as CSV, creating the parent directory if needed.
///
/// # Errors
/// Fails if the file cannot be written.
pub fn write_table<S: AsRef<str>>(
    path: impl AsRef<Path>,
    rows: &[Vec<S>],
) -> Result<(), TableError> {
    let path = path.as_ref();
    create_parent(path)?;
    let csv_error = |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = Writer::from_path(path).map_err(csv_error)?;
    for row in rows {
        writer
            .write_record(row.iter().map(|cell| cell.as_ref()))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote {:?}", path);
    Ok(())
}

/// Writes a value as pretty-printed JSON, creating the parent directory if needed.
///
/// # Errors
/// Fails if the value cannot be serialized or the file cannot be written.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), TableError> {
    let path = path.as_ref();
    create_parent(path)?;
    let json = serde_json::to_vec_pretty(value).map_err(|source| TableError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote {:?}", path);
    Ok(())
}
