use crate::error::{Result, TrainError};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Tokens treated as a missing value
const MISSING_VALUES: &[&str] = &["", ".", "na", "nan"];

/// Tab separated table with a header row
#[derive(Debug, Clone)]
pub struct TsvTable {
    path: PathBuf,
    columns: HashMap<String, usize>,
    rows: Vec<TsvRow>,
}

/// One data row with its 1-based line number in the source file
#[derive(Debug, Clone)]
pub struct TsvRow {
    pub line: usize,
    pub fields: Vec<String>,
}

impl TsvTable {
    /// Reads a table from disk
    pub fn read(path: &Path) -> Result<Self> {
        let reader = reader_builder()
            .from_path(path)
            .map_err(|e| table_error(path, e))?;
        Self::from_reader(path, reader)
    }

    /// Parses table content; `path` is only used in error messages
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        Self::from_reader(path, reader_builder().from_reader(content.as_bytes()))
    }

    /// Collects the header and data rows
    ///
    /// Blank lines are skipped. Every data row must have as many fields as
    /// the header. Double-quoted fields may hold tabs.
    fn from_reader<R: io::Read>(path: &Path, mut reader: csv::Reader<R>) -> Result<Self> {
        let mut records = reader
            .records()
            .map(|r| r.map_err(|e| table_error(path, e)))
            .filter(|r| !matches!(r, Ok(rec) if rec.iter().all(str::is_empty)));

        let header = records.next().transpose()?.ok_or_else(|| TrainError::MalformedTsv {
            path: path.to_path_buf(),
            line: 1,
            message: "missing header row".to_string(),
        })?;
        let columns: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        let mut rows = Vec::new();
        for record in records {
            let record = record?;
            let line = record_line(&record);
            if record.len() != header.len() {
                return Err(TrainError::MalformedTsv {
                    path: path.to_path_buf(),
                    line,
                    message: format!("expected {} fields, found {}", header.len(), record.len()),
                });
            }
            rows.push(TsvRow {
                line,
                fields: record.iter().map(str::to_string).collect(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[TsvRow] {
        &self.rows
    }

    /// Index of an optional column
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    /// Index of a column the table must have
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| TrainError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        })
    }

    /// Field of `row`, `None` when the column is absent or the value missing
    pub fn value<'a>(&self, row: &'a TsvRow, column: Option<usize>) -> Option<&'a str> {
        column
            .and_then(|c| row.fields.get(c))
            .map(String::as_str)
            .filter(|v| !is_missing(v))
    }

    /// Builds a malformed-row error pointing at `row`
    pub fn error(&self, row: &TsvRow, message: impl Into<String>) -> TrainError {
        TrainError::MalformedTsv {
            path: self.path.clone(),
            line: row.line,
            message: message.into(),
        }
    }

    /// Parses an optional binary label (`0`, `1`, `0.0`, `1.0`)
    pub fn label(&self, row: &TsvRow, column: Option<usize>, name: &str) -> Result<Option<u8>> {
        match self.value(row, column) {
            None => Ok(None),
            Some(raw) => parse_label(raw)
                .map(Some)
                .ok_or_else(|| self.error(row, format!("invalid {} label '{}'", name, raw))),
        }
    }

    /// Parses an optional numeric field
    pub fn number<T: std::str::FromStr>(
        &self,
        row: &TsvRow,
        column: Option<usize>,
        name: &str,
    ) -> Result<Option<T>> {
        match self.value(row, column) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| self.error(row, format!("invalid {} '{}'", name, raw))),
        }
    }
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All);
    builder
}

fn record_line(record: &csv::StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}

/// Maps reader failures onto the manifest error, keeping I/O errors apart
fn table_error(path: &Path, err: csv::Error) -> TrainError {
    let line = err.position().map_or(0, |p| p.line() as usize);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => TrainError::IoError(e),
        _ => TrainError::MalformedTsv {
            path: path.to_path_buf(),
            line,
            message,
        },
    }
}

/// Checks whether a raw field counts as missing
pub fn is_missing(value: &str) -> bool {
    MISSING_VALUES.contains(&value.trim().to_lowercase().as_str())
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw.trim() {
        "0" | "0.0" => Some(0),
        "1" | "1.0" => Some(1),
        _ => None,
    }
}
