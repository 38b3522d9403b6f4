use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};

use crate::error::CsvError;

const CANDIDATE_DELIMITERS: [u8; 2] = [b',', b';'];
const SNIFF_SAMPLE_ROWS: usize = 10;

/// One data row, keeping the header's column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvRow {
    fields: Vec<(String, String)>,
}

impl CsvRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `column`, treating blank values as absent.
    pub fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|value| !value.trim().is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read a delimited file into rows, inferring `,` or `;` from its content.
pub fn load_csv(path: &Path) -> Result<Vec<CsvRow>> {
    let bytes = fs::read(path)
        .map_err(|error| CsvError::new(format!("cannot open {}: {error}", path.display())))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| CsvError::new(format!("{} is not valid UTF-8", path.display())))?;
    parse_csv(&content)
}

pub fn parse_csv(content: &str) -> Result<Vec<CsvRow>> {
    let content = strip_bom(content);
    let delimiter = sniff_delimiter(content)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|error| CsvError::new(format!("failed to read header: {error}")))?
        .iter()
        .map(|name| name.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|error| CsvError::new(format!("data row {}: {error}", index + 1)))?;
        let fields = headers
            .iter()
            .cloned()
            .zip(record.iter().map(ToString::to_string))
            .collect();
        rows.push(CsvRow::new(fields));
    }
    Ok(rows)
}

/// Pick the candidate delimiter that yields a stable column count (> 1)
/// across the first rows. Fails when none or more than one qualify equally.
pub fn sniff_delimiter(content: &str) -> Result<u8> {
    let mut viable: Vec<(u8, usize)> = Vec::new();
    for delimiter in CANDIDATE_DELIMITERS {
        if let Some(columns) = stable_column_count(content, delimiter) {
            viable.push((delimiter, columns));
        }
    }

    match viable.as_slice() {
        [] => Err(CsvError::new("could not determine delimiter (expected ',' or ';')").into()),
        [(delimiter, _)] => Ok(*delimiter),
        [(first, first_cols), (second, second_cols)] => {
            if first_cols == second_cols {
                Err(CsvError::new(format!(
                    "ambiguous delimiter: both ',' and ';' yield {first_cols} columns"
                ))
                .into())
            } else if first_cols > second_cols {
                Ok(*first)
            } else {
                Ok(*second)
            }
        }
        _ => unreachable!("only two candidate delimiters"),
    }
}

fn stable_column_count(content: &str, delimiter: u8) -> Option<usize> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut columns = None;
    for record in reader.records().take(SNIFF_SAMPLE_ROWS) {
        let count = record.ok()?.len();
        match columns {
            None => columns = Some(count),
            Some(expected) if expected != count => return None,
            Some(_) => {}
        }
    }
    columns.filter(|count| *count > 1)
}

/// Write comma-delimited, minimally quoted UTF-8.
pub fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b',')
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .write_record(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}
