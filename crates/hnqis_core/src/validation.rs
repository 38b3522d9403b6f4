use std::collections::BTreeSet;

use anyhow::Result;

use crate::csv_input::CsvRow;
use crate::error::ValidationError;
use crate::uid::is_valid_uid;

/// Every listed column must exist with a non-blank value in the first row.
pub fn require_columns(rows: &[CsvRow], columns: &[&str]) -> Result<()> {
    let first = rows.first().ok_or(ValidationError::Empty)?;
    if columns.iter().all(|column| first.non_empty(column).is_some()) {
        return Ok(());
    }
    Err(ValidationError::MissingColumns {
        expected: columns
            .iter()
            .map(|column| format!("'{column}'"))
            .collect::<Vec<_>>()
            .join(" and "),
    }
    .into())
}

/// Values of `column` must all be UID-shaped. Row numbers are 1-based data rows.
pub fn require_uid_column(rows: &[CsvRow], column: &str) -> Result<()> {
    for (index, row) in rows.iter().enumerate() {
        let value = row.get(column).unwrap_or("");
        if !is_valid_uid(value) {
            return Err(ValidationError::InvalidUid {
                row: index + 1,
                column: column.to_string(),
                value: value.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Values of `column` must be unique; the error lists each duplicate once.
pub fn require_unique(rows: &[CsvRow], column: &str) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut duplicates = Vec::new();
    for row in rows {
        let value = row.get(column).unwrap_or("");
        if !seen.insert(value) && !duplicates.contains(&value) {
            duplicates.push(value);
        }
    }
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(ValidationError::Duplicates {
        column: column.to_string(),
        values: duplicates.join(", "),
    }
    .into())
}

pub fn require_uid_argument(value: &str) -> Result<()> {
    if is_valid_uid(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidArgumentUid {
            value: value.to_string(),
        }
        .into())
    }
}
