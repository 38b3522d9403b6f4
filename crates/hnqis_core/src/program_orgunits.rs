use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Result;
use serde_json::{Value, json};

use crate::api::DhisApi;
use crate::attribute_setter::fetch_object;
use crate::attribute_values::MetadataObject;
use crate::backup::write_json_snapshot;
use crate::csv_input::CsvRow;
use crate::error::ValidationError;
use crate::progress::{RunLog, progress_line};
use crate::uid::is_valid_uid;
use crate::validation::{require_columns, require_uid_column, require_unique};

pub const ORGUNIT_COLUMN: &str = "orgunit";
pub const ORGANISATION_UNITS: &str = "organisationUnits";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Drop the program's current org units and install exactly the new list.
    Replace,
    /// Keep current org units not in the new list, then add the new ones.
    Append,
}

#[derive(Debug, Clone)]
pub struct ProgramOrgunitOptions {
    pub mode: AssignMode,
    pub backup_dir: PathBuf,
}

pub fn validate_program_csv(rows: &[CsvRow]) -> Result<()> {
    require_columns(rows, &[ORGUNIT_COLUMN])?;
    let first = &rows[0];
    if first.columns().filter(|column| *column != ORGUNIT_COLUMN).count() == 0 {
        return Err(ValidationError::NoPrograms.into());
    }
    require_unique(rows, ORGUNIT_COLUMN)?;
    require_uid_column(rows, ORGUNIT_COLUMN)?;
    for column in first.columns() {
        if column != ORGUNIT_COLUMN && !is_valid_uid(column) {
            return Err(ValidationError::InvalidHeaderUid {
                column: column.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn is_member(flag: &str) -> bool {
    flag.trim().eq_ignore_ascii_case("yes")
}

/// Program UID -> org units flagged `yes`, in CSV row order.
pub fn program_orgunit_map(rows: &[CsvRow]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows {
        let Some(orgunit) = row.get(ORGUNIT_COLUMN) else {
            continue;
        };
        for (column, flag) in row.iter() {
            if column != ORGUNIT_COLUMN && is_member(flag) {
                map.entry(column.to_string())
                    .or_default()
                    .push(orgunit.to_string());
            }
        }
    }
    map
}

/// Copy of `program` with its `organisationUnits` rewritten per `mode`. Each
/// id ends up in exactly one entry.
pub fn set_program_orgunits(
    program: &MetadataObject,
    orgunits: &[String],
    mode: AssignMode,
) -> MetadataObject {
    let mut seen = BTreeSet::new();
    let incoming = orgunits
        .iter()
        .filter(|uid| seen.insert(uid.as_str()))
        .collect::<Vec<_>>();

    let mut entries = match mode {
        AssignMode::Replace => Vec::new(),
        AssignMode::Append => program
            .get(ORGANISATION_UNITS)
            .and_then(Value::as_array)
            .map(|current| {
                current
                    .iter()
                    .filter(|entry| {
                        entry
                            .get("id")
                            .and_then(Value::as_str)
                            .is_none_or(|id| !seen.contains(id))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default(),
    };
    entries.extend(incoming.into_iter().map(|uid| json!({ "id": uid })));

    let mut updated = program.clone();
    updated.insert(ORGANISATION_UNITS.to_string(), Value::Array(entries));
    updated
}

fn server_program_ids<A: DhisApi>(api: &mut A) -> Result<BTreeSet<String>> {
    let response = api.get_json(
        "programs",
        &[
            ("fields", "id".to_string()),
            ("paging", "false".to_string()),
        ],
    )?;
    Ok(response
        .get("programs")
        .and_then(Value::as_array)
        .map(|programs| {
            programs
                .iter()
                .filter_map(|program| program.get("id").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// Assign org units to every program column in the CSV, backing up each
/// program before posting it. Returns the number of programs written.
pub fn run_program_orgunits<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    rows: &[CsvRow],
    options: &ProgramOrgunitOptions,
) -> Result<usize> {
    validate_program_csv(rows)?;

    let known = server_program_ids(api)?;
    let mut map = program_orgunit_map(rows);
    map.retain(|program_uid, _| {
        let exists = known.contains(program_uid);
        if !exists {
            log.warn(&format!(
                "Program {program_uid} is not a valid program: {}/programs/{program_uid}.json",
                api.api_url()
            ));
        }
        exists
    });

    log.pause_before_writes();
    let total = map.len();
    for (index, (program_uid, orgunits)) in map.iter().enumerate() {
        let program = fetch_object(api, &format!("programs/{program_uid}"), ":owner")?;
        write_json_snapshot(
            &options.backup_dir,
            &format!("backup_{program_uid}.json"),
            &program,
        )?;

        let updated = set_program_orgunits(&program, orgunits, options.mode);
        let assigned = updated
            .get(ORGANISATION_UNITS)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let name = program
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(program_uid);

        api.post(
            "metadata",
            &[
                ("mergeMode", "REPLACE".to_string()),
                ("strategy", "UPDATE".to_string()),
            ],
            &json!({ "programs": [Value::Object(updated)] }),
        )?;
        log.info(&progress_line(
            index + 1,
            total,
            &format!(
                "Assigned {} (total: {assigned}) OrgUnits to Program {name}",
                orgunits.len()
            ),
        ));
    }
    Ok(total)
}
