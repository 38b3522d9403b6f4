use std::path::PathBuf;

use anyhow::Result;
use serde_json::{Value, json};

use crate::api::DhisApi;
use crate::backup::{timestamped_backup_name, write_json_snapshot};
use crate::progress::RunLog;

pub const HEALTH_AREAS: &[&str] = &[
    "CC", "CBRM", "FP", "FP CFC", "FP SAM", "FP LPM", "HIV", "HT", "IMCI", "Mal", "MNH", "NBRes",
    "PAC", "STI", "TB", "VMMC", "VP", "WASH", "WEA",
];

/// VMMC splits do not carry their own health area in the name.
const LOOSE_MATCH_AREA: &str = "VMMC";

#[derive(Debug, Clone)]
pub struct IndicatorUpdateOptions {
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorUpdateReport {
    pub updated: Vec<String>,
    pub backup_path: Option<PathBuf>,
}

/// `I{a} + I{b} + ...`; empty for no program indicators.
pub fn create_numerator(program_indicator_uids: &[String]) -> String {
    program_indicator_uids
        .iter()
        .map(|uid| format!("I{{{uid}}}"))
        .collect::<Vec<_>>()
        .join(" + ")
}

fn program_indicator_filters(area: &str) -> Vec<(&'static str, String)> {
    if area == LOOSE_MATCH_AREA {
        vec![
            ("filter", format!("name:like:HNQIS - {area}")),
            ("filter", "name:$like:count".to_string()),
        ]
    } else {
        vec![("filter", format!("name:$like:HNQIS - {area} count"))]
    }
}

fn program_filter(area: &str) -> String {
    if area == LOOSE_MATCH_AREA {
        format!("shortName:like: HNQIS {area}")
    } else {
        format!("shortName:$like: HNQIS {area}")
    }
}

fn array_field(response: &Value, key: &str) -> Vec<Value> {
    response
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn ids(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect()
}

/// Rebuild each health area's count indicator numerator from its program
/// indicators and post all of them in one metadata import.
pub fn run_indicator_update<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    options: &IndicatorUpdateOptions,
) -> Result<IndicatorUpdateReport> {
    let mut backup = Vec::new();
    let mut container = Vec::new();
    let mut report = IndicatorUpdateReport::default();

    for area in HEALTH_AREAS {
        let mut params = vec![("paging", "false".to_string())];
        params.extend(program_indicator_filters(area));
        params.push(("fields", "[id,name]".to_string()));
        let program_indicators =
            ids(&array_field(&api.get_json("programIndicators", &params)?, "programIndicators"));

        let indicators = array_field(
            &api.get_json(
                "indicators",
                &[
                    ("paging", "false".to_string()),
                    ("filter", format!("name:eq:HNQIS - {area} count")),
                    ("fields", ":owner".to_string()),
                ],
            )?,
            "indicators",
        );
        backup.push(Value::Array(indicators.clone()));

        let programs = array_field(
            &api.get_json(
                "programs",
                &[
                    ("paging", "false".to_string()),
                    ("filter", program_filter(area)),
                    ("fields", "id,name".to_string()),
                ],
            )?,
            "programs",
        );
        if programs.len() != program_indicators.len() {
            log.warn(&format!(
                "Warning {area} -- programs: {} VS # count programIndicators {} (ids): {}",
                programs.len(),
                program_indicators.len(),
                json!(program_indicators)
            ));
        }

        match indicators.as_slice() {
            [indicator] => {
                let mut indicator = indicator.clone();
                let name = indicator
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(map) = indicator.as_object_mut() {
                    map.insert(
                        "numerator".to_string(),
                        Value::String(create_numerator(&program_indicators)),
                    );
                }
                container.push(indicator);
                log.info(&format!(
                    "  {area} - Added {} programIndicators to numerator of indicator \"{name}\"",
                    program_indicators.len()
                ));
                report.updated.push(name);
            }
            [] if !program_indicators.is_empty() => {
                log.warn(&format!("No indicator found for health area {area}"));
            }
            [] => {}
            _ => log.warn(&format!(
                "More than one indicator found for health area {area}"
            )),
        }
    }

    let path = write_json_snapshot(
        &options.backup_dir,
        &timestamped_backup_name("healtharea_indicators"),
        &backup,
    )?;
    log.info(&format!("Before state backed up to {}", path.display()));
    report.backup_path = Some(path);

    log.info(&format!("Posting updated indicators to {}...", api.api_url()));
    log.pause_before_writes();
    api.post(
        "metadata",
        &[
            ("importMode", "COMMIT".to_string()),
            ("preheatCache", "false".to_string()),
        ],
        &json!({ "indicators": container }),
    )?;
    Ok(report)
}
