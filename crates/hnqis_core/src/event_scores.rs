use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

use crate::api::DhisApi;
use crate::progress::RunLog;

pub const THRESHOLD: f64 = 1.0;
pub const ORDER_FORWARD: &str = "FEkGksxhOpH";
pub const OVERALL_SCORE: &str = "Y8Nmpp7RhXw";
pub const RESET_ORDER_FORWARD: &str = "9999";

pub const MISMATCH_CSV_HEADER: &str = "event_date,program,name,event,_OverallScore,0CS-100,diff";

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub event_date: String,
    pub program_id: String,
    pub program_name: String,
    pub event_id: String,
    pub overall_score: f64,
    pub root_score: f64,
}

impl Mismatch {
    pub fn diff(&self) -> f64 {
        (self.overall_score - self.root_score).abs()
    }

    pub fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{:?},{:?},{:?}",
            self.event_date,
            self.program_id,
            self.program_name,
            self.event_id,
            self.overall_score,
            self.root_score,
            self.diff()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub mismatches: Vec<Mismatch>,
    pub fixed: usize,
}

fn data_values(event: &Value) -> impl Iterator<Item = &Value> {
    event
        .get("dataValues")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn data_element(value: &Value) -> Option<&str> {
    value.get("dataElement").and_then(Value::as_str)
}

fn raw_value(value: &Value) -> Option<&str> {
    value.get("value").and_then(Value::as_str)
}

fn root_score_value<'a>(event: &'a Value, root_scores: &BTreeSet<String>) -> Option<&'a str> {
    data_values(event)
        .find(|value| data_element(value).is_some_and(|id| root_scores.contains(id)))
        .and_then(raw_value)
}

/// A mismatch is an event whose overall score differs from its root composite
/// score by more than [`THRESHOLD`]. Events lacking either value are skipped.
pub fn analyze_event(
    program: &Value,
    event: &Value,
    root_scores: &BTreeSet<String>,
) -> Option<Mismatch> {
    let overall = data_values(event)
        .find(|value| data_element(value) == Some(OVERALL_SCORE))
        .and_then(raw_value)?
        .trim()
        .parse::<f64>()
        .ok()?;
    let root = root_score_value(event, root_scores)?
        .trim()
        .parse::<f64>()
        .ok()?;
    if (overall - root).abs() <= THRESHOLD {
        return None;
    }
    let text = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Some(Mismatch {
        event_date: text(event, "eventDate"),
        program_id: text(program, "id"),
        program_name: text(program, "name"),
        event_id: text(event, "event"),
        overall_score: overall,
        root_score: root,
    })
}

/// Copy the root composite score into the overall score and reset order
/// forward.
pub fn fix_event(event: &Value, root_scores: &BTreeSet<String>) -> Value {
    let root = root_score_value(event, root_scores).map(ToString::to_string);
    let mut fixed = event.clone();
    if let Some(values) = fixed.get_mut("dataValues").and_then(Value::as_array_mut) {
        for value in values {
            let replacement = match data_element(value) {
                Some(ORDER_FORWARD) => Some(RESET_ORDER_FORWARD.to_string()),
                Some(OVERALL_SCORE) => root.clone(),
                _ => None,
            };
            if let (Some(replacement), Some(map)) = (replacement, value.as_object_mut()) {
                map.insert("value".to_string(), Value::String(replacement));
            }
        }
    }
    fixed
}

fn list<A: DhisApi>(api: &mut A, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<Value>> {
    Ok(api
        .get_json(endpoint, params)?
        .get(endpoint)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Scan every HNQIS program's events; with `fix`, rewrite the mismatching ones.
pub fn run_scan_mismatches<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    fix: bool,
) -> Result<ScanReport> {
    let programs = list(
        api,
        "programs",
        &[
            ("paging", "false".to_string()),
            ("filter", "name:like:HNQIS".to_string()),
            ("fields", "id,name".to_string()),
        ],
    )?;
    let root_scores = list(
        api,
        "dataElements",
        &[
            ("filter", "shortName:like:.0CS-100".to_string()),
            ("filter", "name:!ilike:_DEL".to_string()),
            ("paging", "false".to_string()),
            ("fields", "id".to_string()),
        ],
    )?
    .iter()
    .filter_map(|element| element.get("id").and_then(Value::as_str))
    .map(ToString::to_string)
    .collect::<BTreeSet<_>>();

    log.info(MISMATCH_CSV_HEADER);
    let mut report = ScanReport::default();
    let mut to_fix = Vec::new();
    for program in &programs {
        let program_id = program.get("id").and_then(Value::as_str).unwrap_or_default();
        let events = list(
            api,
            "events",
            &[
                ("program", program_id.to_string()),
                ("skipPaging", "true".to_string()),
                ("fields", "[*]".to_string()),
            ],
        )?;
        for event in events {
            if let Some(mismatch) = analyze_event(program, &event, &root_scores) {
                log.info(&mismatch.csv_line());
                report.mismatches.push(mismatch);
                to_fix.push(event);
            }
        }
    }

    if to_fix.is_empty() || !fix {
        log.warn("Not fixing events");
        return Ok(report);
    }

    log.info("Fixing those events and resetting _Order Forward...");
    log.pause_before_writes();
    let total = to_fix.len();
    for (index, event) in to_fix.iter().enumerate() {
        let event_id = event.get("event").and_then(Value::as_str).unwrap_or_default();
        log.info(&format!("[{}/{total}] Pushing event {event_id}...", index + 1));
        api.put(
            &format!("events/{event_id}"),
            &[],
            &fix_event(event, &root_scores),
        )?;
        report.fixed += 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::progress::recording::RecordingLog;

    const ROOT: &str = "rootScore01";

    fn roots() -> BTreeSet<String> {
        BTreeSet::from([ROOT.to_string()])
    }

    fn event(overall: &str, root: &str) -> Value {
        json!({
            "event": "ev000000001",
            "eventDate": "2018-03-01",
            "dataValues": [
                {"dataElement": OVERALL_SCORE, "value": overall},
                {"dataElement": ROOT, "value": root},
                {"dataElement": ORDER_FORWARD, "value": "3"},
                {"dataElement": "otherElemnt", "value": "keep"}
            ]
        })
    }

    #[test]
    fn within_threshold_is_not_a_mismatch() {
        let program = json!({"id": "p", "name": "HNQIS FP"});
        assert!(analyze_event(&program, &event("80", "80.5"), &roots()).is_none());
        assert!(analyze_event(&program, &event("80", "81"), &roots()).is_none());
    }

    #[test]
    fn beyond_threshold_is_reported() {
        let program = json!({"id": "p", "name": "HNQIS FP"});
        let mismatch = analyze_event(&program, &event("70", "85.5"), &roots()).expect("mismatch");
        assert_eq!(mismatch.diff(), 15.5);
        assert_eq!(
            mismatch.csv_line(),
            "2018-03-01,p,HNQIS FP,ev000000001,70.0,85.5,15.5"
        );
    }

    #[test]
    fn missing_values_are_skipped() {
        let program = json!({"id": "p"});
        let partial = json!({"event": "e", "dataValues": [{"dataElement": OVERALL_SCORE, "value": "1"}]});
        assert!(analyze_event(&program, &partial, &roots()).is_none());
        assert!(analyze_event(&program, &json!({"event": "e"}), &roots()).is_none());
    }

    #[test]
    fn fix_copies_root_score_and_resets_order_forward() {
        let fixed = fix_event(&event("70", "85.5"), &roots());
        let values = fixed["dataValues"].as_array().expect("values");
        assert_eq!(values[0]["value"], "85.5");
        assert_eq!(values[1]["value"], "85.5");
        assert_eq!(values[2]["value"], RESET_ORDER_FORWARD);
        assert_eq!(values[3]["value"], "keep");
    }

    #[test]
    fn run_fixes_only_when_requested() {
        let api_fixture = || {
            MockApi::default()
                .with("programs", json!({"programs": [{"id": "p", "name": "HNQIS FP"}]}))
                .with("dataElements", json!({"dataElements": [{"id": ROOT}]}))
                .with("events", json!({"events": [event("70", "85.5"), event("80", "80")]}))
        };

        let mut api = api_fixture();
        let mut log = RecordingLog::default();
        let report = run_scan_mismatches(&mut api, &mut log, false).expect("scan");
        assert_eq!(report.mismatches.len(), 1);
        assert!(api.writes.is_empty());
        assert_eq!(log.warnings, vec!["Not fixing events".to_string()]);

        let mut api = api_fixture();
        let mut log = RecordingLog::default();
        let report = run_scan_mismatches(&mut api, &mut log, true).expect("scan");
        assert_eq!(report.fixed, 1);
        assert_eq!(api.writes[0].endpoint, "events/ev000000001");
        assert_eq!(log.infos[0], MISMATCH_CSV_HEADER);
    }
}
