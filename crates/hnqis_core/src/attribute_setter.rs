use anyhow::{Result, bail};
use serde_json::Value;

use crate::api::DhisApi;
use crate::attribute_values::{MetadataObject, merge_attribute_value};
use crate::csv_input::CsvRow;
use crate::progress::{RunLog, progress_line};
use crate::validation::{require_columns, require_uid_argument, require_uid_column, require_unique};

pub const KEY_COLUMN: &str = "key";
pub const VALUE_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    OrganisationUnits,
    Users,
}

impl ObjectType {
    /// Collection endpoint, e.g. `users`.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::OrganisationUnits => "organisationUnits",
            Self::Users => "users",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Self::OrganisationUnits => "organisationUnit",
            Self::Users => "user",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeSetterOptions {
    pub object_type: ObjectType,
    pub attribute_uid: String,
}

pub fn validate_attribute_csv(rows: &[CsvRow]) -> Result<()> {
    require_columns(rows, &[KEY_COLUMN, VALUE_COLUMN])?;
    require_uid_column(rows, KEY_COLUMN)?;
    require_unique(rows, KEY_COLUMN)?;
    Ok(())
}

/// Warn (but continue) when the attribute is not enabled for the object type.
pub fn check_attribute_assignment<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    attribute_uid: &str,
    object_type: ObjectType,
) -> Result<()> {
    let flag = format!("{}Attribute", object_type.singular());
    let attribute = api.get_json(
        &format!("attributes/{attribute_uid}"),
        &[("fields", format!("id,name,{flag}"))],
    )?;
    if attribute.get(&flag).and_then(Value::as_bool) != Some(true) {
        log.warn(&format!(
            "Attribute {attribute_uid} is not assigned to type {}",
            object_type.singular()
        ));
    }
    Ok(())
}

/// Set one attribute value per CSV row on the referenced objects. Returns the
/// number of objects written.
pub fn run_attribute_setter<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    rows: &[CsvRow],
    options: &AttributeSetterOptions,
) -> Result<usize> {
    require_uid_argument(&options.attribute_uid)?;
    validate_attribute_csv(rows)?;
    check_attribute_assignment(api, log, &options.attribute_uid, options.object_type)?;

    let endpoint = options.object_type.endpoint();
    log.info(&format!(
        "Updating Attribute Values for Attribute {} for {} {endpoint}...",
        options.attribute_uid,
        rows.len()
    ));
    log.pause_before_writes();

    let total = rows.len();
    for (index, row) in rows.iter().enumerate() {
        let uid = row.get(KEY_COLUMN).unwrap_or_default();
        let value = row.get(VALUE_COLUMN).unwrap_or_default();
        let path = format!("{endpoint}/{uid}");

        let current = fetch_object(api, &path, ":owner")?;
        let updated = merge_attribute_value(&current, &options.attribute_uid, value);
        api.put(&path, &[], &Value::Object(updated))?;

        log.info(&progress_line(
            index + 1,
            total,
            &format!(
                "Updated AttributeValue: {value} - {}: {uid}",
                options.object_type.singular()
            ),
        ));
    }
    Ok(total)
}

/// GET `path` with a `fields` selector and require a JSON object back.
pub(crate) fn fetch_object<A: DhisApi>(api: &mut A, path: &str, fields: &str) -> Result<MetadataObject> {
    match api.get_json(path, &[("fields", fields.to_string())])? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object from {path}, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::csv_input::parse_csv;
    use crate::error::{ErrorKind, ValidationError};
    use crate::progress::recording::RecordingLog;

    const ATTRIBUTE: &str = "M8fCOxtkURr";

    fn options() -> AttributeSetterOptions {
        AttributeSetterOptions {
            object_type: ObjectType::Users,
            attribute_uid: ATTRIBUTE.to_string(),
        }
    }

    #[test]
    fn valid_csv_passes() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,a\nHlDMbDWUmTy,b\n").expect("parse");
        assert!(validate_attribute_csv(&rows).is_ok());
    }

    #[test]
    fn semicolon_csv_passes() {
        let rows = parse_csv("key;value\nDXyJmlo9rge;a,b\nHlDMbDWUmTy;c\n").expect("parse");
        assert!(validate_attribute_csv(&rows).is_ok());
        assert_eq!(rows[0].get("value"), Some("a,b"));
    }

    #[test]
    fn duplicate_objects_rejected() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,a\nDXyJmlo9rge,b\n").expect("parse");
        let error = validate_attribute_csv(&rows).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<ValidationError>(),
            Some(ValidationError::Duplicates { .. })
        ));
    }

    #[test]
    fn non_uid_key_rejected() {
        let rows = parse_csv("key,value\nnotauid,a\n").expect("parse");
        let error = validate_attribute_csv(&rows).expect_err("must fail");
        assert_eq!(ErrorKind::of(&error), ErrorKind::Validation);
    }

    #[test]
    fn wrong_headers_rejected() {
        let rows = parse_csv("uid,val\nDXyJmlo9rge,a\n").expect("parse");
        assert!(validate_attribute_csv(&rows).is_err());
    }

    #[test]
    fn run_updates_each_object_and_logs_progress() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,NEW123\nHlDMbDWUmTy,other\n").expect("parse");
        let mut api = MockApi::default()
            .with(
                &format!("attributes/{ATTRIBUTE}"),
                json!({"id": ATTRIBUTE, "userAttribute": true}),
            )
            .with(
                "users/DXyJmlo9rge",
                json!({
                    "id": "DXyJmlo9rge",
                    "attributeValues": [{"value": "hello", "attribute": {"id": ATTRIBUTE}}]
                }),
            )
            .with("users/HlDMbDWUmTy", json!({"id": "HlDMbDWUmTy"}));
        let mut log = RecordingLog::default();

        let written = run_attribute_setter(&mut api, &mut log, &rows, &options()).expect("run");
        assert_eq!(written, 2);
        assert_eq!(api.writes.len(), 2);
        assert_eq!(api.writes[0].method, "PUT");
        assert_eq!(api.writes[0].endpoint, "users/DXyJmlo9rge");
        assert_eq!(
            api.writes[0].body["attributeValues"],
            json!([{"value": "NEW123", "attribute": {"id": ATTRIBUTE}}])
        );
        assert_eq!(log.pauses, 1);
        assert!(log.warnings.is_empty());
        assert_eq!(
            log.infos.last().map(String::as_str),
            Some("2/2 - Updated AttributeValue: other - user: HlDMbDWUmTy")
        );
        assert!(
            api.gets
                .iter()
                .any(|(endpoint, params)| endpoint == "users/DXyJmlo9rge"
                    && params == &vec![("fields".to_string(), ":owner".to_string())])
        );
    }

    #[test]
    fn unassigned_attribute_only_warns() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,x\n").expect("parse");
        let mut api = MockApi::default()
            .with(
                &format!("attributes/{ATTRIBUTE}"),
                json!({"id": ATTRIBUTE, "organisationUnitAttribute": false}),
            )
            .with("organisationUnits/DXyJmlo9rge", json!({"id": "DXyJmlo9rge"}));
        let mut log = RecordingLog::default();
        let options = AttributeSetterOptions {
            object_type: ObjectType::OrganisationUnits,
            attribute_uid: ATTRIBUTE.to_string(),
        };
        run_attribute_setter(&mut api, &mut log, &rows, &options).expect("run");
        assert_eq!(log.warnings.len(), 1);
        assert_eq!(api.writes.len(), 1);
    }

    #[test]
    fn invalid_rows_abort_before_any_request() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,x\nbad,y\n").expect("parse");
        let mut api = MockApi::default();
        let mut log = RecordingLog::default();
        assert!(run_attribute_setter(&mut api, &mut log, &rows, &options()).is_err());
        assert!(api.gets.is_empty());
        assert!(api.writes.is_empty());
    }

    #[test]
    fn invalid_attribute_uid_aborts_before_any_request() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,x\n").expect("parse");
        let mut api = MockApi::default();
        let mut log = RecordingLog::default();
        let options = AttributeSetterOptions {
            object_type: ObjectType::Users,
            attribute_uid: "notauid".to_string(),
        };
        let error = run_attribute_setter(&mut api, &mut log, &rows, &options).expect_err("must fail");
        assert_eq!(ErrorKind::of(&error), ErrorKind::Validation);
        assert!(matches!(
            error.downcast_ref::<ValidationError>(),
            Some(ValidationError::InvalidArgumentUid { .. })
        ));
        assert!(api.gets.is_empty());
        assert!(api.writes.is_empty());
        assert_eq!(log.pauses, 0);
    }

    #[test]
    fn failure_mid_loop_keeps_earlier_writes() {
        let rows = parse_csv("key,value\nDXyJmlo9rge,a\nHlDMbDWUmTy,b\n").expect("parse");
        let mut api = MockApi::default()
            .with(&format!("attributes/{ATTRIBUTE}"), json!({"userAttribute": true}))
            .with("users/DXyJmlo9rge", json!({"id": "DXyJmlo9rge"}));
        let mut log = RecordingLog::default();
        let error = run_attribute_setter(&mut api, &mut log, &rows, &options()).expect_err("404");
        assert_eq!(ErrorKind::of(&error), ErrorKind::Api);
        assert_eq!(api.writes.len(), 1);
    }

    #[test]
    fn object_type_names() {
        assert_eq!(ObjectType::Users.singular(), "user");
        assert_eq!(ObjectType::Users.endpoint(), "users");
        assert_eq!(ObjectType::OrganisationUnits.singular(), "organisationUnit");
    }
}
