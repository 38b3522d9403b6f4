use anyhow::Result;
use serde_json::Value;

use crate::api::DhisApi;
use crate::attribute_setter::{ObjectType, check_attribute_assignment, fetch_object};
use crate::attribute_values::merge_attribute_value;
use crate::csv_input::CsvRow;
use crate::progress::{RunLog, progress_line};
use crate::validation::{require_columns, require_unique};

/// User attribute that the mobile app displays as a message.
pub const USER_MESSAGE_UID: &str = "ct3X8eB5gRj";

pub const USERNAME_COLUMN: &str = "username";
pub const MESSAGE_COLUMN: &str = "message";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMessageReport {
    pub updated: usize,
    pub not_found: Vec<String>,
}

pub fn validate_message_csv(rows: &[CsvRow]) -> Result<()> {
    require_columns(rows, &[USERNAME_COLUMN, MESSAGE_COLUMN])?;
    require_unique(rows, USERNAME_COLUMN)?;
    Ok(())
}

fn lookup_user_id<A: DhisApi>(api: &mut A, username: &str) -> Result<Option<String>> {
    let response = api.get_json(
        "users",
        &[
            ("fields", "id,name".to_string()),
            (
                "filter",
                format!("userCredentials.userInfo.userCredentials.username:eq:{username}"),
            ),
        ],
    )?;
    Ok(response
        .get("users")
        .and_then(Value::as_array)
        .and_then(|users| users.first())
        .and_then(|user| user.get("id"))
        .and_then(Value::as_str)
        .map(ToString::to_string))
}

/// Store each row's message on the matching user. Unknown usernames are
/// skipped and reported, not treated as errors.
pub fn run_user_message<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    rows: &[CsvRow],
) -> Result<UserMessageReport> {
    validate_message_csv(rows)?;
    check_attribute_assignment(api, log, USER_MESSAGE_UID, ObjectType::Users)?;

    log.info(&format!("Adding messages for {} users...", rows.len()));
    log.pause_before_writes();

    let mut report = UserMessageReport::default();
    let total = rows.len();
    for (index, row) in rows.iter().enumerate() {
        let username = row.get(USERNAME_COLUMN).unwrap_or_default();
        let message = row.get(MESSAGE_COLUMN).unwrap_or_default();

        let Some(user_uid) = lookup_user_id(api, username)? else {
            log.warn(&format!(
                "User with username {username} could not be found. Skipping..."
            ));
            report.not_found.push(username.to_string());
            continue;
        };

        let path = format!("users/{user_uid}");
        let user = fetch_object(api, &path, ":owner,userGroups")?;
        let updated = merge_attribute_value(&user, USER_MESSAGE_UID, message);
        api.put(&path, &[], &Value::Object(updated))?;
        report.updated += 1;

        log.info(&progress_line(
            index + 1,
            total,
            &format!("Added message for username {username}"),
        ));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::csv_input::parse_csv;
    use crate::error::ValidationError;
    use crate::progress::recording::RecordingLog;

    const FILTER_ADMIN: &str = "userCredentials.userInfo.userCredentials.username:eq:admin";
    const FILTER_GHOST: &str = "userCredentials.userInfo.userCredentials.username:eq:ghost";

    #[test]
    fn headers_are_required() {
        let rows = parse_csv("user,text\nadmin,hi\n").expect("parse");
        assert!(validate_message_csv(&rows).is_err());
    }

    #[test]
    fn duplicate_usernames_are_listed() {
        let rows =
            parse_csv("username,message\nadmin,a\nandroid,b\nadmin,c\n").expect("parse");
        let error = validate_message_csv(&rows).expect_err("must fail");
        match error.downcast_ref::<ValidationError>() {
            Some(ValidationError::Duplicates { values, .. }) => assert_eq!(values, "admin"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn run_updates_found_users_and_skips_missing() {
        let rows =
            parse_csv("username;message\nadmin;Hi Admin!\nghost;Boo\n").expect("parse");
        let mut api = MockApi::default()
            .with(
                &format!("attributes/{USER_MESSAGE_UID}"),
                json!({"id": USER_MESSAGE_UID, "userAttribute": true}),
            )
            .with_filtered("users", FILTER_ADMIN, json!({"users": [{"id": "DXyJmlo9rge"}]}))
            .with_filtered("users", FILTER_GHOST, json!({"users": []}))
            .with(
                "users/DXyJmlo9rge",
                json!({
                    "id": "DXyJmlo9rge",
                    "userGroups": [{"id": "wl5cDMuUhmF"}],
                    "attributeValues": [{"value": "x", "attribute": {"id": "pt5Ll9bb2oP"}}]
                }),
            );
        let mut log = RecordingLog::default();

        let report = run_user_message(&mut api, &mut log, &rows).expect("run");
        assert_eq!(report.updated, 1);
        assert_eq!(report.not_found, vec!["ghost".to_string()]);
        assert_eq!(api.writes.len(), 1);
        assert_eq!(api.writes[0].endpoint, "users/DXyJmlo9rge");
        assert_eq!(
            api.writes[0].body["attributeValues"],
            json!([
                {"value": "x", "attribute": {"id": "pt5Ll9bb2oP"}},
                {"value": "Hi Admin!", "attribute": {"id": USER_MESSAGE_UID}}
            ])
        );
        assert_eq!(api.writes[0].body["userGroups"], json!([{"id": "wl5cDMuUhmF"}]));
        assert_eq!(log.infos.last().map(String::as_str), Some("1/2 - Added message for username admin"));
        assert_eq!(log.warnings.len(), 1);
    }
}
