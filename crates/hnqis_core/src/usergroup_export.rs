use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;

use crate::api::DhisApi;
use crate::csv_input::write_csv;
use crate::progress::RunLog;
use crate::user_message::{MESSAGE_COLUMN, USERNAME_COLUMN};
use crate::validation::require_uid_argument;

const USERNAME_FIELDS: &str =
    "id,name,users[id,name,userCredentials[userInfo[userCredentials[username]]]]";

fn nested_username(user: &Value) -> Option<&str> {
    user.pointer("/userCredentials/userInfo/userCredentials/username")
        .and_then(Value::as_str)
}

/// Write `usergroup_<uid>_users.csv` listing the group's usernames with an
/// empty message column, ready to be filled in for `user-message`.
pub fn export_usergroup_usernames<A: DhisApi, L: RunLog>(
    api: &mut A,
    log: &mut L,
    usergroup_uid: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    require_uid_argument(usergroup_uid)?;

    let group = api.get_json(
        &format!("userGroups/{usergroup_uid}"),
        &[
            ("fields", USERNAME_FIELDS.to_string()),
            ("paging", "false".to_string()),
        ],
    )?;
    let rows = group
        .get("users")
        .and_then(Value::as_array)
        .map(|users| {
            users
                .iter()
                .filter_map(nested_username)
                .map(|username| vec![username.to_string(), String::new()])
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let path = output_dir.join(format!("usergroup_{usergroup_uid}_users.csv"));
    write_csv(&path, &[USERNAME_COLUMN, MESSAGE_COLUMN], &rows)?;
    log.info(&format!(
        "File exported to {} containing {} users for userGroup {usergroup_uid}",
        path.display(),
        rows.len()
    ));
    Ok(path)
}
