use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::ConfigError;

pub const DISH_FILENAME: &str = "dish.json";
pub const DHIS_HOME_ENV: &str = "DHIS_HOME";

/// Where to look for `dish.json` when no server is passed on the command line.
#[derive(Debug, Clone, Default)]
pub struct DishLocator {
    pub explicit_path: Option<PathBuf>,
    pub dhis_home: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
}

impl DishLocator {
    pub fn from_process(explicit_path: Option<PathBuf>) -> Self {
        let non_empty = |name: &str| {
            env::var_os(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };
        Self {
            explicit_path,
            dhis_home: non_empty(DHIS_HOME_ENV),
            home_dir: non_empty("HOME").or_else(|| non_empty("USERPROFILE")),
        }
    }

    /// explicit path > $DHIS_HOME/dish.json > first dish.json under home.
    pub fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = &self.explicit_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(ConfigError::new(format!("{} does not exist", path.display())).into());
        }
        if let Some(home) = &self.dhis_home {
            let candidate = home.join(DISH_FILENAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
            return Err(ConfigError::new(format!(
                "{DISH_FILENAME} not found in ${DHIS_HOME_ENV} ({})",
                home.display()
            ))
            .into());
        }
        if let Some(home) = &self.home_dir
            && let Some(found) = find_in_tree(home)
        {
            return Ok(found);
        }
        Err(ConfigError::new(format!(
            "{DISH_FILENAME} not found - searches in ${DHIS_HOME_ENV} and in your home folder"
        ))
        .into())
    }
}

fn find_in_tree(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == DISH_FILENAME)
        .map(|entry| entry.into_path())
}

#[derive(Debug, Deserialize)]
struct DishFile {
    dhis: Option<DishSection>,
}

#[derive(Debug, Deserialize)]
struct DishSection {
    baseurl: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Parse a dish.json file; every key under `dhis` must be present and non-empty.
pub fn load_dish(path: &Path) -> Result<Credentials> {
    let content = fs::read_to_string(path)
        .map_err(|error| ConfigError::new(format!("failed to read {}: {error}", path.display())))?;
    let invalid = || {
        ConfigError::new(format!(
            "{} found but not configured according to the dish.json format \
             ({{\"dhis\": {{\"baseurl\", \"username\", \"password\"}}}})",
            path.display()
        ))
    };
    let parsed: DishFile = serde_json::from_str(&content).map_err(|_| invalid())?;
    let section = parsed.dhis.ok_or_else(invalid)?;
    let take = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
    match (
        take(section.baseurl),
        take(section.username),
        take(section.password),
    ) {
        (Some(server), Some(username), Some(password)) => Ok(Credentials {
            server,
            username,
            password,
        }),
        _ => Err(invalid().into()),
    }
}

/// Command-line values win; otherwise fall back to dish.json.
pub fn resolve_credentials(
    server: Option<&str>,
    username: Option<&str>,
    password: Option<&str>,
    locator: &DishLocator,
) -> Result<Credentials> {
    if let Some(server) = server.filter(|value| !value.trim().is_empty()) {
        let username = username
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::new("a username (-u) is required with -s"))?;
        let password = password
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::new("a password (-p) is required with -s"))?;
        return Ok(Credentials {
            server: server.trim().to_string(),
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    tracing::info!("no server URL given, searching for {DISH_FILENAME}");
    let path = locator.locate()?;
    tracing::debug!("using {}", path.display());
    load_dish(&path)
}

/// Turn a user-supplied server into a base URL without `/api`.
pub fn normalize_server(server: &str) -> Result<String> {
    let server = server.trim();
    if server.contains("/api") {
        return Err(ConfigError::new("please do not specify /api/ in the server url").into());
    }
    let with_scheme = if server.starts_with("localhost") || server.starts_with("127.0.0.1") {
        format!("http://{server}")
    } else if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{server}")
    };
    Ok(with_scheme.trim_end_matches('/').to_string())
}
