//! Connection profiles.
//!
//! Profiles live in a TOML file with a `[global]` table and named
//! `[profile.<name>]` tables; a profile overrides `[global]`, which overrides
//! the defaults. Credentials can be kept apart in an auth file with one
//! `[<auth-name>]` table per credential group. Environment variables prefixed
//! `SQLFS_` are applied last.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

/// Effective settings of one connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Client application name sent at login (default: "sqlfs")
    pub appname: String,
    /// Pool size, clamped to at least 1 (default: 1)
    pub maxconn: usize,
    pub servername: Option<String>,
    pub dbname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Credential group in the auth file, replaces username/password
    pub auth: Option<String>,
    pub to_codeset: Option<String>,
    pub from_codeset: Option<String>,
    /// Apply ANSI null, padding and warning session defaults (default: false)
    pub ansi_npw: bool,
    /// Idle seconds before queued DDL is deployed (default: 1)
    pub deploy_time: u64,
    /// Object-name glob (`*`, `?`) applied to listings below the root
    pub filter: Option<String>,
    /// Schemas hidden from the root listing
    pub exclude_schemas: Vec<String>,
    /// How long pool shutdown waits for checked-out slots (default: 5000)
    pub shutdown_timeout_ms: u64,
    /// Set once credentials came from the auth file
    #[serde(skip)]
    auth_applied: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            appname: "sqlfs".to_string(),
            maxconn: 1,
            servername: None,
            dbname: None,
            username: None,
            password: None,
            auth: None,
            to_codeset: None,
            from_codeset: None,
            ansi_npw: false,
            deploy_time: 1,
            filter: None,
            exclude_schemas: Vec::new(),
            shutdown_timeout_ms: 5000,
            auth_applied: false,
        }
    }
}

/// Keys a `[global]` or `[profile.<name>]` table may set.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileTable {
    appname: Option<String>,
    maxconn: Option<usize>,
    servername: Option<String>,
    dbname: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth: Option<String>,
    to_codeset: Option<String>,
    from_codeset: Option<String>,
    ansi_npw: Option<bool>,
    deploy_time: Option<u64>,
    filter: Option<String>,
    exclude_schemas: Option<Vec<String>>,
    shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    global: ProfileTable,
    #[serde(default)]
    profile: HashMap<String, ProfileTable>,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

macro_rules! overlay {
    ($config:expr, $table:expr, $($field:ident),+) => {
        $(
            if let Some(value) = $table.$field {
                $config.$field = value;
            }
        )+
    };
}

macro_rules! overlay_opt {
    ($config:expr, $table:expr, $($field:ident),+) => {
        $(
            if $table.$field.is_some() {
                $config.$field = $table.$field;
            }
        )+
    };
}

impl FsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge(&mut self, table: ProfileTable) {
        overlay!(self, table, appname, maxconn, ansi_npw, deploy_time, exclude_schemas, shutdown_timeout_ms);
        overlay_opt!(
            self,
            table,
            servername,
            dbname,
            username,
            password,
            auth,
            to_codeset,
            from_codeset,
            filter
        );
    }

    /// Parses a profile file and selects one profile.
    ///
    /// # Arguments
    /// * `toml_str` - File content with `[global]` and `[profile.<name>]` tables
    /// * `profile` - Name of the profile to select
    ///
    /// # Returns
    /// `Result<FsConfig>`, `Config` error when the profile does not exist.
    pub fn from_toml(toml_str: &str, profile: &str) -> Result<Self> {
        let mut file: ProfileFile = toml::from_str(toml_str)
            .map_err(|e| FsError::Config(format!("Invalid TOML: {}", e)))?;
        let selected = file
            .profile
            .remove(profile)
            .ok_or_else(|| FsError::Config(format!("Profile '{}' not found", profile)))?;

        let mut config = Self::default();
        config.merge(file.global);
        config.merge(selected);
        Ok(config)
    }

    /// Loads one profile from a TOML file.
    pub fn from_file(path: impl AsRef<Path>, profile: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FsError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content, profile)
    }

    /// Fills username and password from the auth file group named by `auth`.
    ///
    /// Does nothing when the profile has no `auth` key.
    pub fn apply_auth_toml(&mut self, toml_str: &str) -> Result<()> {
        let Some(name) = self.auth.clone() else {
            return Ok(());
        };
        self.reject_inline_credentials()?;
        let mut groups: HashMap<String, Credentials> = toml::from_str(toml_str)
            .map_err(|e| FsError::Config(format!("Invalid auth TOML: {}", e)))?;
        let credentials = groups
            .remove(&name)
            .ok_or_else(|| FsError::Config(format!("Auth group '{}' not found", name)))?;
        self.username = credentials.username;
        self.password = credentials.password;
        self.auth_applied = true;
        Ok(())
    }

    /// Reads the auth file and applies it, see [`FsConfig::apply_auth_toml`].
    pub fn apply_auth_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FsError::Config(format!("Failed to read auth file: {}", e)))?;
        self.apply_auth_toml(&content)
    }

    /// Applies environment variable overrides.
    /// Environment variables are prefixed with `SQLFS_`.
    /// Example: `SQLFS_MAXCONN=4` overrides `maxconn`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("SQLFS_MAXCONN") {
            self.maxconn = val
                .parse()
                .map_err(|_| FsError::Config(format!("Invalid maxconn: {}", val)))?;
        }
        if let Ok(val) = env::var("SQLFS_DEPLOY_TIME") {
            self.deploy_time = val
                .parse()
                .map_err(|_| FsError::Config(format!("Invalid deploy_time: {}", val)))?;
        }
        if let Ok(val) = env::var("SQLFS_SERVERNAME") {
            self.servername = Some(val);
        }
        if let Ok(val) = env::var("SQLFS_DBNAME") {
            self.dbname = Some(val);
        }
        if let Ok(val) = env::var("SQLFS_USERNAME") {
            self.username = Some(val);
        }
        if let Ok(val) = env::var("SQLFS_PASSWORD") {
            self.password = Some(val);
        }
        Ok(())
    }

    /// Rejects profiles the session cannot start from.
    pub fn validate(&self) -> Result<()> {
        if self.dbname.as_deref().map_or(true, str::is_empty) {
            return Err(FsError::Config("dbname is required".into()));
        }
        if !self.auth_applied {
            self.reject_inline_credentials()?;
        }
        Ok(())
    }

    fn reject_inline_credentials(&self) -> Result<()> {
        if self.auth.is_some() && (self.username.is_some() || self.password.is_some()) {
            return Err(FsError::Config(
                "auth cannot be combined with username/password".into(),
            ));
        }
        Ok(())
    }

    /// Pool size with the lower bound applied.
    pub fn pool_size(&self) -> usize {
        self.maxconn.max(1)
    }

    pub fn deploy_interval(&self) -> Duration {
        Duration::from_secs(self.deploy_time)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.password.is_some() {
            copy.password = Some("********".to_string());
        }
        copy
    }

    /// True when `name` passes the listing filter.
    pub fn matches_filter(&self, name: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |pattern| glob_match(pattern.as_bytes(), name.as_bytes()))
    }

    pub fn is_excluded_schema(&self, name: &str) -> bool {
        self.exclude_schemas.iter().any(|s| s == name)
    }
}

/// `*` matches any run, `?` one byte.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROFILES: &str = r#"
        [global]
        appname = "sqlfs-tests"
        maxconn = 2
        servername = "db01"

        [profile.dev]
        dbname = "inventory"
        username = "dev"
        password = "secret"
        deploy_time = 3
        exclude_schemas = ["sys", "INFORMATION_SCHEMA"]

        [profile.ops]
        dbname = "inventory"
        servername = "db02"
        auth = "ops"
        maxconn = 0
    "#;

    #[test]
    fn test_default_config() {
        let config = FsConfig::default();
        assert_eq!(config.appname, "sqlfs");
        assert_eq!(config.pool_size(), 1);
        assert_eq!(config.deploy_interval(), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_overrides_global() {
        let config = FsConfig::from_toml(PROFILES, "dev").unwrap();
        assert_eq!(config.appname, "sqlfs-tests");
        assert_eq!(config.maxconn, 2);
        assert_eq!(config.servername.as_deref(), Some("db01"));
        assert_eq!(config.dbname.as_deref(), Some("inventory"));
        assert_eq!(config.deploy_time, 3);
        assert!(config.is_excluded_schema("sys"));
        config.validate().unwrap();

        let ops = FsConfig::from_toml(PROFILES, "ops").unwrap();
        assert_eq!(ops.servername.as_deref(), Some("db02"));
        assert_eq!(ops.pool_size(), 1);
    }

    #[test]
    fn test_missing_profile() {
        let err = FsConfig::from_toml(PROFILES, "prod").unwrap_err();
        assert!(matches!(err, FsError::Config(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(FsConfig::from_toml("[profile.x]\nmaxconns = 3\n", "x").is_err());
    }

    #[test]
    fn test_auth_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[ops]\nusername = \"deployer\"\npassword = \"hunter2\"")?;

        let mut config = FsConfig::from_toml(PROFILES, "ops")?;
        config.apply_auth_file(file.path())?;
        assert_eq!(config.username.as_deref(), Some("deployer"));
        config.validate()?;

        let json = serde_json::to_string(&config.redacted())?;
        assert!(!json.contains("hunter2"));
        Ok(())
    }

    #[test]
    fn test_auth_with_inline_credentials() {
        let toml = "[profile.x]\ndbname = \"d\"\nauth = \"a\"\nusername = \"u\"\n";
        let mut config = FsConfig::from_toml(toml, "x").unwrap();
        assert!(config.validate().is_err());
        assert!(config.apply_auth_toml("[a]\nusername = \"v\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FsConfig::from_toml(PROFILES, "dev").unwrap();
        env::set_var("SQLFS_MAXCONN", "6");
        env::set_var("SQLFS_DBNAME", "staging");
        config.apply_env_overrides().unwrap();
        env::set_var("SQLFS_MAXCONN", "many");
        assert!(config.clone().apply_env_overrides().is_err());
        env::remove_var("SQLFS_MAXCONN");
        env::remove_var("SQLFS_DBNAME");
        assert_eq!(config.maxconn, 6);
        assert_eq!(config.dbname.as_deref(), Some("staging"));
    }

    #[test]
    fn test_filter_glob() {
        let mut config = FsConfig::default();
        assert!(config.matches_filter("anything"));
        config.filter = Some("ord*_?".into());
        assert!(config.matches_filter("orders_1"));
        assert!(config.matches_filter("ord_x"));
        assert!(!config.matches_filter("orders_12"));
        assert!(!config.matches_filter("customers"));
    }
}
