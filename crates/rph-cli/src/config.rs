//! Configuration file management for rph.
//!
//! Provides a TOML-based config file at `~/.config/rph/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rph_core::generation::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use rph_core::generation::{DEFAULT_TIMEOUT, GeminiConfig};
use rph_core::token::TokenConfig;
use rph_db::config::DbConfig;

pub const TOKEN_SECRET_VAR: &str = "RPH_TOKEN_SECRET";
pub const API_KEY_VAR: &str = "RPH_GENAI_API_KEY";
pub const MODEL_VAR: &str = "RPH_GENAI_MODEL";
pub const ENV_VAR: &str = "RPH_ENV";
pub const ADMIN_IDS_VAR: &str = "RPH_ADMIN_IDS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
    /// Users allowed to upload curriculum reference data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerationSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the rph config directory: `$XDG_CONFIG_HOME/rph` or
/// `~/.config/rph`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("rph");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("rph")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Write the config file with 0600 permissions on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Parse a comma-separated list of user IDs.
pub fn parse_admin_ids(raw: &str) -> Result<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).with_context(|| format!("invalid admin user ID: {s}")))
        .collect()
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Runtime environment. Server error details reach clients only in
/// development.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => bail!("unknown environment {other:?} (expected development or production)"),
        }
    }
}

/// Provider settings; the API key is only required by `serve`.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl GenerationSettings {
    pub fn gemini_config(&self) -> Result<GeminiConfig> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| {
                format!("generative API key not found; set {API_KEY_VAR} or [generation] api_key")
            })?;
        Ok(GeminiConfig {
            api_key,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct RphConfig {
    pub db_config: DbConfig,
    pub token_config: TokenConfig,
    pub generation: GenerationSettings,
    pub environment: Environment,
    pub admin_ids: Vec<Uuid>,
}

impl RphConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `RPH_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Token secret: `RPH_TOKEN_SECRET` > `auth.token_secret` > error
    /// - API key / model: `RPH_GENAI_API_KEY` / `RPH_GENAI_MODEL` > `[generation]`
    /// - Environment: `RPH_ENV` > `server.environment` > production
    /// - Admin IDs: `RPH_ADMIN_IDS` (comma-separated) > `auth.admin_ids` > none
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let token_config = if let Ok(secret_hex) = std::env::var(TOKEN_SECRET_VAR) {
            TokenConfig::from_hex(&secret_hex)
                .with_context(|| format!("{TOKEN_SECRET_VAR} env var is not a valid secret"))?
        } else if let Some(ref cfg) = file_config {
            TokenConfig::from_hex(&cfg.auth.token_secret)
                .context("invalid token_secret in config file")?
        } else {
            bail!(
                "token secret not found; set {TOKEN_SECRET_VAR} or run `rph init` to create a config file"
            );
        };

        let section = file_config.as_ref().map(|c| &c.generation);
        let generation = GenerationSettings {
            api_key: std::env::var(API_KEY_VAR)
                .ok()
                .or_else(|| section.and_then(|s| s.api_key.clone())),
            model: std::env::var(MODEL_VAR)
                .ok()
                .or_else(|| section.and_then(|s| s.model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: section
                .and_then(|s| s.endpoint.clone())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout_secs: section
                .and_then(|s| s.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT.as_secs()),
        };

        let environment = match std::env::var(ENV_VAR)
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.server.environment.clone()))
        {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };

        let admin_ids = match std::env::var(ADMIN_IDS_VAR) {
            Ok(raw) => parse_admin_ids(&raw)?,
            Err(_) => file_config
                .as_ref()
                .map(|c| c.auth.admin_ids.clone())
                .unwrap_or_default(),
        };

        Ok(Self {
            db_config,
            token_config,
            generation,
            environment,
            admin_ids,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::lock_env;

    const SECRET: &str = "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55";

    /// Point the config lookup at an empty directory and clear every rph
    /// variable. Returns the guard that keeps the directory alive.
    fn isolated_env() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        for var in [
            DbConfig::ENV_VAR,
            TOKEN_SECRET_VAR,
            API_KEY_VAR,
            MODEL_VAR,
            ENV_VAR,
            ADMIN_IDS_VAR,
        ] {
            unsafe { std::env::remove_var(var) };
        }
        tmp
    }

    fn clear_env() {
        for var in [
            "XDG_CONFIG_HOME",
            DbConfig::ENV_VAR,
            TOKEN_SECRET_VAR,
            API_KEY_VAR,
            MODEL_VAR,
            ENV_VAR,
            ADMIN_IDS_VAR,
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn generate_token_secret_is_64_hex_chars() {
        let secret = generate_token_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_token_secret());
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!(" Prod ".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn minimal_file_parses_with_default_sections() {
        let cfg: ConfigFile = toml::from_str(
            r#"
            [database]
            url = "postgresql://db:5432/rph"

            [auth]
            token_secret = "aa"
            "#,
        )
        .unwrap();
        assert!(cfg.generation.api_key.is_none());
        assert!(cfg.server.environment.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_writes_private_file() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let _tmp = isolated_env();

        let cfg = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            auth: AuthSection {
                token_secret: SECRET.to_string(),
                admin_ids: Vec::new(),
            },
            generation: GenerationSection {
                api_key: Some("file-key".to_string()),
                ..Default::default()
            },
            server: ServerSection::default(),
        };
        save_config(&cfg).unwrap();

        let meta = std::fs::metadata(config_path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let loaded = load_config().unwrap();
        assert_eq!(loaded.database.url, cfg.database.url);
        assert_eq!(loaded.generation.api_key.as_deref(), Some("file-key"));

        clear_env();
    }

    #[test]
    fn cli_flag_beats_env_beats_file() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        save_config(&ConfigFile {
            database: DatabaseSection {
                url: "postgresql://file:5432/filedb".to_string(),
            },
            auth: AuthSection {
                token_secret: SECRET.to_string(),
                admin_ids: Vec::new(),
            },
            generation: GenerationSection::default(),
            server: ServerSection {
                environment: Some("development".to_string()),
            },
        })
        .unwrap();

        let from_file = RphConfig::resolve(None).unwrap();
        assert_eq!(from_file.db_config.database_url, "postgresql://file:5432/filedb");
        assert_eq!(from_file.environment, Environment::Development);

        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(ENV_VAR, "production") };
        let from_env = RphConfig::resolve(None).unwrap();
        assert_eq!(from_env.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(from_env.environment, Environment::Production);

        let from_cli = RphConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(from_cli.db_config.database_url, "postgresql://cli:5432/clidb");

        clear_env();
    }

    #[test]
    fn defaults_when_only_secret_is_set() {
        let _lock = lock_env();
        let _tmp = isolated_env();
        unsafe { std::env::set_var(TOKEN_SECRET_VAR, SECRET) };

        let config = RphConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.generation.model, DEFAULT_MODEL);
        assert_eq!(config.generation.timeout_secs, 60);
        assert!(config.generation.gemini_config().is_err());

        unsafe { std::env::set_var(API_KEY_VAR, "env-key") };
        unsafe { std::env::set_var(MODEL_VAR, "gemini-test") };
        let config = RphConfig::resolve(None).unwrap();
        let gemini = config.generation.gemini_config().unwrap();
        assert_eq!(gemini.api_key, "env-key");
        assert_eq!(gemini.model, "gemini-test");

        clear_env();
    }

    #[test]
    fn admin_ids_come_from_env_or_file() {
        let _lock = lock_env();
        let _tmp = isolated_env();
        let file_admin = Uuid::new_v4();

        save_config(&ConfigFile {
            database: DatabaseSection {
                url: "postgresql://file:5432/filedb".to_string(),
            },
            auth: AuthSection {
                token_secret: SECRET.to_string(),
                admin_ids: vec![file_admin],
            },
            generation: GenerationSection::default(),
            server: ServerSection::default(),
        })
        .unwrap();
        assert_eq!(RphConfig::resolve(None).unwrap().admin_ids, [file_admin]);

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        unsafe { std::env::set_var(ADMIN_IDS_VAR, format!("{a}, {b},")) };
        assert_eq!(RphConfig::resolve(None).unwrap().admin_ids, [a, b]);

        unsafe { std::env::set_var(ADMIN_IDS_VAR, "not-a-uuid") };
        assert!(RphConfig::resolve(None).is_err());

        clear_env();
    }

    #[test]
    fn missing_secret_is_an_error() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        let msg = RphConfig::resolve(None).unwrap_err().to_string();
        assert!(msg.contains("token secret not found"), "unexpected error: {msg}");

        clear_env();
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("rph/config.toml"), "unexpected config path: {}", path.display());
    }
}
