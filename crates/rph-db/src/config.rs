use std::env;

/// Where the rph database lives.
///
/// `RPH_DATABASE_URL` overrides [`DbConfig::DEFAULT_URL`]; the CLI layers
/// its own flag and config file on top of this.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/rph";
    pub const ENV_VAR: &str = "RPH_DATABASE_URL";

    pub fn from_env() -> Self {
        Self::new(env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()))
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Split the URL into `(server, database, query)`, where `server` ends
    /// before the last `/` and `query` keeps its leading `?`.
    fn parts(&self) -> (&str, &str, &str) {
        let url = self.database_url.as_str();
        let (path, query) = match url.find('?') {
            Some(pos) => url.split_at(pos),
            None => (url, ""),
        };
        match path.rfind('/') {
            Some(pos) => (&path[..pos], &path[pos + 1..], query),
            None => (path, "", query),
        }
    }

    /// Database name from the URL path; `None` when the path is empty.
    pub fn database_name(&self) -> Option<&str> {
        let (_, name, _) = self.parts();
        (!name.is_empty()).then_some(name)
    }

    /// Same server and options, pointed at the `postgres` maintenance
    /// database. `CREATE DATABASE` is issued through it.
    pub fn maintenance_url(&self) -> String {
        let (server, _, query) = self.parts();
        format!("{server}/postgres{query}")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
