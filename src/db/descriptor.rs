// db/descriptor.rs
// Connection descriptors and the database kinds they select.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational database kinds the dump engine can export.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[value(alias = "postgresql")]
    Postgres,
    #[value(alias = "mariadb")]
    Mysql,
    Sqlite,
}

impl DatabaseKind {
    /// Map a URL scheme to a kind. Known but non-relational schemes are rejected
    /// explicitly rather than falling through to "invalid".
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseKind::Mysql),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            other => Err(BackupError::UnsupportedDatabaseKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, immutable connection string.
///
/// Only the scheme is validated here; everything after it is handed to the
/// driver untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    url: String,
    kind: DatabaseKind,
}

impl ConnectionDescriptor {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let scheme = match url.split_once(':') {
            Some((scheme, _)) if !scheme.is_empty() && is_scheme(scheme) => scheme,
            _ => {
                return Err(BackupError::InvalidDescriptor(
                    "missing URL scheme (expected e.g. postgres://, mysql://, sqlite://)".into(),
                ))
            }
        };
        let kind = DatabaseKind::from_scheme(scheme)?;
        if kind != DatabaseKind::Sqlite && !url[scheme.len()..].starts_with("://") {
            return Err(BackupError::InvalidDescriptor(format!(
                "expected '{}://' prefix",
                scheme
            )));
        }
        Ok(Self {
            url: url.to_string(),
            kind,
        })
    }

    /// Parse and require that the scheme names `expected`.
    pub fn parse_for(url: &str, expected: DatabaseKind) -> Result<Self> {
        let descriptor = Self::parse(url).map_err(|e| match e {
            BackupError::UnsupportedDatabaseKind(scheme) => BackupError::InvalidDescriptor(
                format!("scheme '{}' does not match database kind {}", scheme, expected),
            ),
            other => other,
        })?;
        if descriptor.kind != expected {
            return Err(BackupError::InvalidDescriptor(format!(
                "{} URL given but database kind is {}",
                descriptor.kind, expected
            )));
        }
        Ok(descriptor)
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Best-effort database name, used to name default artifacts.
    pub fn database_name(&self) -> String {
        let without_query = self.url.split(['?', '#']).next().unwrap_or_default();
        let last = without_query
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        let stem = last.split('.').next().unwrap_or_default();
        let cleaned: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            self.kind.as_str().to_string()
        } else {
            cleaned
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    // Never print credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("kind", &self.kind)
            .field("url", &"[REDACTED]")
            .finish()
    }
}

fn is_scheme(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}
