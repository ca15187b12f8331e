//! Saved connection profiles

use serde::{Deserialize, Serialize};

use crate::api::normalize_base_url;

/// One server plus the service organization to work in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub server: String,
    pub service_org_id: i64,
    /// API user for SOAP calls, the JWT is its password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_user: Option<String>,
}

impl Connection {
    pub fn new(server: impl Into<String>, service_org_id: i64) -> Self {
        Connection {
            server: server.into(),
            service_org_id,
            api_user: None,
        }
    }

    pub fn base_url(&self) -> String {
        normalize_base_url(&self.server)
    }
}

/// A named source connection with an optional migration destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub server: String,
    pub service_org_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Connection>,
}

impl Profile {
    pub fn source(&self) -> Connection {
        Connection::new(self.server.clone(), self.service_org_id)
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let check = |conn: &Connection, role: &str| {
            if conn.server.trim().is_empty() {
                return Err(ConfigError::InvalidProfile {
                    name: name.to_string(),
                    reason: format!("{} server is empty", role),
                });
            }
            if conn.service_org_id <= 0 {
                return Err(ConfigError::InvalidProfile {
                    name: name.to_string(),
                    reason: format!(
                        "{} service organization id must be positive, got {}",
                        role, conn.service_org_id
                    ),
                });
            }
            Ok(())
        };

        let source = self.source();
        check(&source, "source")?;
        if let Some(dest) = &self.destination {
            check(dest, "destination")?;
            if dest.base_url() == source.base_url() && dest.service_org_id == source.service_org_id {
                return Err(ConfigError::InvalidProfile {
                    name: name.to_string(),
                    reason: "source and destination are the same scope".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse {
        path: String,
        message: String,
    },
    Serialize(String),
    NoConfigDir,
    UnknownProfile(String),
    NoActiveProfile,
    InvalidProfile {
        name: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "Cannot access '{}': {}", path, source),
            ConfigError::Parse { path, message } => {
                write!(f, "Invalid settings file '{}': {}", path, message)
            }
            ConfigError::Serialize(message) => write!(f, "Cannot serialize settings: {}", message),
            ConfigError::NoConfigDir => write!(f, "Could not determine the config directory"),
            ConfigError::UnknownProfile(name) => write!(f, "Profile '{}' not found", name),
            ConfigError::NoActiveProfile => write!(
                f,
                "No profile selected. Use 'nc-migrate profile use <name>' or pass --profile"
            ),
            ConfigError::InvalidProfile { name, reason } => {
                write!(f, "Profile '{}' is invalid: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
