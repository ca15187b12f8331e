//! Command handlers and the helpers they share

pub mod export;
pub mod migrate;
pub mod profile;
pub mod types;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::*;
use is_terminal::IsTerminal;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ConnectionArgs;
use super::output::ProgressPrinter;
use crate::api::{ClientOptions, NcClient};
use crate::config::{Config, Connection};
use crate::transfer::{EntityType, RunEvent};

/// Settings and the file they came from
pub struct Settings {
    pub config: Config,
    pub path: PathBuf,
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::default_path()?,
    };
    let config = Config::load(&path)?;
    Ok(Settings { config, path })
}

/// Source connection from explicit flags, falling back to a profile
pub fn source_connection(config: &Config, args: &ConnectionArgs) -> Result<Connection> {
    if let (Some(server), Some(so)) = (&args.server, args.service_org) {
        return Ok(Connection::new(server.clone(), so));
    }

    let (name, profile) = config
        .resolve_profile(args.profile.as_deref())
        .context("Pass --server and --service-org, or select a profile")?;
    debug!("Using profile '{}'", name);

    let mut conn = profile.source();
    if let Some(server) = &args.server {
        conn.server = server.clone();
    }
    if let Some(so) = args.service_org {
        conn.service_org_id = so;
    }
    Ok(conn)
}

/// JWT from a flag or the environment, otherwise prompted for
pub fn resolve_jwt(provided: Option<&str>, server: &str) -> Result<String> {
    if let Some(jwt) = provided.map(str::trim).filter(|j| !j.is_empty()) {
        return Ok(jwt.to_string());
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "No JWT for {}. Pass --jwt or set the environment variable",
            server
        );
    }

    let jwt = rpassword::prompt_password(format!("JWT for {}: ", server))
        .context("Failed to read JWT")?;
    let jwt = jwt.trim().to_string();
    if jwt.is_empty() {
        anyhow::bail!("No JWT entered for {}", server);
    }
    Ok(jwt)
}

/// Build a client and exchange the JWT for API tokens
pub async fn connect(conn: &Connection, jwt: &str, options: ClientOptions) -> Result<NcClient> {
    let client = NcClient::new(&conn.server, options)
        .with_context(|| format!("Failed to create client for {}", conn.server))?;
    println!("Connecting to {}...", client.base_url().cyan());
    client
        .authenticate(jwt)
        .await
        .with_context(|| format!("Authentication with {} failed", client.base_url()))?;
    Ok(client)
}

/// Requested types, or `default` when none were given
pub fn selected_types(
    requested: &[EntityType],
    default: impl IntoIterator<Item = EntityType>,
) -> BTreeSet<EntityType> {
    if requested.is_empty() {
        default.into_iter().collect()
    } else {
        requested.iter().copied().collect()
    }
}

/// Render run events on a background task until the sender is dropped
pub fn spawn_event_printer() -> (mpsc::UnboundedSender<RunEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut printer = ProgressPrinter::new();
        while let Some(event) = rx.recv().await {
            printer.handle(&event);
        }
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn config_with_profile() -> Config {
        let mut config = Config::default();
        config
            .set_profile(
                "prod",
                Profile {
                    server: "nc1.example.com".into(),
                    service_org_id: 50,
                    destination: None,
                },
            )
            .unwrap();
        config
    }

    #[test]
    fn test_source_from_flags_without_profile() {
        let args = ConnectionArgs {
            server: Some("nc9.example.com".into()),
            service_org: Some(3),
            ..Default::default()
        };
        let conn = source_connection(&Config::default(), &args).unwrap();
        assert_eq!(conn, Connection::new("nc9.example.com", 3));
    }

    #[test]
    fn test_source_from_profile_with_override() {
        let args = ConnectionArgs {
            service_org: Some(77),
            ..Default::default()
        };
        let conn = source_connection(&config_with_profile(), &args).unwrap();
        assert_eq!(conn, Connection::new("nc1.example.com", 77));
    }

    #[test]
    fn test_source_needs_profile_or_flags() {
        let args = ConnectionArgs {
            server: Some("nc9.example.com".into()),
            ..Default::default()
        };
        assert!(source_connection(&Config::default(), &args).is_err());
    }

    #[test]
    fn test_provided_jwt_is_trimmed() {
        assert_eq!(resolve_jwt(Some(" abc \n"), "nc1").unwrap(), "abc");
    }

    #[test]
    fn test_selected_types_default() {
        let all = selected_types(&[], EntityType::all().iter().copied());
        assert_eq!(all.len(), EntityType::all().len());

        let some = selected_types(&[EntityType::User, EntityType::User], []);
        assert_eq!(some, BTreeSet::from([EntityType::User]));
    }
}
