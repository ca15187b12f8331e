//! `nc-migrate profile ...`

use anyhow::Result;
use colored::*;

use super::Settings;
use crate::cli::ProfileCommands;
use crate::config::{Config, Connection, Profile};

pub fn handle_profile_command(command: ProfileCommands, settings: Settings) -> Result<()> {
    let Settings { mut config, path } = settings;

    match command {
        ProfileCommands::List => {
            print_profiles(&config);
            return Ok(());
        }
        ProfileCommands::Add {
            name,
            server,
            service_org,
            dest_server,
            dest_service_org,
            dest_api_user,
            activate,
        } => {
            let destination = match (dest_server, dest_service_org) {
                (Some(server), Some(so)) => Some(Connection {
                    api_user: dest_api_user,
                    ..Connection::new(server, so)
                }),
                _ => None,
            };
            let replaced = config.profiles.contains_key(&name);
            config.set_profile(
                &name,
                Profile {
                    server,
                    service_org_id: service_org,
                    destination,
                },
            )?;
            if activate {
                config.use_profile(&name)?;
            }
            let verb = if replaced { "Updated" } else { "Added" };
            println!("{} profile {}", verb, name.bright_green().bold());
        }
        ProfileCommands::Remove { name } => {
            config.remove_profile(&name)?;
            println!("Removed profile {}", name.bold());
        }
        ProfileCommands::Use { name } => {
            config.use_profile(&name)?;
            println!("Active profile is now {}", name.bright_green().bold());
        }
    }

    config.save(&path)?;
    Ok(())
}

fn print_profiles(config: &Config) {
    if config.profiles.is_empty() {
        println!("No profiles saved. Add one with 'nc-migrate profile add <name> --server <fqdn> --service-org <id>'");
        return;
    }

    for (name, profile) in &config.profiles {
        let active = config.active_profile.as_deref() == Some(name.as_str());
        let marker = if active { "*".bright_green().bold() } else { " ".normal() };
        let source = format!("{} (SO {})", profile.server, profile.service_org_id);
        match &profile.destination {
            Some(dest) => println!(
                "{} {:<16} {} {} {} (SO {})",
                marker,
                name.bold(),
                source,
                "->".dimmed(),
                dest.server,
                dest.service_org_id
            ),
            None => println!("{} {:<16} {}", marker, name.bold(), source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        let path = dir.path().join("config.toml");
        Settings {
            config: Config::load(&path).unwrap(),
            path,
        }
    }

    #[test]
    fn test_add_use_remove_persist() {
        let dir = tempfile::tempdir().unwrap();

        handle_profile_command(
            ProfileCommands::Add {
                name: "lab".into(),
                server: "lab.example.com".into(),
                service_org: 5,
                dest_server: None,
                dest_service_org: None,
                dest_api_user: None,
                activate: false,
            },
            settings_in(&dir),
        )
        .unwrap();
        handle_profile_command(
            ProfileCommands::Add {
                name: "move".into(),
                server: "nc1.example.com".into(),
                service_org: 50,
                dest_server: Some("nc2.example.com".into()),
                dest_service_org: Some(900),
                dest_api_user: Some("api@example.com".into()),
                activate: true,
            },
            settings_in(&dir),
        )
        .unwrap();

        let config = settings_in(&dir).config;
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.active_profile.as_deref(), Some("move"));
        let dest = config.profiles["move"].destination.as_ref().unwrap();
        assert_eq!(dest.api_user.as_deref(), Some("api@example.com"));

        handle_profile_command(ProfileCommands::Use { name: "lab".into() }, settings_in(&dir))
            .unwrap();
        handle_profile_command(
            ProfileCommands::Remove { name: "move".into() },
            settings_in(&dir),
        )
        .unwrap();

        let config = settings_in(&dir).config;
        assert_eq!(config.active_profile.as_deref(), Some("lab"));
        assert_eq!(config.profiles.len(), 1);
    }

    #[test]
    fn test_invalid_profile_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let result = handle_profile_command(
            ProfileCommands::Add {
                name: "bad".into(),
                server: "nc1".into(),
                service_org: 0,
                dest_server: None,
                dest_service_org: None,
                dest_api_user: None,
                activate: false,
            },
            settings_in(&dir),
        );
        assert!(result.is_err());
        assert!(!dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_use_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle_profile_command(
            ProfileCommands::Use { name: "nope".into() },
            settings_in(&dir),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
