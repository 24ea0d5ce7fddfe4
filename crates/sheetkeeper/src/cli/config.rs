//! Config command handlers

use sheetkeeper_core::config::HistoryConfig;
use std::path::PathBuf;

use crate::cli::args::ConfigCommands;
use crate::cli::load_config;

pub fn handle_config_command(command: Option<ConfigCommands>, database: Option<PathBuf>) -> bool {
    match command {
        None | Some(ConfigCommands::Show) => show_config(database),
        Some(ConfigCommands::Path) => match HistoryConfig::config_path() {
            Some(path) => {
                println!("{}", path.display());
                true
            }
            None => {
                eprintln!("✗ Could not determine the config directory");
                false
            }
        },
        Some(ConfigCommands::Init { force }) => init_config(force),
        Some(ConfigCommands::Set { key, value }) => set_config_value(&key, &value),
    }
}

/// Show the effective configuration
fn show_config(database: Option<PathBuf>) -> bool {
    let config = match load_config(database) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    println!("Sheetkeeper Configuration");
    println!("=========================");
    println!("Squash delay: {} ms", config.squash_delay_ms);
    println!("Max versions: {}", config.max_versions);
    println!("Conflict grace: {} ms", config.conflict_grace_ms);
    println!("Teardown timeout: {} ms", config.teardown_timeout_ms);
    println!("Excluded fields: {}", config.excluded_fields.join(", "));
    println!("Document type: {}", config.document_type);
    match config.resolved_database_path() {
        Ok(path) => println!("Database: {}", path.display()),
        Err(_) => println!("Database: (no data directory)"),
    }
    if let Some(path) = HistoryConfig::config_path() {
        let note = if path.exists() { "" } else { " (not created)" };
        println!("Config file: {}{}", path.display(), note);
    }
    true
}

fn init_config(force: bool) -> bool {
    let Some(path) = HistoryConfig::config_path() else {
        eprintln!("✗ Could not determine the config directory");
        return false;
    };
    if path.exists() && !force {
        eprintln!(
            "✗ Config already exists at {} (use --force to overwrite)",
            path.display()
        );
        return false;
    }

    match HistoryConfig::default().save_to(&path) {
        Ok(()) => {
            println!("✓ Wrote default config to {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("✗ Error saving config: {}", e);
            false
        }
    }
}

/// Apply one `key = value` change to a config.
fn apply_config_value(config: &mut HistoryConfig, key: &str, value: &str) -> Result<(), String> {
    fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
        value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' expects a number, got '{}'", key, value))
    }

    match key {
        "squash_delay_ms" => config.squash_delay_ms = number(key, value)?,
        "max_versions" => {
            let max: usize = number(key, value)?;
            if max == 0 {
                return Err("max_versions must be at least 1".to_string());
            }
            config.max_versions = max;
        }
        "conflict_grace_ms" => config.conflict_grace_ms = number(key, value)?,
        "teardown_timeout_ms" => config.teardown_timeout_ms = number(key, value)?,
        "excluded_fields" => {
            config.excluded_fields = value
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect();
        }
        "document_type" => {
            let value = value.trim();
            if value.is_empty() {
                return Err("document_type cannot be empty".to_string());
            }
            config.document_type = value.to_string();
        }
        "database_path" => {
            config.database_path = match value.trim() {
                "" => None,
                path => Some(PathBuf::from(path)),
            };
        }
        other => return Err(format!("Unknown config key '{}'", other)),
    }
    Ok(())
}

fn set_config_value(key: &str, value: &str) -> bool {
    let Some(path) = HistoryConfig::config_path() else {
        eprintln!("✗ Could not determine the config directory");
        return false;
    };

    let mut config = if path.exists() {
        match HistoryConfig::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("✗ Could not read {}: {}", path.display(), e);
                return false;
            }
        }
    } else {
        HistoryConfig::default()
    };

    if let Err(e) = apply_config_value(&mut config, key, value) {
        eprintln!("✗ {}", e);
        return false;
    }

    match config.save_to(&path) {
        Ok(()) => {
            println!("✓ Set {} in {}", key, path.display());
            true
        }
        Err(e) => {
            eprintln!("✗ Error saving config: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_are_parsed() {
        let mut config = HistoryConfig::default();
        apply_config_value(&mut config, "squash_delay_ms", "250").unwrap();
        apply_config_value(&mut config, "max_versions", "10").unwrap();
        assert_eq!(config.squash_delay_ms, 250);
        assert_eq!(config.max_versions, 10);

        assert!(apply_config_value(&mut config, "max_versions", "0").is_err());
        assert!(apply_config_value(&mut config, "conflict_grace_ms", "soon").is_err());
    }

    #[test]
    fn excluded_fields_are_comma_separated() {
        let mut config = HistoryConfig::default();
        apply_config_value(&mut config, "excluded_fields", "portrait, token ,").unwrap();
        assert_eq!(config.excluded_fields, vec!["portrait", "token"]);
    }

    #[test]
    fn empty_database_path_falls_back_to_default() {
        let mut config = HistoryConfig::default();
        apply_config_value(&mut config, "database_path", "/tmp/history.db").unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/history.db")));
        apply_config_value(&mut config, "database_path", "").unwrap();
        assert_eq!(config.database_path, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut config = HistoryConfig::default();
        assert!(apply_config_value(&mut config, "theme", "dark").is_err());
    }

    #[test]
    fn saved_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = HistoryConfig::default();
        apply_config_value(&mut config, "document_type", "npc").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(HistoryConfig::load_from(&path).unwrap().document_type, "npc");
    }
}
