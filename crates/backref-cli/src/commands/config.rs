//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use backref_core::{Config, RefPolicy};

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const KEYS: &str = "corpus_root, db_path, extensions, exclude, ref_policy, log_file, log_level";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "corpus_root": config.corpus_root,
                    "db_path": config.db_path(),
                    "extensions": config.extensions,
                    "exclude": config.exclude,
                    "ref_policy": config.ref_policy,
                    "log_file": config.log_file,
                    "log_level": config.log_level
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.corpus_root.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  corpus_root: {}", config.corpus_root.display());
            println!("  db_path:     {}", config.db_path().display());
            println!("  extensions:  {}", config.extensions.join(", "));
            println!(
                "  exclude:     {}",
                config.exclude.as_deref().unwrap_or("(not set)")
            );
            println!("  ref_policy:  {:?}", config.ref_policy);
            println!(
                "  log_file:    {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(stderr)".to_string())
            );
            println!("  log_level:   {}", config.log_level);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    // Environment overrides stay out of the saved file
    let mut config = Config::load_file(&save_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    config
        .save_to(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "corpus_root" => {
            config.corpus_root = value.into();
        }
        "db_path" => {
            config.db_path = if unset { None } else { Some(value.into()) };
        }
        "extensions" => {
            let extensions: Vec<String> = value
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if extensions.is_empty() {
                bail!("At least one extension is required");
            }
            config.extensions = extensions;
        }
        "exclude" => {
            config.exclude = if unset { None } else { Some(value.to_string()) };
        }
        "ref_policy" => {
            config.ref_policy = match value {
                "overwrite" => RefPolicy::Overwrite,
                "reject" => RefPolicy::Reject,
                _ => bail!("Invalid value for ref_policy. Use 'overwrite' or 'reject'."),
            };
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        "log_level" => {
            config.log_level = value.to_string();
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_extensions() {
        let mut config = Config::default();
        apply(&mut config, "extensions", "org, .txt,,md").unwrap();
        assert_eq!(config.extensions, vec!["org", "txt", "md"]);
        assert!(apply(&mut config, "extensions", " , ").is_err());
    }

    #[test]
    fn test_apply_unset_optional() {
        let mut config = Config::default();
        apply(&mut config, "db_path", "/tmp/index.db").unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/index.db")));
        apply(&mut config, "db_path", "none").unwrap();
        assert_eq!(config.db_path, None);
    }

    #[test]
    fn test_apply_ref_policy() {
        let mut config = Config::default();
        apply(&mut config, "ref_policy", "reject").unwrap();
        assert_eq!(config.ref_policy, RefPolicy::Reject);
        assert!(apply(&mut config, "ref_policy", "merge").is_err());
    }

    #[test]
    fn test_apply_unknown_key() {
        let mut config = Config::default();
        let err = apply(&mut config, "sync_url", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_set_writes_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set("log_level".into(), "debug".into(), Some(&path), &output).unwrap();

        let saved = Config::load_file(&path).unwrap();
        assert_eq!(saved.log_level, "debug");
    }

    #[test]
    fn test_set_does_not_persist_env_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "corpus_root = \"/data/notes\"\nlog_level = \"warn\"\n").unwrap();
        let output = Output::new(OutputFormat::Quiet);

        let saved_env = std::env::var("BACKREF_LOG").ok();
        std::env::set_var("BACKREF_LOG", "trace");
        let result = set("exclude".into(), "^archive/".into(), Some(&path), &output);
        match saved_env {
            Some(value) => std::env::set_var("BACKREF_LOG", value),
            None => std::env::remove_var("BACKREF_LOG"),
        }
        result.unwrap();

        let saved = Config::load_file(&path).unwrap();
        assert_eq!(saved.log_level, "warn");
        assert_eq!(saved.corpus_root, PathBuf::from("/data/notes"));
        assert_eq!(saved.exclude.as_deref(), Some("^archive/"));
    }
}
