use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_DB_PATH: &str = "data/campaigns.sqlite";
const DEFAULT_CONFIG_NAME: &str = "campaign_scraper";
const DEFAULT_USER_AGENT: &str = concat!("campaign_scraper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub fetch: FetchSettings,
    pub process: ProcessSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSettings {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifySettings {
    /// POST target for events; logging only when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub on_record_error: bool,
    pub completion_message: String,
}

/// Defaults, then the config file, then `CAMPAIGN_*` environment variables
/// (`__` separates nested keys, e.g. `CAMPAIGN_NOTIFY__WEBHOOK_URL`).
pub fn load(path: Option<&Path>) -> Result<Settings> {
    load_with_env(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("CAMPAIGN")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let settings = Config::builder()
        .set_default("db_path", DEFAULT_DB_PATH)?
        .set_default("fetch.timeout_secs", 30)?
        .set_default("fetch.user_agent", DEFAULT_USER_AGENT)?
        .set_default("process.chunk_size", 500)?
        .set_default("notify.on_record_error", false)?
        .set_default("notify.completion_message", "Your script has ended.")?
        .add_source(file)
        .add_source(env)
        .build()
        .context("Failed to load configuration")?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "campaign_scraper_{}_{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_without_file() {
        let s = load(None).unwrap();
        assert_eq!(s.fetch.timeout_secs, 30);
        assert_eq!(s.process.chunk_size, 500);
        assert!(!s.notify.on_record_error);
        assert!(s.fetch.user_agent.starts_with("campaign_scraper/"));
    }

    #[test]
    fn file_overrides_defaults() {
        let path = write_config(
            "override",
            r#"
db_path = "out/test.sqlite"

[fetch]
timeout_secs = 5

[notify]
webhook_url = "http://localhost:9000/hook"
on_record_error = true
completion_message = "Batch done"
"#,
        );
        let s = load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(s.db_path, PathBuf::from("out/test.sqlite"));
        assert_eq!(s.fetch.timeout_secs, 5);
        assert_eq!(s.fetch.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(s.notify.webhook_url.as_deref(), Some("http://localhost:9000/hook"));
        assert!(s.notify.on_record_error);
        assert_eq!(s.notify.completion_message, "Batch done");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let missing = std::env::temp_dir().join("campaign_scraper_does_not_exist.toml");
        assert!(load(Some(&missing)).is_err());
    }

    fn env_vars(vars: &[(&str, &str)]) -> Environment {
        environment().source(Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn environment_overrides_defaults() {
        let env = env_vars(&[
            ("CAMPAIGN_NOTIFY__ON_RECORD_ERROR", "true"),
            ("CAMPAIGN_PROCESS__CHUNK_SIZE", "25"),
            ("CAMPAIGN_DB_PATH", "env/campaigns.sqlite"),
            ("OTHER_DB_PATH", "ignored.sqlite"),
        ]);
        let s = load_with_env(None, env).unwrap();
        assert!(s.notify.on_record_error);
        assert_eq!(s.process.chunk_size, 25);
        assert_eq!(s.db_path, PathBuf::from("env/campaigns.sqlite"));
        assert_eq!(s.fetch.timeout_secs, 30);
    }

    #[test]
    fn environment_overrides_file() {
        let path = write_config("env_wins", "[fetch]\ntimeout_secs = 5\n");
        let env = env_vars(&[("CAMPAIGN_FETCH__TIMEOUT_SECS", "9")]);
        let s = load_with_env(Some(&path), env).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.fetch.timeout_secs, 9);
    }
}
