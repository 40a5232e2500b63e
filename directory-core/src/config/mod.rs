use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Settings shared by every binary in the workspace.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_service_name() -> String {
    "identity-console".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        load_layered("config/console")
    }
}

/// Load a settings tree from an optional file (any format the `config` crate
/// recognises by extension) overlaid with `APP__`-prefixed environment variables.
///
/// `APP__ONPREM__SERVER_URL=ipa.example.com` sets `onprem.server_url`.
pub fn load_layered<T: DeserializeOwned>(file_stem: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cloud.scopes")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        retries: u32,
    }

    #[test]
    #[serial]
    fn test_file_values_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name = \"from-file\"\nretries = 2").unwrap();

        let stem = dir.path().join("sample");
        let sample: Sample = load_layered(stem.to_str().unwrap()).unwrap();
        assert_eq!(sample.name, "from-file");
        assert_eq!(sample.retries, 2);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "name = \"from-file\"\n").unwrap();

        std::env::set_var("APP__NAME", "from-env");
        let stem = dir.path().join("sample");
        let sample: Result<Sample, _> = load_layered(stem.to_str().unwrap());
        std::env::remove_var("APP__NAME");

        assert_eq!(sample.unwrap().name, "from-env");
    }

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        let config: Config = load_layered("does/not/exist").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
    }
}
