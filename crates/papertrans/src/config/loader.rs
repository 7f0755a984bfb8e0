use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use super::schema::{EngineConfig, ServiceConfig};
use crate::engine::command::{API_KEY_ENV, BASE_URL_ENV, MODEL_ENV};
use crate::error::ConfigError;

impl ServiceConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default            |
    /// |-------------------------------|--------------------|
    /// | `HOST`                        | `0.0.0.0`          |
    /// | `PORT`                        | `8080`             |
    /// | `PAPERTRANS_DATA_DIR`         | `~/.papertrans`    |
    /// | `PAPERTRANS_QUEUE_CAPACITY`   | `100`              |
    /// | `PAPERTRANS_MAX_UPLOAD_MB`    | `100`              |
    /// | `PAPERTRANS_ENGINE`           | `babeldoc`         |
    /// | `PAPERTRANS_OUTPUT_EXTENSION` | `pdf`              |
    /// | `PAPERTRANS_BACKEND_FLAG`     | `--openai`         |
    /// | `PAPERTRANS_DEFAULT_LANG_IN`  | `en`               |
    /// | `PAPERTRANS_DEFAULT_LANG_OUT` | `zh`               |
    /// | `OPENAI_API_KEY`              | unset              |
    /// | `OPENAI_MODEL`                | `gpt-4o-mini`      |
    /// | `OPENAI_BASE_URL`             | unset              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset and blank are treated the same.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get("PAPERTRANS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = ServiceConfig::with_data_dir(data_dir);

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var("PORT", get("PORT"))? {
            config.port = port;
        }
        let capacity: Option<usize> =
            parse_var("PAPERTRANS_QUEUE_CAPACITY", get("PAPERTRANS_QUEUE_CAPACITY"))?;
        if let Some(capacity) = capacity {
            if capacity == 0 {
                return Err(invalid(
                    "PAPERTRANS_QUEUE_CAPACITY",
                    "0",
                    "must be greater than zero",
                ));
            }
            config.queue_capacity = capacity;
        }
        let max_upload_mb: Option<u64> =
            parse_var("PAPERTRANS_MAX_UPLOAD_MB", get("PAPERTRANS_MAX_UPLOAD_MB"))?;
        if let Some(mb) = max_upload_mb {
            config.max_upload_bytes = mb
                .checked_mul(1024 * 1024)
                .filter(|bytes| *bytes > 0)
                .ok_or_else(|| {
                    invalid(
                        "PAPERTRANS_MAX_UPLOAD_MB",
                        &mb.to_string(),
                        "must be a positive number of megabytes",
                    )
                })?;
        }
        if let Some(lang) = get("PAPERTRANS_DEFAULT_LANG_IN") {
            config.default_lang_in = lang;
        }
        if let Some(lang) = get("PAPERTRANS_DEFAULT_LANG_OUT") {
            config.default_lang_out = lang;
        }

        config.engine = engine_from_lookup(&get, &lookup)?;
        Ok(config)
    }
}

fn engine_from_lookup<G, F>(get: &G, lookup: &F) -> Result<EngineConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    F: Fn(&str) -> Option<String>,
{
    let mut engine = EngineConfig::default();

    if let Some(command) = get("PAPERTRANS_ENGINE") {
        let mut parts = command.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            engine.program = program;
        }
        engine.program_args = parts.collect();
    }
    if let Some(extension) = get("PAPERTRANS_OUTPUT_EXTENSION") {
        let extension = extension.trim_start_matches('.').to_string();
        if extension.is_empty() || extension.contains(['/', '\\', '*', '?']) {
            return Err(invalid(
                "PAPERTRANS_OUTPUT_EXTENSION",
                &extension,
                "must be a plain file extension",
            ));
        }
        engine.output_extension = extension;
    }
    // Explicitly empty disables the backend flag.
    if let Some(flag) = lookup("PAPERTRANS_BACKEND_FLAG") {
        let flag = flag.trim();
        engine.backend_flag = (!flag.is_empty()).then(|| flag.to_string());
    }

    engine.credentials.api_key = get(API_KEY_ENV).map(SecretString::from);
    if let Some(model) = get(MODEL_ENV) {
        engine.credentials.model = Some(model);
    }
    engine.credentials.base_url = get(BASE_URL_ENV);

    Ok(engine)
}

/// `~/.papertrans`, or a directory under the system temp dir when there is no home.
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".papertrans"))
        .unwrap_or_else(|| std::env::temp_dir().join("papertrans"))
}

fn parse_var<T>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        })
        .transpose()
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY};
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            ServiceConfig::from_lookup(lookup(&[("PAPERTRANS_DATA_DIR", "/srv/pt")])).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.default_lang_in, "en");
        assert_eq!(config.default_lang_out, "zh");
        assert_eq!(config.engine.program, "babeldoc");
        assert!(config.engine.program_args.is_empty());
        assert_eq!(config.engine.output_extension, "pdf");
        assert_eq!(config.engine.backend_flag.as_deref(), Some("--openai"));
        assert!(config.engine.credentials.api_key.is_none());
        assert_eq!(config.engine.credentials.model.as_deref(), Some("gpt-4o-mini"));

        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/pt/uploads"));
        assert_eq!(config.outputs_dir(), PathBuf::from("/srv/pt/outputs"));
        assert_eq!(config.logs_dir(), PathBuf::from("/srv/pt/logs"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/pt/papertrans.db"));
    }

    #[test]
    fn test_default_data_dir_is_absolute() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.data_dir.is_absolute());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("PAPERTRANS_QUEUE_CAPACITY", "5"),
            ("PAPERTRANS_MAX_UPLOAD_MB", "2"),
            ("PAPERTRANS_ENGINE", "uv run babeldoc"),
            ("PAPERTRANS_OUTPUT_EXTENSION", ".pdf"),
            ("PAPERTRANS_BACKEND_FLAG", ""),
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OPENAI_BASE_URL", "https://llm.local/v1"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.engine.program, "uv");
        assert_eq!(config.engine.program_args, vec!["run", "babeldoc"]);
        assert_eq!(config.engine.output_extension, "pdf");
        assert!(config.engine.backend_flag.is_none());
        let credentials = &config.engine.credentials;
        assert_eq!(credentials.api_key.as_ref().unwrap().expose_secret(), "sk-env");
        assert_eq!(credentials.model.as_deref(), Some("gpt-4o"));
        assert_eq!(credentials.base_url.as_deref(), Some("https://llm.local/v1"));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("PORT", "eighty"),
            ("PORT", "70000"),
            ("PAPERTRANS_QUEUE_CAPACITY", "0"),
            ("PAPERTRANS_QUEUE_CAPACITY", "-1"),
            ("PAPERTRANS_MAX_UPLOAD_MB", "0"),
            ("PAPERTRANS_OUTPUT_EXTENSION", "*"),
        ] {
            let result = ServiceConfig::from_lookup(lookup(&[(key, value)]));
            match result {
                Err(ConfigError::InvalidValue { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{key}={value} should be rejected, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "  "),
            ("OPENAI_API_KEY", ""),
            ("OPENAI_MODEL", ""),
        ]))
        .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.engine.credentials.api_key.is_none());
        assert_eq!(config.engine.credentials.model.as_deref(), Some("gpt-4o-mini"));
    }

    // Tests that modify environment variables must run serially
    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("PAPERTRANS_QUEUE_CAPACITY", "7");
        std::env::set_var("OPENAI_API_KEY", "sk-from-env");

        let config = ServiceConfig::from_env().unwrap();

        std::env::remove_var("PAPERTRANS_QUEUE_CAPACITY");
        std::env::remove_var("OPENAI_API_KEY");

        assert_eq!(config.queue_capacity, 7);
        assert_eq!(
            config.engine.credentials.api_key.unwrap().expose_secret(),
            "sk-from-env"
        );
    }
}
