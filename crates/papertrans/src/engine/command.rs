//! Command-line construction for the translation engine.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use super::ExecutionError;
use crate::config::EngineConfig;
use crate::sanitize;
use crate::worker::job::{EngineParams, Job};

pub const API_KEY_PARAM: &str = "openai-api-key";
pub const MODEL_PARAM: &str = "openai-model";
pub const BASE_URL_PARAM: &str = "openai-base-url";

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const MODEL_ENV: &str = "OPENAI_MODEL";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Engine arguments the service sets itself; callers may not override them.
pub const RESERVED_PARAMS: [&str; 5] = ["files", "output", "lang-in", "lang-out", "pages"];

/// How one job parameter shows up on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamArg {
    /// `--key`
    Flag(String),
    /// `--key value`
    Option(String, String),
}

/// Translates one parameter by the fixed rule set.
///
/// `true`/`on` becomes a bare flag, `false`/`off`/empty drops the parameter,
/// anything else (including `TRUE` or `On`) is passed as `--key value`.
/// Values are trimmed; the markers are matched exactly.
pub fn param_arg(key: &str, value: &str) -> Option<ParamArg> {
    let value = value.trim();
    let flag = format!("--{}", key);
    match value {
        "true" | "on" => Some(ParamArg::Flag(flag)),
        "false" | "off" | "" => None,
        _ => Some(ParamArg::Option(flag, value.to_string())),
    }
}

/// Credentials for the translation backend.
#[derive(Debug, Default)]
pub struct Credentials {
    pub api_key: Option<SecretString>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            api_key: self
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret())),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Credentials {
    /// Credentials supplied with a job. Empty values count as absent.
    pub fn from_params(params: &EngineParams) -> Self {
        Self {
            api_key: non_empty(params.get(API_KEY_PARAM)).map(SecretString::from),
            model: non_empty(params.get(MODEL_PARAM)),
            base_url: non_empty(params.get(BASE_URL_PARAM)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.model.is_none() && self.base_url.is_none()
    }

    /// The credentials a job runs with: the caller's set as given when it
    /// supplied any field, the service `defaults` only when it supplied none.
    ///
    /// Sets are never mixed, so a service key is never sent to an endpoint
    /// the caller picked.
    pub fn resolve(&self, defaults: &Credentials) -> Credentials {
        if self.is_empty() {
            defaults.clone()
        } else {
            self.clone()
        }
    }
}

fn is_credential_param(key: &str) -> bool {
    matches!(key, API_KEY_PARAM | MODEL_PARAM | BASE_URL_PARAM)
}

/// A fully resolved engine invocation.
pub struct EngineCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(&'static str, SecretString)>,
}

impl EngineCommand {
    /// Builds the invocation for `job`.
    ///
    /// Fails with [`ExecutionError::MissingCredentials`] when neither the job
    /// nor the service defaults carry an API key.
    pub fn build(
        config: &EngineConfig,
        job: &Job,
        input: &Path,
        workspace: &Path,
    ) -> Result<Self, ExecutionError> {
        let supplied = Credentials::from_params(&job.params);
        if supplied.api_key.is_none() && config.credentials.api_key.is_none() {
            return Err(ExecutionError::MissingCredentials);
        }
        let credentials = supplied.resolve(&config.credentials);

        let mut args: Vec<String> = config.program_args.clone();
        args.extend([
            "--files".to_string(),
            input.to_string_lossy().into_owned(),
            "--lang-in".to_string(),
            job.lang_in.clone(),
            "--lang-out".to_string(),
            job.lang_out.clone(),
            "--output".to_string(),
            workspace.to_string_lossy().into_owned(),
        ]);
        if let Some(pages) = job.pages.as_deref().filter(|p| !p.trim().is_empty()) {
            args.push("--pages".to_string());
            args.push(pages.trim().to_string());
        }

        for (key, value) in job.params.iter().filter(|(k, _)| !is_credential_param(k)) {
            match param_arg(key, value) {
                Some(ParamArg::Flag(flag)) => args.push(flag),
                Some(ParamArg::Option(flag, value)) => {
                    args.push(flag);
                    args.push(value);
                }
                None => {}
            }
        }

        if let Some(model) = credentials.model {
            args.push(format!("--{}", MODEL_PARAM));
            args.push(model);
        }
        if let Some(base_url) = credentials.base_url {
            args.push(format!("--{}", BASE_URL_PARAM));
            args.push(base_url);
        }
        if let Some(api_key) = credentials.api_key {
            args.push(format!("--{}", API_KEY_PARAM));
            args.push(api_key.expose_secret().to_string());
        }

        if let Some(flag) = config.backend_flag.as_deref().filter(|f| !f.is_empty()) {
            args.push(flag.to_string());
        }

        // Caller-supplied credentials also reach the child through its environment.
        let mut env = Vec::new();
        if let Some(key) = supplied.api_key {
            env.push((API_KEY_ENV, key));
        }
        if let Some(url) = supplied.base_url {
            env.push((BASE_URL_ENV, SecretString::from(url)));
        }

        Ok(Self {
            program: config.program.clone(),
            args,
            env,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Names of the extra environment variables set for the child.
    pub fn env_names(&self) -> Vec<&'static str> {
        self.env.iter().map(|(name, _)| *name).collect()
    }

    /// The command line with every credential value redacted.
    pub fn invocation_line(&self) -> String {
        let base_url_flag = format!("--{}", BASE_URL_PARAM);
        let mut shown = Vec::with_capacity(self.args.len());
        let mut previous: Option<&str> = None;
        for arg in &self.args {
            if previous == Some(base_url_flag.as_str()) {
                shown.push(sanitize::redact_url(arg));
            } else {
                shown.push(arg.clone());
            }
            previous = Some(arg.as_str());
        }
        let api_key_flag = format!("--{}", API_KEY_PARAM);
        sanitize::redact_args(&self.program, &shown, &[api_key_flag.as_str()])
    }

    /// A ready-to-spawn process with piped output and no stdin.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in &self.env {
            cmd.env(name, value.expose_secret());
        }
        cmd
    }
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCommand")
            .field("invocation", &self.invocation_line())
            .field("env", &self.env_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with_key(key: Option<&str>) -> EngineConfig {
        EngineConfig {
            program: "babeldoc".to_string(),
            credentials: Credentials {
                api_key: key.map(SecretString::from),
                model: Some(DEFAULT_MODEL.to_string()),
                base_url: None,
            },
            ..EngineConfig::default()
        }
    }

    fn job(params: &[(&str, &str)]) -> Job {
        let params: EngineParams = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Job::queued(
            "report.pdf".to_string(),
            "en".to_string(),
            "zh".to_string(),
            None,
            params,
        )
    }

    fn build(config: &EngineConfig, job: &Job) -> Result<EngineCommand, ExecutionError> {
        EngineCommand::build(
            config,
            job,
            &PathBuf::from("/data/uploads/id_report.pdf"),
            &PathBuf::from("/data/outputs/id"),
        )
    }

    fn count(args: &[String], needle: &str) -> usize {
        args.iter().filter(|a| a.as_str() == needle).count()
    }

    #[test]
    fn test_param_rules() {
        assert_eq!(param_arg("no-dual", "true"), Some(ParamArg::Flag("--no-dual".into())));
        assert_eq!(param_arg("no-dual", " on "), Some(ParamArg::Flag("--no-dual".into())));
        assert_eq!(param_arg("no-dual", "false"), None);
        assert_eq!(param_arg("no-dual", "off"), None);
        assert_eq!(param_arg("no-dual", "  "), None);
        assert_eq!(
            param_arg("qps", " 4 "),
            Some(ParamArg::Option("--qps".into(), "4".into()))
        );
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        assert_eq!(
            param_arg("no-dual", "TRUE"),
            Some(ParamArg::Option("--no-dual".into(), "TRUE".into()))
        );
        assert_eq!(
            param_arg("no-dual", "On"),
            Some(ParamArg::Option("--no-dual".into(), "On".into()))
        );
        assert_eq!(
            param_arg("no-dual", "False"),
            Some(ParamArg::Option("--no-dual".into(), "False".into()))
        );
    }

    #[test]
    fn test_base_arguments_in_order() {
        let mut job = job(&[]);
        job.pages = Some("1-3,5".to_string());
        let command = build(&config_with_key(Some("sk-env")), &job).unwrap();

        assert_eq!(
            &command.args()[..10],
            &[
                "--files",
                "/data/uploads/id_report.pdf",
                "--lang-in",
                "en",
                "--lang-out",
                "zh",
                "--output",
                "/data/outputs/id",
                "--pages",
                "1-3,5",
            ]
        );
        assert_eq!(command.args().last().unwrap(), "--openai");
        assert_eq!(command.program(), "babeldoc");
    }

    #[test]
    fn test_params_follow_key_order_and_rules() {
        let job = job(&[
            ("watermark-output-mode", "no_watermark"),
            ("no-dual", "true"),
            ("skip-clean", "false"),
            ("enhance-compatibility", "on"),
            ("debug", ""),
        ]);
        let command = build(&config_with_key(Some("sk-env")), &job).unwrap();
        let args = command.args();

        assert_eq!(count(args, "--no-dual"), 1);
        assert_eq!(count(args, "--enhance-compatibility"), 1);
        assert_eq!(count(args, "--skip-clean"), 0);
        assert_eq!(count(args, "--debug"), 0);
        assert!(!args.iter().any(|a| a == "true" || a == "on" || a == "false"));

        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert!(position("--enhance-compatibility") < position("--no-dual"));
        assert!(position("--no-dual") < position("--watermark-output-mode"));
        assert_eq!(args[position("--watermark-output-mode") + 1], "no_watermark");
    }

    #[test]
    fn test_defaults_used_when_no_credentials_supplied() {
        let command = build(&config_with_key(Some("sk-env")), &job(&[])).unwrap();
        let args = command.args();

        let key_at = args.iter().position(|a| a == "--openai-api-key").unwrap();
        assert_eq!(args[key_at + 1], "sk-env");
        let model_at = args.iter().position(|a| a == "--openai-model").unwrap();
        assert_eq!(args[model_at + 1], DEFAULT_MODEL);
        assert!(command.env_names().is_empty());
    }

    #[test]
    fn test_service_key_not_sent_with_caller_base_url() {
        let job = job(&[("openai-base-url", "https://caller-chosen.example/v1")]);
        let command = build(&config_with_key(Some("sk-operator-secret")), &job).unwrap();
        let args = command.args();

        assert!(!args.iter().any(|a| a == "sk-operator-secret"));
        assert_eq!(count(args, "--openai-api-key"), 0);
        // The service model is not mixed in either.
        assert_eq!(count(args, "--openai-model"), 0);
        let url_at = args.iter().position(|a| a == "--openai-base-url").unwrap();
        assert_eq!(args[url_at + 1], "https://caller-chosen.example/v1");
        assert_eq!(command.env_names(), vec![BASE_URL_ENV]);
    }

    #[test]
    fn test_caller_set_used_as_given() {
        let job = job(&[
            ("openai-api-key", "sk-caller"),
            ("openai-model", "gpt-4o"),
        ]);
        let command = build(&config_with_key(Some("sk-env")), &job).unwrap();
        let args = command.args();

        let model_at = args.iter().position(|a| a == "--openai-model").unwrap();
        assert_eq!(args[model_at + 1], "gpt-4o");
        assert_eq!(count(args, "--openai-model"), 1);
        assert_eq!(count(args, "--openai-base-url"), 0);
        assert!(args.contains(&"sk-caller".to_string()));
        assert!(!args.contains(&"sk-env".to_string()));
    }

    #[test]
    fn test_caller_key_wins_and_reaches_environment() {
        let job = job(&[("openai-api-key", "sk-caller")]);
        let command = build(&config_with_key(Some("sk-env")), &job).unwrap();

        assert!(command.args().contains(&"sk-caller".to_string()));
        assert!(!command.args().contains(&"sk-env".to_string()));
        assert_eq!(command.env_names(), vec![API_KEY_ENV]);
    }

    #[test]
    fn test_missing_credentials() {
        let result = build(&config_with_key(None), &job(&[]));
        assert!(matches!(result, Err(ExecutionError::MissingCredentials)));

        let result = build(&config_with_key(None), &job(&[("openai-model", "gpt-4o")]));
        assert!(matches!(result, Err(ExecutionError::MissingCredentials)));

        let result = build(&config_with_key(None), &job(&[("openai-api-key", "  ")]));
        assert!(matches!(result, Err(ExecutionError::MissingCredentials)));
    }

    #[test]
    fn test_invocation_line_redacts_credentials() {
        let job = job(&[
            ("openai-api-key", "sk-very-secret"),
            ("openai-base-url", "https://user:pw@llm.local/v1"),
        ]);
        let command = build(&config_with_key(None), &job).unwrap();
        let line = command.invocation_line();

        assert!(line.starts_with("babeldoc --files /data/uploads/id_report.pdf"));
        assert!(line.contains("--openai-api-key ****"));
        assert!(line.contains("https://****@llm.local/v1"));
        assert!(!line.contains("sk-very-secret"));
        assert!(!line.contains("pw@"));
        assert!(!format!("{:?}", command).contains("sk-very-secret"));
    }

    #[test]
    fn test_backend_flag_can_be_disabled() {
        let mut config = config_with_key(Some("sk-env"));
        config.backend_flag = None;
        let command = build(&config, &job(&[])).unwrap();
        assert!(!command.args().contains(&"--openai".to_string()));
    }

    #[test]
    fn test_program_args_come_first() {
        let mut config = config_with_key(Some("sk-env"));
        config.program = "uv".to_string();
        config.program_args = vec!["run".to_string(), "babeldoc".to_string()];
        let command = build(&config, &job(&[])).unwrap();

        assert_eq!(&command.args()[..3], &["run", "babeldoc", "--files"]);
        assert!(command.invocation_line().starts_with("uv run babeldoc --files"));
    }
}
