use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_INFERENCE_URL: &str =
    "https://router.huggingface.co/hf-inference/models/black-forest-labs/FLUX.1-dev";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PIPELINE_STEPS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "api" => Ok(BackendKind::Remote),
            "local" | "pipeline" => Ok(BackendKind::Local),
            other => Err(AppError::ConfigError(format!(
                "Unknown IMAGE_BACKEND '{}', expected 'remote' or 'local'",
                other
            ))),
        }
    }
}

/// Execution device requested for the local pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cuda,
    Metal,
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DevicePreference::Auto),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(AppError::ConfigError(format!(
                "Unknown LOCAL_PIPELINE_DEVICE '{}'",
                other
            ))),
        }
    }
}

/// Shape of log lines, chosen with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::ConfigError(format!(
                "Unknown LOG_FORMAT '{}', expected 'text' or 'json'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LocalPipelineConfig {
    pub executable: PathBuf,
    pub model_path: Option<PathBuf>,
    pub steps: u32,
    pub device: DevicePreference,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub backend: BackendKind,
    pub remote: RemoteConfig,
    pub local: LocalPipelineConfig,
    pub static_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_body_bytes: usize,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: DEFAULT_INFERENCE_URL.to_string(),
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RemoteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let url = env::var("INFERENCE_API_URL")
            .unwrap_or_else(|_| DEFAULT_INFERENCE_URL.to_string());
        let auth_token = env::var("HF_TOKEN")
            .or_else(|_| env::var("INFERENCE_API_TOKEN"))
            .ok()
            .filter(|token| !token.trim().is_empty());
        let timeout_secs = parse_var("INFERENCE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        Ok(RemoteConfig {
            url,
            auth_token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for LocalPipelineConfig {
    fn default() -> Self {
        LocalPipelineConfig {
            executable: PathBuf::from("sd"),
            model_path: None,
            steps: DEFAULT_PIPELINE_STEPS,
            device: DevicePreference::Auto,
        }
    }
}

impl LocalPipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let executable = env::var("LOCAL_PIPELINE_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("sd"));
        let model_path = env::var("LOCAL_PIPELINE_MODEL").ok().map(PathBuf::from);
        let steps = parse_var("LOCAL_PIPELINE_STEPS", DEFAULT_PIPELINE_STEPS)?;
        let device = match env::var("LOCAL_PIPELINE_DEVICE") {
            Ok(value) => value.parse()?,
            Err(_) => DevicePreference::Auto,
        };

        Ok(LocalPipelineConfig {
            executable,
            model_path,
            steps,
            device,
        })
    }

    pub fn with_model(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(model_path.into());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5044,
            debug: false,
            backend: BackendKind::Remote,
            remote: RemoteConfig::default(),
            local: LocalPipelineConfig::default(),
            static_dir: PathBuf::from("static"),
            upload_dir: PathBuf::from("static/uploads"),
            max_body_bytes: 16 * 1024 * 1024,
            log_format: LogFormat::Text,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = parse_var("PORT", defaults.port)?;
        let debug = env::var("DEBUG").map_or(false, |val| is_truthy(&val));
        let backend = match env::var("IMAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };
        let static_dir = env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);
        let max_body_bytes = parse_var("MAX_BODY_BYTES", defaults.max_body_bytes)?;
        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.log_format,
        };
        let log_file = env::var("LOG_FILE")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(ServerConfig {
            host,
            port,
            debug,
            backend,
            remote: RemoteConfig::from_env()?,
            local: LocalPipelineConfig::from_env()?,
            static_dir,
            upload_dir,
            max_body_bytes,
            log_format,
            log_file,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_remote(mut self, config: RemoteConfig) -> Self {
        self.remote = config;
        self.backend = BackendKind::Remote;
        self
    }

    pub fn with_local(mut self, config: LocalPipelineConfig) -> Self {
        self.local = config;
        self.backend = BackendKind::Local;
        self
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("{} has an invalid value: '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
