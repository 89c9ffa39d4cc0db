pub mod config;
pub mod error;
pub mod inference;
pub mod logger;
pub mod models;
pub mod server;
pub mod storage;

pub use config::{
    BackendKind, DevicePreference, LocalPipelineConfig, LogFormat, RemoteConfig, ServerConfig,
};
pub use error::{AppError, Result};
pub use inference::{ImageBackend, InferenceClient};
pub use models::*;
pub use server::AppState;
pub use storage::ImageStore;
