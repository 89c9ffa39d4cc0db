pub mod command_pipeline;
pub mod local_pipeline;
pub mod remote_client;

use crate::{
    config::{BackendKind, ServerConfig},
    error::{AppError, Result},
    logger,
};
use async_trait::async_trait;
use std::sync::Arc;

pub use command_pipeline::CommandPipelineLoader;
pub use local_pipeline::{
    encode_png, DiffusionPipeline, Device, LocalPipelineBackend, PipelineLoader, PipelineState,
};
pub use remote_client::RemoteInferenceBackend;

/// Anything that can turn a prompt into encoded image bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
}

/// Front door for image generation: validates the prompt, logs the request
/// and hands it to whichever backend was selected at startup.
#[derive(Clone)]
pub struct InferenceClient {
    backend: Arc<dyn ImageBackend>,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let backend: Arc<dyn ImageBackend> = match config.backend {
            BackendKind::Remote => Arc::new(RemoteInferenceBackend::new(config.remote.clone())?),
            BackendKind::Local => {
                let loader = CommandPipelineLoader::new(&config.local)?;
                Arc::new(LocalPipelineBackend::new(
                    Box::new(loader),
                    Device::select(config.local.device),
                    config.local.steps,
                ))
            }
        };

        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidInput("Missing prompt".into()));
        }

        log::info!(
            "Prompt received for {} backend ({} chars)",
            self.backend.name(),
            prompt.chars().count()
        );
        log::debug!("Prompt: {}", prompt);

        let timer = logger::timer("image generation");
        let result = self.backend.generate(prompt).await;

        match &result {
            Ok(bytes) => log::info!(
                "Generated {} bytes in {}ms",
                bytes.len(),
                timer.elapsed().as_millis()
            ),
            Err(e) => log::warn!(
                "Generation failed after {}ms: {}",
                timer.elapsed().as_millis(),
                e
            ),
        }

        result
    }
}
