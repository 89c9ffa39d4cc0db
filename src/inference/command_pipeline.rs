use crate::{
    config::LocalPipelineConfig,
    error::{AppError, Result},
    inference::{DiffusionPipeline, Device, PipelineLoader},
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use uuid::Uuid;

/// Loads a stable-diffusion.cpp style executable
/// (`sd -m <model> -p <prompt> --steps <n> -o <file>`).
#[derive(Debug, Clone)]
pub struct CommandPipelineLoader {
    executable: PathBuf,
    model_path: PathBuf,
}

impl CommandPipelineLoader {
    pub fn new(config: &LocalPipelineConfig) -> Result<Self> {
        let model_path = config.model_path.clone().ok_or_else(|| {
            AppError::ConfigError("LOCAL_PIPELINE_MODEL is required for the local backend".into())
        })?;

        Ok(Self {
            executable: config.executable.clone(),
            model_path,
        })
    }
}

impl PipelineLoader for CommandPipelineLoader {
    fn load(&self, device: Device) -> Result<Box<dyn DiffusionPipeline>> {
        if !self.model_path.is_file() {
            return Err(AppError::BackendUnavailable(format!(
                "Model file not found: {}",
                self.model_path.display()
            )));
        }

        // Only checks that the executable can be spawned; some builds exit
        // non-zero after printing usage.
        Command::new(&self.executable)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                AppError::BackendUnavailable(format!(
                    "Cannot run {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        log::debug!(
            "Using {} with model {}",
            self.executable.display(),
            self.model_path.display()
        );

        Ok(Box::new(CommandPipeline {
            executable: self.executable.clone(),
            model_path: self.model_path.clone(),
            device,
        }))
    }
}

struct CommandPipeline {
    executable: PathBuf,
    model_path: PathBuf,
    device: Device,
}

impl CommandPipeline {
    fn command(&self, prompt: &str, steps: u32, output: &Path) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-p")
            .arg(prompt)
            .arg("--steps")
            .arg(steps.to_string())
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null());

        if !self.device.is_accelerated() {
            command.env("CUDA_VISIBLE_DEVICES", "");
        }
        command
    }
}

impl DiffusionPipeline for CommandPipeline {
    fn generate(&self, prompt: &str, steps: u32) -> Result<DynamicImage> {
        let output_path =
            std::env::temp_dir().join(format!("promptcanvas-{}.png", Uuid::new_v4()));

        let output = self
            .command(prompt, steps, &output_path)
            .output()
            .map_err(|e| AppError::InternalError(format!("Failed to start pipeline: {}", e)))?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&output_path);
            log::error!(
                "Pipeline process exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(AppError::InternalError(format!(
                "Pipeline process exited with {}",
                output.status
            )));
        }

        let image = image::open(&output_path).map_err(|e| {
            AppError::InternalError(format!("Pipeline produced no readable image: {}", e))
        });
        let _ = std::fs::remove_file(&output_path);
        image
    }
}
