use crate::{
    config::DevicePreference,
    error::{AppError, Result},
    inference::ImageBackend,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::OnceCell;
use std::fmt;
use std::any::Any;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Where the local pipeline executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Metal,
    Cpu,
}

impl Device {
    pub fn select(preference: DevicePreference) -> Self {
        match preference {
            DevicePreference::Auto => Self::detect(),
            DevicePreference::Cuda => Device::Cuda,
            DevicePreference::Metal => Device::Metal,
            DevicePreference::Cpu => Device::Cpu,
        }
    }

    /// Picks an accelerator when one is visible, otherwise the CPU.
    pub fn detect() -> Self {
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Device::Metal
        } else if Path::new("/dev/nvidia0").exists() {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Device::Cpu)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Metal => "metal",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded text-to-image model.
pub trait DiffusionPipeline: Send + Sync {
    fn generate(&self, prompt: &str, steps: u32) -> Result<DynamicImage>;
}

/// Builds a pipeline. Called at most once per [`LocalPipelineBackend`].
pub trait PipelineLoader: Send + Sync {
    fn load(&self, device: Device) -> Result<Box<dyn DiffusionPipeline>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    LoadingFailed,
    Ready,
}

struct PipelineSlot {
    loader: Box<dyn PipelineLoader>,
    device: Device,
    steps: u32,
    pipeline: OnceCell<std::result::Result<Box<dyn DiffusionPipeline>, String>>,
}

impl PipelineSlot {
    fn pipeline(&self) -> Result<&dyn DiffusionPipeline> {
        // get_or_init blocks concurrent callers until the first load settles.
        let loaded = self.pipeline.get_or_init(|| {
            log::info!("Loading local diffusion pipeline on {}", self.device);
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(self.device)))
                .unwrap_or_else(|payload| {
                    Err(AppError::BackendUnavailable(format!(
                        "pipeline loader panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match outcome {
                Ok(pipeline) => {
                    log::info!(
                        "Local pipeline ready in {}ms",
                        started.elapsed().as_millis()
                    );
                    Ok(pipeline)
                }
                Err(e) => {
                    log::error!("Local pipeline failed to load, backend disabled: {}", e);
                    Err(match e {
                        AppError::BackendUnavailable(reason) => reason,
                        other => other.to_string(),
                    })
                }
            }
        });

        match loaded {
            Ok(pipeline) => Ok(pipeline.as_ref()),
            Err(reason) => Err(AppError::BackendUnavailable(reason.clone())),
        }
    }

    fn run(&self, prompt: &str) -> Result<Vec<u8>> {
        let image = self.pipeline()?.generate(prompt, self.steps)?;
        encode_png(&image)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs an in-process pipeline that is loaded lazily on first use and
/// shared by every later request.
#[derive(Clone)]
pub struct LocalPipelineBackend {
    slot: Arc<PipelineSlot>,
}

impl LocalPipelineBackend {
    pub fn new(loader: Box<dyn PipelineLoader>, device: Device, steps: u32) -> Self {
        log::info!(
            "Local pipeline configured for {} ({}), {} steps",
            device,
            if device.is_accelerated() { "accelerated" } else { "portable" },
            steps
        );
        Self {
            slot: Arc::new(PipelineSlot {
                loader,
                device,
                steps,
                pipeline: OnceCell::new(),
            }),
        }
    }

    pub fn device(&self) -> Device {
        self.slot.device
    }

    pub fn state(&self) -> PipelineState {
        match self.slot.pipeline.get() {
            None => PipelineState::Uninitialized,
            Some(Ok(_)) => PipelineState::Ready,
            Some(Err(_)) => PipelineState::LoadingFailed,
        }
    }
}

#[async_trait]
impl ImageBackend for LocalPipelineBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let slot = Arc::clone(&self.slot);
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || slot.run(&prompt))
            .await
            .map_err(|e| AppError::InternalError(format!("Pipeline task failed: {}", e)))?
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| AppError::InternalError(format!("Failed to encode PNG: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SolidPipeline;

    impl DiffusionPipeline for SolidPipeline {
        fn generate(&self, prompt: &str, steps: u32) -> Result<DynamicImage> {
            let shade = (prompt.len() as u32 * steps % 255) as u8;
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                8,
                8,
                Rgb([shade, 0, 255]),
            )))
        }
    }

    struct SlowLoader {
        loads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PipelineLoader for SlowLoader {
        fn load(&self, _device: Device) -> Result<Box<dyn DiffusionPipeline>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            if self.fail {
                Err(AppError::BackendUnavailable("weights not found".into()))
            } else {
                Ok(Box::new(SolidPipeline))
            }
        }
    }

    fn backend(fail: bool) -> (LocalPipelineBackend, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = SlowLoader {
            loads: Arc::clone(&loads),
            fail,
        };
        (LocalPipelineBackend::new(Box::new(loader), Device::Cpu, 4), loads)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_load_once() {
        let (backend, loads) = backend(false);
        assert_eq!(backend.state(), PipelineState::Uninitialized);

        let (a, b) = tokio::join!(backend.generate("a castle"), backend.generate("a forest"));

        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.state(), PipelineState::Ready);
        assert!(a.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(b.starts_with(&[0x89, b'P', b'N', b'G']));

        backend.generate("a third request").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_load_is_permanent() {
        let (backend, loads) = backend(true);

        let (a, b) = tokio::join!(backend.generate("one"), backend.generate("two"));
        assert!(matches!(a, Err(AppError::BackendUnavailable(_))));
        assert!(matches!(b, Err(AppError::BackendUnavailable(_))));

        let later = backend.generate("three").await;
        assert!(matches!(later, Err(AppError::BackendUnavailable(_))));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.state(), PipelineState::LoadingFailed);
    }

    struct PanickingLoader {
        loads: Arc<AtomicUsize>,
    }

    impl PipelineLoader for PanickingLoader {
        fn load(&self, _device: Device) -> Result<Box<dyn DiffusionPipeline>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            panic!("cuda oom");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_load_is_permanent() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = PanickingLoader {
            loads: Arc::clone(&loads),
        };
        let backend = LocalPipelineBackend::new(Box::new(loader), Device::Cpu, 4);

        for prompt in ["one", "two", "three"] {
            match backend.generate(prompt).await {
                Err(AppError::BackendUnavailable(reason)) => assert!(reason.contains("cuda oom")),
                other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
            }
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.state(), PipelineState::LoadingFailed);
    }

    #[test]
    fn test_encoded_png_decodes_back() {
        let original = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([10, 20, 30])));
        let bytes = encode_png(&original).unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.to_rgb8(), original.to_rgb8());
    }

    #[test]
    fn test_device_selection() {
        assert_eq!(Device::select(DevicePreference::Cpu), Device::Cpu);
        assert_eq!(Device::select(DevicePreference::Cuda), Device::Cuda);
        assert!(!Device::Cpu.is_accelerated());
        assert!(Device::Metal.is_accelerated());
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }
}
