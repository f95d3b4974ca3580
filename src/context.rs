use std::path::PathBuf;

use candle_core::Device;
use once_cell::sync::OnceCell;

use crate::classifier::ModelBundle;
use crate::device;
use crate::encoder::Input;
use crate::error::Result;
use crate::label_encoder::Granularity;
use crate::prediction::Prediction;

pub const DEFAULT_MODEL_PATH: &str = "npoclass_model/";

/// Per-call settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// Run on CUDA or Metal when one is available.
    pub use_accelerator: bool,
    pub model_path: PathBuf,
    pub granularity: Granularity,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            use_accelerator: true,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            granularity: Granularity::BroadCategory,
        }
    }
}

impl ClassifyOptions {
    /// Builds options from the string granularity flag, failing on anything
    /// other than `bc` or `mg`.
    pub fn new(
        use_accelerator: bool,
        model_path: impl Into<PathBuf>,
        granularity: &str,
    ) -> Result<Self> {
        Ok(Self {
            use_accelerator,
            model_path: model_path.into(),
            granularity: granularity.parse()?,
        })
    }
}

/// Caller-owned classifier that loads its model bundle on first use.
///
/// The model path and granularity of the first successful load stay fixed
/// for the lifetime of the context; later calls asking for others are served
/// from the original artifacts. The accelerator flag is honoured on every
/// call: the bundle is loaded once per device, so switching between the CPU
/// and the accelerator never moves weights back and forth. A failed load
/// leaves the context unchanged, so the next call tries again.
#[derive(Default)]
pub struct NpoClass {
    source: OnceCell<(PathBuf, Granularity)>,
    accelerator: OnceCell<Device>,
    cpu: OnceCell<ModelBundle>,
    accelerated: OnceCell<ModelBundle>,
}

impl NpoClass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.cpu.get().is_some() || self.accelerated.get().is_some()
    }

    /// Device a call with `use_accelerator` runs on. The accelerator is opened
    /// once; without one every call runs on the CPU.
    fn device(&self, use_accelerator: bool) -> Device {
        if use_accelerator {
            self.accelerator
                .get_or_init(|| device::select_device(true))
                .clone()
        } else {
            Device::Cpu
        }
    }

    /// Returns the bundle for the device `options` asks for, loading it if
    /// needed.
    pub fn bundle(&self, options: &ClassifyOptions) -> Result<&ModelBundle> {
        let (model_path, granularity) = match self.source.get() {
            Some((path, granularity)) => {
                if *path != options.model_path || *granularity != options.granularity {
                    tracing::debug!(
                        requested_path = %options.model_path.display(),
                        requested_granularity = %options.granularity,
                        loaded_path = %path.display(),
                        loaded_granularity = %granularity,
                        "model already loaded; ignoring new path and granularity"
                    );
                }
                (path.clone(), *granularity)
            }
            None => (options.model_path.clone(), options.granularity),
        };

        let device = self.device(options.use_accelerator);
        let cell = if device.is_cpu() {
            &self.cpu
        } else {
            &self.accelerated
        };
        let bundle = cell.get_or_try_init(|| {
            tracing::info!(
                model_path = %model_path.display(),
                %granularity,
                device = device::describe(&device),
                "loading model bundle"
            );
            ModelBundle::load(&model_path, granularity, device.clone())
        })?;

        let _ = self.source.set((model_path, granularity));
        Ok(bundle)
    }

    /// Classifies one text or a list of texts; returns one prediction per
    /// text, in input order.
    pub fn classify(
        &self,
        input: impl Into<Input>,
        options: &ClassifyOptions,
    ) -> Result<Vec<Prediction>> {
        let input = input.into();
        let bundle = self.bundle(options)?;

        tracing::info!(
            device = device::describe(bundle.device()),
            inputs = input.len(),
            "classifying"
        );
        bundle.classify(&input)
    }
}
