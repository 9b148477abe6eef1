//! Wildfire configuration. Settings are layered: built-in defaults, then an
//! optional TOML file, then `WILDFIRE_*` environment variables
//! (e.g. `WILDFIRE_MODEL__WORKERS=4`)

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log filter when `RUST_LOG` is unset
pub const RUST_LOG: &str = "wildfire=debug,actix_web=info,actix_server=info";

/// The config file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "wildfire.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "WILDFIRE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub preprocess: PreprocessSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Path to the TorchScript model file
    pub path: PathBuf,

    /// Number of independently loaded model instances
    pub workers: usize,

    /// Report softmax probabilities rather than raw scores
    pub softmax: bool,

    /// The input shape the model was exported with. Defaults to the shape
    /// preprocessing produces
    pub input_shape: Option<[usize; 4]>,
}

/// Tensor memory layout expected by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// batch, height, width, channels (Keras / TFLite exports)
    Nhwc,
    /// batch, channels, height, width (PyTorch exports)
    Nchw,
}

/// Pixel normalization applied after resizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// `x / 127.5 - 1`, used by Xception, Inception and MobileNet
    Tf,
    /// `(x / 255 - mean) / std` with the ImageNet statistics
    Torch,
    /// `x / 255`
    Unit,
}

/// Resampling filter used to resize to the model resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<Filter> for image::imageops::FilterType {
    fn from(filter: Filter) -> Self {
        use image::imageops::FilterType;
        match filter {
            Filter::Nearest => FilterType::Nearest,
            Filter::Triangle => FilterType::Triangle,
            Filter::CatmullRom => FilterType::CatmullRom,
            Filter::Gaussian => FilterType::Gaussian,
            Filter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessSettings {
    /// Side length of the square model input
    pub size: u32,
    pub layout: Layout,
    pub normalization: Normalization,
    pub filter: Filter,
}

impl PreprocessSettings {
    /// The tensor shape preprocessing produces, batch dimension included
    pub fn output_shape(&self) -> [usize; 4] {
        let size = self.size as usize;
        match self.layout {
            Layout::Nhwc => [1, size, size, 3],
            Layout::Nchw => [1, 3, size, size],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Settings {
    /// Load settings from `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let builder = Self::defaults()?
            .add_source(::config::File::from(file).required(path.is_some()))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string layered on top of the defaults
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings: Settings = Self::defaults()?
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<::config::ConfigBuilder<::config::builder::DefaultState>> {
        Ok(::config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("model.path", "models/wildfire.pt")?
            .set_default("model.workers", 2)?
            .set_default("model.softmax", true)?
            .set_default("preprocess.size", 299)?
            .set_default("preprocess.layout", "nhwc")?
            .set_default("preprocess.normalization", "tf")?
            .set_default("preprocess.filter", "nearest")?
            .set_default("fetch.timeout_ms", 10_000)?
            .set_default("fetch.retries", 0)?
            .set_default("fetch.retry_backoff_ms", 250)?
            .set_default("fetch.max_bytes", 20 * 1024 * 1024)?
            .set_default(
                "fetch.user_agent",
                concat!("wildfire/", env!("CARGO_PKG_VERSION")),
            )?)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.model.workers == 0 {
            bail!("model.workers must be at least 1");
        }
        if self.preprocess.size == 0 {
            bail!("preprocess.size must be at least 1");
        }
        if self.fetch.max_bytes == 0 {
            bail!("fetch.max_bytes must be at least 1");
        }
        let produced = self.preprocess.output_shape();
        if let Some(declared) = self.model.input_shape {
            if declared != produced {
                bail!(
                    "model.input_shape {declared:?} does not match the preprocessing output {produced:?}"
                );
            }
        }
        Ok(())
    }

    /// The input shape the model is declared to accept
    pub fn model_input_shape(&self) -> [usize; 4] {
        self.model
            .input_shape
            .unwrap_or_else(|| self.preprocess.output_shape())
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}
