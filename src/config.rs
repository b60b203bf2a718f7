//! Runtime settings for extraction, plotting and logging.
//!
//! Settings are layered with the `config` crate: built-in defaults first, then
//! an optional TOML or JSON file, then `WATERCOLOR_*` environment variables
//! (sections separated by `__`, e.g. `WATERCOLOR_EXTRACTION__K=6`).
//!
//! ```toml
//! [extraction]
//! k = 6
//! sample_rate = 0.5
//! color_space = "lab"
//! strategy = "luminance"
//! k_luminance = 4
//! k_color = 3
//!
//! [logging]
//! level = "debug"
//! log_file = "logs/watercolorinator.log"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "WATERCOLOR";

/// Largest supported K; cluster indices are stored as `u8` by the Lab backend.
pub const MAX_CLUSTERS: usize = 256;

pub const DEFAULT_K: usize = 8;
pub const DEFAULT_SAMPLE_RATE: f64 = 0.25;
pub const DEFAULT_MIN_SAMPLES: usize = 10_000;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_RESTARTS: usize = 10;
pub const DEFAULT_K_LUMINANCE: usize = 4;
pub const DEFAULT_K_COLOR: usize = 4;
pub const DEFAULT_SEED: u64 = 42;

/// Space the clustering runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Euclidean distance on 8-bit sRGB channels.
    #[default]
    Rgb,
    /// Euclidean distance in CIE L*a*b*.
    Lab,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb => write!(f, "rgb"),
            Self::Lab => write!(f, "lab"),
        }
    }
}

impl FromStr for ColorSpace {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "lab" => Ok(Self::Lab),
            other => Err(format!("unknown color space `{other}` (expected rgb or lab)")),
        }
    }
}

/// How a palette is built from the sampled pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One k-means run with `k` clusters.
    #[default]
    Kmeans,
    /// A separate run per distinct alpha value, `k` clusters each.
    AlphaLayers,
    /// Split by luminance into `k_luminance` bands, then `k_color` clusters
    /// per band.
    Luminance,
    /// Like `Luminance`, with both counts chosen by silhouette and bounded
    /// by `k_luminance` and `k_color`.
    Adaptive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kmeans => write!(f, "kmeans"),
            Self::AlphaLayers => write!(f, "alpha_layers"),
            Self::Luminance => write!(f, "luminance"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "kmeans" => Ok(Self::Kmeans),
            "alpha_layers" => Ok(Self::AlphaLayers),
            "luminance" => Ok(Self::Luminance),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!(
                "unknown strategy `{other}` (expected kmeans, alpha_layers, luminance or adaptive)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of dominant colors to extract.
    pub k: usize,
    /// Fraction of pixels sampled on images larger than `min_samples`.
    pub sample_rate: f64,
    /// Images with at most this many pixels are sampled whole.
    pub min_samples: usize,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this between iterations.
    pub convergence_threshold: f64,
    /// Independent seeded initialisations; the lowest-inertia one wins.
    pub restarts: usize,
    pub seed: u64,
    pub color_space: ColorSpace,
    /// Ignore pixels with alpha 0.
    pub skip_transparent: bool,
    pub strategy: Strategy,
    /// Luminance bands for the `luminance` and `adaptive` strategies.
    pub k_luminance: usize,
    /// Colors per luminance band.
    pub k_color: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_samples: DEFAULT_MIN_SAMPLES,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            restarts: DEFAULT_RESTARTS,
            seed: DEFAULT_SEED,
            color_space: ColorSpace::Rgb,
            skip_transparent: true,
            strategy: Strategy::Kmeans,
            k_luminance: DEFAULT_K_LUMINANCE,
            k_color: DEFAULT_K_COLOR,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(ExtractError::invalid(format!(
                "sample_rate must be in (0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.max_iterations == 0 {
            return Err(ExtractError::invalid("max_iterations must be at least 1"));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(ExtractError::invalid(format!(
                "convergence_threshold must be a finite non-negative number, got {}",
                self.convergence_threshold
            )));
        }
        if self.restarts == 0 {
            return Err(ExtractError::invalid("restarts must be at least 1"));
        }
        for (name, value) in [("k_luminance", self.k_luminance), ("k_color", self.k_color)] {
            if value == 0 || value > MAX_CLUSTERS {
                return Err(ExtractError::invalid(format!(
                    "{name} must be in 1..={MAX_CLUSTERS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    /// Camera rotation around the vertical axis, in radians.
    pub yaw: f64,
    /// Camera elevation, in radians.
    pub pitch: f64,
    pub scale: f64,
    /// Radius of a point with a share close to zero.
    pub min_radius: u32,
    /// Radius of a point holding the whole image.
    pub max_radius: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 700,
            title: "Dominant colors".to_string(),
            yaw: 0.6,
            pitch: 0.35,
            scale: 0.8,
            min_radius: 4,
            max_radius: 40,
        }
    }
}

impl PlotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExtractError::invalid("plot dimensions must be non-zero"));
        }
        if self.min_radius > self.max_radius {
            return Err(ExtractError::invalid(
                "plot min_radius must not exceed max_radius",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name; RFC 5424 names such as `notice` or `critical` are accepted.
    pub level: String,
    /// Also append plain-text log lines to this file.
    pub log_file: Option<PathBuf>,
    /// Colorize console output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extraction: ExtractionConfig,
    pub plot: PlotConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        self.plot.validate()?;
        crate::logging::parse_level(&self.logging.level)?;
        Ok(())
    }
}

/// Load settings from defaults, `path` (if given) and the environment.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

    if let Some(path) = path {
        if !path.exists() {
            return Err(ExtractError::not_found(path));
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings: Settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    tracing::debug!(?settings, "settings loaded");
    Ok(settings)
}
