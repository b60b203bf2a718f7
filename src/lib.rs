//! Dominant color extraction for watercolor studies.
//!
//! Load an image, cluster its pixels into K dominant colors and plot them in
//! RGB space:
//!
//! ```no_run
//! use watercolorinator::{ColorExtractor, ExtractionConfig};
//!
//! let extractor = ColorExtractor::new(ExtractionConfig::default());
//! let image = extractor.load("painting.png")?;
//! let colors = extractor.extract(&image, 6)?;
//! for color in &colors {
//!     println!("#{} {:.1}%", color.hex(), color.share * 100.0);
//! }
//! extractor.visualize(&colors, "painting_colors.png")?;
//! # Ok::<(), watercolorinator::ExtractError>(())
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod image;
pub mod kmeans;
pub mod logging;
#[cfg(not(target_arch = "wasm32"))]
pub mod plot;
pub mod quantize;
pub mod sample;
pub mod strategy;
pub mod wasm;

pub use crate::config::{
    ColorSpace, ExtractionConfig, LoggingConfig, PlotConfig, Settings, Strategy,
};
pub use crate::error::{ConvergenceWarning, ExtractError, Result};
pub use crate::extract::{ColorExtractor, DominantColor, DominantColorSet};
pub use crate::image::Image;
pub use crate::logging::{LogSink, NullSink, TracingSink};
pub use crate::wasm::dominant_colors;
