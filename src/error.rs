use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

/// Everything that can stop a load, extract or render call.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The file is missing, unreadable, or not a supported raster format.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The bytes were read but do not decode as an image.
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to render plot: {0}")]
    Render(String),
    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

impl ExtractError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: path.into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }
    }

    /// Map an `image` crate error onto the load taxonomy: I/O and unsupported
    /// formats are read failures, everything else is a decode failure.
    pub(crate) fn from_image(path: impl Into<PathBuf>, err: image::ImageError) -> Self {
        let path = path.into();
        match err {
            image::ImageError::IoError(source) => Self::Io { path, source },
            image::ImageError::Unsupported(e) => Self::Io {
                path,
                source: io::Error::new(io::ErrorKind::Unsupported, e.to_string()),
            },
            other => Self::Decode {
                path,
                source: other,
            },
        }
    }
}

/// Clustering hit its iteration cap before the centroids settled.
///
/// Not an error: the result is still usable and carries this as a flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceWarning {
    pub iterations: usize,
    /// Largest centroid movement seen in the last iteration.
    pub final_shift: f64,
    pub threshold: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clustering stopped after {} iterations with centroid shift {:.4} \
             above threshold {:.4}",
            self.iterations, self.final_shift, self.threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_image_errors_map_to_io() {
        let err = image::ImageError::Unsupported(
            image::error::UnsupportedError::from_format_and_kind(
                image::error::ImageFormatHint::Unknown,
                image::error::UnsupportedErrorKind::Format(image::error::ImageFormatHint::Unknown),
            ),
        );
        match ExtractError::from_image("a.xyz", err) {
            ExtractError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::Unsupported)
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn warning_message_mentions_iterations() {
        let warning = ConvergenceWarning {
            iterations: 7,
            final_shift: 1.5,
            threshold: 0.5,
        };
        assert!(warning.to_string().contains("after 7 iterations"));
    }
}
