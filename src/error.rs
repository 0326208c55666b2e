use thiserror::Error;

/// Failure that ends the preloading phase.
///
/// This is the only error that crosses the engine boundary; decode
/// degradation and skipped paints are absorbed internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameLoadError {
    #[error("failed to fetch frame {index}: {reason}")]
    FetchFailure { index: usize, reason: String },
}

impl FrameLoadError {
    pub fn fetch(index: usize, reason: impl Into<String>) -> Self {
        Self::FetchFailure {
            index,
            reason: reason.into(),
        }
    }

    /// Index of the frame whose fetch failed.
    pub fn index(&self) -> usize {
        match self {
            Self::FetchFailure { index, .. } => *index,
        }
    }
}

/// Reason a frame source could not deliver a raster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Reason the optional decode pre-pass failed. The raw raster stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failure_reports_index() {
        let err = FrameLoadError::fetch(7, "404");
        assert_eq!(err.index(), 7);
        assert_eq!(err.to_string(), "failed to fetch frame 7: 404");
    }
}
