use std::path::PathBuf;

/// Result alias that carries the custom [`ClipperError`] type.
pub type Result<T> = std::result::Result<T, ClipperError>;

/// Common error type for the core crate.
///
/// Every variant is terminal for the current run. Errors coming from external
/// tools are carried verbatim so the caller can present a precise diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum ClipperError {
    /// A beat grid, clip pool or schedule parameter violated an invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No clip in the pool can fill a slot under the current parameters.
    #[error(
        "unsatisfiable schedule at slot {slot}: needs {required_ms} ms of footage but the \
         longest usable clip has {longest_ms} ms ({suggestion})"
    )]
    UnsatisfiableSchedule {
        slot: usize,
        required_ms: u64,
        longest_ms: u64,
        suggestion: &'static str,
    },
    /// The media tool failed while rendering the final video.
    #[error("render failed: {message}")]
    Render {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },
    /// A source clip could not be probed.
    #[error("failed to probe {}: {message}", path.display())]
    Probe { path: PathBuf, message: String },
    /// The soundtrack could not be decoded into samples.
    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    /// A required command line tool is not installed.
    #[error("`{0}` was not found in PATH")]
    ToolNotFound(&'static str),
    /// A project document could not be interpreted.
    #[error("malformed project document: {0}")]
    Project(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),
}

impl ClipperError {
    /// Creates an [`ClipperError::InvalidInput`] from anything string-like.
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a [`ClipperError::Render`] error.
    pub fn render_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Render {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Creates a [`ClipperError::Probe`] error for `path`.
    pub fn probe_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for ClipperError {
    fn from(value: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfiable_message_carries_suggestion() {
        let err = ClipperError::UnsatisfiableSchedule {
            slot: 3,
            required_ms: 4_000,
            longest_ms: 1_500,
            suggestion: "lower the multiplier or add longer clips",
        };

        let text = err.to_string();
        assert!(text.contains("slot 3"));
        assert!(text.contains("lower the multiplier"));
    }
}
