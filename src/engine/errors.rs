#[derive(Debug, thiserror::Error)]
pub enum FlipbookError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load resource {locator}: {cause}")]
    ResourceLoad { locator: String, cause: String },

    #[error("Mount point is already owned by another engine")]
    MountBusy,

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Engine has been disposed")]
    Disposed,

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl FlipbookError {
    /// Shorthand for a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        FlipbookError::Configuration(msg.into())
    }

    /// Creates a load failure for `locator`, keeping the full cause chain as text.
    pub fn load_failure(locator: impl Into<String>, cause: &anyhow::Error) -> Self {
        FlipbookError::ResourceLoad {
            locator: locator.into(),
            cause: format!("{cause:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failure_keeps_cause_chain() {
        let cause = anyhow::anyhow!("truncated png").context("decoding page");
        let err = FlipbookError::load_failure("b.png", &cause);
        let msg = err.to_string();
        assert!(msg.contains("b.png"));
        assert!(msg.contains("decoding page"));
        assert!(msg.contains("truncated png"));
    }

    #[test]
    fn config_error_display() {
        let err = FlipbookError::config("no media supplied");
        assert_eq!(err.to_string(), "Configuration error: no media supplied");
    }
}
