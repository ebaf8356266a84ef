use skein_analyzer::AnalysisError;
use skein_core::TraceError;

// CLI ERROR
// ================================================================================================

/// Top-level failure of a CLI invocation, mapped onto the documented exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("analysis cancelled: out of memory")]
    OutOfMemory,
    #[error("internal analyzer failure: {0}")]
    Internal(String),
}

impl CliError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

impl From<AnalysisError> for CliError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Cancelled(skein_analyzer::CancelReason::OutOfMemory) => {
                Self::OutOfMemory
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Exit codes: 0 success, 1 usage/config/io error, 2 trace parse error, 3 out-of-memory cancel,
/// 4 internal analyzer failure.
pub fn exit_code(result: &Result<(), CliError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(CliError::Usage(_) | CliError::Config(_) | CliError::Io { .. }) => 1,
        Err(CliError::Trace(_)) => 2,
        Err(CliError::OutOfMemory) => 3,
        Err(CliError::Internal(_)) => 4,
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_contract() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(CliError::Usage("x".into()))), 1);
        assert_eq!(exit_code(&Err(CliError::Config("x".into()))), 1);
        assert_eq!(exit_code(&Err(CliError::OutOfMemory)), 3);
        assert_eq!(exit_code(&Err(CliError::Internal("x".into()))), 4);
    }
}
