//! Error kinds for doctai operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to react, e.g. the CLI maps
/// configuration kinds and `ProviderAuth` to distinct exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // Configuration errors (rejected before the iteration loop starts)
    // =========================================================================
    /// Invalid configuration or parameters
    ConfigInvalid,

    /// No documentation sources were supplied
    NoSources,

    /// Provider name is not one of the known vendors
    UnknownProvider,

    // =========================================================================
    // Workspace errors
    // =========================================================================
    /// The run's working directory could not be created
    WorkDirFailed,

    // =========================================================================
    // Provider errors
    // =========================================================================
    /// The provider rejected the credentials
    ProviderAuth,

    /// The provider throttled the request
    ProviderRateLimited,

    /// Transport failure or unexpected HTTP status
    ProviderNetwork,

    /// The provider answered with something that is not one assistant message
    ProviderMalformed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Serialization/deserialization failed
    SerializationFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // Configuration
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::NoSources => "NoSources",
            ErrorKind::UnknownProvider => "UnknownProvider",

            // Workspace
            ErrorKind::WorkDirFailed => "WorkDirFailed",

            // Provider
            ErrorKind::ProviderAuth => "ProviderAuth",
            ErrorKind::ProviderRateLimited => "ProviderRateLimited",
            ErrorKind::ProviderNetwork => "ProviderNetwork",
            ErrorKind::ProviderMalformed => "ProviderMalformed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderRateLimited | ErrorKind::ProviderNetwork
        )
    }

    /// Whether this kind means the run was misconfigured rather than failed
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigInvalid | ErrorKind::NoSources | ErrorKind::UnknownProvider
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NoSources.to_string(), "NoSources");
        assert_eq!(ErrorKind::ProviderAuth.to_string(), "ProviderAuth");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::ProviderNetwork.is_retryable());
        assert!(ErrorKind::ProviderRateLimited.is_retryable());
        assert!(!ErrorKind::ProviderAuth.is_retryable());
        assert!(!ErrorKind::ProviderMalformed.is_retryable());
    }

    #[test]
    fn test_is_config() {
        assert!(ErrorKind::NoSources.is_config());
        assert!(ErrorKind::UnknownProvider.is_config());
        assert!(!ErrorKind::WorkDirFailed.is_config());
    }
}
