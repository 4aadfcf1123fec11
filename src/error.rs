//! Errors of the resolution pass.

use thiserror::Error;

use crate::auth::{AuthSubsystemInitError, VerificationConfigError};
use crate::cluster::ConfigResolutionError;

/// A resolution pass failed; no descriptor is produced.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cluster credentials: {0}")]
    ConfigResolution(#[from] ConfigResolutionError),

    #[error("webhook authentication: {0}")]
    VerificationConfig(#[from] VerificationConfigError),

    #[error("local authentication: {0}")]
    AuthSubsystemInit(#[from] AuthSubsystemInitError),
}

/// Result type for the resolution pass.
pub type ResolveResult<T> = Result<T, ResolveError>;
