//! kopatch apply: issue merge-patches against live objects and check that they stuck.

#![forbid(unsafe_code)]

use kopatch_kubehub::{DiscoveryError, TransportError};

pub mod issuer;
pub mod logger;
pub mod outcome;

pub use issuer::{Identity, Issued, PatchIssuer};
pub use logger::{ObjectLogger, RecordingLogger, TracingObjectLogger};
pub use outcome::{apply_reaction_outcomes, ReactionOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Caller bug: conflicting or missing identity, or a malformed patch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Any non-404 failure of a PATCH call, unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type PatchResult<T> = Result<T, PatchError>;
