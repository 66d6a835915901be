//! Host collaborator traits

use std::collections::BTreeSet;
use tether_api::{ChallengeKind, ShieldDomainKind};
use tether_util::AppToken;
use thiserror::Error;

/// Errors from host collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Shield store unavailable for {0}")]
    ShieldUnavailable(ShieldDomainKind),

    #[error("Deep link failed: {0}")]
    DeepLinkFailed(String),

    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Platform app-blocking backend.
///
/// Each domain maps to its own named platform store. Applying a domain
/// replaces that store's contents; clearing it empties only that store.
/// Both operations must be idempotent.
pub trait ShieldBackend: Send + Sync {
    /// Block `apps` under `domain`, replacing whatever that domain blocked before
    fn apply(&self, domain: ShieldDomainKind, apps: &BTreeSet<AppToken>) -> HostResult<()>;

    /// Remove every block owned by `domain`
    fn clear(&self, domain: ShieldDomainKind) -> HostResult<()>;

    /// Optional: check if the backend is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Opens the platform telephone or messaging surface.
///
/// Success of the user's action is inferred later by the verification
/// strategies, never from this call.
pub trait DeepLinker: Send + Sync {
    fn open(&self, kind: ChallengeKind, phone: Option<&str>) -> HostResult<()>;
}

/// Delivers user-visible reminder notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> HostResult<()>;
}
