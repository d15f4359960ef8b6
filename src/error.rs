//! Error kinds returned across the `lotman` boundary.
//!
//! Every fallible operation in this crate returns [`LotError`]. Variants map
//! 1:1 onto the error kinds a caller needs to branch on (a missing lot is
//! recoverable in a way a corrupted schema is not); the `Display` impl adds
//! an operation-identifying prefix so logs and CLI/shim error strings stay
//! traceable to the call that produced them.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LotError>;

#[derive(Debug, thiserror::Error)]
pub enum LotError {
    #[error("{op}: lot or path does not exist: {name}")]
    NotFound { op: &'static str, name: String },

    #[error("{op}: already exists: {name}")]
    AlreadyExists { op: &'static str, name: String },

    #[error("{op}: invariant violation: {detail}")]
    InvariantViolation { op: &'static str, detail: String },

    #[error("{op}: caller {caller:?} is not authorized for {name}")]
    Unauthorized {
        op: &'static str,
        caller: Option<String>,
        name: String,
    },

    #[error("{op}: request payload did not match the expected schema: {detail}")]
    SchemaValidation { op: &'static str, detail: String },

    #[error("{op}: store error: {source}")]
    StoreError {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{op}: failed to prepare lot_home directory {path}: {source}")]
    HomeDirError {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{op}: schema migration refused, possible data loss (schema mismatch): {detail}"
    )]
    MigrationRefused { op: &'static str, detail: String },

    #[error("{op}: internal error: {source}")]
    Internal {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl LotError {
    #[must_use]
    pub fn not_found(op: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { op, name: name.into() }
    }

    #[must_use]
    pub fn already_exists(op: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists { op, name: name.into() }
    }

    #[must_use]
    pub fn invariant(op: &'static str, detail: impl Into<String>) -> Self {
        Self::InvariantViolation { op, detail: detail.into() }
    }

    #[must_use]
    pub fn unauthorized(op: &'static str, caller: Option<String>, name: impl Into<String>) -> Self {
        Self::Unauthorized { op, caller, name: name.into() }
    }

    #[must_use]
    pub fn schema(op: &'static str, detail: impl Into<String>) -> Self {
        Self::SchemaValidation { op, detail: detail.into() }
    }

    #[must_use]
    pub fn migration_refused(op: &'static str, detail: impl Into<String>) -> Self {
        Self::MigrationRefused { op, detail: detail.into() }
    }

    /// `true` for the benign "nothing to remove" case: removing a lot that
    /// never existed is reported, not treated as a hard failure upstream.
    #[must_use]
    pub fn is_benign_not_found(&self) -> bool {
        matches!(self, LotError::NotFound { .. })
    }
}

/// Attaches an operation tag to a raw `rusqlite::Error`.
pub(crate) fn store_err(op: &'static str) -> impl FnOnce(rusqlite::Error) -> LotError {
    move |source| LotError::StoreError { op, source }
}

/// Attaches an operation tag to a raw `anyhow::Error`, for failures that
/// don't fit one of the other typed variants (a malformed caller-built
/// dynamic query, for instance) but still deserve context rather than a
/// panic.
pub(crate) fn internal_err(op: &'static str) -> impl FnOnce(anyhow::Error) -> LotError {
    move |source| LotError::Internal { op, source }
}
