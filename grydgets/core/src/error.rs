//! Error Types
//!
//! Errors are split by the point at which they surface:
//!
//! - **Build time** ([`BuildError`], [`TopologyError`]): fatal, abort startup.
//! - **Per fetch** ([`FetchError`], [`ExtractionError`]): recovered by the
//!   provider or refreshing node that hit them; the loop keeps running.
//! - **Per frame** ([`RenderError`]): recovered by the parent container, which
//!   skips the offending child for that frame.
//! - **Inbound** ([`NotifyError`]): returned to whoever called `notify`.
//! - **Startup** ([`ConfigError`]): the configuration file could not be used.

use std::path::PathBuf;

use thiserror::Error;

use crate::surface::Size;

// ============================================================================
// Build-time errors
// ============================================================================

/// Child-arity violations detected while assembling the tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// A container received more children than it can hold
    #[error("{node} accepts at most {max} child(ren)")]
    TooManyChildren {
        /// Node that rejected the child
        node: String,
        /// Maximum number of children
        max: usize,
    },

    /// A container was finished with fewer children than it needs
    #[error("{node} needs at least {min} child(ren), got {actual}")]
    TooFewChildren {
        /// Node that is under-populated
        node: String,
        /// Minimum number of children
        min: usize,
        /// Number of children actually added
        actual: usize,
    },

    /// A leaf node was given children
    #[error("{node} does not accept children")]
    LeafNode {
        /// The leaf node
        node: String,
    },
}

/// Errors raised while turning a declarative description into a live tree
#[derive(Debug, Error)]
pub enum BuildError {
    /// Wrong child arity
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    /// The widget tag is not in the widget table
    #[error("unknown widget type '{kind}' (available: {available})")]
    UnknownWidgetType {
        /// The tag that was requested
        kind: String,
        /// Comma-separated list of known tags
        available: String,
    },

    /// The provider `type` is not one we can construct
    #[error("unknown provider type '{kind}' for provider '{provider}' (available: {available})")]
    UnknownProviderType {
        /// Provider name
        provider: String,
        /// The type that was requested
        kind: String,
        /// Comma-separated list of known types
        available: String,
    },

    /// A widget references a provider that was never declared
    #[error("widget '{widget}' references unknown provider '{provider}' (available: {available})")]
    UnknownProviderReference {
        /// Widget holding the reference
        widget: String,
        /// The missing provider name
        provider: String,
        /// Comma-separated list of declared providers
        available: String,
    },

    /// Widget or provider parameters did not match the expected shape
    #[error("invalid parameters for '{widget}': {reason}")]
    InvalidParams {
        /// Widget or provider name
        widget: String,
        /// What was wrong
        reason: String,
    },

    /// A background thread could not be started
    #[error("failed to spawn background thread for '{name}': {source}")]
    Spawn {
        /// Owner of the thread
        name: String,
        /// The underlying IO error
        source: std::io::Error,
    },
}

impl BuildError {
    /// Shorthand for [`BuildError::InvalidParams`]
    pub fn invalid(widget: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidParams {
            widget: widget.into(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Per-fetch errors
// ============================================================================

/// Failure to resolve a path or query against a decoded payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Object lookup on a key that is absent
    #[error("key '{0}' not found")]
    MissingKey(String),

    /// Array lookup past the end
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Array length
        len: usize,
    },

    /// Lookup applied to a scalar
    #[error("cannot index {kind} with {with}")]
    NotIndexable {
        /// JSON type of the value
        kind: &'static str,
        /// What the lookup used
        with: String,
    },

    /// The path string itself is malformed
    #[error("bad path '{path}': {reason}")]
    BadPath {
        /// The offending path
        path: String,
        /// What was wrong
        reason: String,
    },

    /// The query expression failed to parse or evaluate
    #[error("query error: {0}")]
    Query(String),

    /// The query produced no output
    #[error("query produced no result")]
    NoResult,
}

/// Failure of a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with something other than 200
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The request could not be built (bad method, URL or client setup)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, TLS or timeout failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// Local file read failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The extraction rule did not resolve
    #[error("data extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

// ============================================================================
// Per-frame errors
// ============================================================================

/// Failure to produce a surface for one node in one frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A child returned a surface of the wrong size
    #[error("rendered {actual} but {expected} was requested")]
    ShapeMismatch {
        /// Requested size
        expected: Size,
        /// Size actually produced
        actual: Size,
    },

    /// Image bytes could not be decoded
    #[error("image error: {0}")]
    Image(String),

    /// Text could not be laid out in the available space
    #[error("font error: {0}")]
    Font(String),

    /// A container was asked to render before it had children
    #[error("{0} has no children to render")]
    EmptyChildren(String),
}

// ============================================================================
// Inbound notifications
// ============================================================================

/// Errors returned to callers of `notify`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// No notifiable widget is registered under that name
    #[error("widget not found: {0}")]
    WidgetNotFound(String),

    /// The payload is not a recognised override
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Errors loading or validating a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    ValidationError(String),
}
