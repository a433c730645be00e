//! Fetch Primitives
//!
//! A [`Source`] performs one blocking retrieval and returns decoded,
//! already-extracted JSON. Sources are only ever called from background
//! worker threads; the render thread never touches the network.
//!
//! # Implementations
//!
//! - [`RestSource`]: HTTP request via a blocking `reqwest` client
//! - [`FileSource`]: local file, JSON or raw text
//!
//! [`fetch_bytes`] is the raw-bytes variant used for images.

mod file;
mod rest;

pub use self::file::{FileSource, FileSpec};
pub use self::rest::{Auth, RestSource, RestSpec};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::FetchError;

/// Default HTTP timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One retrieval of external data
pub trait Source: Send + Sync + fmt::Debug {
    /// Fetch and extract
    fn fetch(&self) -> Result<Value, FetchError>;

    /// URL or path, for log context
    fn describe(&self) -> String;
}

/// Shared source handle
pub type SharedSource = Arc<dyn Source>;

/// Fetch raw bytes from an `http(s)://` or `file://` URL, or a bare path
///
/// `auth` is only sent for HTTP URLs.
pub fn fetch_bytes(url: &str, auth: Option<&Auth>, timeout: Duration) -> Result<Vec<u8>, FetchError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(std::fs::read(path)?);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Ok(std::fs::read(url)?);
    }

    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let mut request = client.get(url);
    if let Some(auth) = auth {
        request = request.header(reqwest::header::AUTHORIZATION, auth.header_value());
    }
    let response = request.send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            body: truncate(response.text().unwrap_or_default()),
        });
    }
    Ok(response.bytes()?.to_vec())
}

/// Keep error bodies short enough for a log line
pub(crate) fn truncate(mut body: String) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
