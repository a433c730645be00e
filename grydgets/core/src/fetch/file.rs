//! Local file source

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use super::Source;
use crate::error::FetchError;
use crate::extract::Extraction;

/// Declarative description of a file read
#[derive(Debug, Clone, Deserialize)]
pub struct FileSpec {
    /// File to read on every fetch
    pub path: PathBuf,

    /// Path/query applied to the decoded contents
    #[serde(flatten)]
    pub extraction: Extraction,

    /// Treat the contents as text instead of JSON
    #[serde(default)]
    pub raw: bool,
}

/// Reads one local file per fetch
#[derive(Debug)]
pub struct FileSource {
    spec: FileSpec,
}

impl FileSource {
    /// Wrap a spec
    pub fn new(spec: FileSpec) -> Result<Self, FetchError> {
        spec.extraction
            .validate()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(Self { spec })
    }
}

impl Source for FileSource {
    fn fetch(&self) -> Result<Value, FetchError> {
        let text = std::fs::read_to_string(&self.spec.path)?;
        let data = if self.spec.raw {
            Value::String(text.trim_end().to_string())
        } else {
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))?
        };
        Ok(self.spec.extraction.apply(data)?)
    }

    fn describe(&self) -> String {
        self.spec.path.display().to_string()
    }
}
