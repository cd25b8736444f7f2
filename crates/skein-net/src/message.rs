//! Typed payloads

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NetError, NetResult};
use crate::tag::Tag;

/// A payload type bound to one wire tag.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Probe { nonce: u64 }
///
/// impl Message for Probe {
///     const TAG: Tag = Tag::user(3);
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + 'static {
    const TAG: Tag;

    fn to_payload(&self) -> NetResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(NetError::Serialize)
    }

    fn from_payload(payload: &[u8]) -> NetResult<Self> {
        serde_json::from_slice(payload).map_err(NetError::Deserialize)
    }
}

/// Diagnostic carried by an error-tagged frame.
///
/// Encoded as raw UTF-8 rather than through serde so that any peer can
/// produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    message: String,
}

impl Report {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }

    pub fn to_payload(&self) -> &[u8] {
        self.message.as_bytes()
    }

    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(payload))
    }
}

impl From<&NetError> for Report {
    fn from(err: &NetError) -> Self {
        match err {
            NetError::Handler(reason) | NetError::Remote(reason) => Report::new(reason.clone()),
            other => Report::new(other.to_string()),
        }
    }
}

impl From<Report> for NetError {
    fn from(report: Report) -> Self {
        NetError::Remote(report.into_message())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
