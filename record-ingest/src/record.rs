//! Typed records and the codec between the wire line, the in-memory
//! collection, and the persisted JSON document.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ERR_INVALID_SCORE, ERR_MALFORMED, FIELD_DELIMITER};

/// One submitted entry plus the provenance the server attaches to it.
///
/// Records written by the desktop forms carry no provenance, so those
/// fields are optional and left out of the document when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub class_label: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

impl Record {
    pub fn new(name: impl Into<String>, class_label: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            class_label: class_label.into(),
            score,
            origin_address: None,
            origin_port: None,
            received_at: None,
        }
    }

    /// Stamps the record with the peer it came from and when it arrived.
    pub fn with_origin(mut self, peer: SocketAddr, received_at: impl Into<String>) -> Self {
        self.origin_address = Some(peer.ip().to_string());
        self.origin_port = Some(peer.port());
        self.received_at = Some(received_at.into());
        self
    }
}

/// The full ordered contents of the store file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCollection(Vec<Record>);

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    pub fn last(&self) -> Option<&Record> {
        self.0.last()
    }
}

impl From<Vec<Record>> for RecordCollection {
    fn from(records: Vec<Record>) -> Self {
        Self(records)
    }
}

impl IntoIterator for RecordCollection {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Why a wire message could not become a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("invalid score {0:?}")]
    InvalidScore(String),
}

impl DecodeError {
    /// Text sent back to the client for this failure.
    pub fn reply(&self) -> &'static str {
        match self {
            DecodeError::MalformedMessage(_) => ERR_MALFORMED,
            DecodeError::InvalidScore(_) => ERR_INVALID_SCORE,
        }
    }
}

/// Parses one raw request into a record without provenance.
pub fn decode(raw: &[u8]) -> Result<Record, DecodeError> {
    let text = String::from_utf8_lossy(raw);
    let fields: Vec<&str> = text.trim().split(FIELD_DELIMITER).collect();

    let [name, class_label, score] = fields.as_slice() else {
        return Err(DecodeError::MalformedMessage(format!(
            "expected 3 fields, got {}",
            fields.len()
        )));
    };

    let name = name.trim();
    let class_label = class_label.trim();
    if name.is_empty() || class_label.is_empty() {
        return Err(DecodeError::MalformedMessage(
            "name and class must not be empty".to_string(),
        ));
    }

    let score_text = score.trim();
    let score = score_text
        .parse::<f64>()
        .ok()
        .map(round_score)
        .filter(|score| score.is_finite())
        .ok_or_else(|| DecodeError::InvalidScore(score_text.to_string()))?;

    Ok(Record::new(name, class_label, score))
}

/// Rounds to two decimals on the exact binary value, ties to even, so
/// `7.125` becomes `7.12`. Never overflows for finite input.
fn round_score(score: f64) -> f64 {
    format!("{score:.2}").parse().unwrap_or(score)
}

/// Serializes the collection as four-space indented JSON with a trailing
/// newline. Non-ASCII text is written as-is.
pub fn encode(collection: &RecordCollection) -> serde_json::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    collection.serialize(&mut serializer)?;
    buffer.push(b'\n');
    Ok(buffer)
}

pub fn parse(bytes: &[u8]) -> serde_json::Result<RecordCollection> {
    serde_json::from_slice(bytes)
}
