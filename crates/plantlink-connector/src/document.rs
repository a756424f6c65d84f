//! Plant document framing and parsing.
//!
//! A plant writes an endless line stream. Lines accumulate until one, once
//! trimmed, equals the closing marker; the accumulated text is one XML
//! document of alternating name/value elements, e.g.
//!
//! ```text
//! <Cluster>
//! <Name>Boiler</Name>
//! <NumElts>2</NumElts>
//! <DBL>
//! <Name>Temp</Name>
//! <Val>23.5</Val>
//! </DBL>
//! ...
//! </Cluster>
//! ```

use serde::{Deserialize, Serialize};

use plantlink_protocol::{
    DEFAULT_CLOSING_MARKER, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_NAME_TAG, DEFAULT_VALUE_TAG,
};

use crate::ConnectorError;

/// Tag names of the plant document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentFormat {
    pub closing_marker: String,
    pub name_tag: String,
    pub value_tag: String,
    /// Pending bytes allowed before the closing marker.
    pub max_document_bytes: usize,
}

impl Default for DocumentFormat {
    fn default() -> Self {
        Self {
            closing_marker: DEFAULT_CLOSING_MARKER.to_string(),
            name_tag: DEFAULT_NAME_TAG.to_string(),
            value_tag: DEFAULT_VALUE_TAG.to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

/// Collects lines into complete documents.
#[derive(Debug)]
pub struct DocumentAssembler {
    marker: String,
    buffer: String,
    limit: usize,
}

impl DocumentAssembler {
    pub fn new(marker: impl Into<String>) -> Self {
        Self::with_limit(marker, DEFAULT_MAX_DOCUMENT_BYTES)
    }

    pub fn with_limit(marker: impl Into<String>, limit: usize) -> Self {
        Self {
            marker: marker.into(),
            buffer: String::new(),
            limit,
        }
    }

    /// Feed one line (without its terminator). Returns the full document when
    /// `line` closes it, or an error once the pending text outgrows the limit.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>, ConnectorError> {
        let trimmed = line.trim();
        if trimmed == self.marker {
            self.buffer.push_str(trimmed);
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }

        let pending = self.buffer.len() + line.len() + 1;
        if pending > self.limit {
            self.buffer = String::new();
            return Err(ConnectorError::MalformedDocument(format!(
                "no closing marker within {} bytes ({pending} pending)",
                self.limit
            )));
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
        Ok(None)
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Render a value the way every update carries it: two fractional digits.
pub fn format_value(value: f64) -> String {
    format!("{value:.2}")
}

/// Extract `(name, formatted value)` pairs in document order.
///
/// A value that is not a number is dropped together with its name. A name
/// replaced by another name before any value is never emitted, which skips
/// the cluster's own label.
pub fn parse_document(
    xml: &str,
    format: &DocumentFormat,
) -> Result<Vec<(String, String)>, ConnectorError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| ConnectorError::MalformedDocument(e.to_string()))?;

    let mut pairs = Vec::new();
    let mut pending: Option<String> = None;

    for node in doc.descendants().filter(|n| n.is_element()) {
        let tag = node.tag_name().name();
        if tag == format.name_tag {
            pending = node
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
        } else if tag == format.value_tag {
            let raw = node.text().unwrap_or_default().trim();
            match raw.parse::<f64>() {
                Ok(value) => {
                    if let Some(name) = pending.take() {
                        pairs.push((name, format_value(value)));
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        variable = pending.as_deref().unwrap_or("<none>"),
                        raw,
                        "Dropping non-numeric plant value"
                    );
                    pending = None;
                }
            }
        }
    }

    Ok(pairs)
}
