//! Multi-input wire format shared by the engine and node executors.
//!
//! When a node has two or more upstream producers the engine hands it one
//! string that starts with a machine-readable preamble followed by labeled,
//! human-readable blocks:
//!
//! ```text
//! <!-- nodeflow:inputs {"count":2,"sources":[...]} -->
//! ### [1] Fetch (http)
//! body of the first producer
//!
//! ---
//!
//! ### [2] Notes (text)
//! body of the second producer
//! ```
//!
//! Changing any of the markers below breaks every executor that parses them.

use serde::{Deserialize, Serialize};

pub const PREAMBLE_OPEN: &str = "<!-- nodeflow:inputs ";
pub const PREAMBLE_CLOSE: &str = " -->";
/// Between one producer block and the next.
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
/// Between a block header and its body.
pub const HEADER_SEPARATOR: &str = "\n";

/// Provenance of one producer in a merged input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeta {
    /// 1-based position in edge-declaration order.
    pub ordinal: usize,
    pub node_id: String,
    pub label: String,
    pub kind: String,
}

impl SourceMeta {
    pub fn header(&self) -> String {
        format!("### [{}] {} ({})", self.ordinal, self.label, self.kind)
    }
}

/// Typed form of the preamble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEnvelope {
    pub count: usize,
    pub sources: Vec<SourceMeta>,
}

impl MergeEnvelope {
    pub fn new(sources: Vec<SourceMeta>) -> Self {
        Self {
            count: sources.len(),
            sources,
        }
    }

    /// Render the preamble line (without trailing newline).
    pub fn preamble(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{}{}{}", PREAMBLE_OPEN, json, PREAMBLE_CLOSE)
    }

    /// Parse a merged input back into its envelope and per-source bodies.
    ///
    /// Returns `None` when the text does not start with a well-formed preamble,
    /// which is the normal case for single-producer inputs.
    pub fn parse(text: &str) -> Option<(MergeEnvelope, Vec<String>)> {
        // The preamble is always one line; labels may contain PREAMBLE_CLOSE.
        let (line, body) = text.split_once('\n').unwrap_or((text, ""));
        let json = line
            .strip_prefix(PREAMBLE_OPEN)?
            .strip_suffix(PREAMBLE_CLOSE)?;
        let envelope: MergeEnvelope = serde_json::from_str(json).ok()?;
        if envelope.count != envelope.sources.len() {
            return None;
        }

        // Headers are known up front, so split on "separator + next header"
        // rather than on the bare separator, which may appear inside a body.
        let mut bodies = Vec::with_capacity(envelope.count);
        let mut remaining = body;
        for (i, source) in envelope.sources.iter().enumerate() {
            let header = format!("{}{}", source.header(), HEADER_SEPARATOR);
            remaining = remaining.strip_prefix(&header)?;
            let end = match envelope.sources.get(i + 1) {
                Some(next) => {
                    let boundary = format!("{}{}", BLOCK_SEPARATOR, next.header());
                    let pos = remaining.find(&boundary)?;
                    bodies.push(remaining[..pos].to_string());
                    pos + BLOCK_SEPARATOR.len()
                }
                None => {
                    bodies.push(remaining.to_string());
                    remaining.len()
                }
            };
            remaining = &remaining[end..];
        }

        Some((envelope, bodies))
    }
}
