//! Input merger: combines upstream outputs into one executor input.

use nodeflow_core::envelope::{MergeEnvelope, SourceMeta, BLOCK_SEPARATOR, HEADER_SEPARATOR};
use nodeflow_core::types::Node;

/// A finalized upstream node and its latest output.
#[derive(Debug, Clone, Copy)]
pub struct Producer<'a> {
    pub node: &'a Node,
    pub output: &'a str,
}

/// The merged input plus, for multi-producer inputs, its typed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedInput {
    pub text: String,
    pub envelope: Option<MergeEnvelope>,
}

impl MergedInput {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            envelope: None,
        }
    }
}

/// Merge producer outputs, in the order given.
///
/// Zero producers yield an empty string and one producer is passed through
/// byte-for-byte. Two or more are wrapped in the multi-input wire format.
pub fn merge_inputs(producers: &[Producer<'_>]) -> MergedInput {
    match producers {
        [] => MergedInput::plain(""),
        [only] => MergedInput::plain(only.output),
        many => {
            let sources: Vec<SourceMeta> = many
                .iter()
                .enumerate()
                .map(|(i, p)| SourceMeta {
                    ordinal: i + 1,
                    node_id: p.node.id.clone(),
                    label: p.node.display_label().to_string(),
                    kind: p.node.kind.clone(),
                })
                .collect();
            let envelope = MergeEnvelope::new(sources);

            let blocks: Vec<String> = envelope
                .sources
                .iter()
                .zip(many)
                .map(|(meta, p)| format!("{}{}{}", meta.header(), HEADER_SEPARATOR, p.output))
                .collect();

            let text = format!("{}\n{}", envelope.preamble(), blocks.join(BLOCK_SEPARATOR));
            MergedInput {
                text,
                envelope: Some(envelope),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_producers() {
        assert_eq!(merge_inputs(&[]), MergedInput::plain(""));
    }

    #[test]
    fn test_single_producer_passes_through() {
        let node = Node::new("a", "text");
        let raw = "  X\n<!-- not a preamble -->  ";
        let merged = merge_inputs(&[Producer { node: &node, output: raw }]);
        assert_eq!(merged.text, raw);
        assert!(merged.envelope.is_none());
    }

    #[test]
    fn test_two_producers_carry_count_and_provenance() {
        let a = Node::new("a", "text").with_label("Alpha");
        let b = Node::new("b", "http");
        let merged = merge_inputs(&[
            Producer { node: &a, output: "x" },
            Producer { node: &b, output: "y" },
        ]);

        assert!(merged.text.contains("x"));
        assert!(merged.text.contains("y"));
        assert!(merged.text.contains("### [1] Alpha (text)\nx"));
        assert!(merged.text.contains("### [2] b (http)\ny"));
        assert!(merged.text.find("\nx").unwrap() < merged.text.find("\ny").unwrap());

        let (envelope, bodies) = MergeEnvelope::parse(&merged.text).unwrap();
        assert_eq!(envelope.count, 2);
        assert_eq!(envelope.sources[0].label, "Alpha");
        assert_eq!(envelope.sources[1].kind, "http");
        assert_eq!(bodies, vec!["x", "y"]);
        assert_eq!(merged.envelope, Some(envelope));
    }

    #[test]
    fn test_label_with_comment_close_parses_back() {
        let a = Node::new("a", "text").with_label("step -->");
        let b = Node::new("b", "text").with_label("b");
        let merged = merge_inputs(&[
            Producer { node: &a, output: "x" },
            Producer { node: &b, output: "y" },
        ]);
        let (envelope, bodies) = MergeEnvelope::parse(&merged.text).unwrap();
        assert_eq!(envelope.sources[0].label, "step -->");
        assert_eq!(bodies, vec!["x", "y"]);
    }

    #[test]
    fn test_empty_outputs_keep_their_block() {
        let a = Node::new("a", "text");
        let b = Node::new("b", "text");
        let c = Node::new("c", "text");
        let merged = merge_inputs(&[
            Producer { node: &a, output: "" },
            Producer { node: &b, output: "mid" },
            Producer { node: &c, output: "" },
        ]);
        let (envelope, bodies) = MergeEnvelope::parse(&merged.text).unwrap();
        assert_eq!(envelope.count, 3);
        assert_eq!(bodies, vec!["", "mid", ""]);
    }
}
