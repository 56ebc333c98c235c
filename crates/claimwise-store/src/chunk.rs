//! Splitting documents into retrievable nodes.

use claimwise_core::{PolicyDocument, TextNode};

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Upper bound on node text length, in bytes. A single word longer than
    /// this becomes its own oversized node.
    pub chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { chunk_size: 1024 }
    }
}

const PARAGRAPH_BREAK: &str = "\n\n";

/// Split a document into nodes, packing whole paragraphs greedily up to
/// `chunk_size`. Paragraphs that are too long on their own are split on
/// word boundaries. Every node inherits the document's metadata.
pub fn split_document(doc: &PolicyDocument, config: &ChunkConfig) -> Vec<TextNode> {
    let limit = config.chunk_size.max(1);

    let mut pieces: Vec<String> = Vec::new();
    for paragraph in paragraphs(&doc.content) {
        if paragraph.len() <= limit {
            pieces.push(paragraph);
        } else {
            pieces.extend(split_words(&paragraph, limit));
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
        } else if current.len() + PARAGRAPH_BREAK.len() + piece.len() <= limit {
            current.push_str(PARAGRAPH_BREAK);
            current.push_str(&piece);
        } else {
            chunks.push(std::mem::replace(&mut current, piece));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextNode {
            id: TextNode::node_id(&doc.id, i),
            doc_id: doc.id.clone(),
            text,
            metadata: doc.metadata.clone(),
        })
        .collect()
}

/// Blank-line separated paragraphs, trimmed, empty ones dropped.
fn paragraphs(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out.retain(|p| !p.is_empty());
    out
}

fn split_words(paragraph: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= limit {
            current.push(' ');
            current.push_str(word);
        } else {
            out.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimwise_core::{Metadata, meta};

    fn doc(content: &str) -> PolicyDocument {
        let mut metadata = Metadata::new();
        metadata.insert(meta::FILE_NAME.into(), "policy.md".into());
        metadata.insert(meta::POLICY_NUMBER.into(), "CAIP400".into());
        PolicyDocument {
            id: "policy.md".into(),
            content: content.into(),
            metadata,
        }
    }

    #[test]
    fn short_document_is_one_node() {
        let nodes = split_document(&doc("Part A\n\nPart B"), &ChunkConfig::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "policy.md#0");
        assert_eq!(nodes[0].text, "Part A\n\nPart B");
        assert_eq!(nodes[0].policy_number(), Some("CAIP400"));
    }

    #[test]
    fn paragraphs_packed_up_to_limit() {
        let content = "aaaa\n\nbbbb\n\ncccc";
        let nodes = split_document(&doc(content), &ChunkConfig { chunk_size: 10 });
        let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(nodes[1].id, "policy.md#1");
        assert_eq!(nodes[1].doc_id, "policy.md");
    }

    #[test]
    fn long_paragraph_split_on_words() {
        let content = "one two three four five six";
        let nodes = split_document(&doc(content), &ChunkConfig { chunk_size: 9 });
        let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["one two", "three", "four five", "six"]);
        assert!(nodes.iter().all(|n| n.text.len() <= 9));
    }

    #[test]
    fn oversized_word_kept_whole() {
        let nodes = split_document(
            &doc("tiny supercalifragilistic"),
            &ChunkConfig { chunk_size: 5 },
        );
        let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["tiny", "supercalifragilistic"]);
    }

    #[test]
    fn blank_lines_and_crlf_tolerated() {
        let content = "\r\n\r\nFirst line\r\nsecond line\r\n\r\n   \r\nNext";
        let nodes = split_document(&doc(content), &ChunkConfig::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "First line\nsecond line\n\nNext");
    }

    #[test]
    fn empty_document_has_no_nodes() {
        assert!(split_document(&doc("  \n\n "), &ChunkConfig::default()).is_empty());
    }
}
