use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cafe_core::config::KnowledgeBaseConfig;
use tracing::{debug, info, warn};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "how", "i", "in",
    "is", "it", "me", "my", "of", "on", "or", "our", "the", "to", "we", "what", "when", "where",
    "which", "who", "with", "you", "your",
];

/// Produces background context for a query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<String>;
}

#[derive(Clone, Debug)]
struct KnowledgeChunk {
    source: String,
    text: String,
    term_counts: HashMap<String, usize>,
}

/// Lexical retriever over the markdown and text documents of the knowledge base.
///
/// Documents are chunked once at construction. A query keeps the `top_k` best
/// scoring chunks and narrows them to `rerank_top_n` by query-term coverage.
#[derive(Clone, Debug)]
pub struct KnowledgeBaseRetriever {
    chunks: Vec<KnowledgeChunk>,
    document_frequency: HashMap<String, usize>,
    top_k: usize,
    rerank_top_n: usize,
}

impl KnowledgeBaseRetriever {
    pub fn load(config: &KnowledgeBaseConfig) -> Result<Self> {
        if !config.path.is_dir() {
            warn!(
                event_name = "kb.load.missing",
                path = %config.path.display(),
                "knowledge base directory not found; retrieval will return empty context"
            );
            return Ok(Self::from_documents(Vec::new(), config));
        }

        let mut documents = Vec::new();
        collect_documents(&config.path, &mut documents)?;
        documents.sort_by(|left, right| left.0.cmp(&right.0));

        let retriever = Self::from_documents(documents, config);
        info!(
            event_name = "kb.load.complete",
            path = %config.path.display(),
            chunks = retriever.len(),
            "knowledge base indexed"
        );
        Ok(retriever)
    }

    /// Builds an index from `(source, text)` pairs.
    pub fn from_documents(documents: Vec<(String, String)>, config: &KnowledgeBaseConfig) -> Self {
        let mut chunks = Vec::new();
        for (source, text) in documents {
            for piece in split_text(&text, config.chunk_size, config.chunk_overlap) {
                let term_counts = count_terms(&piece);
                chunks.push(KnowledgeChunk { source: source.clone(), text: piece, term_counts });
            }
        }

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for chunk in &chunks {
            for term in chunk.term_counts.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
        }

        Self {
            chunks,
            document_frequency,
            top_k: config.top_k.max(1),
            rerank_top_n: config.rerank_top_n.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn search(&self, query: &str) -> Vec<&KnowledgeChunk> {
        let query_terms: HashSet<String> = tokenize(query).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let total = self.chunks.len() as f64;
        let mut candidates: Vec<(f64, &KnowledgeChunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|term| {
                        let count = *chunk.term_counts.get(term)?;
                        let frequency = self.document_frequency.get(term).copied().unwrap_or(1);
                        let idf = (1.0 + total / frequency as f64).ln();
                        Some((1.0 + (count as f64).ln()) * idf)
                    })
                    .sum();
                (score > 0.0).then_some((score, chunk))
            })
            .collect();
        candidates.sort_by(|left, right| right.0.total_cmp(&left.0));
        candidates.truncate(self.top_k);

        let mut reranked: Vec<(usize, f64, &KnowledgeChunk)> = candidates
            .into_iter()
            .map(|(score, chunk)| {
                let covered =
                    query_terms.iter().filter(|term| chunk.term_counts.contains_key(*term)).count();
                (covered, score, chunk)
            })
            .collect();
        reranked.sort_by(|left, right| right.0.cmp(&left.0).then(right.1.total_cmp(&left.1)));
        reranked.truncate(self.rerank_top_n);

        reranked.into_iter().map(|(_, _, chunk)| chunk).collect()
    }
}

#[async_trait]
impl ContextRetriever for KnowledgeBaseRetriever {
    async fn retrieve(&self, query: &str) -> Result<String> {
        let hits = self.search(query);
        debug!(event_name = "kb.search", hits = hits.len(), "knowledge base searched");

        if hits.is_empty() {
            return Ok("<context></context>".to_string());
        }

        let body = hits
            .iter()
            .map(|chunk| format!("[{}]\n{}", chunk.source, chunk.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(format!("<context>\n{body}\n</context>"))
    }
}

fn collect_documents(dir: &Path, documents: &mut Vec<(String, String)>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("reading knowledge base `{}`", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_documents(&path, documents)?;
            continue;
        }

        let is_document = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| matches!(extension.to_ascii_lowercase().as_str(), "md" | "txt"))
            .unwrap_or(false);
        if !is_document {
            continue;
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading knowledge document `{}`", path.display()))?;
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        documents.push((source, text));
    }

    Ok(())
}

/// Splits text into windows of `chunk_size` characters that overlap by `overlap`.
fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.iter().all(|ch| ch.is_whitespace()) {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
}

fn count_terms(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use cafe_core::config::KnowledgeBaseConfig;
    use tempfile::TempDir;

    use super::{split_text, ContextRetriever, KnowledgeBaseRetriever};

    fn config(path: PathBuf) -> KnowledgeBaseConfig {
        KnowledgeBaseConfig { path, top_k: 5, rerank_top_n: 2, chunk_size: 200, chunk_overlap: 40 }
    }

    #[test]
    fn split_windows_overlap() {
        let text: String = ('a'..='j').collect();
        let pieces = split_text(&text, 4, 1);

        assert_eq!(pieces, vec!["abcd", "defg", "ghij"]);
        assert!(split_text("   ", 4, 1).is_empty());
    }

    #[tokio::test]
    async fn retrieves_matching_documents_in_context_tags() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("refunds.md"), "Refunds are issued within 5 business days to the original payment method.")
            .expect("write");
        fs::write(dir.path().join("hours.txt"), "The cafe opens at 11am and closes at 10pm every day.")
            .expect("write");
        fs::write(dir.path().join("logo.png"), "not text").expect("write");

        let retriever = KnowledgeBaseRetriever::load(&config(dir.path().to_path_buf())).expect("load");
        assert_eq!(retriever.len(), 2);

        let context = retriever.retrieve("How long do refunds take?").await.expect("retrieve");
        assert!(context.starts_with("<context>"));
        assert!(context.ends_with("</context>"));
        assert!(context.contains("[refunds.md]"));
        assert!(!context.contains("closes at 10pm"));
    }

    #[tokio::test]
    async fn missing_directory_gives_empty_context() {
        let retriever = KnowledgeBaseRetriever::load(&config(PathBuf::from("/nonexistent/kb")))
            .expect("missing directory is not an error");

        assert!(retriever.is_empty());
        assert_eq!(retriever.retrieve("menu").await.expect("retrieve"), "<context></context>");
    }

    #[tokio::test]
    async fn rerank_limits_the_number_of_chunks() {
        let documents = (0..6)
            .map(|index| (format!("doc{index}.md"), format!("pizza delivery note number {index}")))
            .collect();
        let retriever = KnowledgeBaseRetriever::from_documents(documents, &config(PathBuf::new()));

        let context = retriever.retrieve("pizza delivery").await.expect("retrieve");
        assert_eq!(context.matches("[doc").count(), 2);
    }
}
