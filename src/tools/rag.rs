//! Policy document search over a pre-built vector index

use super::{decode_args, ArgKind, ArgSpec, Tool, ToolContext, ToolSpec};
use crate::config::RagConfig;
use crate::error::OrchestrationError;
use crate::models::{Snippet, ToolCall, ToolFailure, ToolName, ToolPayload};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

static SPEC: ToolSpec = ToolSpec {
    name: ToolName::Rag,
    description: "Useful for questions about company policies, SOPs, KPIs, return and refund \
                  rules, packaging, fees, warehouse procedures and other qualitative guidelines.",
    keywords: &[
        "policy", "policies", "rule", "rules", "sop", "kpi", "packaging", "fee", "fees",
        "return", "returns", "refund", "warehouse", "guideline", "guidelines", "shrinkage",
        "inbound", "outbound", "allowed", "limit", "faq", "procedure", "handbook",
    ],
    arguments: &[
        ArgSpec {
            name: "query",
            kind: ArgKind::String,
            required: true,
            description: "search text",
        },
        ArgSpec {
            name: "top_k",
            kind: ArgKind::Integer,
            required: false,
            description: "number of snippets to return",
        },
        ArgSpec {
            name: "min_score",
            kind: ArgKind::Number,
            required: false,
            description: "minimum cosine similarity a snippet must reach",
        },
    ],
};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "of", "for", "to", "in", "on", "at",
    "and", "or", "what", "which", "how", "do", "does", "we", "our", "my", "i", "it", "this",
    "that", "with", "about", "can", "there", "any", "me", "tell", "please",
];

/// Text → dense vector
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dims(&self) -> usize;
}

/// Deterministic feature-hashing embedder (FNV-1a over normalized tokens)
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
}

/// Crude plural folding so "returns" and "return" share a bucket
fn stem(token: &str) -> String {
    if token.len() > 4 && token.ends_with("ies") {
        format!("{}y", &token[..token.len() - 3])
    } else if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Read-only nearest-neighbour search
pub trait VectorIndex: Send + Sync {
    /// Top `k` chunks by similarity, best first
    fn search(&self, query: &[f32], k: usize) -> Vec<Snippet>;
    fn dims(&self) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    chunks: Vec<IndexedChunk>,
    dims: usize,
}

impl InMemoryVectorIndex {
    pub fn new(chunks: Vec<IndexedChunk>) -> Result<Self> {
        let dims = chunks.first().map_or(0, |c| c.embedding.len());
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dims) {
            return Err(OrchestrationError::Data(format!(
                "chunk from {} has {} dimensions, expected {}",
                bad.source,
                bad.embedding.len(),
                dims
            )));
        }
        Ok(Self { chunks, dims })
    }

    /// Load a JSON array of `{text, source, embedding}` chunks
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::Data(format!(
                "cannot read policy index {}: {}",
                path.display(),
                e
            ))
        })?;
        let chunks: Vec<IndexedChunk> = serde_json::from_str(&raw)?;
        let index = Self::new(chunks)?;

        info!(path = %path.display(), chunks = index.len(), dims = index.dims, "Policy index loaded");
        Ok(index)
    }

    /// Embed raw `(source, text)` documents in place
    pub fn from_documents(documents: &[(&str, &str)], embedder: &dyn Embedder) -> Self {
        let chunks = documents
            .iter()
            .map(|(source, text)| IndexedChunk {
                text: text.to_string(),
                source: source.to_string(),
                embedding: embedder.embed(text),
            })
            .collect();

        Self {
            chunks,
            dims: embedder.dims(),
        }
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn search(&self, query: &[f32], k: usize) -> Vec<Snippet> {
        let mut scored: Vec<Snippet> = self
            .chunks
            .iter()
            .map(|chunk| Snippet {
                text: chunk.text.clone(),
                source: chunk.source.clone(),
                score: cosine(query, &chunk.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

pub struct RagTool {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RagConfig,
}

impl RagTool {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: RagConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn search(&self, args: &RagArgs) -> std::result::Result<ToolPayload, ToolFailure> {
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolFailure::invalid_arguments("query is empty"));
        }

        let embedding = self.embedder.embed(query);
        if !self.index.is_empty() && embedding.len() != self.index.dims() {
            return Err(ToolFailure::data(format!(
                "query embedding has {} dimensions but the index has {}",
                embedding.len(),
                self.index.dims()
            )));
        }

        let top_k = args
            .top_k
            .unwrap_or(self.config.top_k)
            .clamp(1, self.config.max_top_k.max(1));
        let min_score = args.min_score.unwrap_or(self.config.min_score);

        let hits: Vec<Snippet> = self
            .index
            .search(&embedding, top_k)
            .into_iter()
            .filter(|s| s.score >= min_score)
            .collect();

        debug!(query, top_k, min_score, hits = hits.len(), "Policy search");

        Ok(ToolPayload::Snippets {
            query: query.to_string(),
            hits,
        })
    }
}

#[async_trait::async_trait]
impl Tool for RagTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        let args: RagArgs = decode_args(call)?;
        self.search(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolErrorKind;
    use crate::testing;

    fn tool(config: RagConfig) -> RagTool {
        RagTool::new(testing::policy_index(), testing::embedder(), config)
    }

    fn args(query: &str) -> RagArgs {
        RagArgs {
            query: query.to_string(),
            top_k: None,
            min_score: None,
        }
    }

    #[test]
    fn test_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Return policy for damaged items");
        let b = embedder.embed("Return policy for damaged items");

        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_plural_folding() {
        let embedder = HashingEmbedder::default();
        let score = cosine(&embedder.embed("returns"), &embedder.embed("return"));
        assert!(score > 0.99);
    }

    #[test]
    fn test_search_ranks_relevant_policy_first() {
        let payload = tool(RagConfig::default())
            .search(&args("What is the return window for refunds?"))
            .unwrap();

        let ToolPayload::Snippets { hits, .. } = payload else {
            panic!("expected snippets");
        };
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "returns_policy.md");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_nothing_above_threshold_is_empty_success() {
        let payload = tool(RagConfig::default())
            .search(&args("zebra migration patterns"))
            .unwrap();

        assert!(matches!(payload, ToolPayload::Snippets { hits, .. } if hits.is_empty()));
    }

    #[test]
    fn test_top_k_limits_hits() {
        let mut request = args("policy warehouse packaging return fee");
        request.top_k = Some(1);
        request.min_score = Some(0.0);

        let ToolPayload::Snippets { hits, .. } =
            tool(RagConfig::default()).search(&request).unwrap()
        else {
            panic!("expected snippets");
        };
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_top_k_is_capped_by_config() {
        let mut request = args("policy warehouse packaging return fee");
        request.top_k = Some(usize::MAX);
        request.min_score = Some(0.0);

        let config = RagConfig {
            max_top_k: 2,
            ..RagConfig::default()
        };
        let ToolPayload::Snippets { hits, .. } = tool(config).search(&request).unwrap() else {
            panic!("expected snippets");
        };
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = tool(RagConfig::default()).search(&args("   ")).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }

    #[test]
    fn test_dimension_mismatch_is_data_error() {
        let rag = RagTool::new(
            testing::policy_index(),
            Arc::new(HashingEmbedder::new(8)),
            RagConfig::default(),
        );
        let err = rag.search(&args("returns")).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::DataError);
    }

    #[test]
    fn test_load_index_from_json() {
        let embedder = HashingEmbedder::default();
        let chunks = vec![IndexedChunk {
            text: "Inbound shipments are checked within 24 hours.".into(),
            source: "warehouse_sop.md".into(),
            embedding: embedder.embed("Inbound shipments are checked within 24 hours."),
        }];
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&chunks).unwrap()).unwrap();

        let index = InMemoryVectorIndex::load(file.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.dims(), 256);
    }

    #[test]
    fn test_ragged_index_rejected() {
        let chunks = vec![
            IndexedChunk {
                text: "a".into(),
                source: "x".into(),
                embedding: vec![1.0, 0.0],
            },
            IndexedChunk {
                text: "b".into(),
                source: "y".into(),
                embedding: vec![1.0],
            },
        ];
        assert!(InMemoryVectorIndex::new(chunks).is_err());
    }
}
