use crate::db::models::Document;
use crate::llm::openai::OpenAiConfig;
use crate::llm::LlmError;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A vector embedding. Query and document vectors must share a dimension.
pub type Embedding = Vec<f32>;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> std::result::Result<Embedding, LlmError>;
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Generate embeddings for a list of texts using the OpenAI-compatible API
pub async fn generate_embeddings(
    config: &OpenAiConfig,
    texts: &[String],
    model: &str,
) -> std::result::Result<Vec<Embedding>, LlmError> {
    let client = Client::new();

    let body = EmbeddingRequest {
        model: model.to_string(),
        input: texts.to_vec(),
    };

    let mut req = client
        .post(format!("{}/embeddings", config.base_url))
        .header("Content-Type", "application/json")
        .json(&body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: EmbeddingResponse = resp.json().await?;
    Ok(data.data.into_iter().map(|d| d.embedding).collect())
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Vectors of different length are rejected. A zero-magnitude vector has no
/// direction, so its similarity to anything is `0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::InvalidInput(format!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// A document paired with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct RankedDocument<'a> {
    pub document: &'a Document,
    pub similarity: f32,
}

/// Rank documents by similarity to `query`, highest first.
///
/// Documents without an embedding are skipped and anything scoring below
/// `threshold` is dropped. Equal scores keep their input order.
pub fn rank_documents<'a>(
    query: &[f32],
    documents: &'a [Document],
    threshold: f32,
) -> Result<Vec<RankedDocument<'a>>> {
    let mut scored = Vec::new();
    for document in documents {
        let Some(embedding) = &document.embedding else {
            continue;
        };
        let similarity = cosine_similarity(query, embedding)?;
        if similarity >= threshold {
            scored.push(RankedDocument {
                document,
                similarity,
            });
        }
    }

    // sort_by is stable, which keeps ties in input order
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(scored)
}

/// Serialize embedding to bytes for SQLite BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|f| f.to_le_bytes())
        .collect()
}

/// Deserialize embedding from SQLite BLOB bytes
pub fn bytes_to_embedding(bytes: &[u8]) -> Embedding {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, embedding: Option<Vec<f32>>) -> Document {
        Document {
            id: id.to_string(),
            content: format!("content of {id}"),
            embedding,
            source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-2.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = vec![0.3, -1.2, 4.5, 0.0];
        let b = vec![2.0, 0.5, -0.7, 1.1];
        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rank_documents_sorted_and_thresholded() {
        let docs = vec![
            doc("far", Some(vec![0.0, 1.0])),
            doc("close", Some(vec![1.0, 0.0])),
            doc("medium", Some(vec![1.0, 1.0])),
            doc("unembedded", None),
        ];

        let ranked = rank_documents(&[1.0, 0.0], &docs, 0.5).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "medium"]);
        for window in ranked.windows(2) {
            assert!(window[0].similarity >= window[1].similarity);
        }
        assert!(ranked.iter().all(|r| r.similarity >= 0.5));
    }

    #[test]
    fn test_rank_documents_ties_keep_input_order() {
        let docs = vec![
            doc("first", Some(vec![2.0, 0.0])),
            doc("second", Some(vec![1.0, 0.0])),
            doc("third", Some(vec![5.0, 0.0])),
        ];

        let ranked = rank_documents(&[1.0, 0.0], &docs, 0.0).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rank_documents_rejects_mismatched_embedding() {
        let docs = vec![doc("bad", Some(vec![1.0, 0.0, 0.0]))];
        assert!(rank_documents(&[1.0, 0.0], &docs, 0.0).is_err());
    }

    #[test]
    fn test_embedding_roundtrip() {
        let emb = vec![0.1, 0.2, -0.3, 0.4];
        let bytes = embedding_to_bytes(&emb);
        let back = bytes_to_embedding(&bytes);
        assert_eq!(emb, back);
    }
}
