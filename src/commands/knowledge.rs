use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::models::Document;
use crate::db::Database;
use crate::doc_processor;
use crate::embedding::Embedder;
use crate::state::AppState;
use crate::{Error, Result};

const CHUNK_SIZE: usize = 512;
const CHUNK_OVERLAP: usize = 64;

#[derive(Debug, Deserialize)]
pub struct UploadDocument {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub chunks: usize,
    pub document_ids: Vec<String>,
}

/// Chunk, embed and store `text`.
///
/// Every chunk is embedded before anything is written, and each embedding
/// call is bounded by `upstream_timeout`. The chunks are then stored in one
/// transaction, so a failure at any step leaves the knowledge base untouched.
pub async fn ingest_text(
    db: &Database,
    embedder: &dyn Embedder,
    text: &str,
    source: Option<&str>,
    upstream_timeout: Duration,
) -> Result<Vec<Document>> {
    let chunks = doc_processor::chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
    if chunks.is_empty() {
        return Err(Error::InvalidInput(
            "Document is empty or could not be parsed".to_string(),
        ));
    }

    let mut embedded = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = match tokio::time::timeout(upstream_timeout, embedder.embed(&chunk)).await {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "chunk embedding failed, nothing stored");
                return Err(Error::UpstreamUnavailable(format!("Embedding failed: {e}")));
            }
            Err(_) => {
                tracing::warn!(timeout = ?upstream_timeout, "chunk embedding timed out, nothing stored");
                return Err(Error::UpstreamUnavailable("Embedding timed out".to_string()));
            }
        };
        embedded.push((chunk, embedding));
    }

    let documents = db.insert_documents(&embedded, source)?;

    tracing::info!(chunks = documents.len(), source = source.unwrap_or("-"), "document ingested");
    Ok(documents)
}

/// Parse a txt, md or pdf file and ingest it with its file name as source.
pub async fn ingest_file(
    db: &Database,
    embedder: &dyn Embedder,
    path: &Path,
    upstream_timeout: Duration,
) -> Result<Vec<Document>> {
    let parsed = doc_processor::parse_file(path)?;
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    tracing::debug!(file = %source, file_type = %parsed.file_type, "file parsed");
    ingest_text(db, embedder, &parsed.content, Some(&source), upstream_timeout).await
}

pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<Document>>> {
    Ok(Json(state.db.list_documents()?))
}

pub async fn upload_document(
    State(state): State<AppState>,
    Json(body): Json<UploadDocument>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let source = body.source.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let documents = ingest_text(
        &state.db,
        state.embedder.as_ref(),
        &body.content,
        source,
        state.config.upstream_timeout(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            chunks: documents.len(),
            document_ids: documents.into_iter().map(|d| d.id).collect(),
        }),
    ))
}
