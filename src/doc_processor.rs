use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Parsed document content
pub struct ParsedDocument {
    pub content: String,
    pub file_type: String,
}

/// Parse a document file into plain text
pub fn parse_file(path: &Path) -> Result<ParsedDocument> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let read_error = |e: std::io::Error| Error::InvalidInput(format!("cannot read {}: {e}", path.display()));

    match ext.as_str() {
        "txt" => Ok(ParsedDocument {
            content: fs::read_to_string(path).map_err(read_error)?,
            file_type: "txt".into(),
        }),
        "md" | "markdown" => Ok(ParsedDocument {
            content: fs::read_to_string(path).map_err(read_error)?,
            file_type: "md".into(),
        }),
        "pdf" => {
            let bytes = fs::read(path).map_err(read_error)?;
            let content = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| Error::InvalidInput(format!("PDF parse error: {e}")))?;
            Ok(ParsedDocument {
                content,
                file_type: "pdf".into(),
            })
        }
        _ => Err(Error::InvalidInput(format!("Unsupported file type: .{ext}"))),
    }
}

/// Split text into overlapping character windows.
///
/// An overlap of `chunk_size` or more is clamped to `chunk_size - 1` so every
/// step advances.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return vec![];
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size - overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
