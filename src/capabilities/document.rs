//! PDF text extraction from a URL or a local file

use super::Capability;
use crate::error::EngineError;
use crate::Result;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extracted text is cut here so a long report does not flood the context.
const MAX_DOCUMENT_CHARS: usize = 20_000;

const DESCRIPTION: &str = "Reads a PDF document and returns its text.
Input: the URL of the PDF (http:// or https://) or the path of a file in the
documents directory.
Example: \"https://example.com/report.pdf\"";

pub struct DocumentReaderCapability {
    client: Client,
    documents_dir: PathBuf,
}

impl DocumentReaderCapability {
    pub fn new(client: Client, documents_dir: impl AsRef<Path>) -> Self {
        Self {
            client,
            documents_dir: documents_dir.as_ref().to_path_buf(),
        }
    }

    /// Resolve `source` against the documents directory. Paths that leave it,
    /// through `..` or a symlink, are refused.
    async fn resolve_local(&self, source: &str) -> std::result::Result<PathBuf, String> {
        let Ok(path) = tokio::fs::canonicalize(self.documents_dir.join(source)).await else {
            return Err(format!("File not found: {}", source));
        };
        let root = tokio::fs::canonicalize(&self.documents_dir)
            .await
            .map_err(|e| format!("Documents directory unavailable: {}", e))?;

        if !path.starts_with(&root) {
            return Err(format!("Access denied: {} is outside the documents directory", source));
        }
        Ok(path)
    }

    async fn read_url(&self, url: &str) -> Result<String> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        debug!(url, size = bytes.len(), "Downloaded PDF");
        extract_text(bytes.to_vec()).await
    }
}

#[async_trait::async_trait]
impl Capability for DocumentReaderCapability {
    fn name(&self) -> &str {
        "document_reader"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, input: &str) -> Result<String> {
        let source = input.trim().trim_matches('"');
        if source.is_empty() {
            return Ok("Format: a PDF URL or a local file path".to_string());
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            return Ok(match self.read_url(source).await {
                Ok(text) => finish(text),
                Err(e) => format!("Failed to read PDF from URL: {}", e),
            });
        }

        let path = match self.resolve_local(source).await {
            Ok(path) => path,
            Err(message) => return Ok(message),
        };

        Ok(match tokio::fs::read(&path).await {
            Ok(bytes) => match extract_text(bytes).await {
                Ok(text) => finish(text),
                Err(e) => format!("Failed to read local PDF: {}", e),
            },
            Err(e) => format!("Failed to read local PDF: {}", e),
        })
    }
}

async fn extract_text(bytes: Vec<u8>) -> Result<String> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| EngineError::Capability(format!("PDF extraction aborted: {}", e)))?
        .map_err(|e| EngineError::Capability(format!("not a readable PDF: {}", e)))
}

fn finish(text: String) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "The PDF contains no extractable text".to_string();
    }

    let total = text.chars().count();
    if total <= MAX_DOCUMENT_CHARS {
        return text.to_string();
    }

    let mut out: String = text.chars().take(MAX_DOCUMENT_CHARS).collect();
    out.push_str(&format!(
        "\n\n[truncated: showing {} of {} characters]",
        MAX_DOCUMENT_CHARS, total
    ));
    out
}
