//! Upload boundary: turn raw bytes plus a declared MIME type into a [`Document`].
//!
//! The declared type is trusted only as far as the magic bytes agree with it.
//! A missing or generic (`application/octet-stream`) type is resolved by
//! sniffing. PDFs are parsed once here so the page count is known before any
//! stage runs; a page tree that cannot be read fails the upload.
//!
//! Each run also gets its own [`ScratchDir`] for rasterised pages, removed on
//! drop whichever way the run ends.

use crate::error::ScanbriefError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Accepted document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Jpeg,
    Png,
    Pdf,
}

impl DocumentFormat {
    /// Map a declared MIME type. Parameters (`; charset=…`) are ignored.
    ///
    /// Returns `Ok(None)` for missing/generic types that must be sniffed.
    pub fn from_mime(mime: Option<&str>) -> Result<Option<Self>, ScanbriefError> {
        let Some(raw) = mime else {
            return Ok(None);
        };
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "" | "application/octet-stream" => Ok(None),
            "image/jpeg" | "image/jpg" => Ok(Some(Self::Jpeg)),
            "image/png" => Ok(Some(Self::Png)),
            "application/pdf" => Ok(Some(Self::Pdf)),
            _ => Err(ScanbriefError::UnsupportedFormat {
                mime: raw.trim().to_string(),
            }),
        }
    }

    /// Guess the type from a file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Identify the type from leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PDF_MAGIC) {
            Some(Self::Pdf)
        } else if bytes.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// An uploaded document. Immutable once created.
#[derive(Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    format: DocumentFormat,
    page_count: usize,
    file_name: Option<String>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("format", &self.format)
            .field("page_count", &self.page_count)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Document {
    /// Validate an upload and count its pages.
    ///
    /// # Errors
    /// * [`ScanbriefError::UnsupportedFormat`] — declared type is not JPEG/PNG/PDF,
    ///   or a generic type whose bytes match none of them
    /// * [`ScanbriefError::Extraction`] — empty body, bytes that contradict
    ///   the declared type, or an unreadable PDF page tree
    pub fn from_upload(
        bytes: impl Into<Vec<u8>>,
        mime: Option<&str>,
        file_name: Option<String>,
    ) -> Result<Self, ScanbriefError> {
        let bytes: Vec<u8> = bytes.into();
        let declared = DocumentFormat::from_mime(mime)?;

        if bytes.is_empty() {
            return Err(ScanbriefError::extraction("uploaded file is empty"));
        }

        let sniffed = DocumentFormat::sniff(&bytes);
        let format = match (declared, sniffed) {
            (Some(d), Some(s)) if d == s => d,
            (Some(d), _) => {
                return Err(ScanbriefError::extraction(format!(
                    "content does not look like {d}"
                )))
            }
            (None, Some(s)) => s,
            (None, None) => {
                return Err(ScanbriefError::UnsupportedFormat {
                    mime: mime.unwrap_or("unknown").to_string(),
                })
            }
        };

        let page_count = match format {
            DocumentFormat::Pdf => pdf_page_count(&bytes)?,
            DocumentFormat::Jpeg | DocumentFormat::Png => 1,
        };

        info!(
            "Accepted {} upload: {} bytes, {} page(s)",
            format,
            bytes.len(),
            page_count
        );

        Ok(Self {
            bytes: bytes.into(),
            format,
            page_count,
            file_name,
        })
    }

    /// [`Document::from_upload`] on the blocking pool (PDF parsing is CPU-bound).
    pub async fn from_upload_async(
        bytes: Vec<u8>,
        mime: Option<String>,
        file_name: Option<String>,
    ) -> Result<Self, ScanbriefError> {
        tokio::task::spawn_blocking(move || Self::from_upload(bytes, mime.as_deref(), file_name))
            .await
            .map_err(|e| ScanbriefError::Internal(format!("Upload task panicked: {}", e)))?
    }

    /// Read a local file; the type comes from its extension, else from sniffing.
    pub async fn from_path(path: &Path) -> Result<Self, ScanbriefError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScanbriefError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        let mime = DocumentFormat::from_extension(path).map(|f| f.mime().to_string());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        Self::from_upload_async(bytes, mime, name).await
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap shared handle to the bytes, for moving into blocking tasks.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }
}

fn pdf_page_count(bytes: &[u8]) -> Result<usize, ScanbriefError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ScanbriefError::extraction(format!("cannot parse PDF: {e}")))?;
    if doc.is_encrypted() {
        return Err(ScanbriefError::extraction(
            "encrypted PDFs are not supported",
        ));
    }
    let pages = doc.get_pages().len();
    if pages == 0 {
        return Err(ScanbriefError::extraction("PDF has no pages"));
    }
    Ok(pages)
}

// ── Scratch directory ────────────────────────────────────────────────────

/// Per-run temporary directory for page images. Deleted on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `parent` (or the OS temp dir).
    pub fn create(parent: Option<&Path>) -> Result<Self, ScanbriefError> {
        let builder_result = match parent {
            Some(p) => {
                std::fs::create_dir_all(p).map_err(|e| ScanbriefError::Io {
                    path: p.to_path_buf(),
                    source: e,
                })?;
                tempfile::Builder::new().prefix("scanbrief-").tempdir_in(p)
            }
            None => tempfile::Builder::new().prefix("scanbrief-").tempdir(),
        };
        let dir = builder_result.map_err(|e| ScanbriefError::Io {
            path: parent.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir),
            source: e,
        })?;
        debug!("Scratch directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the PNG for a 1-indexed page goes.
    pub fn page_path(&self, page_num: usize) -> PathBuf {
        self.dir.path().join(format!("page-{page_num:04}.png"))
    }
}
