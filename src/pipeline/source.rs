//! Page sources: hand the driver one single-page blob per 1-based index.
//!
//! The driver only needs [`PageSource`]. Three implementations ship with the
//! crate:
//!
//! * [`MemoryPageSource`] — blobs already in memory.
//! * [`DirectoryPageSource`] — pre-split files named `page_000001.pdf`, …
//! * [`PdfPageSource`] — splits a multi-page PDF with pdfium, one page per
//!   call (feature `pdfium`).
//!
//! Calls are blocking. The driver runs them on tokio's blocking pool.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One page, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBlob {
    /// 1-based page index.
    pub page: usize,
    /// File name sent with the multipart upload.
    pub file_name: String,
    /// MIME type of `bytes`.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PageBlob {
    /// A single-page PDF named after its page index.
    pub fn pdf(page: usize, bytes: Vec<u8>) -> Self {
        Self {
            page,
            file_name: page_file_name(page, "pdf"),
            content_type: "application/pdf".to_string(),
            bytes,
        }
    }
}

/// Canonical per-page file name: `page_000042.pdf`.
pub fn page_file_name(page: usize, extension: &str) -> String {
    format!("page_{page:06}.{extension}")
}

/// Supplies page blobs by 1-based index. The page count is fixed for the
/// lifetime of the source.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Bytes of page `page` (1-based).
    ///
    /// # Errors
    /// [`PipelineError::PageOutOfRange`] for `page == 0` or
    /// `page > page_count()`; [`PipelineError::SourceFailed`] when the page
    /// cannot be extracted.
    fn page(&self, page: usize) -> Result<PageBlob, PipelineError>;
}

fn check_range(page: usize, total: usize) -> Result<(), PipelineError> {
    if page == 0 || page > total {
        return Err(PipelineError::PageOutOfRange { page, total });
    }
    Ok(())
}

// ── In memory ────────────────────────────────────────────────────────────

/// Pages held in memory, page 1 first.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageSource {
    pages: Vec<PageBlob>,
}

impl MemoryPageSource {
    /// Treat each element as a single-page PDF.
    pub fn from_pdf_pages(pages: Vec<Vec<u8>>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, bytes)| PageBlob::pdf(i + 1, bytes))
                .collect(),
        }
    }
}

impl PageSource for MemoryPageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&self, page: usize) -> Result<PageBlob, PipelineError> {
        check_range(page, self.pages.len())?;
        Ok(self.pages[page - 1].clone())
    }
}

// ── Directory of pre-split pages ─────────────────────────────────────────

/// A directory holding `page_000001.pdf` … `page_NNNNNN.pdf`.
///
/// The set must be contiguous from page 1. Unrelated files are ignored.
#[derive(Debug, Clone)]
pub struct DirectoryPageSource {
    dir: PathBuf,
    count: usize,
}

impl DirectoryPageSource {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        let read = std::fs::read_dir(&dir).map_err(|e| {
            PipelineError::InvalidSource(format!("cannot read '{}': {e}", dir.display()))
        })?;

        let mut pages: Vec<usize> = read
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_page_file_name(&entry.file_name().to_string_lossy()))
            .collect();
        pages.sort_unstable();

        if pages.is_empty() {
            return Err(PipelineError::InvalidSource(format!(
                "no page_NNNNNN.pdf files in '{}'",
                dir.display()
            )));
        }
        if let Some((expected, _)) = pages
            .iter()
            .enumerate()
            .map(|(i, p)| (i + 1, *p))
            .find(|(expected, actual)| expected != actual)
        {
            return Err(PipelineError::InvalidSource(format!(
                "'{}' is missing page {expected}",
                dir.display()
            )));
        }

        info!("Page directory {}: {} pages", dir.display(), pages.len());
        Ok(Self {
            count: pages.len(),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `page_000012.pdf` → `Some(12)`. Only the canonical spelling produced by
/// [`page_file_name`] matches, since that is the name [`PageSource::page`]
/// reads back.
fn parse_page_file_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("page_")?.strip_suffix(".pdf")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let page: usize = digits.parse().ok().filter(|p| *p >= 1)?;
    (page_file_name(page, "pdf") == name).then_some(page)
}

impl PageSource for DirectoryPageSource {
    fn page_count(&self) -> usize {
        self.count
    }

    fn page(&self, page: usize) -> Result<PageBlob, PipelineError> {
        check_range(page, self.count)?;
        let path = self.dir.join(page_file_name(page, "pdf"));
        let bytes = std::fs::read(&path).map_err(|e| PipelineError::SourceFailed {
            page,
            detail: format!("{}: {e}", path.display()),
        })?;
        debug!("Read page {} ({} bytes)", page, bytes.len());
        Ok(PageBlob::pdf(page, bytes))
    }
}

// ── Multi-page PDF via pdfium ────────────────────────────────────────────

/// Splits a multi-page PDF into single-page PDFs on demand.
///
/// The library is bound from `PDFIUM_LIB_PATH` when set, otherwise from the
/// system library search path. Each call opens the document, copies one
/// page into a fresh document and serialises it; nothing is written to disk.
#[cfg(feature = "pdfium")]
#[derive(Debug, Clone)]
pub struct PdfPageSource {
    path: PathBuf,
    password: Option<String>,
    count: usize,
}

#[cfg(feature = "pdfium")]
impl PdfPageSource {
    /// Open `path` and read its page count.
    pub fn open(path: impl Into<PathBuf>, password: Option<String>) -> Result<Self, PipelineError> {
        let path = path.into();
        if !path.is_file() {
            return Err(PipelineError::InvalidSource(format!(
                "PDF file not found: '{}'",
                path.display()
            )));
        }

        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&path, password.as_deref())
            .map_err(|e| {
                PipelineError::InvalidSource(format!("cannot open '{}': {e:?}", path.display()))
            })?;
        let count = document.pages().len() as usize;
        info!("PDF loaded: {} ({} pages)", path.display(), count);
        drop(document);

        Ok(Self {
            path,
            password,
            count,
        })
    }
}

#[cfg(feature = "pdfium")]
fn bind_pdfium() -> Result<pdfium_render::prelude::Pdfium, PipelineError> {
    use pdfium_render::prelude::Pdfium;

    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        PipelineError::InvalidSource(format!(
            "failed to bind pdfium: {e:?}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
        ))
    })?;

    Ok(Pdfium::new(bindings))
}

#[cfg(feature = "pdfium")]
impl PageSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.count
    }

    fn page(&self, page: usize) -> Result<PageBlob, PipelineError> {
        use pdfium_render::prelude::PdfPageIndex;

        check_range(page, self.count)?;
        let failed = |detail: String| PipelineError::SourceFailed { page, detail };

        let index = PdfPageIndex::try_from(page - 1)
            .map_err(|_| failed(format!("index {page} exceeds pdfium's page index type")))?;

        let pdfium = bind_pdfium()?;
        let source = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| failed(format!("{e:?}")))?;
        let mut single = pdfium
            .create_new_pdf()
            .map_err(|e| failed(format!("{e:?}")))?;
        single
            .pages_mut()
            .copy_page_from_document(&source, index, 0)
            .map_err(|e| failed(format!("{e:?}")))?;
        let bytes = single
            .save_to_bytes()
            .map_err(|e| failed(format!("{e:?}")))?;

        debug!("Extracted page {} → {} bytes", page, bytes.len());
        Ok(PageBlob::pdf(page, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(page_file_name(1, "pdf"), "page_000001.pdf");
        assert_eq!(page_file_name(123456, "json"), "page_123456.json");
    }

    #[test]
    fn parse_page_names() {
        assert_eq!(parse_page_file_name("page_000012.pdf"), Some(12));
        assert_eq!(parse_page_file_name("page_1234567.pdf"), Some(1_234_567));
        assert_eq!(parse_page_file_name("page_1.pdf"), None);
        assert_eq!(parse_page_file_name("page_00012.pdf"), None);
        assert_eq!(parse_page_file_name("page_0000012.pdf"), None);
        assert_eq!(parse_page_file_name("page_000000.pdf"), None);
        assert_eq!(parse_page_file_name("page_0001.json"), None);
        assert_eq!(parse_page_file_name("page_.pdf"), None);
        assert_eq!(parse_page_file_name("page_-1.pdf"), None);
        assert_eq!(parse_page_file_name("notes.pdf"), None);
    }

    #[test]
    fn memory_source_is_one_based() {
        let src = MemoryPageSource::from_pdf_pages(vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(src.page_count(), 2);
        let p = src.page(2).unwrap();
        assert_eq!(p.page, 2);
        assert_eq!(p.bytes, b"two");
        assert_eq!(p.file_name, "page_000002.pdf");
        assert!(matches!(
            src.page(0),
            Err(PipelineError::PageOutOfRange { page: 0, total: 2 })
        ));
        assert!(matches!(
            src.page(3),
            Err(PipelineError::PageOutOfRange { page: 3, total: 2 })
        ));
    }

    #[test]
    fn directory_source_reads_pages() {
        let dir = TempDir::new().unwrap();
        for page in 1..=3 {
            std::fs::write(
                dir.path().join(page_file_name(page, "pdf")),
                format!("%PDF page {page}"),
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let src = DirectoryPageSource::open(dir.path()).unwrap();
        assert_eq!(src.dir(), dir.path());
        assert_eq!(src.page_count(), 3);
        assert_eq!(src.page(3).unwrap().bytes, b"%PDF page 3");
    }

    #[test]
    fn directory_source_ignores_unpadded_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page_1.pdf"), b"%PDF short 1").unwrap();
        std::fs::write(dir.path().join("page_2.pdf"), b"%PDF short 2").unwrap();

        let err = DirectoryPageSource::open(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSource(_)), "got: {err}");
    }

    #[test]
    fn directory_source_counts_only_readable_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page_1.pdf"), b"%PDF short").unwrap();
        std::fs::write(dir.path().join(page_file_name(1, "pdf")), b"%PDF padded").unwrap();

        let src = DirectoryPageSource::open(dir.path()).unwrap();
        assert_eq!(src.page_count(), 1);
        assert_eq!(src.page(1).unwrap().bytes, b"%PDF padded");
    }

    #[test]
    fn directory_source_rejects_gaps() {
        let dir = TempDir::new().unwrap();
        for page in [1, 2, 4] {
            std::fs::write(dir.path().join(page_file_name(page, "pdf")), b"%PDF").unwrap();
        }
        let err = DirectoryPageSource::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing page 3"), "got: {err}");
    }

    #[test]
    fn directory_source_rejects_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DirectoryPageSource::open(dir.path()),
            Err(PipelineError::InvalidSource(_))
        ));
    }
}
