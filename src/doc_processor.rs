use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use zip::ZipArchive;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Declared kind of an uploaded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    /// Map a MIME-like type to a kind. Anything unrecognised is decoded as plain text.
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime.map(|m| m.trim().to_lowercase()).as_deref() {
            Some(PDF_MIME) => DocumentKind::Pdf,
            Some(DOCX_MIME) => DocumentKind::Docx,
            _ => DocumentKind::PlainText,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            _ => DocumentKind::PlainText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::PlainText => "txt",
        }
    }
}

/// Parsed document content
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub kind: DocumentKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Pdf(String),
    #[error("DOCX parse error: {0}")]
    Docx(String),
    #[error("Unsupported text encoding: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Document is empty or has no extractable text")]
    Empty,
}

/// Read a document from disk, picking the extractor from the file extension
pub fn parse_file(path: &Path) -> Result<ParsedDocument, ExtractionError> {
    let bytes = fs::read(path)?;
    parse_bytes(&bytes, DocumentKind::from_path(path))
}

/// Extract plain text from an in-memory payload of the given kind
pub fn parse_bytes(bytes: &[u8], kind: DocumentKind) -> Result<ParsedDocument, ExtractionError> {
    let content = match kind {
        DocumentKind::Pdf => extract_pdf_text(bytes)?,
        DocumentKind::Docx => extract_docx_text(bytes)?,
        DocumentKind::PlainText => std::str::from_utf8(bytes)?.to_string(),
    };

    if content.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }

    tracing::debug!(kind = kind.as_str(), chars = content.chars().count(), "Extracted document text");
    Ok(ParsedDocument { content, kind })
}

/// Pages are concatenated in order; a page without extractable text contributes nothing.
fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
    Ok(pages.concat())
}

/// One newline terminates every paragraph of the main document part.
fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Docx(format!("not a DOCX archive: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Docx(format!("missing word/document.xml: {}", e)))?
        .read_to_string(&mut xml)?;

    let mut reader = XmlReader::from_str(&xml);
    let mut buf = Vec::new();
    let mut output = String::new();
    let mut in_text_node = false;
    // `w:tab` also appears in `w:pPr/w:tabs` as a tab-stop definition; only runs carry text.
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:r" => in_run = true,
                b"w:tab" if in_run => output.push('\t'),
                b"w:br" if in_run => output.push('\n'),
                b"w:t" => in_text_node = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:p" => output.push('\n'),
                b"w:tab" if in_run => output.push('\t'),
                b"w:br" if in_run => output.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_node {
                    let value = e
                        .unescape()
                        .map_err(|err| ExtractionError::Docx(err.to_string()))?;
                    output.push_str(&value);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:r" => in_run = false,
                b"w:t" => in_text_node = false,
                b"w:p" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(ExtractionError::Docx(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(output)
}

/// A contiguous slice of a document. `start`/`end` are character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("Chunk size must be greater than zero")]
    ZeroSize,
    #[error("Overlap ({overlap}) must be smaller than chunk size ({max_size})")]
    OverlapTooLarge { max_size: usize, overlap: usize },
}

pub fn validate_chunking(max_size: usize, overlap: usize) -> Result<(), ChunkingError> {
    if max_size == 0 {
        return Err(ChunkingError::ZeroSize);
    }
    if overlap >= max_size {
        return Err(ChunkingError::OverlapTooLarge { max_size, overlap });
    }
    Ok(())
}

/// Lazy chunk sequence over a borrowed text. Clone it to iterate again from the start.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    // Byte offset of every char, plus a trailing `text.len()`.
    offsets: Vec<usize>,
    max_size: usize,
    overlap: usize,
    start: usize,
}

/// Start a boundary-aware chunk sequence
pub fn chunks(text: &str, max_size: usize, overlap: usize) -> Result<Chunks<'_>, ChunkingError> {
    validate_chunking(max_size, overlap)?;
    let offsets = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    Ok(Chunks {
        text,
        offsets,
        max_size,
        overlap,
        start: 0,
    })
}

/// Split text into overlapping chunks that end on a sentence or word boundary when possible
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkingError> {
    Ok(chunks(text, max_size, overlap)?.collect())
}

impl Chunks<'_> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn char_index(&self, byte: usize) -> usize {
        self.offsets.binary_search(&byte).unwrap_or_else(|i| i)
    }

    /// Last period, else last space after `start`, else the hard cut at `end`.
    fn boundary(&self, start: usize, end: usize) -> usize {
        let base = self.offsets[start];
        let window = &self.text[base..self.offsets[end]];

        if let Some(pos) = window.rfind('.') {
            return self.char_index(base + pos) + 1;
        }
        if let Some(pos) = window.rfind(' ') {
            let cut = self.char_index(base + pos);
            if cut > start {
                return cut;
            }
        }
        end
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let len = self.char_len();
        if self.start >= len {
            return None;
        }

        let start = self.start;
        let mut end = (start + self.max_size).min(len);
        if end < len {
            end = self.boundary(start, end);
        }

        self.start = if end >= len {
            len
        } else {
            let next = end.saturating_sub(self.overlap);
            if next <= start {
                end
            } else {
                next
            }
        };

        Some(Chunk {
            content: self.text[self.offsets[start]..self.offsets[end]].to_string(),
            start,
            end,
        })
    }
}
