//! Document text extraction
//!
//! Recovers plain text from PDF (lopdf) and DOCX (zip + WordprocessingML)
//! files. Pages and paragraphs are joined with blank lines; the chunker
//! normalizes whitespace afterwards.

use crate::errors::IngestionError;
use regex::Regex;
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Docx,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            _ => Err(IngestionError::UnsupportedFileType(s.to_string())),
        }
    }
}

/// Extract text from raw file bytes
pub fn extract_text(file_type: FileType, bytes: &[u8]) -> Result<String, IngestionError> {
    let text = match file_type {
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Docx => extract_docx(bytes)?,
    };

    if text.trim().is_empty() {
        return Err(IngestionError::Extraction {
            file_type: file_type.to_string(),
            message: "no text could be extracted".to_string(),
        });
    }

    debug!(file_type = %file_type, chars = text.chars().count(), "Text extracted");
    Ok(text)
}

// ============================================================================
// PDF
// ============================================================================

fn extract_pdf(bytes: &[u8]) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::Extraction {
        file_type: FileType::Pdf.to_string(),
        message: format!("failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text_content = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) if !page_text.trim().is_empty() => text_content.push(page_text),
            Ok(_) => {}
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    Ok(text_content.join("\n\n"))
}

// ============================================================================
// DOCX
// ============================================================================

const DOCX_BODY: &str = "word/document.xml";

fn table_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:tbl[ >].*?</w:tbl>").expect("valid regex"))
}

fn table_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:tr[ >].*?</w:tr>").expect("valid regex"))
}

fn table_cell() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:tc[ >].*?</w:tc>").expect("valid regex"))
}

fn paragraph() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").expect("valid regex"))
}

/// Paragraph properties hold tab stop definitions (`<w:tabs><w:tab .../>`)
fn paragraph_properties() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:pPr[ >].*?</w:pPr>").expect("valid regex"))
}

fn run_content() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab\b[^>]*/>|<w:br\b[^>]*/>|<w:cr\b[^>]*/>",
        )
        .expect("valid regex")
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, IngestionError> {
    let docx_error = |message: String| IngestionError::Extraction {
        file_type: FileType::Docx.to_string(),
        message,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| docx_error(format!("not a DOCX archive: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| docx_error(format!("missing {}: {}", DOCX_BODY, e)))?
        .read_to_string(&mut xml)
        .map_err(|e| docx_error(format!("unreadable {}: {}", DOCX_BODY, e)))?;

    Ok(document_xml_text(&xml))
}

/// Body paragraphs first, then one ` | `-joined line per table row
fn document_xml_text(xml: &str) -> String {
    let body = table_block().replace_all(xml, "");
    let mut text_content: Vec<String> = paragraph()
        .find_iter(&body)
        .map(|p| paragraph_text(p.as_str()))
        .filter(|p| !p.trim().is_empty())
        .collect();

    for table in table_block().find_iter(xml) {
        for row in table_row().find_iter(table.as_str()) {
            let cells: Vec<String> = table_cell()
                .find_iter(row.as_str())
                .map(|cell| {
                    paragraph()
                        .find_iter(cell.as_str())
                        .map(|p| paragraph_text(p.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n")
                        .trim()
                        .to_string()
                })
                .filter(|cell| !cell.is_empty())
                .collect();

            if !cells.is_empty() {
                text_content.push(cells.join(" | "));
            }
        }
    }

    text_content.join("\n\n")
}

fn paragraph_text(xml: &str) -> String {
    let runs = paragraph_properties().replace_all(xml, "");
    let mut text = String::new();
    for caps in run_content().captures_iter(&runs) {
        match caps.get(1) {
            Some(t) => text.push_str(&unescape_xml(t.as_str())),
            None if caps[0].starts_with("<w:tab") => text.push('\t'),
            None => text.push('\n'),
        }
    }
    text
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
