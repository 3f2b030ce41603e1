use crate::models::DocumentChunk;
use crate::text_splitter::RecursiveCharacterTextSplitter;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct DocumentProcessor {
    splitter: RecursiveCharacterTextSplitter,
    re_control: Regex,
    re_inline_space: Regex,
    re_blank_lines: Regex,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self {
            splitter: RecursiveCharacterTextSplitter::new(chunk_size, chunk_overlap),
            re_control: Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F\u{FFFD}]")?,
            re_inline_space: Regex::new(r"[ \t\u{A0}]+")?,
            re_blank_lines: Regex::new(r"\n\s*\n(\s*\n)*")?,
        })
    }

    /// Load every policy PDF under `path` (a single file or a directory) and
    /// return its page-tagged chunks in a stable order.
    pub fn process_documents(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let pdfs = pdf_paths(path)?;
        let mut chunks = Vec::new();

        for pdf in &pdfs {
            chunks.extend(self.load_policy_pdf(pdf)?);
        }

        log::info!(
            "Processed {} documents into {} chunks",
            pdfs.len(),
            chunks.len()
        );
        Ok(chunks)
    }

    pub fn load_policy_pdf(&self, file_path: &Path) -> Result<Vec<DocumentChunk>> {
        let source = file_name(file_path);
        log::info!("Processing PDF: {}", source);

        let pages = pdf_extract::extract_text_by_pages(file_path).map_err(|e| {
            anyhow!("failed to extract text from {}: {}", file_path.display(), e)
        })?;

        let chunks = self.chunk_pages(&source, &pages);
        log::info!("Created {} chunks from {} pages of {}", chunks.len(), pages.len(), source);
        Ok(chunks)
    }

    /// Split already-extracted page texts. Page numbers are 1-based.
    pub fn chunk_pages(&self, source: &str, pages: &[String]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();

        for (page_idx, raw) in pages.iter().enumerate() {
            let cleaned = self.clean_text(raw);
            if cleaned.is_empty() {
                continue;
            }

            for (content, start) in self.splitter.split_text_with_offsets(&cleaned) {
                let len = content.chars().count();
                chunks.push(DocumentChunk {
                    id: Uuid::new_v4().to_string(),
                    source: source.to_string(),
                    page: page_idx as u32 + 1,
                    chunk_index: chunks.len(),
                    content,
                    start_position: start,
                    end_position: start + len,
                });
            }
        }

        chunks
    }

    /// Normalise extracted PDF text: drop control characters, collapse runs of
    /// inline whitespace, and keep at most one blank line between paragraphs.
    pub fn clean_text(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let text = self.re_control.replace_all(&text, " ");
        let text = self.re_inline_space.replace_all(&text, " ");

        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let joined = lines.join("\n");
        let collapsed = self.re_blank_lines.replace_all(&joined, "\n\n");

        collapsed.trim().to_string()
    }
}

/// Resolve `path` to the list of PDFs it names, sorted by file name.
pub fn pdf_paths(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("policy document path {} does not exist", path.display());
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut pdfs = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let file_path = entry?.path();
        let is_pdf = file_path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf && file_path.is_file() {
            pdfs.push(file_path);
        }
    }

    if pdfs.is_empty() {
        bail!("no PDF files found in {}", path.display());
    }

    pdfs.sort();
    Ok(pdfs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
