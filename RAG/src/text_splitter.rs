//! Recursive character splitting.
//!
//! Text is split on the coarsest separator that occurs in it (paragraphs, then
//! lines, then words, then characters). Small pieces are merged back together
//! up to `chunk_size` characters, keeping up to `chunk_overlap` characters of
//! trailing context between neighbouring chunks.

use std::collections::VecDeque;

pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::with_separators(chunk_size, chunk_overlap, &DEFAULT_SEPARATORS)
    }

    pub fn with_separators(chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: separators.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Like [`split_text`](Self::split_text), but also reports the char offset
    /// of every chunk inside `text`.
    ///
    /// Chunks are re-joined with a single separator, so text with repeated
    /// separators (double spaces, stacked blank lines) yields chunks that are
    /// not verbatim substrings. Those are anchored at their first word instead.
    /// Offsets never move backwards.
    pub fn split_text_with_offsets(&self, text: &str) -> Vec<(String, usize)> {
        let chunks = self.split_text(text);
        let mut located = Vec::with_capacity(chunks.len());
        let mut search_from = 0usize;

        for chunk in chunks {
            // Overlapping chunks start before the end of the previous one, so
            // the search resumes just after the previous start.
            let byte_pos = find_from(text, search_from, &chunk)
                .or_else(|| {
                    let first_word = chunk.split_whitespace().next()?;
                    log::debug!("chunk not found verbatim, anchoring at '{}'", first_word);
                    find_from(text, search_from, first_word)
                })
                .unwrap_or(search_from);
            let char_offset = text[..byte_pos].chars().count();
            search_from = next_char_boundary(text, byte_pos);
            located.push((chunk, char_offset));
        }

        located
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut good_splits: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits, separator));
                good_splits.clear();
            }
            if remaining.is_empty() {
                let piece = split.trim();
                if !piece.is_empty() {
                    final_chunks.push(piece.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(split, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, separator));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { separator_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_trimmed(&current, separator) {
                    docs.push(doc);
                }

                // Drop pieces from the front until only the overlap remains
                // and the next piece fits.
                loop {
                    let joiner = if current.is_empty() { 0 } else { separator_len };
                    let too_big = total > 0 && total + len + joiner > self.chunk_size;
                    if total <= self.chunk_overlap && !too_big {
                        break;
                    }
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    let joiner = if current.is_empty() { 0 } else { separator_len };
                    total = total.saturating_sub(char_len(front) + joiner);
                }
            }

            let joiner = if current.is_empty() { 0 } else { separator_len };
            current.push_back(split);
            total += len + joiner;
        }

        if let Some(doc) = join_trimmed(&current, separator) {
            docs.push(doc);
        }

        docs
    }
}

fn join_trimmed(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn find_from(text: &str, from: usize, needle: &str) -> Option<usize> {
    text.get(from..)?.find(needle).map(|pos| from + pos)
}

fn next_char_boundary(text: &str, byte_pos: usize) -> usize {
    text[byte_pos..]
        .chars()
        .next()
        .map(|c| byte_pos + c.len_utf8())
        .unwrap_or(text.len())
}
