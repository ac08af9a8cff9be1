//! Query-relevant excerpt extraction

const STRIDE: usize = 20;
const ELLIPSIS: &str = "...";

/// Picks the fixed-size window of a text that covers the most query terms
#[derive(Debug, Clone, Copy)]
pub struct SnippetGenerator {
    max_length: usize,
}

impl Default for SnippetGenerator {
    fn default() -> Self {
        Self { max_length: 200 }
    }
}

impl SnippetGenerator {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Extract the window of `content` most relevant to `query`.
    ///
    /// Lengths are in characters. Windows start every 20 characters; the one
    /// containing the most distinct lowercase query terms wins, the earliest
    /// on ties. The result is at most `max_length + 6` characters long.
    ///
    /// The final window is the exception to the 20-character grid: it starts
    /// at `len - max_length`, so text past the last full stride can still be
    /// shown.
    pub fn snippet(&self, content: &str, query: &str) -> String {
        let terms = query_terms(query);
        if content.is_empty() || terms.is_empty() {
            return truncate_chars(content, self.max_length);
        }

        let chars: Vec<char> = content.chars().collect();
        let total = chars.len();
        if total <= self.max_length {
            return content.to_string();
        }

        let last_start = total - self.max_length;
        let mut best_start = 0;
        let mut best_score = 0;
        let mut start = 0;
        loop {
            let window: String = chars[start..start + self.max_length]
                .iter()
                .collect::<String>()
                .to_lowercase();
            let score = terms.iter().filter(|t| window.contains(t.as_str())).count();
            if score > best_score {
                best_score = score;
                best_start = start;
            }

            if start == last_start {
                break;
            }
            start = (start + STRIDE).min(last_start);
        }

        let end = best_start + self.max_length;
        let mut snippet = String::with_capacity(self.max_length + 2 * ELLIPSIS.len());
        if best_start > 0 {
            snippet.push_str(ELLIPSIS);
        }
        snippet.extend(&chars[best_start..end]);
        if end < total {
            snippet.push_str(ELLIPSIS);
        }
        snippet
    }
}

/// Distinct lowercase whitespace-separated terms, in first-seen order
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace().map(str::to_lowercase) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
