use std::sync::Arc;

use htmd::HtmlToMarkdown;
use jobscout_core::error::AppError;

/// Turns a posting's description HTML into readable text using htmd.
///
/// Lists and emphasis survive as Markdown, non-content elements are dropped,
/// and runs of blank lines are collapsed.
#[derive(Clone)]
pub struct DescriptionCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl DescriptionCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "noscript", "iframe", "svg", "button", "form", "img",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn to_text(&self, html: &str) -> Result<String, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::ExtractionError(format!("Failed to convert description: {e}")))?;
        Ok(collapse_blank_lines(&markdown))
    }
}

impl Default for DescriptionCleaner {
    fn default() -> Self {
        Self::new()
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
