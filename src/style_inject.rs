//! Style injection – carries template CSS into the rendered document
//! without letting it leak outside the editing surface.
//!
//! Every injected sheet is scoped by rewriting `body`/`html` selectors to
//! `#template-root` and deduplicated by content, so re-binding the same
//! template never stacks duplicate sheets.

use std::sync::OnceLock;

use regex::Regex;

use crate::page::{DEFAULT_PAGE_PADDING, ROOT_ID};

fn style_element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").unwrap())
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

fn body_selector_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:body|html)\s*\{").unwrap())
}

/// Ordered, deduplicated set of injected sheets.
#[derive(Debug, Default)]
pub struct StyleManager {
    /// (id, original css, scoped css) in insertion order.
    sheets: Vec<(String, String, String)>,
}

impl StyleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull the contents of every `<style>` element out of raw markup.
    pub fn extract_styles(html: &str) -> Vec<String> {
        style_element_regex()
            .captures_iter(html)
            .map(|c| c[1].trim().to_string())
            .filter(|css| !css.is_empty())
            .collect()
    }

    /// Register a sheet under `id`. Returns false when the identical sheet
    /// is already present; a changed sheet under the same id replaces it.
    pub fn inject_style(&mut self, css: &str, id: &str) -> bool {
        if let Some(existing) = self.sheets.iter_mut().find(|(sid, _, _)| sid == id) {
            if existing.1 == css {
                return false;
            }
            existing.1 = css.to_string();
            existing.2 = scope_styles(css);
            return true;
        }
        self.sheets
            .push((id.to_string(), css.to_string(), scope_styles(css)));
        true
    }

    /// Register a batch of sheets under derived ids (`{base}-0`, ...).
    pub fn inject_multiple(&mut self, styles: &[String], base_id: &str) {
        for (i, css) in styles.iter().enumerate() {
            self.inject_style(css, &format!("{base_id}-{i}"));
        }
    }

    pub fn clear_all(&mut self) {
        self.sheets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Serialized `<style>` elements ready for a document head.
    pub fn head_markup(&self) -> String {
        let mut out = String::new();
        for (id, _, scoped) in &self.sheets {
            out.push_str(&format!("<style id=\"{id}\">{scoped}</style>"));
        }
        out
    }
}

/// Strip comments and retarget document-level selectors at the root element.
fn scope_styles(css: &str) -> String {
    let stripped = comment_regex().replace_all(css, "");
    body_selector_regex()
        .replace_all(&stripped, format!("#{ROOT_ID} {{"))
        .trim()
        .to_string()
}

/// Base geometry every bound document carries: root width, page sizing, and
/// visibility rules for the live-mapping artifacts.
pub fn base_document_css(page_padding: &str) -> String {
    let padding = if page_padding.is_empty() {
        DEFAULT_PAGE_PADDING
    } else {
        page_padding
    };
    format!(
        "\
#{ROOT_ID} {{ width: 210mm; margin: 0 auto; background: #fff; }}\n\
#{ROOT_ID} .template-page-content {{ width: 210mm; min-height: 297mm; padding: {padding}; box-sizing: border-box; position: relative; }}\n\
.template-field {{ background: rgba(87, 107, 149, 0.12); }}\n\
.template-field.is-mapped {{ display: none; }}\n\
@media print {{\n\
  #{ROOT_ID} .template-page-content {{ page-break-after: always; }}\n\
  #{ROOT_ID} .template-page-content:last-child {{ page-break-after: auto; }}\n\
}}"
    )
}
