//! Placeholder scanner/rewriter – finds raw `{$Name}` / `${Name}` text and
//! wraps it as addressable token spans, and reverses the live-mapping
//! transform back to storable markup.
//!
//! Canonical token form: `<span class="template-field field-block"
//! contenteditable="false" data-fieldname="Name">{$Name}</span>`.

use std::sync::OnceLock;

use regex::Regex;

use crate::dom::{self, DomNode, ElementNode, Tag};
use crate::mapping::{MAPPED_CLASS, SHADOW_CLASS, SHADOW_ORIGIN_CLASS};

pub const TOKEN_CLASS: &str = "template-field";
pub const TOKEN_BLOCK_CLASS: &str = "field-block";
pub const FIELD_NAME_ATTR: &str = "data-fieldname";

/// Both supported placeholder syntaxes: `{$Name}` and `${Name}`.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\{\$([^}]+)\})|(\$\{([^}]+)\})").unwrap())
}

/// Whole-string match for a token's own text, used to recover a field name
/// from a token that never had its attribute synchronized.
pub fn token_text_name(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(?:\{\$([^}]+)\}|\$\{([^}]+)\})$").unwrap());
    let caps = re.captures(text.trim())?;
    let name = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn is_token(el: &ElementNode) -> bool {
    el.has_class(TOKEN_CLASS)
}

/// Build a bare placeholder token span.
pub fn make_token(field_name: &str) -> ElementNode {
    let mut span = ElementNode::new(Tag::Span);
    span.set_attr("class", &format!("{TOKEN_CLASS} {TOKEN_BLOCK_CLASS}"));
    span.set_attr("contenteditable", "false");
    span.set_attr(FIELD_NAME_ATTR, field_name);
    span.children
        .push(DomNode::Text(format!("{{${field_name}}}")));
    span
}

/// Token as created during live editing, with the pointer affordances the
/// editor shows.
fn make_decorated_token(field_name: &str) -> ElementNode {
    let mut span = make_token(field_name);
    span.set_attr("style", "padding: 0 2px; border-radius: 2px; cursor: pointer");
    span
}

/// Walk all text nodes under `root` and wrap every placeholder occurrence as
/// a token. Text already inside a token element is never re-wrapped.
pub fn scan_and_wrap(root: &mut ElementNode) {
    if is_token(root) {
        return;
    }
    let old = std::mem::take(&mut root.children);
    let mut rewritten = Vec::with_capacity(old.len());
    for child in old {
        match child {
            DomNode::Text(text) if placeholder_regex().is_match(&text) => {
                wrap_text_run(&text, true, &mut rewritten);
            }
            DomNode::Element(mut e) => {
                scan_and_wrap(&mut e);
                rewritten.push(DomNode::Element(e));
            }
            other => rewritten.push(other),
        }
    }
    root.children = rewritten;
}

/// Split one text run around its placeholder matches.
fn wrap_text_run(text: &str, decorated: bool, out: &mut Vec<DomNode>) {
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        let name = caps
            .get(2)
            .or_else(|| caps.get(4))
            .map(|g| g.as_str().trim())
            .unwrap_or("");
        if m.start() > last {
            out.push(DomNode::Text(text[last..m.start()].to_string()));
        }
        let token = if decorated {
            make_decorated_token(name)
        } else {
            make_token(name)
        };
        out.push(DomNode::Element(token));
        last = m.end();
    }
    if last < text.len() {
        out.push(DomNode::Text(text[last..].to_string()));
    }
}

/// Transform live markup back into its storable form: all shadows removed,
/// hidden origins and tokens made visible again, token text canonicalized to
/// `{$Name}`, and any remaining plain-text placeholders wrapped so the stored
/// template is self-consistent regardless of how it was authored.
///
/// Head-level `<style>` elements are excluded from the result – they are the
/// style injection manager's concern.
pub fn restore(html: &str) -> String {
    let mut body = ElementNode::new(Tag::Body);
    body.children = dom::into_body_children(dom::parse_html(html));

    strip_live_artifacts(&mut body);
    canonicalize_tokens(&mut body);

    // Plain-text placeholders become bare tokens (no editor decoration).
    wrap_remaining_text(&mut body);

    dom::serialize_nodes(&body.children)
}

fn strip_live_artifacts(el: &mut ElementNode) {
    el.children.retain(|child| match child.as_element() {
        Some(e) => !e.has_class(SHADOW_CLASS) && e.tag != Tag::Style,
        None => true,
    });
    for child in &mut el.children {
        if let DomNode::Element(e) = child {
            if e.has_class(SHADOW_ORIGIN_CLASS) {
                e.remove_class(SHADOW_ORIGIN_CLASS);
                e.remove_style_value("display");
            }
            if is_token(e) && e.has_class(MAPPED_CLASS) {
                e.remove_class(MAPPED_CLASS);
                e.remove_style_value("display");
            }
            strip_live_artifacts(e);
        }
    }
}

/// Normalize `${Name}` token text to the canonical `{$Name}` form and backfill
/// a missing `data-fieldname` attribute from it.
fn canonicalize_tokens(el: &mut ElementNode) {
    el.visit_elements_mut(&mut |e| {
        if !is_token(e) {
            return;
        }
        let text = e.text_content();
        let trimmed = text.trim();
        if trimmed.starts_with("${") && trimmed.ends_with('}') {
            let name = trimmed[2..trimmed.len() - 1].trim().to_string();
            e.children = vec![DomNode::Text(format!("{{${name}}}"))];
            if e.attr(FIELD_NAME_ATTR).map_or(true, str::is_empty) {
                e.set_attr(FIELD_NAME_ATTR, &name);
            }
        }
    });
}

fn wrap_remaining_text(el: &mut ElementNode) {
    if is_token(el) {
        return;
    }
    let old = std::mem::take(&mut el.children);
    let mut rewritten = Vec::with_capacity(old.len());
    for child in old {
        match child {
            DomNode::Text(text) if placeholder_regex().is_match(&text) => {
                wrap_text_run(&text, false, &mut rewritten);
            }
            DomNode::Element(mut e) => {
                wrap_remaining_text(&mut e);
                rewritten.push(DomNode::Element(e));
            }
            other => rewritten.push(other),
        }
    }
    el.children = rewritten;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    fn root_of(html: &str) -> ElementNode {
        let mut root = ElementNode::new(Tag::Div);
        root.children = parse_html(html);
        root
    }

    fn find_tokens(el: &ElementNode) -> Vec<(String, String)> {
        let mut out = Vec::new();
        el.visit_elements(&mut |e| {
            if is_token(e) {
                out.push((
                    e.attr(FIELD_NAME_ATTR).unwrap_or("").to_string(),
                    e.text_content(),
                ));
            }
        });
        out
    }

    #[test]
    fn wraps_both_syntaxes() {
        let mut root = root_of("<p>A {$Name} and ${Other} here</p>");
        scan_and_wrap(&mut root);
        let tokens = find_tokens(&root);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], ("Name".to_string(), "{$Name}".to_string()));
        assert_eq!(tokens[1], ("Other".to_string(), "{$Other}".to_string()));
    }

    #[test]
    fn trims_field_names() {
        let mut root = root_of("<p>{$ Name }</p>");
        scan_and_wrap(&mut root);
        let tokens = find_tokens(&root);
        assert_eq!(tokens[0].0, "Name");
        assert_eq!(tokens[0].1, "{$Name}");
    }

    #[test]
    fn does_not_double_wrap() {
        let mut root = root_of("<p>{$Name}</p>");
        scan_and_wrap(&mut root);
        scan_and_wrap(&mut root);
        assert_eq!(find_tokens(&root).len(), 1);
    }

    #[test]
    fn preserves_surrounding_text() {
        let mut root = root_of("<p>before {$X} after</p>");
        scan_and_wrap(&mut root);
        let p = root.children[0].as_element().unwrap();
        assert!(matches!(&p.children[0], DomNode::Text(t) if t == "before "));
        assert!(matches!(&p.children[2], DomNode::Text(t) if t == " after"));
    }

    #[test]
    fn restore_round_trips_plain_text() {
        let html = "<p>No placeholders at all</p>";
        assert_eq!(restore(html), html);
    }

    #[test]
    fn restore_canonicalizes_dollar_brace() {
        let out = restore("<p>${Name}</p>");
        assert!(out.contains("{$Name}"), "got: {out}");
        assert!(out.contains(r#"data-fieldname="Name""#));
    }

    #[test]
    fn restore_removes_shadows_and_unhides() {
        let html = concat!(
            r#"<p class="mapped-shadow-origin" style="display: none">"#,
            r#"<span class="template-field field-block is-mapped" style="display: none" data-fieldname="A">{$A}</span>"#,
            r#"</p>"#,
            r#"<p class="mapped-shadow">shadow line</p>"#,
        );
        let out = restore(html);
        assert!(!out.contains("mapped-shadow"), "got: {out}");
        assert!(!out.contains("is-mapped"));
        assert!(!out.contains("display: none"));
        assert!(out.contains("{$A}"));
    }

    #[test]
    fn restore_excludes_style_elements() {
        let out = restore("<style>body { color: red; }</style><p>text</p>");
        assert!(!out.contains("<style"));
        assert!(out.contains("<p>text</p>"));
    }

    #[test]
    fn token_text_name_parses_both_forms() {
        assert_eq!(token_text_name("{$Foo}").as_deref(), Some("Foo"));
        assert_eq!(token_text_name("${ Bar }").as_deref(), Some("Bar"));
        assert_eq!(token_text_name("plain"), None);
    }
}
