//! Live mapping – binds placeholder tokens to a record's values without
//! destroying the template.
//!
//! Tokens are never replaced. Each resolved token is hidden and paired with a
//! disposable "shadow" element carrying the display value: an inline
//! `<span class="mapped-shadow">` next to the token for single-line values,
//! or sibling `<p class="mapped-shadow">` elements after the token's
//! paragraph for multi-paragraph values (the paragraph itself is hidden and
//! marked as the shadow origin). Re-applying with a different record reuses
//! or rebuilds the shadows; restoring for storage strips them all, leaving
//! the original placeholder markup intact.

use std::sync::OnceLock;

use regex::Regex;

use crate::artifacts::{self, ArtifactTracker, QrJob};
use crate::dom::{self, DomNode, ElementNode, Tag};
use crate::placeholder::{self, is_token, token_text_name, FIELD_NAME_ATTR};
use crate::resolver::{FieldMap, Record, Resolution};

pub const SHADOW_CLASS: &str = "mapped-shadow";
pub const SHADOW_ORIGIN_CLASS: &str = "mapped-shadow-origin";
pub const MAPPED_CLASS: &str = "is-mapped";

/// Style properties a multi-paragraph shadow inherits from its origin
/// paragraph, with the values that mean "unset" and are skipped.
const INHERITED_PROPS: &[(&str, &[&str])] = &[
    ("line-height", &["normal"]),
    ("font-family", &[]),
    ("font-size", &[]),
    ("text-align", &["start"]),
    ("text-indent", &["0", "0px"]),
    ("color", &[]),
];

fn block_markup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<p[\s>]").unwrap())
}

fn src_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"src="([^"]+)""#).unwrap())
}

struct Ctx<'a> {
    record: &'a Record,
    map: &'a FieldMap,
}

/// Bind every token under `root` to `record`, then refresh barcode images
/// and collect pending QR render jobs. Idempotent: re-applying updates
/// shadows in place. A document with no field mappings is left untouched.
pub fn apply_live_mapping(
    root: &mut ElementNode,
    record: &Record,
    field_map: &FieldMap,
    tracker: &mut ArtifactTracker,
) -> Vec<QrJob> {
    if field_map.is_empty() {
        return Vec::new();
    }
    placeholder::scan_and_wrap(root);

    let ctx = Ctx {
        record,
        map: field_map,
    };
    process_children(&mut root.children, &ctx);

    artifacts::refresh_barcodes(root, record, field_map);
    artifacts::collect_qr_jobs(root, record, field_map, tracker)
}

/// One block-level pass. Paragraphs containing tokens get the full
/// inline-or-block treatment; bare tokens at this level anchor their shadows
/// directly; everything else recurses.
fn process_children(children: &mut Vec<DomNode>, ctx: &Ctx) {
    let mut i = 0;
    while i < children.len() {
        let kind = match children[i].as_element() {
            Some(e) if is_token(e) => 0,
            Some(e) if e.tag == Tag::P && subtree_has_token(e) => 1,
            Some(_) => 2,
            None => 3,
        };
        match kind {
            0 => i = handle_bare_token(children, i, ctx),
            1 => i = handle_token_paragraph(children, i, ctx),
            2 => {
                if let Some(e) = children[i].as_element_mut() {
                    process_children(&mut e.children, ctx);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
}

fn subtree_has_token(el: &ElementNode) -> bool {
    let mut found = false;
    el.visit_elements(&mut |e| {
        if is_token(e) {
            found = true;
        }
    });
    found
}

/// Resolve a token's field, preferring its attribute and falling back to the
/// name embedded in its own text (persisting the recovered name). The token
/// is always hidden while a record is bound.
fn resolve_and_hide(token: &mut ElementNode, ctx: &Ctx) -> Resolution {
    let attr_name = token
        .attr(FIELD_NAME_ATTR)
        .unwrap_or("")
        .trim()
        .to_string();
    let mut res = if attr_name.is_empty() {
        Resolution::miss()
    } else {
        ctx.map.resolve(&attr_name, ctx.record)
    };
    if !res.found {
        if let Some(text_name) = token_text_name(&token.text_content()) {
            if text_name != attr_name {
                let text_res = ctx.map.resolve(&text_name, ctx.record);
                if text_res.found {
                    token.set_attr(FIELD_NAME_ATTR, &text_name);
                    res = text_res;
                }
            }
        }
    }
    token.add_class(MAPPED_CLASS);
    token.set_style_value("display", "none");
    res
}

/// A paragraph with tokens: remove last round's sibling shadows, bind every
/// token inside it, then either hide it behind fresh multi-paragraph shadows
/// or make sure it is visible again.
fn handle_token_paragraph(children: &mut Vec<DomNode>, idx: usize, ctx: &Ctx) -> usize {
    remove_following_shadows(children, idx);

    let shadow_style = match children[idx].as_element() {
        Some(p) => inherited_shadow_style(p),
        None => String::new(),
    };

    let mut block_shadows = Vec::new();
    let mut any_block = false;
    if let Some(p) = children[idx].as_element_mut() {
        process_inline(
            &mut p.children,
            ctx,
            &shadow_style,
            &mut block_shadows,
            &mut any_block,
        );
        if any_block {
            p.add_class(SHADOW_ORIGIN_CLASS);
            p.set_style_value("display", "none");
        } else if p.has_class(SHADOW_ORIGIN_CLASS) {
            p.remove_class(SHADOW_ORIGIN_CLASS);
            p.remove_style_value("display");
        }
    }

    let inserted = block_shadows.len();
    for (offset, shadow) in block_shadows.into_iter().enumerate() {
        children.insert(idx + 1 + offset, DomNode::Element(shadow));
    }
    idx + 1 + inserted
}

/// Inline pass within a token paragraph. Multi-paragraph values cannot nest
/// inside the paragraph, so their shadows are collected for the caller to
/// insert as siblings.
fn process_inline(
    children: &mut Vec<DomNode>,
    ctx: &Ctx,
    shadow_style: &str,
    block_shadows: &mut Vec<ElementNode>,
    any_block: &mut bool,
) {
    let mut i = 0;
    while i < children.len() {
        let token_here = matches!(children[i].as_element(), Some(e) if is_token(e));
        if token_here {
            let res = match children[i].as_element_mut() {
                Some(t) => resolve_and_hide(t, ctx),
                None => Resolution::miss(),
            };
            if res.is_blank() {
                remove_adjacent_shadow(children, i);
            } else if block_markup_regex().is_match(&res.value) {
                *any_block = true;
                remove_adjacent_shadow(children, i);
                block_shadows.extend(build_shadow_paragraphs(&res.value, shadow_style));
            } else {
                upsert_span_shadow(children, i, &res.value);
            }
        } else if let Some(e) = children[i].as_element_mut() {
            process_inline(&mut e.children, ctx, shadow_style, block_shadows, any_block);
        }
        i += 1;
    }
}

/// A token outside any paragraph: its shadows anchor directly after it.
fn handle_bare_token(children: &mut Vec<DomNode>, idx: usize, ctx: &Ctx) -> usize {
    let res = match children[idx].as_element_mut() {
        Some(t) => resolve_and_hide(t, ctx),
        None => Resolution::miss(),
    };
    if res.is_blank() {
        remove_following_shadows(children, idx);
        remove_adjacent_shadow(children, idx);
        idx + 1
    } else if block_markup_regex().is_match(&res.value) {
        remove_following_shadows(children, idx);
        remove_adjacent_shadow(children, idx);
        let shadows = build_shadow_paragraphs(&res.value, "");
        let inserted = shadows.len();
        for (offset, shadow) in shadows.into_iter().enumerate() {
            children.insert(idx + 1 + offset, DomNode::Element(shadow));
        }
        idx + 1 + inserted
    } else {
        upsert_span_shadow(children, idx, &res.value);
        idx + 2
    }
}

/// Index of the next element sibling after `from`, skipping whitespace-only
/// text. Non-blank text breaks adjacency.
fn next_element_pos(children: &[DomNode], from: usize) -> Option<usize> {
    for (pos, child) in children.iter().enumerate().skip(from + 1) {
        match child {
            DomNode::Element(_) => return Some(pos),
            node if node.is_blank_text() => continue,
            _ => return None,
        }
    }
    None
}

fn adjacent_shadow_pos(children: &[DomNode], from: usize) -> Option<usize> {
    let pos = next_element_pos(children, from)?;
    match children[pos].as_element() {
        Some(e) if e.has_class(SHADOW_CLASS) => Some(pos),
        _ => None,
    }
}

/// Remove every shadow element directly following `from`.
fn remove_following_shadows(children: &mut Vec<DomNode>, from: usize) {
    while let Some(pos) = adjacent_shadow_pos(children, from) {
        children.remove(pos);
    }
}

fn remove_adjacent_shadow(children: &mut Vec<DomNode>, from: usize) {
    if let Some(pos) = adjacent_shadow_pos(children, from) {
        children.remove(pos);
    }
}

/// Create or update the inline span shadow right after the token at `at`.
/// When both the current and the new content are the same image, the shadow
/// is left alone so an already-loaded image is not reloaded.
fn upsert_span_shadow(children: &mut Vec<DomNode>, at: usize, value: &str) {
    if let Some(pos) = adjacent_shadow_pos(children, at) {
        let new_src = src_attr_regex()
            .captures(value)
            .map(|c| c[1].to_string());
        if let Some(shadow) = children[pos].as_element_mut() {
            let same_image = match (&new_src, first_img_src(shadow)) {
                (Some(new), Some(old)) => *new == old,
                _ => false,
            };
            if !same_image {
                shadow.children = dom::parse_html(value);
            }
        }
    } else {
        let mut span = ElementNode::with_class(Tag::Span, SHADOW_CLASS);
        span.children = dom::parse_html(value);
        children.insert(at + 1, DomNode::Element(span));
    }
}

fn first_img_src(el: &ElementNode) -> Option<String> {
    let mut src = None;
    el.visit_elements(&mut |e| {
        if src.is_none() && e.tag == Tag::Img {
            src = e.src().map(str::to_string);
        }
    });
    src
}

/// Turn a multi-paragraph value into shadow paragraphs carrying the origin's
/// inherited inline style.
fn build_shadow_paragraphs(value: &str, style: &str) -> Vec<ElementNode> {
    let mut out = Vec::new();
    for node in dom::parse_html(value) {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::P {
                let mut shadow = ElementNode::with_class(Tag::P, SHADOW_CLASS);
                if !style.is_empty() {
                    shadow.set_attr("style", style);
                }
                shadow.children = e.children;
                out.push(shadow);
            }
        }
    }
    out
}

fn inherited_shadow_style(p: &ElementNode) -> String {
    let mut parts = Vec::new();
    for (prop, unset_values) in INHERITED_PROPS {
        if let Some(value) = p.style_value(prop) {
            if unset_values.contains(&value.as_str()) {
                continue;
            }
            parts.push(format!("{prop}: {value}"));
        }
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;
    use crate::value::FieldValue;
    use std::collections::BTreeMap;

    fn root_of(html: &str) -> ElementNode {
        let mut root = ElementNode::new(Tag::Div);
        root.children = parse_html(html);
        root
    }

    fn record_text(field_id: &str, value: &str) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert(field_id.to_string(), FieldValue::Text(value.to_string()));
        Record::new("rec1", fields)
    }

    fn count_class(root: &ElementNode, class: &str) -> usize {
        let mut n = 0;
        root.visit_elements(&mut |e| {
            if e.has_class(class) {
                n += 1;
            }
        });
        n
    }

    fn apply(root: &mut ElementNode, record: &Record, map: &FieldMap) -> Vec<QrJob> {
        let mut tracker = ArtifactTracker::new();
        apply_live_mapping(root, record, map, &mut tracker)
    }

    #[test]
    fn inline_value_adds_span_shadow_and_hides_token() {
        let map = FieldMap::new([("Name", "fld1")]);
        let record = record_text("fld1", "Alice");
        let mut root = root_of("<p>Name: {$Name}</p>");
        apply(&mut root, &record, &map);

        assert_eq!(count_class(&root, SHADOW_CLASS), 1);
        let p = root.children[0].as_element().unwrap();
        let token = p.children[1].as_element().unwrap();
        assert!(token.has_class(MAPPED_CLASS));
        assert_eq!(token.style_value("display").as_deref(), Some("none"));
        let shadow = p.children[2].as_element().unwrap();
        assert_eq!(shadow.tag, Tag::Span);
        assert_eq!(shadow.text_content(), "Alice");
    }

    #[test]
    fn reapplying_is_idempotent() {
        let map = FieldMap::new([("Name", "fld1")]);
        let record = record_text("fld1", "Alice");
        let mut root = root_of("<p>{$Name}</p>");
        apply(&mut root, &record, &map);
        apply(&mut root, &record, &map);
        assert_eq!(count_class(&root, SHADOW_CLASS), 1);
    }

    #[test]
    fn reapplying_updates_shadow_content() {
        let map = FieldMap::new([("Name", "fld1")]);
        let mut root = root_of("<p>{$Name}</p>");
        apply(&mut root, &record_text("fld1", "Alice"), &map);
        apply(&mut root, &record_text("fld1", "Bob"), &map);
        let p = root.children[0].as_element().unwrap();
        let shadow = p.children[1].as_element().unwrap();
        assert_eq!(shadow.text_content(), "Bob");
    }

    #[test]
    fn blank_value_removes_shadow() {
        let map = FieldMap::new([("Name", "fld1")]);
        let mut root = root_of("<p>{$Name}</p>");
        apply(&mut root, &record_text("fld1", "Alice"), &map);
        apply(&mut root, &Record::new("rec2", BTreeMap::new()), &map);
        assert_eq!(count_class(&root, SHADOW_CLASS), 0);
        // Token stays hidden while a record is bound.
        let p = root.children[0].as_element().unwrap();
        let token = p.children[0].as_element().unwrap();
        assert_eq!(token.style_value("display").as_deref(), Some("none"));
    }

    #[test]
    fn multiline_value_hides_origin_and_inserts_paragraph_shadows() {
        let map = FieldMap::new([("Notes", "fld1")]);
        let record = record_text("fld1", "line one\nline two");
        let mut root = root_of(r#"<p style="font-size: 14px; color: red">{$Notes}</p>"#);
        apply(&mut root, &record, &map);

        let origin = root.children[0].as_element().unwrap();
        assert!(origin.has_class(SHADOW_ORIGIN_CLASS));
        assert_eq!(origin.style_value("display").as_deref(), Some("none"));

        assert_eq!(root.children.len(), 3);
        let first = root.children[1].as_element().unwrap();
        assert_eq!(first.tag, Tag::P);
        assert!(first.has_class(SHADOW_CLASS));
        assert_eq!(first.text_content(), "line one");
        assert_eq!(first.style_value("font-size").as_deref(), Some("14px"));
        assert_eq!(first.style_value("color").as_deref(), Some("red"));
        assert_eq!(root.children[2].as_element().unwrap().text_content(), "line two");
    }

    #[test]
    fn multiline_then_blank_restores_origin() {
        let map = FieldMap::new([("Notes", "fld1")]);
        let mut root = root_of("<p>{$Notes}</p>");
        apply(&mut root, &record_text("fld1", "a\nb"), &map);
        apply(&mut root, &Record::new("rec2", BTreeMap::new()), &map);

        assert_eq!(count_class(&root, SHADOW_CLASS), 0);
        let origin = root.children[0].as_element().unwrap();
        assert!(!origin.has_class(SHADOW_ORIGIN_CLASS));
        assert_eq!(origin.style_value("display"), None);
    }

    #[test]
    fn multiline_reapply_does_not_accumulate_shadows() {
        let map = FieldMap::new([("Notes", "fld1")]);
        let mut root = root_of("<p>{$Notes}</p>");
        apply(&mut root, &record_text("fld1", "a\nb\nc"), &map);
        apply(&mut root, &record_text("fld1", "x\ny"), &map);
        assert_eq!(count_class(&root, SHADOW_CLASS), 2);
        assert_eq!(root.children.len(), 3);
    }

    #[test]
    fn field_name_recovered_from_token_text() {
        let map = FieldMap::new([("Name", "fld1")]);
        let record = record_text("fld1", "Alice");
        // Token whose attribute went stale after a field rename.
        let mut root = root_of(concat!(
            r#"<p><span class="template-field field-block" contenteditable="false" "#,
            r#"data-fieldname="OldName">{$Name}</span></p>"#,
        ));
        apply(&mut root, &record, &map);
        let p = root.children[0].as_element().unwrap();
        let token = p.children[0].as_element().unwrap();
        assert_eq!(token.attr(FIELD_NAME_ATTR), Some("Name"));
        assert_eq!(count_class(&root, SHADOW_CLASS), 1);
    }

    #[test]
    fn empty_field_map_is_a_no_op() {
        let map = FieldMap::default();
        let record = record_text("fld1", "Alice");
        let mut root = root_of("<p>{$Name}</p>");
        apply(&mut root, &record, &map);
        assert_eq!(count_class(&root, crate::placeholder::TOKEN_CLASS), 0);
        assert_eq!(count_class(&root, SHADOW_CLASS), 0);
    }

    #[test]
    fn unresolved_token_is_hidden_without_shadow() {
        let map = FieldMap::new([("Other", "fld9")]);
        let record = record_text("fld9", "x");
        let mut root = root_of("<p>{$Missing}</p>");
        apply(&mut root, &record, &map);
        assert_eq!(count_class(&root, SHADOW_CLASS), 0);
        let p = root.children[0].as_element().unwrap();
        let token = p.children[0].as_element().unwrap();
        assert_eq!(token.style_value("display").as_deref(), Some("none"));
    }

    #[test]
    fn token_nested_in_span_gets_inline_shadow() {
        let map = FieldMap::new([("Name", "fld1")]);
        let record = record_text("fld1", "Alice");
        let mut root = root_of("<p><span>prefix {$Name}</span></p>");
        apply(&mut root, &record, &map);
        assert_eq!(count_class(&root, SHADOW_CLASS), 1);
    }

    #[test]
    fn identical_image_shadow_is_not_rebuilt() {
        let map = FieldMap::new([("Photo", "fld1")]);
        let record = record_text(
            "fld1",
            r#"<img src="https://example.com/a.png" style="width: 100%;" alt="a" crossorigin="anonymous" />"#,
        );
        let mut root = root_of("<p>{$Photo}</p>");
        apply(&mut root, &record, &map);
        // Simulate the loaded state by tagging the shadow, then re-apply.
        root.visit_elements_mut(&mut |e| {
            if e.has_class(SHADOW_CLASS) {
                e.set_attr("data-probe", "kept");
            }
        });
        apply(&mut root, &record, &map);
        let mut kept = false;
        root.visit_elements(&mut |e| {
            if e.attr("data-probe") == Some("kept") {
                kept = true;
            }
        });
        assert!(kept, "shadow was rebuilt despite identical image");
    }
}
