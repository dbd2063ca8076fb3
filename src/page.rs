//! Page structure normalization – guarantees the document is a single
//! `#template-root` whose direct children are `.template-page-content` page
//! blocks, whatever shape the stored template arrived in.
//!
//! Handles legacy wrapper markup, nested roots from copy/paste accidents,
//! loose content that never got a page, cover pages, and page margin values.

use crate::dom::{DomNode, ElementNode, Tag};

pub const ROOT_ID: &str = "template-root";
pub const ROOT_CLASS: &str = "template-root";
pub const PAGE_CLASS: &str = "template-page-content";
pub const COVER_CLASS: &str = "cover-page";
/// Wrapper class from the previous template format; migrated on load.
pub const OLD_WRAPPER_CLASS: &str = "template-page";

pub const PAGE_ATTR: &str = "data-page";
pub const TOTAL_PAGES_ATTR: &str = "data-total-pages";
pub const PAGE_PADDING_ATTR: &str = "data-page-padding";
pub const DEFAULT_PAGE_PADDING: &str = "10mm";

/// Normalize arbitrary parsed markup into the canonical root element.
///
/// The returned root has class `template-root`, id `template-root`, free
/// vertical flow (no fixed height), and only page blocks as direct children.
/// Always yields at least one page.
pub fn ensure_root(nodes: Vec<DomNode>) -> ElementNode {
    let mut root: Option<ElementNode> = None;
    let mut loose: Vec<DomNode> = Vec::new();

    for node in nodes {
        if root.is_none() {
            if let Some(found) = extract_root(&node) {
                // Siblings around an existing root are folded into it rather
                // than dropped.
                root = Some(found);
                continue;
            }
        }
        // Style elements belong to the injection manager, not the page flow.
        let is_style = matches!(node.as_element(), Some(e) if e.tag == Tag::Style);
        if !node.is_blank_text() && !is_style {
            loose.push(node);
        }
    }

    let mut root = root.unwrap_or_else(|| {
        let mut el = ElementNode::with_class(Tag::Div, ROOT_CLASS);
        el.set_attr("id", ROOT_ID);
        el
    });
    root.set_attr("id", ROOT_ID);
    root.add_class(ROOT_CLASS);
    root.set_style_value("height", "auto");
    root.set_style_value("overflow", "visible");
    root.remove_style_value("max-height");
    root.children.extend(loose);

    flatten_nested_roots(&mut root);
    migrate_old_wrappers(&mut root);
    paginate_loose_children(&mut root);
    update_page_numbers(&mut root);
    root
}

/// Take the `#template-root` out of a top-level node, unwrapping body/html
/// nesting on the way. Returns a clone; the caller discards the original.
fn extract_root(node: &DomNode) -> Option<ElementNode> {
    let el = node.as_element()?;
    if el.id() == Some(ROOT_ID) {
        return Some(el.clone());
    }
    for child in &el.children {
        if let Some(found) = extract_root(child) {
            return Some(found);
        }
    }
    None
}

/// Copy/paste inside the editor occasionally produces a root inside the
/// root. Splice any nested root's children into its place.
fn flatten_nested_roots(root: &mut ElementNode) {
    splice_matching(&mut root.children, &|e| e.id() == Some(ROOT_ID));
}

/// Replace old `.template-page` wrappers with the page block they wrap, or
/// hoist their children when no page block is present.
fn migrate_old_wrappers(root: &mut ElementNode) {
    fn walk(children: &mut Vec<DomNode>) {
        let mut i = 0;
        while i < children.len() {
            let is_wrapper = matches!(
                children[i].as_element(),
                Some(e) if e.has_class(OLD_WRAPPER_CLASS) && !e.has_class(PAGE_CLASS)
            );
            if is_wrapper {
                let DomNode::Element(wrapper) = children.remove(i) else {
                    continue;
                };
                let mut replacement: Vec<DomNode> = Vec::new();
                let mut page: Option<DomNode> = None;
                for child in wrapper.children {
                    if page.is_none()
                        && matches!(child.as_element(), Some(e) if e.has_class(PAGE_CLASS))
                    {
                        page = Some(child);
                    } else if page.is_none() && !child.is_blank_text() {
                        replacement.push(child);
                    }
                }
                match page {
                    Some(p) => {
                        children.insert(i, p);
                        i += 1;
                    }
                    None => {
                        let n = replacement.len();
                        for (offset, child) in replacement.into_iter().enumerate() {
                            children.insert(i + offset, child);
                        }
                        i += n;
                    }
                }
            } else {
                if let Some(e) = children[i].as_element_mut() {
                    walk(&mut e.children);
                }
                i += 1;
            }
        }
    }
    walk(&mut root.children);
}

/// Replace every element matching `pred` with its own children, repeatedly.
fn splice_matching(children: &mut Vec<DomNode>, pred: &dyn Fn(&ElementNode) -> bool) {
    let mut i = 0;
    while i < children.len() {
        let matched = matches!(children[i].as_element(), Some(e) if pred(e));
        if matched {
            let DomNode::Element(el) = children.remove(i) else {
                continue;
            };
            for (offset, child) in el.children.into_iter().enumerate() {
                children.insert(i + offset, child);
            }
            // Re-examine from the same index; hoisted children may match too.
        } else {
            if let Some(e) = children[i].as_element_mut() {
                splice_matching(&mut e.children, pred);
            }
            i += 1;
        }
    }
}

/// Group any direct children that are not page blocks into pages. A div
/// styled to full page width (or carrying an explicit page-break marker)
/// starts a new page; runs of other content join the current one.
fn paginate_loose_children(root: &mut ElementNode) {
    let needs_grouping = root.children.iter().any(|c| match c.as_element() {
        Some(e) => !e.has_class(PAGE_CLASS),
        None => !c.is_blank_text(),
    });
    let padding = root
        .attr(PAGE_PADDING_ATTR)
        .unwrap_or(DEFAULT_PAGE_PADDING)
        .to_string();

    if needs_grouping {
        let old = std::mem::take(&mut root.children);
        let mut pages: Vec<DomNode> = Vec::new();
        let mut current: Option<ElementNode> = None;
        for child in old {
            if child.is_blank_text() {
                continue;
            }
            match child.as_element() {
                Some(e) if e.tag == Tag::Style => continue,
                Some(e) if e.has_class(PAGE_CLASS) => {
                    if let Some(page) = current.take() {
                        pages.push(DomNode::Element(page));
                    }
                    pages.push(child);
                }
                Some(e) if starts_new_page(e) => {
                    if let Some(page) = current.take() {
                        pages.push(DomNode::Element(page));
                    }
                    let mut page = make_page(&padding);
                    page.children.push(child);
                    current = Some(page);
                }
                _ => {
                    current
                        .get_or_insert_with(|| make_page(&padding))
                        .children
                        .push(child);
                }
            }
        }
        if let Some(page) = current.take() {
            pages.push(DomNode::Element(page));
        }
        root.children = pages;
    }

    if page_indices(root).is_empty() && !root.children.iter().any(is_cover) {
        root.children.push(DomNode::Element(make_page(&padding)));
    }
}

/// Heuristic for content exported flat: an element sized to the full A4
/// width was almost certainly meant to be its own page.
fn starts_new_page(el: &ElementNode) -> bool {
    if el.has_class("page-break") {
        return true;
    }
    el.tag == Tag::Div
        && el
            .style_value("width")
            .map(|w| w.trim() == "210mm")
            .unwrap_or(false)
}

fn is_cover(node: &DomNode) -> bool {
    matches!(node.as_element(), Some(e) if e.has_class(COVER_CLASS))
}

/// A fresh page block with the root's configured padding.
pub fn make_page(padding: &str) -> ElementNode {
    let mut page = ElementNode::with_class(Tag::Div, PAGE_CLASS);
    page.set_style_value("padding", padding);
    page
}

/// Direct-child indices of content pages, cover excluded.
pub fn page_indices(root: &ElementNode) -> Vec<usize> {
    root.children
        .iter()
        .enumerate()
        .filter_map(|(i, child)| match child.as_element() {
            Some(e) if e.has_class(PAGE_CLASS) && !e.has_class(COVER_CLASS) => Some(i),
            _ => None,
        })
        .collect()
}

/// Stamp `data-page` / `data-total-pages` on every content page. The cover
/// is excluded from both position and total.
pub fn update_page_numbers(root: &mut ElementNode) {
    let indices = page_indices(root);
    let total = indices.len().max(1).to_string();
    for (number, idx) in indices.into_iter().enumerate() {
        if let Some(page) = root.children[idx].as_element_mut() {
            page.set_attr(PAGE_ATTR, &(number + 1).to_string());
            page.set_attr(TOTAL_PAGES_ATTR, &total);
        }
    }
}

/// The kinds of cover a document can open with.
#[derive(Debug, Clone)]
pub enum Cover {
    /// Full-bleed image, padding suppressed.
    Image { src: String },
    /// Centered title block, optional subtitle.
    Title {
        title: String,
        subtitle: Option<String>,
    },
}

/// Insert (or replace) the cover page at the front of the document.
pub fn insert_cover_page(root: &mut ElementNode, cover: &Cover) {
    remove_cover_page(root);
    let padding = root
        .attr(PAGE_PADDING_ATTR)
        .unwrap_or(DEFAULT_PAGE_PADDING)
        .to_string();

    let mut page = ElementNode::new(Tag::Div);
    page.set_attr("class", &format!("{PAGE_CLASS} {COVER_CLASS}"));
    match cover {
        Cover::Image { src } => {
            page.set_attr(
                "style",
                "padding: 0 !important; display: flex; justify-content: center; align-items: center; overflow: hidden",
            );
            let mut img = ElementNode::new(Tag::Img);
            img.set_attr("src", src);
            img.set_attr("style", "width: 100%; height: 100%; object-fit: cover");
            page.children.push(DomNode::Element(img));
        }
        Cover::Title { title, subtitle } => {
            page.set_attr(
                "style",
                &format!(
                    "padding: {padding} !important; display: flex; flex-direction: column; justify-content: center; align-items: center"
                ),
            );
            let mut h1 = ElementNode::new(Tag::H1);
            h1.children.push(DomNode::Text(title.clone()));
            page.children.push(DomNode::Element(h1));
            if let Some(subtitle) = subtitle {
                let mut h2 = ElementNode::new(Tag::H2);
                h2.children.push(DomNode::Text(subtitle.clone()));
                page.children.push(DomNode::Element(h2));
            }
        }
    }
    root.children.insert(0, DomNode::Element(page));
    update_page_numbers(root);
}

/// Remove the cover page if present. Returns whether one was removed.
pub fn remove_cover_page(root: &mut ElementNode) -> bool {
    let before = root.children.len();
    root.children.retain(|c| !is_cover(c));
    let removed = root.children.len() != before;
    if removed {
        update_page_numbers(root);
    }
    removed
}

/// Normalize a page margin value to a plain millimeter count, accepting
/// `mm`, `cm`, `in`, `px`, and bare numbers. Anything unparseable falls back
/// to the default.
pub fn normalize_margin_mm(value: &str) -> f32 {
    parse_margin_mm(value).unwrap_or(10.0)
}

fn parse_margin_mm(value: &str) -> Option<f32> {
    let v = value.trim().to_lowercase();
    let (number, factor) = if let Some(n) = v.strip_suffix("mm") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("cm") {
        (n, 10.0)
    } else if let Some(n) = v.strip_suffix("in") {
        (n, 25.4)
    } else if let Some(n) = v.strip_suffix("px") {
        (n, 25.4 / 96.0)
    } else {
        (v.as_str(), 1.0)
    };
    let parsed: f32 = number.trim().parse().ok()?;
    if parsed.is_finite() && parsed >= 0.0 {
        Some(parsed * factor)
    } else {
        None
    }
}

/// Canonical `"{n}mm"` form of a configured page padding.
pub fn normalize_page_padding(value: &str) -> String {
    let mm = normalize_margin_mm(value);
    if (mm - mm.round()).abs() < 0.01 {
        format!("{}mm", mm.round() as i64)
    } else {
        format!("{mm:.1}mm")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    fn page_count(root: &ElementNode) -> usize {
        page_indices(root).len()
    }

    #[test]
    fn bare_content_gets_wrapped_in_root_and_page() {
        let root = ensure_root(parse_html("<p>hello</p>"));
        assert_eq!(root.id(), Some(ROOT_ID));
        assert!(root.has_class(ROOT_CLASS));
        assert_eq!(page_count(&root), 1);
        let page = root.children[0].as_element().unwrap();
        assert!(page.has_class(PAGE_CLASS));
        assert_eq!(page.text_content(), "hello");
    }

    #[test]
    fn existing_root_and_pages_pass_through() {
        let html = concat!(
            r#"<div id="template-root" class="template-root">"#,
            r#"<div class="template-page-content"><p>a</p></div>"#,
            r#"<div class="template-page-content"><p>b</p></div>"#,
            r#"</div>"#,
        );
        let root = ensure_root(parse_html(html));
        assert_eq!(page_count(&root), 2);
    }

    #[test]
    fn root_inside_body_is_found() {
        let html = concat!(
            r#"<html><body><div id="template-root">"#,
            r#"<div class="template-page-content"><p>x</p></div>"#,
            r#"</div></body></html>"#,
        );
        let root = ensure_root(parse_html(html));
        assert_eq!(page_count(&root), 1);
        assert_eq!(root.text_content(), "x");
    }

    #[test]
    fn nested_roots_are_flattened() {
        let html = concat!(
            r#"<div id="template-root">"#,
            r#"<div class="template-page-content">"#,
            r#"<div id="template-root"><p>inner</p></div>"#,
            r#"</div></div>"#,
        );
        let root = ensure_root(parse_html(html));
        assert_eq!(page_count(&root), 1);
        // Only the outer root remains; the visit includes the receiver.
        let mut roots = 0;
        root.visit_elements(&mut |e| {
            if e.id() == Some(ROOT_ID) {
                roots += 1;
            }
        });
        assert_eq!(roots, 1);
        assert_eq!(root.text_content(), "inner");
    }

    #[test]
    fn old_wrapper_is_migrated_to_its_page() {
        let html = concat!(
            r#"<div id="template-root">"#,
            r#"<div class="template-page">"#,
            r#"<div class="template-page-content"><p>kept</p></div>"#,
            r#"</div></div>"#,
        );
        let root = ensure_root(parse_html(html));
        assert_eq!(page_count(&root), 1);
        let mut wrappers = 0;
        root.visit_elements(&mut |e| {
            if e.has_class(OLD_WRAPPER_CLASS) && !e.has_class(PAGE_CLASS) {
                wrappers += 1;
            }
        });
        assert_eq!(wrappers, 0);
        assert_eq!(root.text_content(), "kept");
    }

    #[test]
    fn full_width_divs_split_into_pages() {
        let html = concat!(
            r#"<div style="width: 210mm"><p>page one</p></div>"#,
            r#"<div style="width: 210mm"><p>page two</p></div>"#,
        );
        let root = ensure_root(parse_html(html));
        assert_eq!(page_count(&root), 2);
    }

    #[test]
    fn empty_input_still_yields_one_page() {
        let root = ensure_root(parse_html(""));
        assert_eq!(page_count(&root), 1);
    }

    #[test]
    fn page_numbers_are_stamped() {
        let html = concat!(
            r#"<div id="template-root">"#,
            r#"<div class="template-page-content"></div>"#,
            r#"<div class="template-page-content"></div>"#,
            r#"</div>"#,
        );
        let root = ensure_root(parse_html(html));
        let p1 = root.children[0].as_element().unwrap();
        let p2 = root.children[1].as_element().unwrap();
        assert_eq!(p1.attr(PAGE_ATTR), Some("1"));
        assert_eq!(p1.attr(TOTAL_PAGES_ATTR), Some("2"));
        assert_eq!(p2.attr(PAGE_ATTR), Some("2"));
    }

    #[test]
    fn cover_is_excluded_from_numbering() {
        let html = concat!(
            r#"<div id="template-root">"#,
            r#"<div class="template-page-content"><p>body</p></div>"#,
            r#"</div>"#,
        );
        let mut root = ensure_root(parse_html(html));
        insert_cover_page(
            &mut root,
            &Cover::Title {
                title: "Report".into(),
                subtitle: None,
            },
        );
        assert_eq!(root.children.len(), 2);
        let cover = root.children[0].as_element().unwrap();
        assert!(cover.has_class(COVER_CLASS));
        assert_eq!(cover.attr(PAGE_ATTR), None);
        let body = root.children[1].as_element().unwrap();
        assert_eq!(body.attr(PAGE_ATTR), Some("1"));
        assert_eq!(body.attr(TOTAL_PAGES_ATTR), Some("1"));
    }

    #[test]
    fn inserting_cover_twice_replaces_it() {
        let mut root = ensure_root(parse_html("<p>x</p>"));
        insert_cover_page(
            &mut root,
            &Cover::Image {
                src: "a.png".into(),
            },
        );
        insert_cover_page(
            &mut root,
            &Cover::Image {
                src: "b.png".into(),
            },
        );
        let covers: Vec<_> = root
            .children
            .iter()
            .filter(|c| is_cover(c))
            .collect();
        assert_eq!(covers.len(), 1);
        assert!(remove_cover_page(&mut root));
        assert!(!remove_cover_page(&mut root));
    }

    #[test]
    fn margin_units_normalize_to_mm() {
        assert_eq!(normalize_page_padding("10mm"), "10mm");
        assert_eq!(normalize_page_padding("1.5cm"), "15mm");
        assert_eq!(normalize_page_padding("1in"), "25.4mm");
        assert_eq!(normalize_page_padding("96px"), "25.4mm");
        assert_eq!(normalize_page_padding("12"), "12mm");
        assert_eq!(normalize_page_padding("garbage"), "10mm");
        assert_eq!(normalize_page_padding("-4mm"), "10mm");
    }
}
