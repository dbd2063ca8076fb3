//! Automatic page-break reconciliation.
//!
//! Walks the page blocks under the root, finds the first child whose
//! cumulative height exceeds the page's usable content height, and moves the
//! overflow onto a following page. When a page's very first block is itself
//! too tall, one level of deep split is attempted inside it; past that the
//! overflow is accepted rather than fragmenting the tree further. Every
//! structural change restarts the scan, bounded by a fixed pass cap so a
//! pathological template (one unsplittable block taller than a page) always
//! terminates.

use crate::dom::{DomNode, ElementNode};
use crate::measure::{parse_px, Measure, PX_PER_MM};
use crate::page::{self, DEFAULT_PAGE_PADDING, PAGE_CLASS};

/// A4 height at 96 dpi.
pub const PAGE_HEIGHT_PX: f32 = 1122.0;
/// Breathing room under the estimate so borderline content does not clip.
const SAFETY_MARGIN_PX: f32 = 4.0;
pub const MAX_PASSES: usize = 50;

/// Reflow overflowing pages until the document is stable or the pass cap is
/// reached. Page numbers are refreshed afterwards either way.
pub fn auto_page_break(root: &mut ElementNode, measure: &dyn Measure) {
    let mut passes = 0;
    loop {
        passes += 1;
        if passes > MAX_PASSES {
            log::warn!("pagination did not stabilize after {MAX_PASSES} passes; accepting layout");
            break;
        }
        if !reflow_once(root, measure) {
            break;
        }
    }
    page::update_page_numbers(root);
}

/// One scan over the pages. Returns true when the structure changed and the
/// scan must restart.
fn reflow_once(root: &mut ElementNode, measure: &dyn Measure) -> bool {
    for idx in page::page_indices(root) {
        let (split, limit) = {
            let Some(page) = root.children[idx].as_element() else {
                continue;
            };
            let limit = usable_height(page);
            (find_split(page, limit, measure), limit)
        };
        match split {
            Some(SplitPoint { pos, first: false }) => {
                move_tail_to_new_page(root, idx, pos);
                return true;
            }
            Some(SplitPoint { pos, first: true }) => {
                if deep_split(root, idx, pos, limit, measure) {
                    return true;
                }
                // Unsplittable oversize block; leave it and move on.
            }
            None => {}
        }
    }
    false
}

/// Content height available on a page: the fixed page height minus vertical
/// paddings and the safety margin.
fn usable_height(page: &ElementNode) -> f32 {
    let (top, bottom) = vertical_paddings(page);
    PAGE_HEIGHT_PX - top - bottom - SAFETY_MARGIN_PX
}

fn vertical_paddings(page: &ElementNode) -> (f32, f32) {
    let top = page
        .style_value("padding-top")
        .as_deref()
        .and_then(parse_px);
    let bottom = page
        .style_value("padding-bottom")
        .as_deref()
        .and_then(parse_px);
    if let (Some(t), Some(b)) = (top, bottom) {
        return (t, b);
    }
    let shorthand = page
        .style_value("padding")
        .as_deref()
        .and_then(padding_shorthand)
        .unwrap_or_else(|| {
            let d = parse_px(DEFAULT_PAGE_PADDING).unwrap_or(10.0 * PX_PER_MM);
            (d, d)
        });
    (top.unwrap_or(shorthand.0), bottom.unwrap_or(shorthand.1))
}

fn padding_shorthand(value: &str) -> Option<(f32, f32)> {
    let parts: Vec<f32> = value
        .split_whitespace()
        .map(|p| parse_px(p).unwrap_or(0.0))
        .collect();
    match parts.len() {
        1 => Some((parts[0], parts[0])),
        2 | 3 => Some((parts[0], parts[parts.len() - 1])),
        4 => Some((parts[0], parts[2])),
        _ => None,
    }
}

struct SplitPoint {
    /// Child-vector index of the first overflowing element.
    pos: usize,
    /// Whether that element is the page's first element child.
    first: bool,
}

/// First element child whose cumulative height exceeds `limit`.
fn find_split(page: &ElementNode, limit: f32, measure: &dyn Measure) -> Option<SplitPoint> {
    let mut total = 0.0f32;
    let mut first_el: Option<usize> = None;
    for (pos, child) in page.children.iter().enumerate() {
        let Some(el) = child.as_element() else {
            continue;
        };
        if first_el.is_none() {
            first_el = Some(pos);
        }
        total += measure.block_height(el) + measure.vertical_margins(el);
        if total > limit {
            return Some(SplitPoint {
                pos,
                first: first_el == Some(pos),
            });
        }
    }
    None
}

/// Move children `[pos..]` of the page at `idx` onto a fresh page inserted
/// right after it.
fn move_tail_to_new_page(root: &mut ElementNode, idx: usize, pos: usize) {
    let mut new_page = sibling_page(root, idx);
    if let Some(page) = root.children[idx].as_element_mut() {
        new_page.children = page.children.split_off(pos);
    }
    root.children.insert(idx + 1, DomNode::Element(new_page));
}

/// The page's first block alone overflows: try splitting inside it once.
/// The container is shallow-cloned (minus its id) so wrapper styling
/// carries over to the continuation.
fn deep_split(
    root: &mut ElementNode,
    idx: usize,
    pos: usize,
    limit: f32,
    measure: &dyn Measure,
) -> bool {
    let inner = {
        let Some(page) = root.children[idx].as_element() else {
            return false;
        };
        let Some(block) = page.children[pos].as_element() else {
            return false;
        };
        find_split(block, limit, measure)
    };

    match inner {
        Some(SplitPoint { pos: ipos, first: false }) => {
            let mut new_page = sibling_page(root, idx);
            if let Some(page) = root.children[idx].as_element_mut() {
                let mut tail = page.children.split_off(pos + 1);
                if let Some(block) = page.children[pos].as_element_mut() {
                    let mut continuation = shallow_clone(block);
                    continuation.children = block.children.split_off(ipos);
                    new_page.children.push(DomNode::Element(continuation));
                }
                new_page.children.append(&mut tail);
            }
            root.children.insert(idx + 1, DomNode::Element(new_page));
            true
        }
        _ => {
            // Cannot split inside the block; push its later siblings (if
            // any) to the next page so the block at least starts clean.
            let has_tail = {
                let Some(page) = root.children[idx].as_element() else {
                    return false;
                };
                page.children[pos + 1..]
                    .iter()
                    .any(|c| c.as_element().is_some())
            };
            if !has_tail {
                return false;
            }
            move_tail_to_new_page(root, idx, pos + 1);
            true
        }
    }
}

fn sibling_page(root: &ElementNode, idx: usize) -> ElementNode {
    let padding = root.children[idx]
        .as_element()
        .and_then(|p| p.style_value("padding"))
        .unwrap_or_else(|| DEFAULT_PAGE_PADDING.to_string());
    page::make_page(&padding)
}

fn shallow_clone(el: &ElementNode) -> ElementNode {
    let mut clone = ElementNode::new(el.tag.clone());
    for (name, value) in &el.attributes {
        if name != "id" {
            clone.set_attr(name, value);
        }
    }
    clone
}

/// Manual page break: everything from `child_index` on in the page at
/// `page_index` (an index into the root's direct children) moves to a new
/// page. Returns false when the position does not name a page child.
pub fn insert_page_break(root: &mut ElementNode, page_index: usize, child_index: usize) -> bool {
    let valid = matches!(
        root.children.get(page_index).and_then(|c| c.as_element()),
        Some(p) if p.has_class(PAGE_CLASS) && child_index <= p.children.len() && child_index > 0
    );
    if !valid {
        return false;
    }
    move_tail_to_new_page(root, page_index, child_index);
    page::update_page_numbers(root);
    true
}
