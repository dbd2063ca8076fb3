//! Height estimation for page-overflow decisions.
//!
//! Pagination only needs relative heights good enough to pick a split point,
//! so the default implementation is a font-metrics estimate: explicit inline
//! pixel heights win, containers sum their children, and text blocks are
//! costed by line count at an average character width. Callers with real
//! layout data can provide their own [`Measure`].

use crate::dom::{DomNode, ElementNode, Tag};

pub const PX_PER_MM: f32 = 96.0 / 25.4;

/// Source of block heights for the paginator.
pub trait Measure {
    /// Outer height of a block element in CSS pixels, margins excluded.
    fn block_height(&self, el: &ElementNode) -> f32;

    /// Vertical margins contributed by the element.
    fn vertical_margins(&self, el: &ElementNode) -> f32 {
        if is_hidden(el) {
            return 0.0;
        }
        let explicit = ["margin-top", "margin-bottom"]
            .iter()
            .filter_map(|p| el.style_value(p).as_deref().and_then(parse_px))
            .sum::<f32>();
        if explicit > 0.0 {
            return explicit;
        }
        if let Some(margin) = el.style_value("margin") {
            if let Some((top, bottom)) = parse_margin_shorthand(&margin) {
                return top + bottom;
            }
        }
        default_vertical_margins(el.tag.clone())
    }
}

/// Character-count based estimator.
#[derive(Debug, Clone)]
pub struct TextMetrics {
    pub font_size: f32,
    pub line_height: f32,
    /// Usable line width of a page in pixels.
    pub content_width: f32,
    /// Average glyph advance as a fraction of the font size.
    pub avg_char_width: f32,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            line_height: 1.5,
            // A4 width minus default 10mm side paddings.
            content_width: 190.0 * PX_PER_MM,
            avg_char_width: 0.55,
        }
    }
}

impl Measure for TextMetrics {
    fn block_height(&self, el: &ElementNode) -> f32 {
        if is_hidden(el) {
            return 0.0;
        }
        if let Some(h) = el.style_value("height").as_deref().and_then(parse_px) {
            return h;
        }
        match el.tag {
            Tag::Img => el
                .attr("height")
                .and_then(|h| h.parse::<f32>().ok())
                .unwrap_or(150.0),
            Tag::Br => self.font_size * self.line_height,
            Tag::Table | Tag::Ul | Tag::Ol | Tag::Div | Tag::Tr => {
                let sum: f32 = el
                    .children
                    .iter()
                    .filter_map(DomNode::as_element)
                    .map(|c| self.block_height(c) + self.vertical_margins(c))
                    .sum();
                sum.max(self.line_px(1.0))
            }
            _ => self.text_block_height(el),
        }
    }
}

impl TextMetrics {
    fn line_px(&self, scale: f32) -> f32 {
        self.font_size * scale * self.line_height
    }

    fn text_block_height(&self, el: &ElementNode) -> f32 {
        let scale = match el.tag {
            Tag::H1 => 2.0,
            Tag::H2 => 1.5,
            Tag::H3 => 1.17,
            _ => 1.0,
        };
        let font_size = el
            .style_value("font-size")
            .as_deref()
            .and_then(parse_px)
            .unwrap_or(self.font_size * scale);
        let chars = el.text_content().chars().count().max(1) as f32;
        let chars_per_line =
            (self.content_width / (font_size * self.avg_char_width)).max(1.0);
        let lines = (chars / chars_per_line).ceil();
        // Embedded images dominate the text estimate.
        let mut image_px = 0.0f32;
        el.visit_elements(&mut |e| {
            if e.tag == Tag::Img {
                image_px += e
                    .style_value("height")
                    .as_deref()
                    .and_then(parse_px)
                    .or_else(|| e.attr("height").and_then(|h| h.parse().ok()))
                    .unwrap_or(150.0);
            }
        });
        lines * font_size * self.line_height + image_px
    }
}

/// Elements hidden by the live-mapping transform occupy no space.
pub fn is_hidden(el: &ElementNode) -> bool {
    el.style_value("display").as_deref() == Some("none")
}

fn default_vertical_margins(tag: Tag) -> f32 {
    match tag {
        Tag::P | Tag::Ul | Tag::Ol | Tag::Table => 16.0,
        Tag::H1 => 21.0,
        Tag::H2 => 20.0,
        Tag::H3 => 18.0,
        _ => 0.0,
    }
}

/// Parse a CSS length into pixels; supports `px`, `mm`, and bare numbers.
pub fn parse_px(value: &str) -> Option<f32> {
    let v = value.trim();
    let (number, factor) = if let Some(n) = v.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("mm") {
        (n, PX_PER_MM)
    } else {
        (v, 1.0)
    };
    let parsed: f32 = number.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed * factor)
}

fn parse_margin_shorthand(value: &str) -> Option<(f32, f32)> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    fn element_of(html: &str) -> ElementNode {
        parse_html(html)
            .into_iter()
            .find_map(|n| match n {
                DomNode::Element(e) => Some(e),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn explicit_pixel_height_wins() {
        let m = TextMetrics::default();
        let el = element_of(r#"<div style="height: 400px"><p>anything</p></div>"#);
        assert_eq!(m.block_height(&el), 400.0);
    }

    #[test]
    fn mm_heights_convert() {
        let m = TextMetrics::default();
        let el = element_of(r#"<div style="height: 25.4mm"></div>"#);
        assert!((m.block_height(&el) - 96.0).abs() < 0.01);
    }

    #[test]
    fn longer_text_measures_taller() {
        let m = TextMetrics::default();
        let short = element_of("<p>short</p>");
        let long = element_of(&format!("<p>{}</p>", "word ".repeat(200)));
        assert!(m.block_height(&long) > m.block_height(&short) * 3.0);
    }

    #[test]
    fn empty_paragraph_still_takes_a_line() {
        let m = TextMetrics::default();
        let el = element_of("<p></p>");
        assert!(m.block_height(&el) >= m.font_size * m.line_height - 0.01);
    }

    #[test]
    fn container_sums_children() {
        let m = TextMetrics::default();
        let one = element_of("<div><p>alpha</p></div>");
        let three = element_of("<div><p>alpha</p><p>beta</p><p>gamma</p></div>");
        assert!(m.block_height(&three) > m.block_height(&one) * 2.0);
    }

    #[test]
    fn margin_shorthand_parses() {
        let m = TextMetrics::default();
        let el = element_of(r#"<p style="margin: 10px 0 30px 0">x</p>"#);
        assert_eq!(m.vertical_margins(&el), 40.0);
    }
}
