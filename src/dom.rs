//! HTML parser and owned DOM tree – the document model everything else
//! mutates.
//!
//! We support a controlled subset of elements:
//! - Structural: div, p, h1-h3, ul, ol, li, table, tr, td, th, img, a, br
//! - Inline: span
//! - Head-level: style (raw text content)
//! - Styling via `class` and `style` attributes
//!
//! Unlike a browser DOM there are no parent back-references; mutation is done
//! by rewriting child vectors in explicit passes, which keeps the pagination
//! and mapping invariants auditable.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

/// The tag name of a supported element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Div,
    P,
    H1,
    H2,
    H3,
    Ul,
    Ol,
    Li,
    Table,
    Tr,
    Td,
    Th,
    Span,
    Img,
    A,
    Br,
    Hr,
    Body,
    Html,
    Head,
    Style,
    Meta,
    Link,
    Input,
    /// Catch-all for unknown tags – they are kept but treated as divs.
    Unknown(String),
}

impl Tag {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "div" => Tag::Div,
            "p" => Tag::P,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "table" => Tag::Table,
            "tr" => Tag::Tr,
            "td" => Tag::Td,
            "th" => Tag::Th,
            "span" => Tag::Span,
            "img" => Tag::Img,
            "a" => Tag::A,
            "br" => Tag::Br,
            "hr" => Tag::Hr,
            "body" => Tag::Body,
            "html" => Tag::Html,
            "head" => Tag::Head,
            "style" => Tag::Style,
            "meta" => Tag::Meta,
            "link" => Tag::Link,
            "input" => Tag::Input,
            _ => Tag::Unknown(s.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Tag::Div => "div",
            Tag::P => "p",
            Tag::H1 => "h1",
            Tag::H2 => "h2",
            Tag::H3 => "h3",
            Tag::Ul => "ul",
            Tag::Ol => "ol",
            Tag::Li => "li",
            Tag::Table => "table",
            Tag::Tr => "tr",
            Tag::Td => "td",
            Tag::Th => "th",
            Tag::Span => "span",
            Tag::Img => "img",
            Tag::A => "a",
            Tag::Br => "br",
            Tag::Hr => "hr",
            Tag::Body => "body",
            Tag::Html => "html",
            Tag::Head => "head",
            Tag::Style => "style",
            Tag::Meta => "meta",
            Tag::Link => "link",
            Tag::Input => "input",
            Tag::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Tag::Div
                | Tag::P
                | Tag::H1
                | Tag::H2
                | Tag::H3
                | Tag::Ul
                | Tag::Ol
                | Tag::Li
                | Tag::Table
                | Tag::Tr
                | Tag::Td
                | Tag::Th
                | Tag::Body
                | Tag::Html
                | Tag::Unknown(_)
        )
    }

    pub fn is_void(&self) -> bool {
        matches!(
            self,
            Tag::Img | Tag::Br | Tag::Hr | Tag::Meta | Tag::Link | Tag::Input
        )
    }
}

/// A node in our DOM tree.
#[derive(Debug, Clone)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

impl DomNode {
    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match self {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        }
    }

    /// True for text nodes containing only whitespace.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, DomNode::Text(t) if t.trim().is_empty())
    }
}

/// An element node carrying tag, attributes, and children.
#[derive(Debug, Clone)]
pub struct ElementNode {
    pub tag: Tag,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_class(tag: Tag, class: &str) -> Self {
        let mut el = Self::new(tag);
        el.attributes.insert("class".to_string(), class.to_string());
        el
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    // -- class helpers ------------------------------------------------------

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let entry = self.attributes.entry("class".to_string()).or_default();
        if entry.is_empty() {
            entry.push_str(class);
        } else {
            entry.push(' ');
            entry.push_str(class);
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        if let Some(current) = self.attributes.get("class") {
            let remaining: Vec<&str> = current
                .split_whitespace()
                .filter(|c| *c != class)
                .collect();
            if remaining.is_empty() {
                self.attributes.remove("class");
            } else {
                self.attributes
                    .insert("class".to_string(), remaining.join(" "));
            }
        }
    }

    // -- inline style helpers -----------------------------------------------

    pub fn inline_style(&self) -> Option<&str> {
        self.attributes.get("style").map(|s| s.as_str())
    }

    /// Parse the `style` attribute into ordered `(property, value)` pairs.
    pub fn style_properties(&self) -> Vec<(String, String)> {
        let Some(style) = self.inline_style() else {
            return Vec::new();
        };
        style
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim().to_ascii_lowercase();
                let value = value.trim().to_string();
                if prop.is_empty() || value.is_empty() {
                    None
                } else {
                    Some((prop, value))
                }
            })
            .collect()
    }

    pub fn style_value(&self, property: &str) -> Option<String> {
        self.style_properties()
            .into_iter()
            .rev()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }

    pub fn set_style_value(&mut self, property: &str, value: &str) {
        let mut props = self.style_properties();
        props.retain(|(p, _)| p != property);
        props.push((property.to_string(), value.to_string()));
        self.write_style(props);
    }

    pub fn remove_style_value(&mut self, property: &str) {
        let mut props = self.style_properties();
        props.retain(|(p, _)| p != property);
        self.write_style(props);
    }

    fn write_style(&mut self, props: Vec<(String, String)>) {
        if props.is_empty() {
            self.attributes.remove("style");
        } else {
            let text = props
                .iter()
                .map(|(p, v)| format!("{p}: {v}"))
                .collect::<Vec<_>>()
                .join("; ");
            self.attributes.insert("style".to_string(), text);
        }
    }

    pub fn src(&self) -> Option<&str> {
        self.attr("src")
    }

    // -- content helpers ----------------------------------------------------

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Visit this element and every descendant element, parents first.
    pub fn visit_elements_mut(&mut self, f: &mut dyn FnMut(&mut ElementNode)) {
        f(self);
        for child in &mut self.children {
            if let DomNode::Element(e) = child {
                e.visit_elements_mut(f);
            }
        }
    }

    pub fn visit_elements(&self, f: &mut dyn FnMut(&ElementNode)) {
        f(self);
        for child in &self.children {
            if let DomNode::Element(e) = child {
                e.visit_elements(f);
            }
        }
    }
}

fn collect_text(nodes: &[DomNode], out: &mut String) {
    for node in nodes {
        match node {
            DomNode::Text(t) => out.push_str(t),
            DomNode::Element(e) => collect_text(&e.children, out),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser – simple recursive descent over HTML
// ---------------------------------------------------------------------------

/// Parse an HTML string into a list of DOM nodes.
///
/// We use a hand-written parser that handles the controlled subset produced
/// by the template editor. This keeps dependencies minimal and avoids the
/// complexity of a full HTML5 parser for our constrained inputs.
pub fn parse_html(html: &str) -> Vec<DomNode> {
    let mut parser = Parser::new(html);
    parser.parse_nodes()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self) -> Vec<DomNode> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace_preserve();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<DomNode> {
        if self.starts_with("<!--") {
            self.skip_comment();
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            // Skip doctype / processing instructions
            while !self.eof() && !self.starts_with(">") {
                self.advance(1);
            }
            if !self.eof() {
                self.advance(1); // skip '>'
            }
            return None;
        }
        if self.starts_with("<") {
            Some(self.parse_element())
        } else {
            Some(self.parse_text())
        }
    }

    fn parse_text(&mut self) -> DomNode {
        let start = self.pos;
        while !self.eof() && !self.starts_with("<") {
            self.advance(1);
        }
        let text = &self.input[start..self.pos];
        DomNode::Text(decode_entities(text))
    }

    fn parse_element(&mut self) -> DomNode {
        // Consume '<'
        self.advance(1);
        let tag_name = self.parse_tag_name();
        let tag = Tag::from_str(&tag_name);
        let mut elem = ElementNode::new(tag.clone());

        // Parse attributes
        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let (key, value) = self.parse_attribute();
            elem.attributes.insert(key, value);
        }

        if self.starts_with("/>") {
            self.advance(2);
            return DomNode::Element(elem);
        }
        if self.starts_with(">") {
            self.advance(1);
        }
        if tag.is_void() {
            return DomNode::Element(elem);
        }

        // <style> holds raw CSS text – consume verbatim until the close tag.
        if tag == Tag::Style {
            let raw = self.consume_raw_until("</style");
            if !raw.is_empty() {
                elem.children.push(DomNode::Text(raw));
            }
            self.consume_close_tag();
            return DomNode::Element(elem);
        }

        // Parse children
        elem.children = self.parse_nodes();
        self.consume_close_tag();

        DomNode::Element(elem)
    }

    fn consume_close_tag(&mut self) {
        if self.starts_with("</") {
            self.advance(2);
            self.parse_tag_name(); // skip tag name
            self.skip_whitespace();
            if self.starts_with(">") {
                self.advance(1);
            }
        }
    }

    fn consume_raw_until(&mut self, marker: &str) -> String {
        let start = self.pos;
        while !self.eof() {
            let rest = &self.input[self.pos..];
            if rest.len() >= marker.len() && rest[..marker.len()].eq_ignore_ascii_case(marker) {
                break;
            }
            self.advance(1);
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_tag_name(&mut self) -> String {
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_alphanumeric() || c == '-' || c == '_' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_tag_name();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.advance(1); // skip '='
        self.skip_whitespace();
        let value = self.parse_attr_value();
        (key, value)
    }

    fn parse_attr_value(&mut self) -> String {
        if self.starts_with("\"") {
            self.advance(1);
            let start = self.pos;
            while !self.eof() && !self.starts_with("\"") {
                self.advance(1);
            }
            let val = self.input[start..self.pos].to_string();
            if !self.eof() {
                self.advance(1);
            }
            decode_entities(&val)
        } else if self.starts_with("'") {
            self.advance(1);
            let start = self.pos;
            while !self.eof() && !self.starts_with("'") {
                self.advance(1);
            }
            let val = self.input[start..self.pos].to_string();
            if !self.eof() {
                self.advance(1);
            }
            decode_entities(&val)
        } else {
            let start = self.pos;
            while !self.eof() {
                let c = self.current_char();
                if c.is_whitespace() || c == '>' || c == '/' {
                    break;
                }
                self.advance(1);
            }
            self.input[start..self.pos].to_string()
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
    }

    fn skip_whitespace_preserve(&mut self) {
        // Skip runs of pure whitespace between elements.
        let saved = self.pos;
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
        // If we reached a tag or EOF, keep the skip. Otherwise revert.
        if !self.eof() && !self.starts_with("<") {
            self.pos = saved;
        }
    }

    fn skip_comment(&mut self) {
        self.advance(4); // skip <!--
        while !self.eof() && !self.starts_with("-->") {
            self.advance(1);
        }
        if !self.eof() {
            self.advance(3);
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap()
    }

    fn advance(&mut self, n: usize) {
        // Advance by `n` characters (not bytes).
        for _ in 0..n {
            if let Some(c) = self.input[self.pos..].chars().next() {
                self.pos += c.len_utf8();
            }
        }
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{00A0}")
}

fn encode_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn encode_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

/// Serialize a list of nodes back to HTML.
pub fn serialize_nodes(nodes: &[DomNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        serialize_node(node, &mut out);
    }
    out
}

fn serialize_node(node: &DomNode, out: &mut String) {
    match node {
        DomNode::Text(t) => out.push_str(&encode_text(t)),
        DomNode::Element(e) => serialize_element(e, out),
    }
}

fn serialize_element(el: &ElementNode, out: &mut String) {
    out.push('<');
    out.push_str(el.tag.name());

    // Stable attribute order: id, class, style first, the rest sorted.
    let mut keys: Vec<&String> = el.attributes.keys().collect();
    keys.sort_by_key(|k| match k.as_str() {
        "id" => (0, k.as_str()),
        "class" => (1, k.as_str()),
        "style" => (2, k.as_str()),
        other => (3, other),
    });
    for key in keys {
        let value = &el.attributes[key];
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&encode_attr(value));
        out.push('"');
    }

    if el.tag.is_void() {
        out.push_str(" />");
        return;
    }
    out.push('>');

    if el.tag == Tag::Style {
        // Raw text – escaping would corrupt CSS selectors.
        for child in &el.children {
            if let DomNode::Text(t) = child {
                out.push_str(t);
            }
        }
    } else {
        for child in &el.children {
            serialize_node(child, out);
        }
    }

    out.push_str("</");
    out.push_str(el.tag.name());
    out.push('>');
}

/// Serialize only an element's children (its inner markup).
pub fn inner_html(el: &ElementNode) -> String {
    serialize_nodes(&el.children)
}

// ---------------------------------------------------------------------------
// Convenience helpers
// ---------------------------------------------------------------------------

/// Take the `<body>` element's children, or all nodes if no `<body>` is
/// present. Consumes the parsed nodes so callers own the result. A document
/// wrapper without a body falls back to the nodes as given rather than
/// discarding content.
pub fn into_body_children(nodes: Vec<DomNode>) -> Vec<DomNode> {
    if contains_body(&nodes) {
        unwrap_body(nodes)
    } else {
        nodes
    }
}

fn contains_body(nodes: &[DomNode]) -> bool {
    nodes.iter().any(|node| match node.as_element() {
        Some(e) if e.tag == Tag::Body => true,
        Some(e) if e.tag == Tag::Html => contains_body(&e.children),
        _ => false,
    })
}

fn unwrap_body(nodes: Vec<DomNode>) -> Vec<DomNode> {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Body {
                return e.children;
            }
            if e.tag == Tag::Html {
                let inner = unwrap_body(e.children);
                if !inner.is_empty() {
                    return inner;
                }
            }
        }
    }
    Vec::new()
}
