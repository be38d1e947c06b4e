//! Lossless XML tree for the state document.
//!
//! The parser keeps the verbatim source of every tag, text run, comment and
//! processing instruction, so a tree that was never edited serializes back to
//! exactly the bytes it was parsed from. Editing an element's attributes only
//! drops that element's verbatim start tag; its neighbours are untouched.
//!
//! Supported: elements, attributes, text with the five predefined entities and
//! character references, comments, CDATA, processing instructions and a
//! DOCTYPE without an internal subset. Namespaces are treated as plain names.

use std::fmt;

use thiserror::Error;

/// One level of indentation used when new elements are inserted.
pub const INDENT: &str = "  ";

/// A parse failure with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct XmlError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data, still escaped as it appears in the source.
    Text(String),
    /// A comment including its `<!--` and `-->` delimiters.
    Comment(String),
    /// CDATA sections, processing instructions and DOCTYPE, kept verbatim.
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
    raw_start: Option<String>,
    raw_end: Option<String>,
    self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            raw_start: None,
            raw_end: None,
            self_closing: true,
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.set_text(text);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute. Returns `false` (and leaves the tag untouched) when
    /// the attribute already has this value.
    pub fn set_attr(&mut self, name: &str, value: &str) -> bool {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(a) if a.value == value => return false,
            Some(a) => a.value = value.to_owned(),
            None => self.attributes.push(Attribute {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
        }
        self.raw_start = None;
        true
    }

    pub fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.name != name);
        if self.attributes.len() == before {
            return false;
        }
        self.raw_start = None;
        true
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// Concatenated, unescaped character data of the direct children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(raw) => match unescape(raw) {
                    Ok(t) => out.push_str(&t),
                    Err(_) => out.push_str(raw),
                },
                Node::Verbatim(raw) if raw.starts_with("<![CDATA[") => {
                    out.push_str(&raw[9..raw.len() - 3]);
                }
                _ => {}
            }
        }
        out
    }

    /// Replace the content with a single text node. No-op when the text is
    /// already equal.
    pub fn set_text(&mut self, text: &str) -> bool {
        if self.elements().next().is_none() && self.text() == text {
            return false;
        }
        self.children.clear();
        if text.is_empty() {
            return true;
        }
        self.open_up();
        self.children.push(Node::Text(escape_text(text)));
        true
    }

    /// Append `child` on its own indented line. `depth` is the nesting depth
    /// of `self` (the document root is 0).
    pub fn push_element(&mut self, child: Element, depth: usize) -> &mut Element {
        self.open_up();
        if matches!(self.children.last(), Some(Node::Text(t)) if t.trim().is_empty()) {
            self.children.pop();
        }
        self.children
            .push(Node::Text(format!("\n{}", INDENT.repeat(depth + 1))));
        self.children.push(Node::Element(child));
        let idx = self.children.len() - 1;
        self.children
            .push(Node::Text(format!("\n{}", INDENT.repeat(depth))));
        self.element_at(idx)
    }

    /// Insert `child` directly before the first child element named
    /// `before`, or append it when there is none.
    pub fn insert_element_before(
        &mut self,
        child: Element,
        before: &str,
        depth: usize,
    ) -> &mut Element {
        let Some(idx) = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == before))
        else {
            return self.push_element(child, depth);
        };
        self.children
            .insert(idx, Node::Text(format!("\n{}", INDENT.repeat(depth + 1))));
        self.children.insert(idx, Node::Element(child));
        self.element_at(idx)
    }

    /// Get the named child, appending an empty one when it is missing.
    pub fn ensure_child(&mut self, name: &str, depth: usize) -> &mut Element {
        match self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))
        {
            Some(idx) => self.element_at(idx),
            None => self.push_element(Element::new(name), depth),
        }
    }

    /// Remove every child node and return them, leaving the element open.
    pub fn take_nodes(&mut self) -> Vec<Node> {
        self.open_up();
        std::mem::take(&mut self.children)
    }

    /// Append a non-element node (comment, verbatim) on its own line.
    pub fn push_node(&mut self, node: Node, depth: usize) {
        match node {
            Node::Element(e) => {
                self.push_element(e, depth);
            }
            Node::Text(t) if t.trim().is_empty() => {}
            other => {
                self.open_up();
                if matches!(self.children.last(), Some(Node::Text(t)) if t.trim().is_empty()) {
                    self.children.pop();
                }
                self.children
                    .push(Node::Text(format!("\n{}", INDENT.repeat(depth + 1))));
                self.children.push(other);
                self.children
                    .push(Node::Text(format!("\n{}", INDENT.repeat(depth))));
            }
        }
    }

    fn element_at(&mut self, idx: usize) -> &mut Element {
        match &mut self.children[idx] {
            Node::Element(e) => e,
            _ => unreachable!("index {idx} was just located as an element"),
        }
    }

    fn open_up(&mut self) {
        if self.self_closing {
            self.self_closing = false;
            self.raw_start = None;
            self.raw_end = None;
        }
    }

    fn write_to(&self, out: &mut String) {
        match &self.raw_start {
            Some(raw) => out.push_str(raw),
            None => {
                out.push('<');
                out.push_str(&self.name);
                for a in &self.attributes {
                    out.push(' ');
                    out.push_str(&a.name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&a.value));
                    out.push('"');
                }
                if self.self_closing && self.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
            }
        }
        if self.self_closing {
            return;
        }
        for node in &self.children {
            node.write_to(out);
        }
        match &self.raw_end {
            Some(raw) => out.push_str(raw),
            None => {
                out.push_str("</");
                out.push_str(&self.name);
                out.push('>');
            }
        }
    }
}

impl Node {
    fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_to(out),
            Node::Text(raw) | Node::Comment(raw) | Node::Verbatim(raw) => out.push_str(raw),
        }
    }
}

/// A parsed document: prolog nodes, the root element and trailing nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
}

impl XmlDocument {
    /// A new document with an XML declaration and a trailing newline.
    pub fn new(root: Element) -> Self {
        Self {
            prolog: vec![
                Node::Verbatim(r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_owned()),
                Node::Text("\n".to_owned()),
            ],
            root,
            epilog: vec![Node::Text("\n".to_owned())],
        }
    }

    pub fn parse(src: &str) -> Result<Self, XmlError> {
        Parser::new(src).document()
    }

    /// Parse raw bytes, rejecting anything that is not UTF-8.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, XmlError> {
        match std::str::from_utf8(bytes) {
            Ok(src) => Self::parse(src),
            Err(e) => {
                let valid = &bytes[..e.valid_up_to()];
                let text = String::from_utf8_lossy(valid);
                let (line, column) = line_col(&text, text.len());
                Err(XmlError {
                    line,
                    column,
                    message: "invalid UTF-8".into(),
                })
            }
        }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }
}

impl fmt::Display for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for n in &self.prolog {
            n.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for n in &self.epilog {
            n.write_to(&mut out);
        }
        f.write_str(&out)
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve entity and character references.
pub fn unescape(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| format!("unterminated entity reference near '{}'", truncate(after)))?;
        let entity = &after[..semi];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => char_ref(entity).ok_or_else(|| format!("unknown entity '&{entity};'"))?,
        };
        out.push(ch);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn char_ref(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code).filter(|c| is_xml_char(*c))
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(12) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

fn line_col(src: &str, pos: usize) -> (usize, usize) {
    let before = &src[..pos];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Element nesting beyond this is rejected rather than parsed recursively.
pub const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> XmlError {
        let (line, column) = line_col(self.src, pos);
        XmlError {
            line,
            column,
            message: message.into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> XmlError {
        self.error_at(self.pos, message)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) -> usize {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.pos - start
    }

    /// Consume everything up to and including `terminator`.
    fn take_through(&mut self, terminator: &str, what: &str) -> Result<&'a str, XmlError> {
        let start = self.pos;
        match self.rest().find(terminator) {
            Some(off) => {
                self.pos += off + terminator.len();
                Ok(&self.src[start..self.pos])
            }
            None => Err(self.error_at(start, format!("unterminated {what}"))),
        }
    }

    fn name(&mut self) -> Result<&'a str, XmlError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if is_name_start(c) => self.pos += c.len_utf8(),
            _ => return Err(self.error("expected a name")),
        }
        while let Some(c) = self.peek() {
            if !is_name_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        Ok(&self.src[start..self.pos])
    }

    fn document(mut self) -> Result<XmlDocument, XmlError> {
        if let Some((i, c)) = self.src.char_indices().find(|(_, c)| !is_xml_char(*c)) {
            return Err(self.error_at(i, format!("illegal character U+{:04X}", c as u32)));
        }

        let mut prolog = Vec::new();
        loop {
            if self.at_end() {
                return Err(self.error("document has no root element"));
            }
            match self.misc()? {
                Some(node) => prolog.push(node),
                None => break,
            }
        }

        let root = self.element(1)?;

        let mut epilog = Vec::new();
        while !self.at_end() {
            match self.misc()? {
                Some(node) => epilog.push(node),
                None => return Err(self.error("content after the root element")),
            }
        }

        Ok(XmlDocument {
            prolog,
            root,
            epilog,
        })
    }

    /// Parse one node allowed outside the root element. Returns `None` when
    /// the next thing is an element start tag.
    fn misc(&mut self) -> Result<Option<Node>, XmlError> {
        if self.starts_with("<?") {
            return Ok(Some(Node::Verbatim(
                self.take_through("?>", "processing instruction")?.to_owned(),
            )));
        }
        if self.starts_with("<!--") {
            return Ok(Some(Node::Comment(self.comment()?.to_owned())));
        }
        if self.starts_with("<!DOCTYPE") {
            if self.rest().find('[').is_some_and(|b| self.rest().find('>').is_some_and(|g| b < g)) {
                return Err(self.error("DOCTYPE internal subsets are not supported"));
            }
            return Ok(Some(Node::Verbatim(
                self.take_through(">", "DOCTYPE")?.to_owned(),
            )));
        }
        if self.starts_with("<") {
            return Ok(None);
        }
        let start = self.pos;
        let end = self.rest().find('<').map_or(self.src.len(), |o| self.pos + o);
        let text = &self.src[start..end];
        if !text.trim().is_empty() {
            return Err(self.error_at(
                start + (text.len() - text.trim_start().len()),
                "text outside the root element",
            ));
        }
        self.pos = end;
        Ok(Some(Node::Text(text.to_owned())))
    }

    fn comment(&mut self) -> Result<&'a str, XmlError> {
        let start = self.pos;
        let body_start = start + 4;
        let Some(len) = self.src[body_start..].find("-->") else {
            return Err(self.error_at(start, "unterminated comment"));
        };
        if self.src[body_start..body_start + len].contains("--") {
            return Err(self.error_at(start, "'--' is not allowed inside a comment"));
        }
        self.pos = body_start + len + 3;
        Ok(&self.src[start..self.pos])
    }

    fn element(&mut self, depth: usize) -> Result<Element, XmlError> {
        let start = self.pos;
        if depth > MAX_DEPTH {
            return Err(self.error_at(start, format!("elements nested deeper than {MAX_DEPTH} levels")));
        }
        self.pos += 1; // '<'
        let name = self.name()?.to_owned();
        let mut attributes: Vec<Attribute> = Vec::new();
        let self_closing;
        loop {
            let ws = self.skip_ws();
            if self.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if self.starts_with(">") {
                self.pos += 1;
                self_closing = false;
                break;
            }
            if self.at_end() {
                return Err(self.error_at(start, format!("unterminated start tag <{name}>")));
            }
            if ws == 0 {
                return Err(self.error("expected whitespace before attribute"));
            }
            let attr_pos = self.pos;
            let attr_name = self.name()?.to_owned();
            self.skip_ws();
            if !self.starts_with("=") {
                return Err(self.error(format!("expected '=' after attribute '{attr_name}'")));
            }
            self.pos += 1;
            self.skip_ws();
            let quote = match self.peek() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.error("expected a quoted attribute value")),
            };
            self.pos += 1;
            let value_start = self.pos;
            let Some(len) = self.rest().find(quote) else {
                return Err(self.error_at(value_start, "unterminated attribute value"));
            };
            let raw = &self.src[value_start..value_start + len];
            if raw.contains('<') {
                return Err(self.error_at(value_start, "'<' is not allowed in attribute values"));
            }
            let value = unescape(raw).map_err(|m| self.error_at(value_start, m))?;
            self.pos = value_start + len + 1;
            if attributes.iter().any(|a| a.name == attr_name) {
                return Err(self.error_at(attr_pos, format!("duplicate attribute '{attr_name}'")));
            }
            attributes.push(Attribute {
                name: attr_name,
                value,
            });
        }
        let raw_start = self.src[start..self.pos].to_owned();

        let mut element = Element {
            name,
            attributes,
            children: Vec::new(),
            raw_start: Some(raw_start),
            raw_end: None,
            self_closing,
        };
        if self_closing {
            return Ok(element);
        }

        loop {
            if self.at_end() {
                return Err(self.error_at(start, format!("element <{}> is never closed", element.name)));
            }
            if self.starts_with("</") {
                let end_start = self.pos;
                self.pos += 2;
                let end_name = self.name()?;
                self.skip_ws();
                if !self.starts_with(">") {
                    return Err(self.error("expected '>' to finish end tag"));
                }
                self.pos += 1;
                if end_name != element.name {
                    return Err(self.error_at(
                        end_start,
                        format!("mismatched end tag: expected </{}>, found </{end_name}>", element.name),
                    ));
                }
                element.raw_end = Some(self.src[end_start..self.pos].to_owned());
                return Ok(element);
            }
            let node = if self.starts_with("<!--") {
                Node::Comment(self.comment()?.to_owned())
            } else if self.starts_with("<![CDATA[") {
                Node::Verbatim(self.take_through("]]>", "CDATA section")?.to_owned())
            } else if self.starts_with("<?") {
                Node::Verbatim(self.take_through("?>", "processing instruction")?.to_owned())
            } else if self.starts_with("<") {
                Node::Element(self.element(depth + 1)?)
            } else {
                let text_start = self.pos;
                let end = self.rest().find('<').map_or(self.src.len(), |o| self.pos + o);
                let raw = &self.src[text_start..end];
                unescape(raw).map_err(|m| self.error_at(text_start, m))?;
                self.pos = end;
                Node::Text(raw.to_owned())
            };
            element.children.push(node);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "<?xml version=\"1.0\"?>\n<!-- top -->\n<root a='1'  b=\"x &amp; y\">\n    <item id=\"1\">one</item>\n\t<item id=\"2\"/>\n    <![CDATA[<raw>]]>\n</root>\n";

    #[test]
    fn untouched_document_roundtrips_exactly() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.to_string(), SAMPLE);
    }

    #[test]
    fn attributes_are_unescaped() {
        let doc = XmlDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.root().attr("b"), Some("x & y"));
        assert_eq!(doc.root().attr("a"), Some("1"));
    }

    #[test]
    fn setting_same_attr_value_keeps_bytes() {
        let mut doc = XmlDocument::parse(SAMPLE).unwrap();
        assert!(!doc.root_mut().set_attr("a", "1"));
        assert_eq!(doc.to_string(), SAMPLE);
    }

    #[test]
    fn editing_one_attr_rewrites_only_that_tag() {
        let mut doc = XmlDocument::parse(SAMPLE).unwrap();
        doc.root_mut().elements_mut().next().unwrap().set_attr("id", "9");
        let out = doc.to_string();
        assert!(out.contains("<item id=\"9\">one</item>"));
        assert!(out.contains("<root a='1'  b=\"x &amp; y\">"));
        assert!(out.contains("\t<item id=\"2\"/>"));
    }

    #[test]
    fn set_text_on_self_closing_opens_element() {
        let mut e = Element::new("epic");
        e.set_text("a < b");
        let mut out = String::new();
        e.write_to(&mut out);
        assert_eq!(out, "<epic>a &lt; b</epic>");
        assert_eq!(e.text(), "a < b");
    }

    #[test]
    fn push_element_indents_new_child() {
        let mut doc = XmlDocument::parse("<a>\n  <b/>\n</a>").unwrap();
        doc.root_mut().push_element(Element::new("c").with_attr("k", "v"), 0);
        assert_eq!(doc.to_string(), "<a>\n  <b/>\n  <c k=\"v\"/>\n</a>");
    }

    #[test]
    fn push_into_empty_element() {
        let mut doc = XmlDocument::parse("<a>\n  <b/>\n</a>").unwrap();
        doc.root_mut()
            .child_mut("b")
            .unwrap()
            .push_element(Element::new("c"), 1);
        assert_eq!(doc.to_string(), "<a>\n  <b>\n    <c/>\n  </b>\n</a>");
    }

    #[test]
    fn insert_before_named_sibling() {
        let mut doc = XmlDocument::parse("<s>\n  <tasks/>\n</s>").unwrap();
        doc.root_mut()
            .insert_element_before(Element::new("review"), "tasks", 0);
        assert_eq!(doc.to_string(), "<s>\n  <review/>\n  <tasks/>\n</s>");
    }

    #[test]
    fn cdata_counts_as_text() {
        let doc = XmlDocument::parse("<a>x<![CDATA[<y>]]></a>").unwrap();
        assert_eq!(doc.root().text(), "x<y>");
    }

    #[test]
    fn char_refs_resolve() {
        assert_eq!(unescape("&#65;&#x42;&lt;").unwrap(), "AB<");
        assert!(unescape("&bogus;").is_err());
        assert!(unescape("&#0;").is_err());
    }

    #[rstest]
    #[case("", "no root element")]
    #[case("<a>", "never closed")]
    #[case("<a></b>", "mismatched end tag")]
    #[case("<a x=1/>", "quoted attribute value")]
    #[case("<a x='1' x='2'/>", "duplicate attribute")]
    #[case("<a/><b/>", "content after the root element")]
    #[case("junk<a/>", "text outside the root element")]
    #[case("<a>&nope;</a>", "unknown entity")]
    #[case("<a>\u{1}</a>", "illegal character")]
    #[case("<a><!-- x -- y --></a>", "not allowed inside a comment")]
    fn malformed_inputs_are_rejected(#[case] src: &str, #[case] needle: &str) {
        let err = XmlDocument::parse(src).unwrap_err();
        assert!(err.message.contains(needle), "{src:?} -> {err}");
    }

    #[rstest]
    #[case(MAX_DEPTH + 1)]
    #[case(200_000)]
    fn deep_nesting_is_rejected(#[case] depth: usize) {
        let src = "<a>".repeat(depth);
        let err = XmlDocument::parse(&src).unwrap_err();
        assert!(err.message.contains("nested deeper"), "{err}");
    }

    #[test]
    fn nesting_at_the_limit_parses() {
        let src = format!("{}{}", "<a>".repeat(MAX_DEPTH), "</a>".repeat(MAX_DEPTH));
        assert!(XmlDocument::parse(&src).is_ok());
    }

    #[test]
    fn error_positions_are_one_based() {
        let err = XmlDocument::parse("<a>\n  <b></c>\n</a>").unwrap_err();
        assert_eq!((err.line, err.column), (2, 6));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = XmlDocument::parse_bytes(b"<a>\xff\xfe</a>").unwrap_err();
        assert!(err.message.contains("UTF-8"));
        assert_eq!(err.column, 4);
    }
}
