//! Canonical text form of a [`Document`].
//!
//! Every tree-producing path serializes through here, so two trees that
//! compare equal produce byte-identical output.

use std::fmt::Write as _;

use crate::handler::Attribute;
use crate::tree::{Doctype, Document, NodeId, NodeKind, SubsetEntry};

const HTML_VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Serialize `doc` in its own syntax and declared encoding.
#[must_use]
pub fn serialize(doc: &Document) -> Vec<u8> {
    let mut out = String::new();
    if doc.is_html() {
        for &id in doc.children(None) {
            write_html(doc, id, &mut out);
            out.push('\n');
        }
    } else {
        write_declaration(doc, &mut out);
        for &id in doc.children(None) {
            write_xml(doc, id, &mut out);
            out.push('\n');
        }
    }
    encode_output(out, doc.encoding())
}

/// Serialize a single subtree without declaration, always as UTF-8.
#[must_use]
pub fn serialize_node(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    if doc.is_html() {
        write_html(doc, id, &mut out);
    } else {
        write_xml(doc, id, &mut out);
    }
    out
}

fn write_declaration(doc: &Document, out: &mut String) {
    let _ = write!(out, "<?xml version=\"{}\"", doc.version().unwrap_or("1.0"));
    if let Some(encoding) = doc.encoding() {
        let _ = write!(out, " encoding=\"{encoding}\"");
    }
    match doc.standalone() {
        Some(true) => out.push_str(" standalone=\"yes\""),
        Some(false) => out.push_str(" standalone=\"no\""),
        None => {}
    }
    out.push_str("?>\n");
}

fn write_doctype(doctype: &Doctype, out: &mut String) {
    let _ = write!(out, "<!DOCTYPE {}", doctype.name);
    match (&doctype.public_id, &doctype.system_id) {
        (Some(public), Some(system)) => {
            let _ = write!(out, " PUBLIC \"{public}\" \"{system}\"");
        }
        (Some(public), None) => {
            let _ = write!(out, " PUBLIC \"{public}\"");
        }
        (None, Some(system)) => {
            let _ = write!(out, " SYSTEM \"{system}\"");
        }
        (None, None) => {}
    }
    if !doctype.subset.is_empty() {
        out.push_str(" [\n");
        for entry in &doctype.subset {
            match entry {
                SubsetEntry::Entity { name, value } => {
                    let quote = if value.contains('"') { '\'' } else { '"' };
                    let _ = writeln!(out, "<!ENTITY {name} {quote}{value}{quote}>");
                }
                SubsetEntry::Comment(text) => {
                    let _ = writeln!(out, "<!--{text}-->");
                }
            }
        }
        out.push(']');
    }
    out.push('>');
}

fn write_xml(doc: &Document, id: NodeId, out: &mut String) {
    let node = doc.node(id);
    match &node.kind {
        NodeKind::Element {
            name, attributes, ..
        } => {
            out.push('<');
            out.push_str(name);
            write_attributes(attributes, false, out);
            if node.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for &child in &node.children {
                write_xml(doc, child, out);
            }
            let _ = write!(out, "</{name}>");
        }
        NodeKind::Text(text) => escape_text(text, true, out),
        NodeKind::CData(data) => {
            let _ = write!(out, "<![CDATA[{data}]]>");
        }
        NodeKind::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
        }
        NodeKind::ProcessingInstruction { target, data } if data.is_empty() => {
            let _ = write!(out, "<?{target}?>");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            let _ = write!(out, "<?{target} {data}?>");
        }
        NodeKind::EntityRef(name) => {
            let _ = write!(out, "&{name};");
        }
        NodeKind::Doctype(doctype) => write_doctype(doctype, out),
    }
}

fn write_html(doc: &Document, id: NodeId, out: &mut String) {
    let node = doc.node(id);
    match &node.kind {
        NodeKind::Element {
            name, attributes, ..
        } => {
            out.push('<');
            out.push_str(name);
            write_attributes(attributes, true, out);
            out.push('>');
            if HTML_VOID.contains(&name.as_str()) {
                return;
            }
            let raw = matches!(name.as_str(), "script" | "style");
            for &child in &node.children {
                match &doc.node(child).kind {
                    NodeKind::Text(text) if raw => out.push_str(text),
                    _ => write_html(doc, child, out),
                }
            }
            let _ = write!(out, "</{name}>");
        }
        NodeKind::Text(text) => escape_text(text, false, out),
        NodeKind::ProcessingInstruction { target, data } if data.is_empty() => {
            let _ = write!(out, "<?{target}>");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            let _ = write!(out, "<?{target} {data}>");
        }
        _ => write_xml(doc, id, out),
    }
}

fn write_attributes(attributes: &[Attribute], html: bool, out: &mut String) {
    for attr in attributes {
        out.push(' ');
        out.push_str(&attr.name);
        match &attr.value {
            None if html => {}
            None => {
                let _ = write!(out, "=\"{}\"", attr.name);
            }
            Some(value) => {
                out.push_str("=\"");
                escape_attribute(value, html, out);
                out.push('"');
            }
        }
    }
}

fn escape_text(text: &str, xml: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' if xml => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, html: bool, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' if !html => out.push_str("&lt;"),
            '>' if !html => out.push_str("&gt;"),
            '\n' if !html => out.push_str("&#10;"),
            '\r' if !html => out.push_str("&#13;"),
            '\t' if !html => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
}

fn is_latin1(encoding: &str) -> bool {
    matches!(
        encoding.to_ascii_uppercase().as_str(),
        "ISO-8859-1" | "ISO-LATIN-1" | "LATIN1" | "LATIN-1"
    )
}

/// Re-encode for the declared output encoding. Characters the encoding
/// cannot represent become character references.
fn encode_output(text: String, encoding: Option<&str>) -> Vec<u8> {
    if !encoding.is_some_and(is_latin1) {
        return text.into_bytes();
    }
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(byte) => out.push(byte),
            Err(_) => out.extend_from_slice(format!("&#{};", u32::from(c)).as_bytes()),
        }
    }
    out
}
