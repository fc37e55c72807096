use std::borrow::Cow;

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Reader;

use super::{Document, NodeData, NodeId};

/// Elements that never have children in HTML; a start tag closes immediately.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text is written back without escaping.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Parses an XHTML document or fragment into a fresh [`Document`].
///
/// The reader is lenient the way browsers are for the common cases: void elements
/// need no closing tag, mismatched end tags close the nearest open element with that
/// name, and unknown entities are kept verbatim.
pub fn parse_xhtml(markup: &str) -> anyhow::Result<Document> {
    let mut reader = Reader::from_str(markup);
    {
        let cfg = reader.config_mut();
        cfg.trim_text(false);
        cfg.check_end_names = false;
        cfg.allow_unmatched_ends = true;
    }

    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    loop {
        let ev = reader.read_event().context("read markup event")?;
        let parent = *stack.last().unwrap_or(&doc.root());
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = bytes_to_string(d.version().context("decl version")?);
                let encoding = d
                    .encoding()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let id = doc.create_node(NodeData::Declaration {
                    version,
                    encoding,
                    standalone,
                });
                doc.append_child(parent, id)?;
            }
            Event::Start(s) => {
                let name = bytes_to_string(s.name().as_ref());
                let void = is_void(&name);
                let id = doc.create_element(name, collect_attrs(&s)?);
                doc.append_child(parent, id)?;
                if !void {
                    stack.push(id);
                }
            }
            Event::End(e) => {
                let name = bytes_to_string(e.name().as_ref());
                let open = stack
                    .iter()
                    .skip(1)
                    .rposition(|id| doc.element_name(*id).is_some_and(|n| n.eq_ignore_ascii_case(&name)));
                if let Some(pos) = open {
                    stack.truncate(pos + 1);
                }
            }
            Event::Empty(s) => {
                let id = doc.create_element(bytes_to_string(s.name().as_ref()), collect_attrs(&s)?);
                doc.append_child(parent, id)?;
            }
            Event::Text(t) => {
                let id = doc.create_text(decode_text(&t));
                doc.append_child(parent, id)?;
            }
            Event::CData(t) => {
                let id = doc.create_node(NodeData::CData(bytes_to_string(t.into_inner())));
                doc.append_child(parent, id)?;
            }
            Event::Comment(t) => {
                let id = doc.create_node(NodeData::Comment(bytes_to_string(t.into_inner())));
                doc.append_child(parent, id)?;
            }
            Event::PI(t) => {
                let target = bytes_to_string(t.target());
                let content = bytes_to_string(t.content());
                let id = doc.create_node(NodeData::ProcessingInstruction(format!("{target}{content}")));
                doc.append_child(parent, id)?;
            }
            Event::DocType(t) => {
                let id = doc.create_node(NodeData::Doctype(bytes_to_string(t.into_inner())));
                doc.append_child(parent, id)?;
            }
        }
    }
    Ok(doc)
}

/// Serializes the children of the document root.
pub fn write_xhtml(doc: &Document) -> anyhow::Result<String> {
    let mut out = String::new();
    for child in doc.children(doc.root()) {
        write_node(doc, *child, false, &mut out)?;
    }
    Ok(out)
}

fn write_node(doc: &Document, id: NodeId, raw_text: bool, out: &mut String) -> anyhow::Result<()> {
    let data = doc.data(id).context("write freed node")?;
    match data {
        NodeData::Document => {
            for child in doc.children(id) {
                write_node(doc, *child, false, out)?;
            }
        }
        NodeData::Declaration {
            version,
            encoding,
            standalone,
        } => {
            let d = BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
            let mut writer = quick_xml::Writer::new(Vec::new());
            writer.write_event(Event::Decl(d)).context("write decl")?;
            out.push_str(&String::from_utf8_lossy(&writer.into_inner()));
        }
        NodeData::Doctype(text) => {
            out.push_str("<!DOCTYPE");
            out.push_str(text);
            out.push('>');
        }
        NodeData::Element { name, attrs } => {
            out.push('<');
            out.push_str(name);
            // Attribute values are kept escaped exactly as read.
            for (k, v) in attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(v);
                out.push('"');
            }
            let children = doc.children(id);
            if children.is_empty() && is_void(name) {
                out.push_str("/>");
                return Ok(());
            }
            out.push('>');
            let raw = RAW_TEXT_ELEMENTS.iter().any(|r| name.eq_ignore_ascii_case(r));
            for child in children {
                write_node(doc, *child, raw, out)?;
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        NodeData::Text(text) => {
            if raw_text {
                out.push_str(text);
            } else {
                escape_text_into(out, text);
            }
        }
        NodeData::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::ProcessingInstruction(content) => {
            out.push_str("<?");
            out.push_str(content);
            out.push_str("?>");
        }
    }
    Ok(())
}

fn escape_text_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&#160;"),
            _ => out.push(ch),
        }
    }
}

fn decode_text(t: &BytesText<'_>) -> String {
    match t.unescape_with(html_entity) {
        Ok(Cow::Borrowed(s)) => s.to_string(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => {
            let raw: &[u8] = t;
            decode_lenient(&bytes_to_string(raw))
        }
    }
}

/// Entity decoding that keeps unknown or malformed references verbatim.
fn decode_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let resolved = tail.find(';').and_then(|semi| {
            let name = &tail[1..semi];
            resolve_reference(name).map(|s| (s, semi + 1))
        });
        match resolved {
            Some((s, used)) => {
                out.push_str(&s);
                rest = &tail[used..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_reference(name: &str) -> Option<String> {
    let predefined = match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => html_entity(name),
    };
    if let Some(s) = predefined {
        return Some(s.to_string());
    }
    let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        name.strip_prefix('#')?.parse::<u32>().ok()?
    };
    char::from_u32(code).map(String::from)
}

fn html_entity(name: &str) -> Option<&'static str> {
    let s = match name {
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "middot" => "\u{b7}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        _ => return None,
    };
    Some(s)
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.html_attributes() {
        let a = a.context("attr")?;
        let key = bytes_to_string(a.key.as_ref());
        let val = bytes_to_string(a.value.as_ref());
        attrs.push((key, val));
    }
    Ok(attrs)
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| name.eq_ignore_ascii_case(v))
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}
