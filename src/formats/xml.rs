use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Number, Value};

use super::FormatError;
use crate::core::{CanonicalDocument, DocumentShape, SHAPE_TAGS};

/// SII DTE namespace.
pub const SII_DTE_NS: &str = "http://www.sii.cl/SiiDte";

fn malformed(detail: impl Into<String>) -> FormatError {
    FormatError::MalformedInput {
        format: "xml",
        detail: detail.into(),
    }
}

/// Parse a DTE XML document.
///
/// The single root tag must be the `DTE` envelope; inside it exactly one
/// of `Documento`, `Exportaciones`, or `Liquidacion` must be present.
/// Attribute metadata on the matched child is discarded.
pub fn parse(input: &str) -> Result<CanonicalDocument, FormatError> {
    let decoded = decode_xml(input)?;

    let root = decoded
        .as_object()
        .filter(|map| map.len() == 1)
        .and_then(|map| map.iter().next())
        .ok_or_else(|| malformed("expected a single root element"))?;

    let (root_tag, envelope) = root;
    if root_tag != "DTE" {
        return Err(malformed(format!(
            "root tag '{root_tag}' is not the DTE envelope"
        )));
    }

    let envelope = envelope
        .as_object()
        .ok_or_else(|| malformed("DTE envelope has no child elements"))?;

    let mut found = None;
    for tag in SHAPE_TAGS {
        if let Some(payload) = envelope.get(*tag) {
            found = Some((*tag, payload));
            break;
        }
    }

    let (tag, payload) = found.ok_or_else(|| {
        malformed(format!(
            "DTE envelope must contain one of {}",
            SHAPE_TAGS.join(", ")
        ))
    })?;

    let shape = DocumentShape::from_tag(tag).unwrap_or(DocumentShape::Standard);
    let fields = payload
        .as_object()
        .cloned()
        .ok_or_else(|| malformed(format!("'{tag}' has no child elements")))?;

    Ok(CanonicalDocument::from_fields(shape, fields))
}

/// Decode arbitrary XML into an ordered value map.
///
/// Element text becomes strings, with digit-only text coerced to
/// integers (leading zeros are preserved as text). Repeated sibling tags
/// collect into a sequence. Attributes are discarded.
pub fn decode_xml(input: &str) -> Result<Value, FormatError> {
    struct Node {
        tag: String,
        children: Map<String, Value>,
        text: String,
    }

    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = vec![Node {
        tag: String::new(),
        children: Map::new(),
        text: String::new(),
    }];

    fn attach(parent: &mut Map<String, Value>, tag: String, value: Value) {
        match parent.get_mut(&tag) {
            None => {
                parent.insert(tag, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(Node {
                    tag,
                    children: Map::new(),
                    text: String::new(),
                });
            }
            Ok(Event::Empty(empty)) => {
                let tag = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    attach(&mut parent.children, tag, Value::String(String::new()));
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| malformed(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                let value = if node.children.is_empty() {
                    text_value(&node.text)
                } else {
                    Value::Object(node.children)
                };
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                attach(&mut parent.children, node.tag, value);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(e.to_string())),
        }
    }

    let root = stack.pop().ok_or_else(|| malformed("empty document"))?;
    if !stack.is_empty() {
        return Err(malformed("unclosed element"));
    }
    if root.children.is_empty() {
        return Err(malformed("no elements found"));
    }
    Ok(Value::Object(root.children))
}

/// Digit-only text coerces to an integer so XML-sourced documents
/// compare equal to JSON/YAML-sourced ones. Leading zeros stay text
/// (internal codes are zero-padded).
fn text_value(text: &str) -> Value {
    let body = text.strip_prefix('-').unwrap_or(text);
    let looks_numeric = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit())
        && !(body.len() > 1 && body.starts_with('0'));

    if looks_numeric {
        if let Ok(n) = text.parse::<i64>() {
            return Value::Number(Number::from(n));
        }
    }
    Value::String(text.to_string())
}

/// Render a canonical document as DTE XML, wrapped in the envelope tag.
///
/// The shape tag carries an `ID` attribute for the signature reference
/// when type code and folio are known.
pub fn document_to_xml(doc: &CanonicalDocument) -> Result<String, FormatError> {
    let mut writer = XmlWriter::new()?;

    writer.start_element_with_attrs("DTE", &[("xmlns", SII_DTE_NS), ("version", "1.0")])?;

    let shape_tag = doc.shape().tag();
    let reference = match (doc.type_code(), doc.folio()) {
        (Some(code), Some(folio)) => Some(format!("T{code}F{folio}")),
        _ => None,
    };
    match &reference {
        Some(id) => writer.start_element_with_attrs(shape_tag, &[("ID", id)])?,
        None => writer.start_element(shape_tag)?,
    };

    write_map(&mut writer, doc.fields())?;

    writer.end_element(shape_tag)?;
    writer.end_element("DTE")?;
    writer.into_string()
}

fn write_map(writer: &mut XmlWriter, map: &Map<String, Value>) -> Result<(), FormatError> {
    for (tag, value) in map {
        write_value(writer, tag, value)?;
    }
    Ok(())
}

fn write_value(writer: &mut XmlWriter, tag: &str, value: &Value) -> Result<(), FormatError> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) => writer.text_element(tag, s).map(|_| ()),
        Value::Number(n) => writer.text_element(tag, &n.to_string()).map(|_| ()),
        Value::Bool(b) => writer
            .text_element(tag, if *b { "1" } else { "0" })
            .map(|_| ()),
        Value::Object(map) => {
            writer.start_element(tag)?;
            write_map(writer, map)?;
            writer.end_element(tag)?;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                write_value(writer, tag, item)?;
            }
            Ok(())
        }
    }
}

/// Indenting XML writer over an in-memory buffer.
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

fn xml_io(e: std::io::Error) -> FormatError {
    FormatError::XmlWrite(e.to_string())
}

impl XmlWriter {
    pub fn new() -> Result<Self, FormatError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("ISO-8859-1"), None)))
            .map_err(xml_io)?;
        Ok(Self { writer })
    }

    pub fn into_string(self) -> Result<String, FormatError> {
        let buf = self.writer.into_inner().into_inner();
        String::from_utf8(buf).map_err(|e| FormatError::XmlWrite(format!("UTF-8 error: {e}")))
    }

    pub fn start_element(&mut self, name: &str) -> Result<&mut Self, FormatError> {
        let elem = BytesStart::new(name);
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn start_element_with_attrs(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FormatError> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn end_element(&mut self, name: &str) -> Result<&mut Self, FormatError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn text_element(&mut self, name: &str, text: &str) -> Result<&mut Self, FormatError> {
        self.start_element(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_io)?;
        self.end_element(name)
    }

    /// Inject already-rendered markup verbatim (embedding signed
    /// documents into an envelope).
    pub fn raw(&mut self, xml: &str) -> Result<&mut Self, FormatError> {
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(xml)))
            .map_err(xml_io)?;
        Ok(self)
    }
}
