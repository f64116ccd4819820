//! Inclusive XML canonicalization (C14N 1.0, without comments)
//!
//! The canonicalizer works on a streaming `quick-xml` reader and renders:
//! - no XML declaration, document type or comments
//! - empty elements as start/end pairs
//! - namespace declarations first (default, then by prefix), only where they
//!   differ from the parent's rendered scope
//! - attributes sorted by (namespace URI, local name)
//! - text and attribute values re-escaped with the C14N escaping rules
//!
//! A subset (e.g. `SignedInfo`) is canonicalized with the namespaces inherited
//! from its ancestors via [`canonicalize_with_context`]; the inherited bindings
//! are rendered on the apex element.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::SigningError;

/// URI bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// In-scope namespace bindings; the empty prefix is the default namespace
pub type Namespaces = BTreeMap<String, String>;

/// Canonicalize a complete document
///
/// # Errors
///
/// Returns [`SigningError::Malformed`] if the input is not well-formed, has no
/// root element, carries a document type declaration or uses an unbound prefix.
pub fn canonicalize(xml: &str) -> Result<String, SigningError> {
    canonicalize_with_context(xml, &Namespaces::new())
}

/// Canonicalize a fragment whose ancestors bind `inherited` namespaces
///
/// # Errors
///
/// Same conditions as [`canonicalize`].
pub fn canonicalize_with_context(
    xml: &str,
    inherited: &Namespaces,
) -> Result<String, SigningError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::with_capacity(xml.len());
    let mut scopes: Vec<Namespaces> = Vec::new();
    let mut root_seen = false;
    let mut root_closed = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                ensure_single_root(&scopes, root_closed)?;
                root_seen = true;
                let scope = match scopes.last() {
                    Some(parent) => render_start_tag(&e, parent, parent, &mut out)?,
                    None => render_start_tag(&e, inherited, &Namespaces::new(), &mut out)?,
                };
                out.push('>');
                scopes.push(scope);
            }
            Event::Empty(e) => {
                ensure_single_root(&scopes, root_closed)?;
                root_seen = true;
                match scopes.last() {
                    Some(parent) => render_start_tag(&e, parent, parent, &mut out)?,
                    None => render_start_tag(&e, inherited, &Namespaces::new(), &mut out)?,
                };
                out.push_str("></");
                out.push_str(std::str::from_utf8(e.name().into_inner())?);
                out.push('>');
                if scopes.is_empty() {
                    root_closed = true;
                }
            }
            Event::End(e) => {
                scopes.pop();
                out.push_str("</");
                out.push_str(std::str::from_utf8(e.name().into_inner())?);
                out.push('>');
                if scopes.is_empty() {
                    root_closed = true;
                }
            }
            Event::Text(t) => {
                let raw = normalize_line_endings(std::str::from_utf8(&t)?);
                let text = quick_xml::escape::unescape(&raw)?;
                if scopes.is_empty() {
                    if !text.trim().is_empty() {
                        return Err(SigningError::Malformed(
                            "character data outside the root element".to_string(),
                        ));
                    }
                    continue;
                }
                escape_text(&text, &mut out);
            }
            Event::CData(c) => {
                if scopes.is_empty() {
                    return Err(SigningError::Malformed(
                        "CDATA section outside the root element".to_string(),
                    ));
                }
                let raw = normalize_line_endings(std::str::from_utf8(&c)?);
                escape_text(&raw, &mut out);
            }
            Event::PI(pi) => {
                let body = std::str::from_utf8(&pi)?.trim_end();
                if scopes.is_empty() && root_closed {
                    out.push('\n');
                }
                out.push_str("<?");
                out.push_str(body);
                out.push_str("?>");
                if scopes.is_empty() && !root_closed {
                    out.push('\n');
                }
            }
            Event::DocType(_) => {
                return Err(SigningError::Malformed(
                    "document type declarations are not supported".to_string(),
                ));
            }
            Event::Comment(_) | Event::Decl(_) => {}
            Event::Eof => break,
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    if !scopes.is_empty() {
        return Err(SigningError::Malformed(
            "unexpected end of document inside an element".to_string(),
        ));
    }
    if !root_seen {
        return Err(SigningError::Malformed("document has no root element".to_string()));
    }

    Ok(out)
}

fn ensure_single_root(scopes: &[Namespaces], root_closed: bool) -> Result<(), SigningError> {
    if scopes.is_empty() && root_closed {
        return Err(SigningError::Malformed(
            "document has more than one root element".to_string(),
        ));
    }
    Ok(())
}

/// Collect the namespace declarations a start tag makes on top of `parent`
///
/// # Errors
///
/// Returns [`SigningError::Malformed`] for invalid attributes.
pub fn element_scope(e: &BytesStart<'_>, parent: &Namespaces) -> Result<Namespaces, SigningError> {
    let mut scope = parent.clone();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?;
        if key == "xmlns" {
            scope.insert(String::new(), attribute_value(&attr.value)?);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), attribute_value(&attr.value)?);
        }
    }
    Ok(scope)
}

/// Render `<name ns-decls attrs` (without the closing `>`), returning the
/// element's in-scope namespaces
///
/// `parent` is the namespace scope the element inherits and `rendered` the
/// scope already rendered by its output parent. They differ only at the apex
/// of a subset, where every inherited binding has to be rendered.
fn render_start_tag(
    e: &BytesStart<'_>,
    parent: &Namespaces,
    rendered: &Namespaces,
    out: &mut String,
) -> Result<Namespaces, SigningError> {
    let name = std::str::from_utf8(e.name().into_inner())?;
    let scope = element_scope(e, parent)?;

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?;
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let (uri, local) = match key.split_once(':') {
            Some(("xml", local)) => (XML_NAMESPACE.to_string(), local),
            Some((prefix, local)) => {
                let uri = scope.get(prefix).ok_or_else(|| {
                    SigningError::Malformed(format!("unbound namespace prefix '{prefix}'"))
                })?;
                (uri.clone(), local)
            }
            None => (String::new(), key),
        };
        attributes.push((uri, local.to_string(), key.to_string(), attribute_value(&attr.value)?));
    }
    attributes.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if let Some((prefix, _)) = name.split_once(':') {
        if prefix != "xml" && !scope.contains_key(prefix) {
            return Err(SigningError::Malformed(format!(
                "unbound namespace prefix '{prefix}'"
            )));
        }
    }

    out.push('<');
    out.push_str(name);

    // BTreeMap iteration puts the default namespace ("") first
    for (prefix, uri) in &scope {
        if prefix == "xml" || rendered.get(prefix) == Some(uri) {
            continue;
        }
        if prefix.is_empty() && uri.is_empty() && rendered.get("").map_or(true, String::is_empty) {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(uri, out);
        out.push('"');
    }

    for (_, _, qname, value) in &attributes {
        out.push(' ');
        out.push_str(qname);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }

    Ok(scope)
}

/// Apply XML attribute-value normalization and resolve references
fn attribute_value(raw: &[u8]) -> Result<String, SigningError> {
    let raw = normalize_line_endings(std::str::from_utf8(raw)?);
    let spaced: String = raw
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    Ok(quick_xml::escape::unescape(&spaced)?.into_owned())
}

fn normalize_line_endings(raw: &str) -> String {
    if raw.contains('\r') {
        raw.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        raw.to_string()
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
