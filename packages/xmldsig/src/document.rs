//! Structural inspection of a document's root element
//!
//! Signing never re-serializes the input; it splices the signature into the
//! original text. This module finds the byte offsets needed for that and
//! reports the root's direct children that are XML-DSig `Signature` elements.

use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::c14n::{element_scope, Namespaces};
use crate::error::SigningError;
use crate::XMLDSIG_NAMESPACE;

/// How the root element is closed in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RootClose {
    /// `<root ...>...</root>`; the offset is where `</root>` begins
    EndTag(usize),
    /// `<root .../>`; the range covers the whole tag
    SelfClosing(Range<usize>),
}

/// Layout of the root element
#[derive(Debug, Clone)]
pub(crate) struct RootLayout {
    pub name: String,
    pub namespaces: Namespaces,
    pub close: RootClose,
    /// Byte ranges of direct children that are `ds:Signature` elements
    pub signatures: Vec<Range<usize>>,
    /// Byte range of the last direct child element, if any
    pub last_child: Option<Range<usize>>,
}

impl RootLayout {
    /// The root's last child element when it is an enveloped signature
    pub fn trailing_signature(&self) -> Option<Range<usize>> {
        let last = self.last_child.as_ref()?;
        self.signatures.iter().find(|range| *range == last).cloned()
    }
}

pub(crate) fn inspect(xml: &str) -> Result<RootLayout, SigningError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut root: Option<(String, Namespaces)> = None;
    let mut close = None;
    let mut signatures = Vec::new();
    let mut last_child = None;
    // start offset and whether it is a signature, for the child being read
    let mut open_child: Option<(usize, bool)> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err(SigningError::Malformed(
                            "document has more than one root element".to_string(),
                        ));
                    }
                    root = Some(root_info(&e)?);
                } else if depth == 1 {
                    let scope = root_scope(&root)?;
                    open_child = Some((start, is_signature(&e, scope)?));
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err(SigningError::Malformed(
                            "document has more than one root element".to_string(),
                        ));
                    }
                    root = Some(root_info(&e)?);
                    close = Some(RootClose::SelfClosing(start..end));
                } else if depth == 1 {
                    let scope = root_scope(&root)?;
                    if is_signature(&e, scope)? {
                        signatures.push(start..end);
                    }
                    last_child = Some(start..end);
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    close = Some(RootClose::EndTag(start));
                } else if depth == 1 {
                    if let Some((child_start, signature)) = open_child.take() {
                        if signature {
                            signatures.push(child_start..end);
                        }
                        last_child = Some(child_start..end);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (root, close) {
        (Some((name, namespaces)), Some(close)) if depth == 0 => Ok(RootLayout {
            name,
            namespaces,
            close,
            signatures,
            last_child,
        }),
        _ => Err(SigningError::Malformed(
            "document has no complete root element".to_string(),
        )),
    }
}

fn root_info(e: &BytesStart<'_>) -> Result<(String, Namespaces), SigningError> {
    let name = std::str::from_utf8(e.name().into_inner())?.to_string();
    let namespaces = element_scope(e, &Namespaces::new())?;
    Ok((name, namespaces))
}

fn root_scope(root: &Option<(String, Namespaces)>) -> Result<&Namespaces, SigningError> {
    root.as_ref()
        .map(|(_, scope)| scope)
        .ok_or_else(|| SigningError::Malformed("element outside the root".to_string()))
}

fn is_signature(e: &BytesStart<'_>, parent: &Namespaces) -> Result<bool, SigningError> {
    let name = std::str::from_utf8(e.name().into_inner())?;
    let (prefix, local) = match name.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", name),
    };
    if local != "Signature" {
        return Ok(false);
    }
    let scope = element_scope(e, parent)?;
    Ok(scope.get(prefix).map(String::as_str) == Some(XMLDSIG_NAMESPACE))
}
