//! Structured-tree record extraction (`--output xml`).
//!
//! The carry buffer is scanned for complete record elements (`<rule>`,
//! `<source-file>`, `<generated-file>`); everything between records, such
//! as the XML prolog and the `<query>` wrapper, is discarded. Each complete
//! record span is then parsed with tagged `quick-xml` events, never by
//! probing raw text, so attribute quoting and escaping are handled
//! uniformly.
//!
//! Records do not nest, so the first matching close tag always terminates
//! the record that opened it.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::label::Label;
use crate::target::{AttrValue, Attribute, Location, OutputFormat, Target};

/// Element names that open one canonical record.
const RECORD_NAMES: &[&str] = &["rule", "source-file", "generated-file"];

/// Drain every complete record element from `carry`, leaving a trailing
/// partial record in place.
pub(super) fn drain(carry: &mut String) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    loop {
        let Some(start) = find_record_start(carry) else {
            trim_to_last_open(carry);
            return Ok(targets);
        };
        let Some(len) = find_record_end(&carry[start..]) else {
            // Incomplete record; keep it as the carry and wait for more.
            carry.drain(..start);
            return Ok(targets);
        };
        let record = carry[start..start + len].to_string();
        carry.drain(..start + len);
        targets.push(parse_record(&record)?);
    }
}

/// Validate that no record was left unterminated once the input ends.
pub(super) fn check_complete(carry: &str) -> Result<()> {
    if find_record_start(carry).is_some() {
        return Err(Error::parse(OutputFormat::Xml, carry));
    }
    Ok(())
}

/// Byte offset of the next record-opening `<`, if one is fully visible.
fn find_record_start(carry: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(offset) = carry[search_from..].find('<') {
        let pos = search_from + offset;
        let rest = &carry[pos + 1..];
        for name in RECORD_NAMES {
            if let Some(after) = rest.strip_prefix(name) {
                match after.chars().next() {
                    Some(c) if c.is_whitespace() || c == '/' || c == '>' => return Some(pos),
                    _ => {}
                }
            }
        }
        search_from = pos + 1;
    }
    None
}

/// Length of the record element starting at the beginning of `record`, or
/// `None` if it is not yet complete.
fn find_record_end(record: &str) -> Option<usize> {
    let tag_end = find_tag_end(record)?;
    if record[..tag_end].ends_with('/') {
        return Some(tag_end + 1);
    }
    let name = element_name(record);
    let close = format!("</{name}>");
    record[tag_end..]
        .find(&close)
        .map(|idx| tag_end + idx + close.len())
}

/// Offset of the `>` that closes the start tag, skipping quoted attribute
/// values so a `>` inside an attribute does not end the tag early.
fn find_tag_end(tag: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in tag.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return Some(idx),
                _ => {}
            },
        }
    }
    None
}

fn element_name(record: &str) -> &str {
    let body = &record[1..];
    let end = body
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(body.len());
    &body[..end]
}

/// Discard everything before the last `<`; whatever follows might still be
/// the beginning of a record split across chunks.
fn trim_to_last_open(carry: &mut String) {
    match carry.rfind('<') {
        Some(pos) => {
            carry.drain(..pos);
        }
        None => carry.clear(),
    }
}

/// Parse one complete record element into a [`Target`].
fn parse_record(record: &str) -> Result<Target> {
    let mut reader = Reader::from_str(record);
    reader.config_mut().trim_text(true);

    let mut target: Option<Target> = None;
    let mut list_name: Option<String> = None;
    let mut list_values: Vec<String> = Vec::new();
    let mut dict_name: Option<String> = None;
    let mut dict_pairs: Vec<(String, String)> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|_| Error::parse(OutputFormat::Xml, record))?;
        match event {
            Event::Eof => break,
            // A self-closing `<list/>` or `<dict/>` yields its (empty)
            // attribute immediately; no End event will arrive for it.
            Event::Empty(e) if e.local_name().as_ref() == b"list" => {
                if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                    t.attributes
                        .push(Attribute::new(name, AttrValue::StringList(Vec::new())));
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"dict" => {
                if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                    t.attributes
                        .push(Attribute::new(name, AttrValue::StringDict(Vec::new())));
                }
            }
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"rule" => {
                    let label = required_label(&e, record)?;
                    let mut t =
                        Target::with_kind(label, attr_of(&e, "class").unwrap_or_default());
                    t.location = attr_of(&e, "location").and_then(|l| Location::parse(&l));
                    target = Some(t);
                }
                b"source-file" | b"generated-file" => {
                    let label = required_label(&e, record)?;
                    let mut t = Target::minimal(label);
                    t.location = attr_of(&e, "location").and_then(|l| Location::parse(&l));
                    target = Some(t);
                }
                b"list" => {
                    list_name = attr_of(&e, "name");
                    list_values.clear();
                }
                b"dict" => {
                    dict_name = attr_of(&e, "name");
                    dict_pairs.clear();
                }
                b"pair" => {
                    if dict_name.is_some() {
                        let key = attr_of(&e, "key").unwrap_or_default();
                        let value = attr_of(&e, "value").unwrap_or_default();
                        dict_pairs.push((key, value));
                    }
                }
                b"label" | b"string" => {
                    let value = attr_of(&e, "value").unwrap_or_default();
                    if list_name.is_some() {
                        list_values.push(value);
                    } else if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name"))
                    {
                        t.attributes.push(Attribute::new(name, AttrValue::String(value)));
                    }
                }
                b"boolean" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                        let value = attr_of(&e, "value").unwrap_or_default() == "true";
                        t.attributes.push(Attribute::new(name, AttrValue::Bool(value)));
                    }
                }
                b"int" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                        let value = attr_of(&e, "value")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or_default();
                        t.attributes.push(Attribute::new(name, AttrValue::Int(value)));
                    }
                }
                b"rule-input" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                        t.rule_inputs.push(name);
                    }
                }
                b"rule-output" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), attr_of(&e, "name")) {
                        t.rule_outputs.push(name);
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"list" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), list_name.take()) {
                        t.attributes.push(Attribute::new(
                            name,
                            AttrValue::StringList(std::mem::take(&mut list_values)),
                        ));
                    }
                }
                b"dict" => {
                    if let (Some(t), Some(name)) = (target.as_mut(), dict_name.take()) {
                        t.attributes.push(Attribute::new(
                            name,
                            AttrValue::StringDict(std::mem::take(&mut dict_pairs)),
                        ));
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    // Self-closing lists never see an End event; close them here.
    let mut target = target.ok_or_else(|| Error::parse(OutputFormat::Xml, record))?;
    if let Some(name) = list_name.take() {
        target
            .attributes
            .push(Attribute::new(name, AttrValue::StringList(list_values)));
    }
    Ok(target)
}

fn required_label(e: &BytesStart<'_>, record: &str) -> Result<Label> {
    let raw = attr_of(e, "name").ok_or_else(|| Error::parse(OutputFormat::Xml, record))?;
    Label::parse(&raw).map_err(|_| Error::parse(OutputFormat::Xml, record))
}

fn attr_of(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}
