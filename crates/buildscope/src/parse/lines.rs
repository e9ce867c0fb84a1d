//! Line-oriented record extraction shared by the `label`, `label_kind` and
//! JSON-lines formats.

use crate::error::{Error, Result};
use crate::label::Label;
use crate::target::{OutputFormat, Target};

/// Drain every complete line from `carry`, leaving a trailing partial line
/// in place.
pub(super) fn drain<F>(carry: &mut String, parse_line: F) -> Result<Vec<Target>>
where
    F: Fn(&str) -> Result<Option<Target>>,
{
    let mut targets = Vec::new();
    while let Some(pos) = carry.find('\n') {
        let line: String = carry.drain(..=pos).collect();
        if let Some(target) = parse_line(line.trim())? {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// Parse the final line of input when it arrived without a newline.
pub(super) fn flush<F>(carry: &str, parse_line: F) -> Result<Vec<Target>>
where
    F: Fn(&str) -> Result<Option<Target>>,
{
    Ok(parse_line(carry.trim())?.into_iter().collect())
}

/// `<kind> rule <label>` per line.
pub(super) fn parse_label_kind(line: &str) -> Result<Option<Target>> {
    if line.is_empty() {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some("rule"), Some(label), None) => {
            let label =
                Label::parse(label).map_err(|_| Error::parse(OutputFormat::LabelKind, line))?;
            Ok(Some(Target::with_kind(label, kind)))
        }
        _ => Err(Error::parse(OutputFormat::LabelKind, line)),
    }
}

/// One bare label per non-empty line.
pub(super) fn parse_label(line: &str) -> Result<Option<Target>> {
    if line.is_empty() {
        return Ok(None);
    }
    let label = Label::parse(line).map_err(|_| Error::parse(OutputFormat::Label, line))?;
    Ok(Some(Target::minimal(label)))
}
