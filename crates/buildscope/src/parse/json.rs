//! JSON-lines record extraction (`--output streamed_jsonproto`).
//!
//! Each line is one JSON object serde-mapped field-for-field onto
//! [`Target`]; the wire field names live on the `Target` derive itself.

use crate::error::{Error, Result};
use crate::target::{OutputFormat, Target};

pub(super) fn parse_object(line: &str) -> Result<Option<Target>> {
    if line.is_empty() {
        return Ok(None);
    }
    let target: Target = serde_json::from_str(line)
        .map_err(|_| Error::parse(OutputFormat::StreamedJson, line))?;
    Ok(Some(target))
}
