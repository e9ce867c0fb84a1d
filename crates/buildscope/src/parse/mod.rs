//! Parsers for the engine's output encodings.
//!
//! Each format has one incremental record extractor that drains complete
//! records from a carry buffer. The buffered entry point ([`parse`]) feeds
//! the entire input through the same extractor as the streaming path, so
//! both paths produce identical records for identical input by
//! construction.
//!
//! The carry buffer is bounded by the largest single record in the input:
//! line formats hold at most one partial line, the XML extractor holds at
//! most one partial record element.

mod json;
mod lines;
mod xml;

use crate::error::Result;
use crate::target::{OutputFormat, Target};

/// Incremental parser for one stream of engine output.
///
/// Feed chunks with [`parse_chunk`](Self::parse_chunk) as they arrive, then
/// call [`finish`](Self::finish) to flush any trailing record and detect
/// truncated input.
#[derive(Debug)]
pub struct StreamParser {
    format: OutputFormat,
    carry: String,
}

impl StreamParser {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            carry: String::new(),
        }
    }

    /// The format this parser extracts.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Consume a chunk and return every record completed by it.
    ///
    /// Chunk boundaries are arbitrary; a record split across chunks is
    /// held in the carry buffer until its remainder arrives.
    pub fn parse_chunk(&mut self, chunk: &str) -> Result<Vec<Target>> {
        self.carry.push_str(chunk);
        match self.format {
            OutputFormat::Xml => xml::drain(&mut self.carry),
            OutputFormat::LabelKind => lines::drain(&mut self.carry, lines::parse_label_kind),
            OutputFormat::Label => lines::drain(&mut self.carry, lines::parse_label),
            OutputFormat::StreamedJson => lines::drain(&mut self.carry, json::parse_object),
        }
    }

    /// Flush the trailing record, if any, and validate that the input did
    /// not end mid-record.
    pub fn finish(self) -> Result<Vec<Target>> {
        match self.format {
            OutputFormat::Xml => {
                xml::check_complete(&self.carry)?;
                Ok(Vec::new())
            }
            OutputFormat::LabelKind => lines::flush(&self.carry, lines::parse_label_kind),
            OutputFormat::Label => lines::flush(&self.carry, lines::parse_label),
            OutputFormat::StreamedJson => lines::flush(&self.carry, json::parse_object),
        }
    }
}

/// Parse a complete buffered output in the given format.
pub fn parse(raw: &str, format: OutputFormat) -> Result<Vec<Target>> {
    let mut parser = StreamParser::new(format);
    let mut targets = parser.parse_chunk(raw)?;
    targets.extend(parser.finish()?);
    Ok(targets)
}
