//! Canonical data model for build-graph records.
//!
//! Every output encoding of the engine is normalized into [`Target`]; the
//! serde shape of [`Target`] doubles as the wire mapping for the JSON-lines
//! encoding, so the line format round-trips by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::label::Label;

/// The output encodings the engine's query verb can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Structured XML tree (`--output xml`), richest encoding.
    Xml,
    /// One `<kind> rule <label>` line per target (`--output label_kind`).
    LabelKind,
    /// One bare label per line (`--output label`).
    Label,
    /// One JSON object per line (`--output streamed_jsonproto`).
    StreamedJson,
}

impl OutputFormat {
    /// The value passed to the engine's `--output` flag.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::LabelKind => "label_kind",
            Self::Label => "label",
            Self::StreamedJson => "streamed_jsonproto",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// A source position in `file:line:column` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Path of the file the target is declared in.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl Location {
    /// Parse a `file:line:column` string; the file part may itself contain
    /// colons, so the numeric components are taken from the right.
    pub fn parse(raw: &str) -> Option<Self> {
        let (rest, column) = raw.rsplit_once(':')?;
        let (file, line) = rest.rsplit_once(':')?;
        Some(Self {
            file: file.to_string(),
            line: line.parse().ok()?,
            column: column.parse().ok()?,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Bool(bool),
    Int(i64),
    StringList(Vec<String>),
    /// Ordered key/value pairs; insertion order is preserved.
    StringDict(Vec<(String, String)>),
}

/// A named, typed attribute of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttrValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Whether this is an internal/implicit attribute rather than one the
    /// user wrote. The engine prefixes those with `_` or `$`.
    pub fn is_implicit(&self) -> bool {
        self.name.starts_with('_') || self.name.starts_with('$')
    }
}

/// The canonical unit: one target or rule in the build graph.
///
/// `package` and `name` are derived from `label` (see [`Label::package`]
/// and [`Label::name`]); the label always round-trips from its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Fully-qualified canonical label.
    #[serde(rename = "name")]
    pub label: Label,

    /// Rule kind (e.g. `cc_library`); empty for non-rule entries such as
    /// plain source files.
    #[serde(rename = "ruleClass", default, skip_serializing_if = "String::is_empty")]
    pub rule_class: String,

    /// Where the target is declared, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Ordered attribute list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,

    /// Labels/paths this rule consumes.
    #[serde(rename = "ruleInputs", default, skip_serializing_if = "Vec::is_empty")]
    pub rule_inputs: Vec<String>,

    /// Labels/paths this rule produces.
    #[serde(rename = "ruleOutputs", default, skip_serializing_if = "Vec::is_empty")]
    pub rule_outputs: Vec<String>,
}

impl Target {
    /// A minimal target with only a label populated.
    pub fn minimal(label: Label) -> Self {
        Self {
            label,
            rule_class: String::new(),
            location: None,
            attributes: Vec::new(),
            rule_inputs: Vec::new(),
            rule_outputs: Vec::new(),
        }
    }

    /// A target with a label and rule kind, as the line-kind encoding
    /// populates.
    pub fn with_kind(label: Label, rule_class: impl Into<String>) -> Self {
        Self {
            rule_class: rule_class.into(),
            ..Self::minimal(label)
        }
    }

    /// Look up an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// The string-list attribute with the given name, if present.
    pub fn string_list_attr(&self, name: &str) -> Option<&[String]> {
        match self.attr(name) {
            Some(AttrValue::StringList(values)) => Some(values),
            _ => None,
        }
    }

    /// Attributes the user actually wrote, with implicit ones filtered out.
    pub fn user_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.is_implicit())
    }
}

/// Relation kind of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    DependsOn,
    HasSource,
    HasHeader,
}

/// A deduplicated graph edge between two labels.
///
/// Edges point from the prerequisite (dependency, source, header) to the
/// target that consumes it, so hierarchical levels grow in build order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: Label,
    pub target: Label,
    pub kind: EdgeKind,
}

/// The outcome of a query: parsed records plus the raw text they came from.
///
/// `targets` is always derivable from `raw` by the matching parser for
/// `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// The query expression that was evaluated.
    pub query: String,
    /// The encoding `raw` is in.
    pub format: OutputFormat,
    /// Parsed canonical records.
    pub targets: Vec<Target>,
    /// The raw engine output.
    pub raw: String,
}
