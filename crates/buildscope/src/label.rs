//! Canonical target labels.
//!
//! A label is the fully-qualified identifier of a target: a package path and
//! a local name joined by a single `:` separator, prefixed with the `//`
//! root marker (`//services/api:server`). Everything that leaves this module
//! is in that canonical form.
//!
//! Canonicalization is a single pass over the input rather than chained
//! string replacements; the root marker is only ever stripped as a prefix,
//! so paths that legitimately repeat the marker text elsewhere are left
//! intact.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// The workspace-root marker that prefixes every canonical label.
pub const ROOT_MARKER: &str = "//";

/// The separator between a package path and a local target name.
pub const NAME_SEPARATOR: char = ':';

/// A fully-qualified, canonical target label.
///
/// # Examples
///
/// ```
/// use buildscope::Label;
///
/// let label = Label::resolve("services/api", "server").unwrap();
/// assert_eq!(label.as_str(), "//services/api:server");
/// assert_eq!(label.package(), "services/api");
/// assert_eq!(label.name(), "server");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(String);

impl Label {
    /// Canonicalize a `(package, name)` pair into a fully-qualified label.
    ///
    /// If `package` already contains the name separator it is treated as a
    /// complete label and `name` is ignored entirely; otherwise one leading
    /// root marker is stripped from `package` and the label is assembled as
    /// `//{package}:{name}`. An empty package resolves to a root-level
    /// target (`//:name`).
    ///
    /// Resolution is idempotent: feeding a resolved label back in (with any
    /// `name`) returns the same label.
    pub fn resolve(package: &str, name: &str) -> Result<Self> {
        let (pkg, embedded_name) = split_parts(package)?;
        match embedded_name {
            Some(embedded) => {
                if embedded.is_empty() {
                    return Err(Error::InvalidLabel {
                        input: package.to_string(),
                        reason: "empty target name after ':'".to_string(),
                    });
                }
                Ok(Self(format!("{ROOT_MARKER}{pkg}{NAME_SEPARATOR}{embedded}")))
            }
            None => {
                if name.is_empty() {
                    return Err(Error::InvalidLabel {
                        input: package.to_string(),
                        reason: "missing target name".to_string(),
                    });
                }
                if name.contains(NAME_SEPARATOR) {
                    return Err(Error::InvalidLabel {
                        input: name.to_string(),
                        reason: "target name contains ':'".to_string(),
                    });
                }
                Ok(Self(format!("{ROOT_MARKER}{pkg}{NAME_SEPARATOR}{name}")))
            }
        }
    }

    /// Parse a raw label string as emitted by the engine.
    ///
    /// Accepts both the full `//pkg:name` form and the `//pkg` shorthand,
    /// where the target name defaults to the last package path segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let (pkg, name) = split_parts(raw)?;
        match name {
            Some(_) => Self::resolve(raw, ""),
            None => {
                if pkg.is_empty() {
                    return Err(Error::InvalidLabel {
                        input: raw.to_string(),
                        reason: "empty label".to_string(),
                    });
                }
                let default_name = pkg.rsplit('/').next().unwrap_or(pkg);
                Self::resolve(pkg, default_name)
            }
        }
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package path, without the root marker.
    pub fn package(&self) -> &str {
        let body = &self.0[ROOT_MARKER.len()..];
        match body.find(NAME_SEPARATOR) {
            Some(idx) => &body[..idx],
            None => body,
        }
    }

    /// The local target name.
    pub fn name(&self) -> &str {
        let body = &self.0[ROOT_MARKER.len()..];
        match body.find(NAME_SEPARATOR) {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    }

    /// Case-insensitive substring match against the canonical form.
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        self.0.to_lowercase().contains(&needle.to_lowercase())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Label::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Split label-ish input into `(package, Some(name))` or `(package, None)`.
///
/// Strips at most one leading root marker, then walks the remainder once to
/// locate the name separator. More than one separator is rejected.
fn split_parts(input: &str) -> Result<(&str, Option<&str>)> {
    let body = input.strip_prefix(ROOT_MARKER).unwrap_or(input);
    let mut separators = body
        .char_indices()
        .filter(|(_, c)| *c == NAME_SEPARATOR)
        .map(|(i, _)| i);
    match (separators.next(), separators.next()) {
        (None, None) => Ok((body, None)),
        (Some(idx), None) => Ok((&body[..idx], Some(&body[idx + 1..]))),
        _ => Err(Error::InvalidLabel {
            input: input.to_string(),
            reason: "more than one ':' separator".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_package_and_name() {
        let label = Label::resolve("services/api", "server").unwrap();
        assert_eq!(label.as_str(), "//services/api:server");
    }

    #[test]
    fn strips_existing_root_marker_once() {
        let label = Label::resolve("//services/api", "server").unwrap();
        assert_eq!(label.as_str(), "//services/api:server");
    }

    #[test]
    fn complete_label_ignores_name() {
        let label = Label::resolve("//services/api:server", "unused").unwrap();
        assert_eq!(label.as_str(), "//services/api:server");

        let label = Label::resolve("services/api:server", "unused").unwrap();
        assert_eq!(label.as_str(), "//services/api:server");
    }

    #[test]
    fn empty_package_is_root_level() {
        let label = Label::resolve("", "server").unwrap();
        assert_eq!(label.as_str(), "//:server");
    }

    #[test]
    fn resolve_is_idempotent() {
        let first = Label::resolve("services/api", "server").unwrap();
        let second = Label::resolve(first.as_str(), "").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn marker_repeated_inside_path_is_preserved() {
        // Only the leading marker is stripped; repeats elsewhere stay.
        let label = Label::resolve("//vendor//mirrored", "lib").unwrap();
        assert_eq!(label.as_str(), "//vendor//mirrored:lib");
    }

    #[test]
    fn rejects_multiple_separators() {
        let err = Label::resolve("a:b:c", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidLabel { .. }));

        let err = Label::resolve("pkg", "a:b").unwrap_err();
        assert!(matches!(err, Error::InvalidLabel { .. }));
    }

    #[test]
    fn rejects_missing_name() {
        assert!(Label::resolve("pkg", "").is_err());
        assert!(Label::resolve("pkg:", "unused").is_err());
    }

    #[test]
    fn parse_accepts_shorthand() {
        let label = Label::parse("//services/api").unwrap();
        assert_eq!(label.as_str(), "//services/api:api");

        let label = Label::parse("//services/api:server").unwrap();
        assert_eq!(label.as_str(), "//services/api:server");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(Label::parse("").is_err());
        assert!(Label::parse("//").is_err());
    }

    #[test]
    fn accessors_round_trip() {
        let label = Label::resolve("services/api", "server").unwrap();
        assert_eq!(label.package(), "services/api");
        assert_eq!(label.name(), "server");
        let rebuilt = Label::resolve(label.package(), label.name()).unwrap();
        assert_eq!(rebuilt, label);

        let root = Label::resolve("", "server").unwrap();
        assert_eq!(root.package(), "");
        assert_eq!(root.name(), "server");
    }

    #[test]
    fn serde_round_trips_canonical_form() {
        let label = Label::resolve("services/api", "server").unwrap();
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"//services/api:server\"");
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let label = Label::resolve("Services/API", "Server").unwrap();
        assert!(label.contains_ignore_case("api"));
        assert!(label.contains_ignore_case("SERVER"));
        assert!(!label.contains_ignore_case("client"));
    }
}
