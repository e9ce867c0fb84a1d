//! Dependency-graph construction from canonical records.
//!
//! Records are read-only inputs; the builder produces a fresh node/edge
//! structure with topological levels for hierarchical rendering. No pixel
//! positions are computed here.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::label::Label;
use crate::target::{Edge, EdgeKind, Location, Target};

/// Attribute lists that materialize as edges, with their relation kind.
const EDGE_ATTRS: &[(&str, EdgeKind)] = &[
    ("deps", EdgeKind::DependsOn),
    ("srcs", EdgeKind::HasSource),
    ("hdrs", EdgeKind::HasHeader),
];

/// One node of a graph view, carrying the metadata the view layer styles
/// and links with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub label: Label,
    #[serde(rename = "ruleClass", skip_serializing_if = "String::is_empty")]
    pub rule_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Topological depth: roots are 0, every other node is one more than
    /// its deepest predecessor.
    pub level: u32,
}

/// A deduplicated graph view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

pub struct GraphBuilder;

impl GraphBuilder {
    /// Build a graph view from canonical records.
    ///
    /// With a `filter`, only targets whose label contains it as a
    /// case-insensitive substring become nodes, and an edge survives only
    /// when both endpoints do. Node labels are unique; `(source, target,
    /// kind)` edges are deduplicated. Inconsistent (cyclic) input
    /// terminates: a node is re-queued only for a strictly deeper level,
    /// and levels are capped at the node count.
    pub fn build(targets: &[Target], filter: Option<&str>) -> Graph {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: HashMap<Label, usize> = HashMap::new();
        for target in targets {
            if let Some(filter) = filter {
                if !target.label.contains_ignore_case(filter) {
                    continue;
                }
            }
            if index.contains_key(&target.label) {
                continue;
            }
            index.insert(target.label.clone(), nodes.len());
            nodes.push(Node {
                label: target.label.clone(),
                rule_class: target.rule_class.clone(),
                location: target.location.clone(),
                level: 0,
            });
        }

        let mut edges: Vec<Edge> = Vec::new();
        let mut seen: HashSet<Edge> = HashSet::new();
        for target in targets {
            let Some(&consumer) = index.get(&target.label) else {
                continue;
            };
            for (attr, kind) in EDGE_ATTRS {
                for value in target.string_list_attr(attr).unwrap_or_default() {
                    let Ok(prerequisite) = Label::parse(value) else {
                        continue;
                    };
                    // Both endpoints must exist as nodes in this view.
                    if !index.contains_key(&prerequisite) {
                        continue;
                    }
                    let edge = Edge {
                        source: prerequisite,
                        target: nodes[consumer].label.clone(),
                        kind: *kind,
                    };
                    if seen.insert(edge.clone()) {
                        edges.push(edge);
                    }
                }
            }
        }

        assign_levels(&mut nodes, &index, &edges);
        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            filtered = filter.is_some(),
            "built graph view"
        );
        Graph { nodes, edges }
    }
}

/// Breadth-first level propagation from the roots.
fn assign_levels(nodes: &mut [Node], index: &HashMap<Label, usize>, edges: &[Edge]) {
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut incoming = vec![0usize; nodes.len()];
    for edge in edges {
        let (Some(&source), Some(&target)) = (index.get(&edge.source), index.get(&edge.target))
        else {
            continue;
        };
        outgoing[source].push(target);
        incoming[target] += 1;
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| incoming[i] == 0).collect();
    let cap = nodes.len() as u32;
    while let Some(current) = queue.pop_front() {
        let proposed = nodes[current].level + 1;
        for &next in &outgoing[current] {
            // Strictly-deeper re-queue only; caps keep cycles finite.
            if proposed > nodes[next].level && proposed <= cap {
                nodes[next].level = proposed;
                queue.push_back(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{AttrValue, Attribute};

    fn rule(label: &str, kind: &str, deps: &[&str]) -> Target {
        let mut target = Target::with_kind(Label::parse(label).unwrap(), kind);
        if !deps.is_empty() {
            target.attributes.push(Attribute::new(
                "deps",
                AttrValue::StringList(deps.iter().map(|d| d.to_string()).collect()),
            ));
        }
        target
    }

    fn level_of(graph: &Graph, label: &str) -> u32 {
        graph
            .nodes
            .iter()
            .find(|n| n.label.as_str() == label)
            .unwrap()
            .level
    }

    #[test]
    fn linear_chain_levels() {
        // C depends on B depends on A.
        let targets = vec![
            rule("//pkg:a", "cc_library", &[]),
            rule("//pkg:b", "cc_library", &["//pkg:a"]),
            rule("//pkg:c", "cc_binary", &["//pkg:b"]),
        ];
        let graph = GraphBuilder::build(&targets, None);
        assert_eq!(level_of(&graph, "//pkg:a"), 0);
        assert_eq!(level_of(&graph, "//pkg:b"), 1);
        assert_eq!(level_of(&graph, "//pkg:c"), 2);
    }

    #[test]
    fn diamond_takes_deepest_predecessor() {
        let targets = vec![
            rule("//pkg:base", "cc_library", &[]),
            rule("//pkg:mid", "cc_library", &["//pkg:base"]),
            rule("//pkg:top", "cc_binary", &["//pkg:base", "//pkg:mid"]),
        ];
        let graph = GraphBuilder::build(&targets, None);
        assert_eq!(level_of(&graph, "//pkg:top"), 2);
    }

    #[test]
    fn duplicate_records_and_edges_are_deduplicated() {
        let targets = vec![
            rule("//pkg:a", "cc_library", &[]),
            rule("//pkg:a", "cc_library", &[]),
            rule("//pkg:b", "cc_library", &["//pkg:a", "//pkg:a"]),
            rule("//pkg:b", "cc_library", &["//pkg:a"]),
        ];
        let graph = GraphBuilder::build(&targets, None);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn filter_drops_nodes_and_dangling_edges() {
        let targets = vec![
            rule("//lib:base", "cc_library", &[]),
            rule("//app:main", "cc_binary", &["//lib:base"]),
            rule("//app:helper", "cc_library", &["//lib:base"]),
        ];
        let graph = GraphBuilder::build(&targets, Some("APP"));
        let labels: Vec<_> = graph.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["//app:main", "//app:helper"]);
        // Edges to the filtered-out library are gone.
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn source_and_header_edges_carry_their_kind() {
        let mut lib = rule("//lib:base", "cc_library", &[]);
        lib.attributes.push(Attribute::new(
            "srcs",
            AttrValue::StringList(vec!["//lib:base.cc".to_string()]),
        ));
        lib.attributes.push(Attribute::new(
            "hdrs",
            AttrValue::StringList(vec!["//lib:base.h".to_string()]),
        ));
        let targets = vec![
            lib,
            Target::minimal(Label::parse("//lib:base.cc").unwrap()),
            Target::minimal(Label::parse("//lib:base.h").unwrap()),
        ];
        let graph = GraphBuilder::build(&targets, None);
        let kinds: HashSet<_> = graph.edges.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            HashSet::from([EdgeKind::HasSource, EdgeKind::HasHeader])
        );
        assert_eq!(level_of(&graph, "//lib:base"), 1);
    }

    #[test]
    fn cycles_terminate() {
        let targets = vec![
            rule("//pkg:root", "cc_library", &[]),
            rule("//pkg:a", "cc_library", &["//pkg:root", "//pkg:b"]),
            rule("//pkg:b", "cc_library", &["//pkg:a"]),
        ];
        // Must not hang; levels stay within the node-count cap.
        let graph = GraphBuilder::build(&targets, None);
        assert!(graph.nodes.iter().all(|n| n.level <= 3));
    }

    #[test]
    fn edges_require_both_endpoints() {
        let targets = vec![rule("//pkg:a", "cc_library", &["//elsewhere:missing"])];
        let graph = GraphBuilder::build(&targets, None);
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
    }
}
