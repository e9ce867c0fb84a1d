//! # buildscope
//!
//! Inspect a build graph maintained by an external Bazel-compatible build
//! engine: run its query verbs as subprocesses, normalize the several
//! output encodings into one canonical record model, and compose
//! deduplicated dependency graphs for a presentation layer.
//!
//! ## Features
//!
//! - **Safe subprocess execution**: argv-only invocation with output-size
//!   caps and deadlines; oversized output is an error, never a truncation
//! - **Four output encodings**: XML tree, `label_kind` lines, bare label
//!   lines and streamed JSON, all normalized into [`Target`]
//! - **Streaming**: incremental parsing with a bounded carry buffer;
//!   dropping a stream kills the underlying engine process
//! - **Caching**: `(query, format, workspace)` memoization with wholesale
//!   per-workspace invalidation and an optional TTL
//! - **Coalescing**: concurrent identical queries share one subprocess
//! - **Binary Discovery**: automatic lookup of the engine executable
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use buildscope::{EngineConfig, GraphBuilder, OutputFormat, QueryService, Result};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = EngineConfig::discover("/path/to/workspace")?;
//!     let service = QueryService::new(config);
//!
//!     // Buffered, cached query.
//!     let result = service.query("deps(//app:main)", OutputFormat::Xml).await?;
//!     let graph = GraphBuilder::build(&result.targets, None);
//!     println!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
//!
//!     // Streaming query for arbitrarily large outputs.
//!     let mut targets = service.stream_query("//...", OutputFormat::StreamedJson).await?;
//!     while let Some(target) = targets.next().await {
//!         println!("{}", target?.label);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod label;
pub mod parse;
pub mod runner;
pub mod service;
pub mod target;

pub use cache::{CacheKey, QueryCache};
pub use config::{ConfigChange, ConfigHandle, EngineConfig};
pub use error::{Error, Result};
pub use graph::{Graph, GraphBuilder, Node};
pub use label::Label;
pub use parse::{StreamParser, parse};
pub use runner::{ChunkStream, CommandOutput, CommandRunner};
pub use service::{ActionOutcome, ActionVerb, QueryService, SearchResponse, TargetStream};
pub use target::{
    AttrValue, Attribute, Edge, EdgeKind, Location, OutputFormat, QueryResult, Target,
};
