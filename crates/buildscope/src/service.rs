//! Query orchestration: cache, coalescing, streaming and fallbacks.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::try_stream;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, QueryCache};
use crate::config::{ConfigChange, ConfigHandle, EngineConfig};
use crate::error::{Error, Result};
use crate::graph::{Graph, GraphBuilder};
use crate::label::Label;
use crate::parse::{self, StreamParser};
use crate::runner::CommandRunner;
use crate::target::{OutputFormat, QueryResult, Target};

type SharedQuery = Shared<BoxFuture<'static, Result<Arc<QueryResult>>>>;

/// In-flight queries by cache key.
///
/// The driver task that owns an entry deregisters it itself when it
/// finishes; waiters never touch the map. Tickets make deregistration
/// identity-aware, so a driver whose entry was purged mid-flight (cache
/// clear, workspace change) cannot evict a successor flight for the same
/// key.
#[derive(Default)]
struct InflightMap {
    next_ticket: u64,
    entries: HashMap<CacheKey, InflightEntry>,
}

struct InflightEntry {
    ticket: u64,
    shared: SharedQuery,
}

/// Non-query engine verbs whose output is free text, not parsed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    Build,
    Test,
    Run,
}

impl ActionVerb {
    fn arg(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
            Self::Run => "run",
        }
    }
}

/// Outcome of a build/test/run action.
///
/// A non-zero exit is a normal outcome here (e.g. failing tests), not an
/// error.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
}

/// Result of [`QueryService::search_targets`].
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub targets: Vec<Target>,
    /// True when the engine rejected the expression and the results come
    /// from the substring fallback instead.
    pub fallback: bool,
}

/// Orchestrates the query pipeline: cache lookups, subprocess execution,
/// parsing, in-flight coalescing and graph construction.
pub struct QueryService {
    config: ConfigHandle,
    cache: Arc<QueryCache>,
    inflight: Arc<Mutex<InflightMap>>,
    /// Every target retrieved so far, keyed by label; the corpus for the
    /// substring-search fallback.
    seen: Arc<DashMap<Label, Target>>,
}

impl QueryService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: ConfigHandle::new(config),
            cache: Arc::new(QueryCache::new()),
            inflight: Arc::new(Mutex::new(InflightMap::default())),
            seen: Arc::new(DashMap::new()),
        }
    }

    /// The configuration snapshot current requests will run with.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.snapshot()
    }

    /// Run a query, buffered, with caching and coalescing.
    ///
    /// Concurrent callers with an identical `(query, format, workspace)`
    /// key await one shared subprocess rather than spawning one each. If
    /// the buffered output exceeds the configured cap the query retries
    /// transparently through the streaming path. Underlying errors are
    /// surfaced verbatim.
    pub async fn query(&self, expr: &str, format: OutputFormat) -> Result<Arc<QueryResult>> {
        let config = self.config.snapshot();
        let key = CacheKey::new(expr, format, config.workspace_id());

        if let Some(hit) = self.cache.get(&key, config.cache_ttl) {
            debug!(query = %expr, "cache hit");
            return Ok(hit);
        }

        let shared = {
            let mut inflight = self.inflight.lock();
            match inflight.entries.get(&key) {
                Some(entry) => {
                    debug!(query = %expr, "joining in-flight query");
                    entry.shared.clone()
                }
                None => {
                    let ticket = inflight.next_ticket;
                    inflight.next_ticket += 1;
                    // Spawned so the subprocess survives every waiter
                    // dropping; an aborted driver surfaces as `Canceled`.
                    let task = tokio::spawn(Self::drive(
                        config,
                        expr.to_string(),
                        format,
                        self.seen.clone(),
                        self.cache.clone(),
                        self.inflight.clone(),
                        key.clone(),
                        ticket,
                    ));
                    let shared: SharedQuery = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(_) => Err(Error::Canceled),
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.entries.insert(
                        key,
                        InflightEntry {
                            ticket,
                            shared: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };
        shared.await
    }

    /// Drive one in-flight query to completion.
    ///
    /// Runs even when every waiter has been dropped. Deregisters its own
    /// `inflight` entry and fills the cache before any waiter observes the
    /// result; both steps are skipped when the entry was purged mid-flight,
    /// so an explicit clear is never bypassed by a completed flight.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        config: Arc<EngineConfig>,
        expr: String,
        format: OutputFormat,
        seen: Arc<DashMap<Label, Target>>,
        cache: Arc<QueryCache>,
        inflight: Arc<Mutex<InflightMap>>,
        key: CacheKey,
        ticket: u64,
    ) -> Result<Arc<QueryResult>> {
        let result = Self::execute(config, expr, format, seen).await;

        let still_registered = {
            let mut inflight = inflight.lock();
            match inflight.entries.get(&key) {
                Some(entry) if entry.ticket == ticket => {
                    inflight.entries.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if still_registered {
            if let Ok(value) = &result {
                cache.put(key, value.clone());
            }
        }
        result
    }

    /// Run a query in streaming mode, bypassing the whole-result cache.
    ///
    /// Records are yielded in engine emission order. Dropping the stream
    /// kills the underlying subprocess.
    pub async fn stream_query(&self, expr: &str, format: OutputFormat) -> Result<TargetStream> {
        let config = self.config.snapshot();
        let args = query_args(expr, format);
        let mut chunks = CommandRunner::run_streaming(&config, &args).await?;
        let pid = chunks.pid();
        let seen = self.seen.clone();

        let stream = try_stream! {
            let mut parser = StreamParser::new(format);
            while let Some(chunk) = chunks.next().await {
                for target in parser.parse_chunk(&chunk?)? {
                    seen.insert(target.label.clone(), target.clone());
                    yield target;
                }
            }
            for target in parser.finish()? {
                seen.insert(target.label.clone(), target.clone());
                yield target;
            }
        };
        Ok(TargetStream {
            inner: stream.boxed(),
            pid,
        })
    }

    /// Targets the given label depends on, to `depth` if one is given.
    ///
    /// The label is canonicalized first; an invalid label fails before any
    /// subprocess is spawned.
    pub async fn get_dependencies(&self, label: &str, depth: Option<u32>) -> Result<Vec<Target>> {
        let label = Label::parse(label)?;
        let expr = match depth {
            Some(depth) => format!("deps({label}, {depth})"),
            None => format!("deps({label})"),
        };
        let result = self.query(&expr, OutputFormat::Xml).await?;
        Ok(result.targets.clone())
    }

    /// Targets that depend on the given label, workspace-wide.
    pub async fn get_reverse_dependencies(&self, label: &str) -> Result<Vec<Target>> {
        let label = Label::parse(label)?;
        let expr = format!("rdeps(//..., {label})");
        let result = self.query(&expr, OutputFormat::Xml).await?;
        Ok(result.targets.clone())
    }

    /// Search for targets by expression, with a substring fallback.
    ///
    /// `text` is issued as a structured query first. When the engine
    /// rejects it as a syntax error the search degrades to case-insensitive
    /// substring matching over previously retrieved targets, and the
    /// response is tagged `fallback: true`.
    pub async fn search_targets(
        &self,
        text: &str,
        kind_filter: Option<&str>,
        package_filter: Option<&str>,
    ) -> Result<SearchResponse> {
        let expr = match kind_filter {
            Some(kind) => format!("kind(\"{kind}\", {text})"),
            None => text.to_string(),
        };
        match self.query(&expr, OutputFormat::LabelKind).await {
            Ok(result) => {
                let targets = result
                    .targets
                    .iter()
                    .filter(|t| matches_package(t, package_filter))
                    .cloned()
                    .collect();
                Ok(SearchResponse {
                    targets,
                    fallback: false,
                })
            }
            Err(error) if error.is_syntax_error() => {
                info!(%text, "query rejected by engine; using substring fallback");
                let mut targets: Vec<Target> = self
                    .seen
                    .iter()
                    .filter(|entry| entry.key().contains_ignore_case(text))
                    .filter(|entry| {
                        kind_filter.is_none_or(|kind| entry.value().rule_class == kind)
                    })
                    .filter(|entry| matches_package(entry.value(), package_filter))
                    .map(|entry| entry.value().clone())
                    .collect();
                targets.sort_by(|a, b| a.label.cmp(&b.label));
                Ok(SearchResponse {
                    targets,
                    fallback: true,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Build a graph view from a query's records.
    pub async fn query_graph(
        &self,
        expr: &str,
        filter: Option<&str>,
    ) -> Result<Graph> {
        let result = self.query(expr, OutputFormat::Xml).await?;
        Ok(GraphBuilder::build(&result.targets, filter))
    }

    /// Run a build/test/run action on the given targets.
    ///
    /// Labels are canonicalized first. The engine's exit status and
    /// combined diagnostics come back as an [`ActionOutcome`].
    pub async fn run_action(&self, verb: ActionVerb, targets: &[&str]) -> Result<ActionOutcome> {
        let mut args = vec![verb.arg().to_string()];
        for target in targets {
            args.push(Label::parse(target)?.to_string());
        }

        let config = self.config.snapshot();
        let output = CommandRunner::run_unchecked(&config, &args).await?;
        Ok(ActionOutcome {
            success: output.exit_code == 0,
            exit_code: output.exit_code,
            // The engine writes progress to stderr and, for `run`, program
            // output to stdout; keep both whether or not the action passed.
            output: format!("{}{}", output.stdout, output.stderr),
        })
    }

    /// Swap the configuration.
    ///
    /// When the workspace root changes, every cached result and retrieved
    /// target belonging to the outgoing workspace is invalidated before
    /// the next query can run.
    pub fn update_config(&self, config: EngineConfig) -> ConfigChange {
        let change = self.config.update(config);
        if change.workspace_changed {
            info!(workspace = %change.previous_workspace_id, "invalidating outgoing workspace");
            self.cache.invalidate_workspace(&change.previous_workspace_id);
            // In-flight results for the outgoing workspace must not be
            // joined or cached once they complete.
            self.inflight
                .lock()
                .entries
                .retain(|key, _| key.workspace_id != change.previous_workspace_id);
            self.seen.clear();
        }
        change
    }

    /// Drop every cached result, including completed-but-unclaimed
    /// in-flight entries.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.inflight.lock().entries.clear();
    }

    async fn execute(
        config: Arc<EngineConfig>,
        expr: String,
        format: OutputFormat,
        seen: Arc<DashMap<Label, Target>>,
    ) -> Result<Arc<QueryResult>> {
        let args = query_args(&expr, format);
        let (targets, raw) = match CommandRunner::run(&config, &args).await {
            Ok(output) => {
                let targets = parse::parse(&output.stdout, format)?;
                (targets, output.stdout)
            }
            Err(error) if error.is_too_large() => {
                warn!(query = %expr, "buffered output over the cap; retrying via streaming");
                Self::collect_streaming(&config, &args, format).await?
            }
            Err(error) => return Err(error),
        };

        for target in &targets {
            seen.insert(target.label.clone(), target.clone());
        }
        debug!(query = %expr, records = targets.len(), "query parsed");
        Ok(Arc::new(QueryResult {
            query: expr,
            format,
            targets,
            raw,
        }))
    }

    async fn collect_streaming(
        config: &EngineConfig,
        args: &[String],
        format: OutputFormat,
    ) -> Result<(Vec<Target>, String)> {
        let mut chunks = CommandRunner::run_streaming(config, args).await?;
        let mut parser = StreamParser::new(format);
        let mut targets = Vec::new();
        let mut raw = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            raw.push_str(&chunk);
            targets.extend(parser.parse_chunk(&chunk)?);
        }
        targets.extend(parser.finish()?);
        Ok((targets, raw))
    }
}

/// Incremental records of a streaming query.
///
/// Dropping the stream terminates the underlying subprocess.
pub struct TargetStream {
    inner: BoxStream<'static, Result<Target>>,
    pid: Option<u32>,
}

impl TargetStream {
    /// OS process id of the underlying subprocess, for liveness probes.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Stream for TargetStream {
    type Item = Result<Target>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn query_args(expr: &str, format: OutputFormat) -> Vec<String> {
    vec![
        "query".to_string(),
        expr.to_string(),
        "--output".to_string(),
        format.flag().to_string(),
    ]
}

fn matches_package(target: &Target, package_filter: Option<&str>) -> bool {
    package_filter.is_none_or(|pkg| {
        target
            .label
            .package()
            .to_lowercase()
            .contains(&pkg.to_lowercase())
    })
}
