//! The engine façade: one handle owning the graph, cache, mutation
//! pipeline, and worker pool.
//!
//! Reads (`search`, `recipe`, `info`) are served synchronously against the
//! current store snapshot. Writes are submitted as jobs and acknowledged
//! with a [`JobId`]; callers observe completion through the job registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::build::build_graph;
use crate::cache::ResultCache;
use crate::error::{EngineError, LarderResult};
use crate::ident::Interner;
use crate::jobs::{JobId, JobRunner, JobState, JobStatus, WorkerConfig, WorkerPool};
use crate::mutation::{MutationOp, Mutator};
use crate::query::{evaluate, Criteria};
use crate::recipe::{RecipeDraft, RecipePatch, RecipeRecord};
use crate::schema::Schema;
use crate::store::durable::InstancePartition;
use crate::store::SharedGraph;

/// Engine configuration. `Default` gives a purely in-memory engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Durable data directory; `None` runs in memory only.
    pub data_dir: Option<PathBuf>,
    pub workers: usize,
    pub job_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    /// Periodic full-rebuild interval; `None` disables the scheduler.
    pub rebuild_interval: Option<Duration>,
    /// Queries slower than this are logged at warn level.
    pub slow_query_warn: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            workers: 4,
            job_timeout: Duration::from_secs(20),
            max_attempts: 3,
            retry_base: Duration::from_secs(2),
            rebuild_interval: None,
            slow_query_warn: Duration::from_secs(1),
        }
    }
}

/// Result of one search call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Matching recipe identifiers, in creation order.
    pub matches: Vec<String>,
    /// Recipes examined; zero on a cache hit.
    pub searched: usize,
    pub cached: bool,
    pub took_ms: u64,
}

/// Engine counters for the `info` surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub recipes: usize,
    pub triples: usize,
    pub store_version: u64,
    pub interned_subjects: usize,
    pub cached_queries: usize,
    pub jobs: usize,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "recipes:          {}", self.recipes)?;
        writeln!(f, "triples:          {}", self.triples)?;
        writeln!(f, "store version:    {}", self.store_version)?;
        writeln!(f, "interned subjects: {}", self.interned_subjects)?;
        writeln!(f, "cached queries:   {}", self.cached_queries)?;
        write!(f, "jobs:             {}", self.jobs)
    }
}

/// A running recipe knowledge-graph engine.
pub struct Engine {
    interner: Arc<Interner>,
    graph: Arc<SharedGraph>,
    cache: Arc<ResultCache>,
    mutator: Arc<Mutator>,
    runner: Arc<JobRunner>,
    pool: Option<WorkerPool>,
    slow_query_warn: Duration,
}

impl Engine {
    /// Boot an engine: open the partition (if any), replay records into a
    /// fresh graph, and start the worker pool.
    pub fn new(config: EngineConfig) -> LarderResult<Self> {
        if config.workers == 0 {
            return Err(EngineError::InvalidConfig {
                message: "workers must be at least 1".into(),
            }
            .into());
        }
        if config.max_attempts == 0 {
            return Err(EngineError::InvalidConfig {
                message: "max_attempts must be at least 1".into(),
            }
            .into());
        }

        let interner = Arc::new(Interner::new());
        let schema = Arc::new(Schema::base(&interner));

        let partition = match &config.data_dir {
            Some(dir) => Some(Arc::new(InstancePartition::open(dir)?)),
            None => None,
        };
        let records = match &partition {
            Some(p) => p.load_all()?,
            None => Vec::new(),
        };
        info!(
            recipes = records.len(),
            durable = partition.is_some(),
            "booting engine"
        );

        let store = build_graph(Arc::clone(&schema), Arc::clone(&interner), &records, 1)?;
        let graph = Arc::new(SharedGraph::new(store));
        let cache = Arc::new(ResultCache::new());
        let mutator = Arc::new(Mutator::new(
            Arc::clone(&schema),
            Arc::clone(&interner),
            Arc::clone(&graph),
            Arc::clone(&cache),
            partition,
            records,
        ));
        let runner = Arc::new(JobRunner::new());
        let pool = WorkerPool::spawn(
            Arc::clone(&mutator),
            Arc::clone(&runner),
            WorkerConfig {
                workers: config.workers,
                job_timeout: config.job_timeout,
                max_attempts: config.max_attempts,
                retry_base: config.retry_base,
                rebuild_interval: config.rebuild_interval,
            },
        );

        Ok(Self {
            interner,
            graph,
            cache,
            mutator,
            runner,
            pool: Some(pool),
            slow_query_warn: config.slow_query_warn,
        })
    }

    /// Evaluate search criteria, consulting the result cache first.
    pub fn search(&self, criteria: &Criteria) -> LarderResult<SearchOutcome> {
        criteria.validate()?;
        let start = Instant::now();
        let key = criteria.cache_key();

        if let Some(matches) = self.cache.get(&key) {
            let matches: Vec<String> = matches
                .into_iter()
                .map(|id| self.interner.display(id))
                .collect();
            debug!(%key, hits = matches.len(), "cache hit");
            return Ok(SearchOutcome {
                matches,
                searched: 0,
                cached: true,
                took_ms: start.elapsed().as_millis() as u64,
            });
        }

        let store = self.graph.handle();
        let eval = evaluate(&store, criteria);
        self.cache.put(
            key,
            eval.matches.clone(),
            &eval.examined,
            criteria.is_broad(),
        );

        let took = start.elapsed();
        if took > self.slow_query_warn {
            warn!(
                took_ms = took.as_millis() as u64,
                searched = eval.searched(),
                "slow query"
            );
        }
        debug!(
            searched = eval.searched(),
            matched = eval.matches.len(),
            "search evaluated"
        );
        Ok(SearchOutcome {
            matches: eval
                .matches
                .iter()
                .map(|&id| self.interner.display(id))
                .collect(),
            searched: eval.searched(),
            cached: false,
            took_ms: took.as_millis() as u64,
        })
    }

    /// Current record for a recipe identifier.
    pub fn recipe(&self, id: &str) -> Option<RecipeRecord> {
        self.mutator.record(id)
    }

    pub fn submit_create(&self, draft: RecipeDraft) -> LarderResult<JobId> {
        Ok(self.runner.submit(MutationOp::Create(draft))?)
    }

    pub fn submit_update(&self, id: String, patch: RecipePatch) -> LarderResult<JobId> {
        Ok(self.runner.submit(MutationOp::Update { id, patch })?)
    }

    pub fn submit_delete(&self, id: String) -> LarderResult<JobId> {
        Ok(self.runner.submit(MutationOp::Delete { id })?)
    }

    pub fn trigger_rebuild(&self) -> LarderResult<JobId> {
        Ok(self.runner.submit(MutationOp::Rebuild)?)
    }

    pub fn job_status(&self, id: JobId) -> Option<JobStatus> {
        self.runner.status(id)
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        self.runner.list()
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.runner.cancel(id)
    }

    /// Poll a job until it reaches a terminal state or the timeout passes.
    pub fn wait(&self, id: JobId, timeout: Duration) -> Option<JobStatus> {
        let start = Instant::now();
        loop {
            let status = self.runner.status(id)?;
            match status.state {
                JobState::Committed | JobState::Failed | JobState::Cancelled => {
                    return Some(status)
                }
                _ if start.elapsed() > timeout => return Some(status),
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Engine counters.
    pub fn info(&self) -> EngineInfo {
        let store = self.graph.handle();
        EngineInfo {
            recipes: self.mutator.recipe_count(),
            triples: store.triple_count(),
            store_version: store.version(),
            interned_subjects: self.interner.len(),
            cached_queries: self.cache.len(),
            jobs: self.runner.list().len(),
        }
    }

    pub fn store_version(&self) -> u64 {
        self.graph.handle().version()
    }

    /// Stop the worker pool. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
            info!("engine shut down");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> RecipeDraft {
        RecipeDraft {
            title: title.to_string(),
            instructions: vec!["Cook".into()],
            prep_time_minutes: 5,
            difficulty: None,
            meal_type: None,
            vegan: false,
            vegetarian: false,
            calories: 100.0,
            protein: 5.0,
            fat: 2.0,
            carbohydrates: 10.0,
            ingredients: Vec::new(),
        }
    }

    #[test]
    fn zero_workers_is_invalid() {
        let err = Engine::new(EngineConfig {
            workers: 0,
            ..Default::default()
        })
        .err();
        assert!(err.is_some());
    }

    #[test]
    fn search_caches_and_reports() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let id = engine.submit_create(draft("Pasta")).unwrap();
        let status = engine.wait(id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.state, JobState::Committed);

        let first = engine.search(&Criteria::default()).unwrap();
        assert!(!first.cached);
        assert_eq!(first.searched, 1);
        assert_eq!(first.matches, vec!["recipe:pasta"]);

        let second = engine.search(&Criteria::default()).unwrap();
        assert!(second.cached);
        assert_eq!(second.matches, first.matches);
    }

    #[test]
    fn info_counts_line_up() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let id = engine.submit_create(draft("Pasta")).unwrap();
        engine.wait(id, Duration::from_secs(5)).unwrap();

        let info = engine.info();
        assert_eq!(info.recipes, 1);
        assert_eq!(info.store_version, 1);
        assert_eq!(info.jobs, 1);
        assert!(info.triples > 0);
    }
}
