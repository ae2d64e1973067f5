//! # larder
//!
//! A recipe knowledge graph: a schema-validated triple store with
//! multi-criterion search, a dependency-tracked result cache, and an
//! asynchronous mutation pipeline with durable write-through persistence.
//!
//! ## Architecture
//!
//! - **Fact store** (`store`): validated triples over interned subjects,
//!   with swap-on-rebuild generations and a redb instance partition
//! - **Schema** (`schema`): fixed class hierarchy, property declarations,
//!   and the static meal-type / difficulty-tier individuals
//! - **Query** (`query`): conjunctive criteria evaluation with a
//!   dependency-invalidated result cache (`cache`)
//! - **Mutations** (`mutation`): create/update/delete/rebuild with undo
//!   logs, orphan reaping, and write-through commits
//! - **Jobs** (`jobs`): worker pool with per-identity serialization and
//!   transient-only retry with exponential backoff
//!
//! ## Library usage
//!
//! ```no_run
//! use std::time::Duration;
//! use larder::engine::{Engine, EngineConfig};
//! use larder::query::Criteria;
//! use larder::recipe::RecipeDraft;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let draft: RecipeDraft = serde_json::from_str(
//!     r#"{"title": "Oat Bowl", "instructions": ["Mix"], "prepTimeMinutes": 5}"#,
//! ).unwrap();
//! let job = engine.submit_create(draft).unwrap();
//! let _ = engine.wait(job, Duration::from_secs(5));
//! let hits = engine.search(&Criteria::default()).unwrap();
//! assert_eq!(hits.matches, vec!["recipe:oat_bowl"]);
//! ```

pub mod build;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ident;
pub mod jobs;
pub mod mutation;
pub mod query;
pub mod recipe;
pub mod schema;
pub mod store;
