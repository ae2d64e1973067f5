//! The mutation pipeline: create, update, delete, and full rebuild.
//!
//! All writes funnel through the [`Mutator`]. Each mutation applies its
//! triples under a lease on the shared graph, keeping an undo log so any
//! failure (schema rejection, deadline, persistence error) rolls the store
//! back to its pre-mutation state before the error surfaces. Commit order
//! per mutation is: graph triples, durable partition, in-memory record
//! table, cache invalidation — a job only reports success once all four
//! happened.
//!
//! The mutator never touches job scheduling; per-identity serialization is
//! the queue's concern.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::build::build_graph;
use crate::cache::ResultCache;
use crate::error::{BuildError, MutationError, MutationResult};
use crate::ident::{self, Interner, SubjectId};
use crate::recipe::{IngredientUse, RecipeDraft, RecipePatch, RecipeRecord};
use crate::schema::Schema;
use crate::store::{FactStore, SharedGraph, Term, Triple};

/// A queued write operation.
#[derive(Debug, Clone)]
pub enum MutationOp {
    Create(RecipeDraft),
    Update { id: String, patch: RecipePatch },
    Delete { id: String },
    Rebuild,
}

impl MutationOp {
    /// The serialization identity: ops sharing one never run concurrently
    /// and execute in submission order.
    pub fn identity(&self) -> String {
        match self {
            MutationOp::Create(draft) => draft.derived_id(),
            MutationOp::Update { id, .. } | MutationOp::Delete { id } => id.clone(),
            MutationOp::Rebuild => "::rebuild".to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationOp::Create(_) => "create",
            MutationOp::Update { .. } => "update",
            MutationOp::Delete { .. } => "delete",
            MutationOp::Rebuild => "rebuild",
        }
    }
}

/// Wall-clock budget for one mutation attempt.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Error out once the budget is exhausted.
    pub fn check(&self) -> MutationResult<()> {
        let elapsed = self.start.elapsed();
        if elapsed > self.budget {
            return Err(MutationError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

enum Applied {
    Added(Triple),
    /// `seq` is the subject's creation sequence, captured before a type
    /// triple was removed; `None` for non-type triples.
    Removed { triple: Triple, seq: Option<u64> },
}

/// Undo log over one store generation. Roll back restores the store to its
/// state before the mutation started.
struct Txn<'a> {
    store: &'a FactStore,
    log: Vec<Applied>,
}

impl<'a> Txn<'a> {
    fn new(store: &'a FactStore) -> Self {
        Self {
            store,
            log: Vec::new(),
        }
    }

    /// Add a triple; idempotent no-ops are not logged.
    fn add(&mut self, triple: Triple) -> MutationResult<()> {
        if self
            .store
            .add_triple(triple.subject, triple.predicate, triple.object.clone())?
        {
            self.log.push(Applied::Added(triple));
        }
        Ok(())
    }

    /// Remove a triple; absent triples are not logged. Type removals also
    /// record the subject's creation sequence so rollback can restore it.
    fn remove(&mut self, triple: Triple) {
        let seq = if triple.predicate == self.store.schema().vocab().prop.ty {
            self.store.seq_of(triple.subject)
        } else {
            None
        };
        if self
            .store
            .remove_triple(triple.subject, triple.predicate, &triple.object)
        {
            self.log.push(Applied::Removed { triple, seq });
        }
    }

    fn rollback(self) {
        for op in self.log.into_iter().rev() {
            match op {
                Applied::Added(t) => {
                    self.store.remove_triple(t.subject, t.predicate, &t.object);
                }
                // Undoing removals in reverse order restores type triples
                // before the triples referencing them, so re-validation
                // cannot fail here. A type triple goes back under its
                // original creation sequence, keeping result order intact.
                Applied::Removed {
                    triple,
                    seq: Some(seq),
                } => {
                    if let Term::Id(class) = triple.object {
                        let _ = self.store.reinsert_type(triple.subject, class, seq);
                    }
                }
                Applied::Removed { triple, seq: None } => {
                    let _ = self
                        .store
                        .add_triple(triple.subject, triple.predicate, triple.object);
                }
            }
        }
    }
}

/// Serializes access to shared ingredient nodes across concurrent
/// mutations. A mutation holds every ingredient it touches for its whole
/// triple-application phase, so an orphan check and the removals it
/// justifies cannot interleave with another recipe adding a use of the
/// same ingredient.
#[derive(Debug, Default)]
struct SharedNodeLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl SharedNodeLocks {
    /// Block until every token is free, then take them all at once.
    /// All-or-nothing acquisition: a waiter holds nothing, so two
    /// overlapping sets cannot deadlock.
    fn acquire(&self, tokens: BTreeSet<String>) -> SharedNodeGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        while tokens.iter().any(|t| held.contains(t)) {
            held = self.released.wait(held).unwrap_or_else(|p| p.into_inner());
        }
        for token in &tokens {
            held.insert(token.clone());
        }
        SharedNodeGuard {
            locks: self,
            tokens,
        }
    }
}

struct SharedNodeGuard<'a> {
    locks: &'a SharedNodeLocks,
    tokens: BTreeSet<String>,
}

impl Drop for SharedNodeGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        for token in &self.tokens {
            held.remove(token);
        }
        self.locks.released.notify_all();
    }
}

fn ingredient_tokens(ingredients: &[IngredientUse]) -> BTreeSet<String> {
    ingredients
        .iter()
        .map(|i| ident::canonical_token(&i.name))
        .collect()
}

/// Applies mutation operations against the shared graph, the durable
/// partition, and the cache.
pub struct Mutator {
    schema: Arc<Schema>,
    interner: Arc<Interner>,
    graph: Arc<SharedGraph>,
    cache: Arc<ResultCache>,
    partition: Option<Arc<crate::store::durable::InstancePartition>>,
    records: DashMap<String, RecipeRecord>,
    shared: SharedNodeLocks,
    /// Sequence allocator for partition-less (in-memory) operation.
    next_seq: AtomicU64,
}

impl Mutator {
    pub fn new(
        schema: Arc<Schema>,
        interner: Arc<Interner>,
        graph: Arc<SharedGraph>,
        cache: Arc<ResultCache>,
        partition: Option<Arc<crate::store::durable::InstancePartition>>,
        initial: Vec<RecipeRecord>,
    ) -> Self {
        let next_seq = initial.iter().map(|r| r.seq + 1).max().unwrap_or(0);
        let records = DashMap::new();
        for record in initial {
            records.insert(record.id.clone(), record);
        }
        Self {
            schema,
            interner,
            graph,
            cache,
            partition,
            records,
            shared: SharedNodeLocks::default(),
            next_seq: AtomicU64::new(next_seq),
        }
    }

    /// Apply one operation within the given deadline.
    pub fn apply(&self, op: &MutationOp, deadline: &Deadline) -> MutationResult<()> {
        deadline.check()?;
        match op {
            MutationOp::Create(draft) => self.create(draft, deadline),
            MutationOp::Update { id, patch } => self.update(id, patch, deadline),
            MutationOp::Delete { id } => self.delete(id, deadline),
            MutationOp::Rebuild => self.rebuild(deadline),
        }
    }

    /// Number of recipes currently held.
    pub fn recipe_count(&self) -> usize {
        self.records.len()
    }

    /// Current record for a recipe id.
    pub fn record(&self, id: &str) -> Option<RecipeRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    fn alloc_seq(&self) -> MutationResult<u64> {
        match &self.partition {
            Some(partition) => Ok(partition.next_seq()?),
            None => Ok(self.next_seq.fetch_add(1, Ordering::Relaxed)),
        }
    }

    fn transient() -> MutationError {
        MutationError::Transient {
            reason: "graph rebuild in progress".into(),
        }
    }

    fn create(&self, draft: &RecipeDraft, deadline: &Deadline) -> MutationResult<()> {
        draft.validate()?;
        let id = draft.derived_id();
        if self.records.contains_key(&id) {
            return Err(MutationError::Conflict { id });
        }

        let _shared = self.shared.acquire(ingredient_tokens(&draft.ingredients));
        let lease = self.graph.try_lease().ok_or_else(Self::transient)?;
        let store = lease.store();
        let seq = self.alloc_seq()?;
        let record = draft.clone().into_record(id.clone(), seq);

        let mut txn = Txn::new(store);
        let applied: MutationResult<()> = (|| {
            for triple in record.to_triples(&self.interner, &self.schema) {
                deadline.check()?;
                txn.add(triple)?;
            }
            Ok(())
        })();
        if let Err(err) = applied {
            txn.rollback();
            return Err(err);
        }
        if let Some(partition) = &self.partition {
            if let Err(err) = partition.put(&record) {
                warn!(id, "persist failed, rolling back create");
                txn.rollback();
                return Err(err.into());
            }
        }

        self.records.insert(id.clone(), record);
        // A fresh recipe can satisfy any cached query, so drop them all.
        self.cache.clear();
        info!(id, "recipe created");
        Ok(())
    }

    fn update(&self, id: &str, patch: &RecipePatch, deadline: &Deadline) -> MutationResult<()> {
        let old = self
            .records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| MutationError::NotFound { id: id.to_string() })?;
        let mut updated = old.clone();
        updated.apply_patch(patch);
        updated.validate()?;

        let mut tokens = ingredient_tokens(&old.ingredients);
        tokens.extend(ingredient_tokens(&updated.ingredients));
        let _shared = self.shared.acquire(tokens);
        let lease = self.graph.try_lease().ok_or_else(Self::transient)?;
        let store = lease.store();

        let mut txn = Txn::new(store);
        let applied: MutationResult<()> = (|| {
            // The recipe's own type triple stays: it anchors the subject's
            // creation sequence, which must survive updates.
            self.retract_owned(&mut txn, &old, deadline, true)?;
            self.reap_orphans(&mut txn, store, &old, deadline)?;
            for triple in updated.to_triples(&self.interner, &self.schema) {
                deadline.check()?;
                txn.add(triple)?;
            }
            Ok(())
        })();
        if let Err(err) = applied {
            txn.rollback();
            return Err(err);
        }
        if let Some(partition) = &self.partition {
            if let Err(err) = partition.put(&updated) {
                warn!(id, "persist failed, rolling back update");
                txn.rollback();
                return Err(err.into());
            }
        }

        self.records.insert(id.to_string(), updated);
        if let Some(subject) = self.interner.get(id) {
            self.cache.invalidate(subject);
        }
        info!(id, "recipe updated");
        Ok(())
    }

    fn delete(&self, id: &str, deadline: &Deadline) -> MutationResult<()> {
        let Some(old) = self.records.get(id).map(|r| r.value().clone()) else {
            // Deleting the absent is a successful no-op.
            debug!(id, "delete of absent recipe, committing as no-op");
            return Ok(());
        };

        let _shared = self.shared.acquire(ingredient_tokens(&old.ingredients));
        let lease = self.graph.try_lease().ok_or_else(Self::transient)?;
        let store = lease.store();

        let mut txn = Txn::new(store);
        let applied: MutationResult<()> = (|| {
            self.retract_owned(&mut txn, &old, deadline, false)?;
            self.reap_orphans(&mut txn, store, &old, deadline)?;
            Ok(())
        })();
        if let Err(err) = applied {
            txn.rollback();
            return Err(err);
        }
        if let Some(partition) = &self.partition {
            if let Err(err) = partition.remove(id) {
                warn!(id, "persist failed, rolling back delete");
                txn.rollback();
                return Err(err.into());
            }
        }

        self.records.remove(id);
        if let Some(subject) = self.interner.get(id) {
            self.cache.invalidate(subject);
        }
        info!(id, "recipe deleted");
        Ok(())
    }

    fn rebuild(&self, deadline: &Deadline) -> MutationResult<()> {
        let guard = self.graph.begin_rebuild().ok_or_else(|| {
            MutationError::Transient {
                reason: "another rebuild is already in progress".into(),
            }
        })?;
        deadline.check()?;

        let mut snapshot: Vec<RecipeRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        snapshot.sort_by_key(|r| r.seq);
        let version = self.graph.handle().version() + 1;

        let store = build_graph(
            Arc::clone(&self.schema),
            Arc::clone(&self.interner),
            &snapshot,
            version,
        )
        .map_err(|err| match err {
            BuildError::Partition(e) => MutationError::Partition(e),
            replay @ BuildError::Replay { .. } => MutationError::Validation {
                message: replay.to_string(),
            },
        })?;
        deadline.check()?;

        self.graph.publish(store);
        self.cache.clear();
        drop(guard);
        info!(version, "graph rebuilt");
        Ok(())
    }

    /// Retract every triple owned by this recipe: the recipe subject itself
    /// and its per-recipe use nodes. Shared ingredient and nutrient nodes
    /// are left in place.
    fn retract_owned(
        &self,
        txn: &mut Txn<'_>,
        record: &RecipeRecord,
        deadline: &Deadline,
        keep_recipe_type: bool,
    ) -> MutationResult<()> {
        let Some(recipe) = self.interner.get(&record.id) else {
            return Ok(());
        };
        let ty = self.schema.vocab().prop.ty;
        let mut owned: std::collections::HashSet<SubjectId> = std::collections::HashSet::new();
        owned.insert(recipe);
        for ing in &record.ingredients {
            if let Some(usage) = self.interner.get(&ident::use_iri(&record.id, &ing.name)) {
                owned.insert(usage);
            }
        }
        // Reverse emission order: references go before the type triples they
        // depend on, keeping the undo log replayable.
        for triple in record
            .to_triples(&self.interner, &self.schema)
            .into_iter()
            .rev()
        {
            deadline.check()?;
            if !owned.contains(&triple.subject) {
                continue;
            }
            if keep_recipe_type && triple.subject == recipe && triple.predicate == ty {
                continue;
            }
            txn.remove(triple);
        }
        Ok(())
    }

    /// Remove ingredient nodes no longer referenced by any use node.
    fn reap_orphans(
        &self,
        txn: &mut Txn<'_>,
        store: &FactStore,
        old: &RecipeRecord,
        deadline: &Deadline,
    ) -> MutationResult<()> {
        let v = self.schema.vocab();
        for ing in &old.ingredients {
            deadline.check()?;
            let Some(ingredient) = self.interner.get(&ident::ingredient_iri(&ing.name)) else {
                continue;
            };
            if !store
                .subjects_with(v.prop.of_ingredient, &Term::Id(ingredient))
                .is_empty()
            {
                continue;
            }
            debug!(ingredient = %self.interner.display(ingredient), "reaping orphaned ingredient");
            txn.remove(Triple::new(
                ingredient,
                v.prop.name,
                Term::Lit(crate::store::Literal::Str(ident::canonical_token(&ing.name))),
            ));
            txn.remove(Triple::new(
                ingredient,
                v.prop.ty,
                Term::Id(v.class.ingredient),
            ));
        }
        Ok(())
    }
}
