//! The in-memory fact store: schema-validated triples over interned subjects.
//!
//! A [`FactStore`] is one immutable-schema generation of the graph. All
//! indexes live behind a single `RwLock` so a reader never observes a
//! half-applied triple (forward index updated, reverse index not yet).
//! Mutations go through [`SharedGraph`], which hands out `Arc` snapshots to
//! readers and swaps in a freshly built store on rebuild.
//!
//! Validation happens on insert, not on read: every triple entering the
//! store is checked against the declared schema (predicate known, object in
//! range, type uniqueness, functional cardinality). Reads are unchecked and
//! cheap.

pub mod durable;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::ident::{fmt_decimal, Interner, SubjectId};
use crate::schema::{Range, Schema};

/// A typed literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Int(i64),
    Dec(f64),
    Bool(bool),
}

impl Literal {
    /// The literal kind name, for range-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Int(_) => "integer",
            Literal::Dec(_) => "decimal",
            Literal::Bool(_) => "boolean",
        }
    }
}

// Dec compares by bit pattern so Literal can be a hash key. NaN never enters
// the store (validation requires finite values), so bitwise equality matches
// numeric equality in practice.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Str(a), Literal::Str(b)) => a == b,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Dec(a), Literal::Dec(b)) => a.to_bits() == b.to_bits(),
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl std::hash::Hash for Literal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Str(s) => s.hash(state),
            Literal::Int(i) => i.hash(state),
            Literal::Dec(d) => d.to_bits().hash(state),
            Literal::Bool(b) => b.hash(state),
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Str(s) => write!(f, "\"{s}\""),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Dec(d) => f.write_str(&fmt_decimal(*d)),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A triple object: either a reference to another subject or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Id(SubjectId),
    Lit(Literal),
}

/// One fact: subject, predicate, object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: SubjectId,
    pub predicate: SubjectId,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: SubjectId, predicate: SubjectId, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

/// A match pattern; `None` is a wildcard.
#[derive(Debug, Clone, Default)]
pub struct TriplePattern {
    pub subject: Option<SubjectId>,
    pub predicate: Option<SubjectId>,
    pub object: Option<Term>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// subject -> predicate -> objects (insertion order per predicate).
    spo: HashMap<SubjectId, HashMap<SubjectId, Vec<Term>>>,
    /// (predicate, object) -> subjects, for reverse lookups.
    pos: HashMap<(SubjectId, Term), Vec<SubjectId>>,
    /// Declared type of each subject (exactly one).
    types: HashMap<SubjectId, SubjectId>,
    /// class -> member subjects.
    by_class: HashMap<SubjectId, Vec<SubjectId>>,
    /// Insertion sequence per subject, assigned when its type triple lands.
    seq: HashMap<SubjectId, u64>,
    next_seq: u64,
    triple_count: usize,
}

/// One generation of the validated fact graph.
#[derive(Debug)]
pub struct FactStore {
    schema: Arc<Schema>,
    interner: Arc<Interner>,
    version: u64,
    inner: RwLock<StoreInner>,
}

impl FactStore {
    /// Create an empty store for the given schema generation.
    pub fn new(schema: Arc<Schema>, interner: Arc<Interner>, version: u64) -> Self {
        Self {
            schema,
            interner,
            version,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Monotonic generation counter, bumped on every full rebuild.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.interner
    }

    /// Insert a triple after validating it against the schema.
    ///
    /// Returns `Ok(false)` when the triple (or an equivalent type/functional
    /// declaration) is already present — idempotent inserts are no-ops, not
    /// errors.
    pub fn add_triple(&self, subject: SubjectId, predicate: SubjectId, object: Term) -> StoreResult<bool> {
        let vocab = self.schema.vocab();
        let mut inner = self.write_inner();

        if predicate == vocab.prop.ty {
            let class = match object {
                Term::Id(class) => class,
                Term::Lit(lit) => {
                    return Err(StoreError::RangeMismatch {
                        subject: self.interner.display(subject),
                        predicate: "type".into(),
                        expected: "class reference".into(),
                        actual: lit.kind().into(),
                    })
                }
            };
            if self.schema.class(class).is_none() {
                return Err(StoreError::UndeclaredClass {
                    class: self.interner.display(class),
                });
            }
            match inner.types.get(&subject) {
                Some(&existing) if existing == class => return Ok(false),
                Some(&existing) => {
                    return Err(StoreError::TypeConflict {
                        subject: self.interner.display(subject),
                        existing: self.interner.display(existing),
                        requested: self.interner.display(class),
                    })
                }
                None => {}
            }
            inner.types.insert(subject, class);
            inner.by_class.entry(class).or_default().push(subject);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.seq.insert(subject, seq);
            Self::index_triple(&mut inner, subject, predicate, Term::Id(class));
            return Ok(true);
        }

        let prop = self
            .schema
            .property(predicate)
            .ok_or_else(|| StoreError::UndeclaredPredicate {
                predicate: self.interner.display(predicate),
            })?;

        self.check_range(&inner, subject, &prop.name, &prop.range, &object)?;

        let existing = inner
            .spo
            .get(&subject)
            .and_then(|preds| preds.get(&predicate));
        if let Some(objects) = existing {
            if objects.contains(&object) {
                return Ok(false);
            }
            if prop.functional && !objects.is_empty() {
                return Err(StoreError::FunctionalConflict {
                    subject: self.interner.display(subject),
                    predicate: prop.name.clone(),
                });
            }
        }

        Self::index_triple(&mut inner, subject, predicate, object);
        Ok(true)
    }

    /// Remove a triple. Returns `false` if it was not present.
    pub fn remove_triple(&self, subject: SubjectId, predicate: SubjectId, object: &Term) -> bool {
        let vocab = self.schema.vocab();
        let mut inner = self.write_inner();

        let removed = match inner.spo.get_mut(&subject) {
            Some(preds) => match preds.get_mut(&predicate) {
                Some(objects) => {
                    if let Some(pos) = objects.iter().position(|o| o == object) {
                        objects.remove(pos);
                        if objects.is_empty() {
                            preds.remove(&predicate);
                        }
                        true
                    } else {
                        false
                    }
                }
                None => false,
            },
            None => false,
        };
        if !removed {
            return false;
        }

        if let Some(subjects) = inner.pos.get_mut(&(predicate, object.clone())) {
            subjects.retain(|&s| s != subject);
        }
        inner.triple_count -= 1;

        if predicate == vocab.prop.ty {
            if let Term::Id(class) = object {
                if inner.types.get(&subject) == Some(class) {
                    inner.types.remove(&subject);
                    inner.seq.remove(&subject);
                    if let Some(members) = inner.by_class.get_mut(class) {
                        members.retain(|&s| s != subject);
                    }
                }
            }
        }
        true
    }

    /// All triples with the given subject.
    pub fn triples_for(&self, subject: SubjectId) -> Vec<Triple> {
        let inner = self.read_inner();
        let mut out = Vec::new();
        if let Some(preds) = inner.spo.get(&subject) {
            for (&predicate, objects) in preds {
                for object in objects {
                    out.push(Triple::new(subject, predicate, object.clone()));
                }
            }
        }
        out
    }

    /// Objects of `(subject, predicate, ?)`.
    pub fn objects_of(&self, subject: SubjectId, predicate: SubjectId) -> Vec<Term> {
        let inner = self.read_inner();
        inner
            .spo
            .get(&subject)
            .and_then(|preds| preds.get(&predicate))
            .cloned()
            .unwrap_or_default()
    }

    /// First object of a functional property, if present.
    pub fn object_of(&self, subject: SubjectId, predicate: SubjectId) -> Option<Term> {
        self.objects_of(subject, predicate).into_iter().next()
    }

    /// Subjects of `(?, predicate, object)`, via the reverse index.
    pub fn subjects_with(&self, predicate: SubjectId, object: &Term) -> Vec<SubjectId> {
        let inner = self.read_inner();
        inner
            .pos
            .get(&(predicate, object.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// The declared type of a subject.
    pub fn type_of(&self, subject: SubjectId) -> Option<SubjectId> {
        self.read_inner().types.get(&subject).copied()
    }

    /// Creation sequence assigned to a subject when its type triple landed.
    pub fn seq_of(&self, subject: SubjectId) -> Option<u64> {
        self.read_inner().seq.get(&subject).copied()
    }

    /// Re-insert a type triple under a previously assigned creation
    /// sequence. Mutation rollback uses this so an undone removal puts the
    /// subject back at its original position in creation order rather than
    /// at the end.
    pub fn reinsert_type(
        &self,
        subject: SubjectId,
        class: SubjectId,
        seq: u64,
    ) -> StoreResult<bool> {
        let vocab = self.schema.vocab();
        let mut inner = self.write_inner();

        if self.schema.class(class).is_none() {
            return Err(StoreError::UndeclaredClass {
                class: self.interner.display(class),
            });
        }
        match inner.types.get(&subject) {
            Some(&existing) if existing == class => return Ok(false),
            Some(&existing) => {
                return Err(StoreError::TypeConflict {
                    subject: self.interner.display(subject),
                    existing: self.interner.display(existing),
                    requested: self.interner.display(class),
                })
            }
            None => {}
        }
        inner.types.insert(subject, class);
        inner.by_class.entry(class).or_default().push(subject);
        inner.seq.insert(subject, seq);
        inner.next_seq = inner.next_seq.max(seq + 1);
        Self::index_triple(&mut inner, subject, vocab.prop.ty, Term::Id(class));
        Ok(true)
    }

    /// All subjects declared as `class` or one of its subclasses, in
    /// creation order.
    pub fn subjects_of_type(&self, class: SubjectId) -> Vec<SubjectId> {
        let inner = self.read_inner();
        let mut members: Vec<SubjectId> = self
            .schema
            .subclasses_of(class)
            .into_iter()
            .flat_map(|c| inner.by_class.get(&c).cloned().unwrap_or_default())
            .collect();
        members.sort_by_key(|s| inner.seq.get(s).copied().unwrap_or(u64::MAX));
        members
    }

    /// All triples matching the pattern. Wildcard fields match anything.
    pub fn match_pattern(&self, pattern: &TriplePattern) -> Vec<Triple> {
        let inner = self.read_inner();
        let mut out = Vec::new();
        let subjects: Vec<SubjectId> = match pattern.subject {
            Some(s) => vec![s],
            None => inner.spo.keys().copied().collect(),
        };
        for subject in subjects {
            let Some(preds) = inner.spo.get(&subject) else {
                continue;
            };
            for (&predicate, objects) in preds {
                if pattern.predicate.is_some_and(|p| p != predicate) {
                    continue;
                }
                for object in objects {
                    if pattern.object.as_ref().is_some_and(|o| o != object) {
                        continue;
                    }
                    out.push(Triple::new(subject, predicate, object.clone()));
                }
            }
        }
        out
    }

    /// Total number of triples.
    pub fn triple_count(&self) -> usize {
        self.read_inner().triple_count
    }

    fn check_range(
        &self,
        inner: &StoreInner,
        subject: SubjectId,
        predicate_name: &str,
        range: &Range,
        object: &Term,
    ) -> StoreResult<()> {
        let mismatch = |expected: String, actual: String| {
            Err(StoreError::RangeMismatch {
                subject: self.interner.display(subject),
                predicate: predicate_name.to_string(),
                expected,
                actual,
            })
        };
        match (range, object) {
            (Range::Str, Term::Lit(Literal::Str(_)))
            | (Range::Int, Term::Lit(Literal::Int(_)))
            | (Range::Dec, Term::Lit(Literal::Dec(_)))
            | (Range::Bool, Term::Lit(Literal::Bool(_))) => Ok(()),
            (Range::Instance(expected_class), Term::Id(target)) => {
                let Some(&actual_class) = inner.types.get(target) else {
                    return Err(StoreError::DanglingReference {
                        subject: self.interner.display(subject),
                        object: self.interner.display(*target),
                    });
                };
                if self.schema.is_subclass(actual_class, *expected_class) {
                    Ok(())
                } else {
                    mismatch(
                        format!("instance of {}", self.interner.display(*expected_class)),
                        format!("instance of {}", self.interner.display(actual_class)),
                    )
                }
            }
            (range, Term::Lit(lit)) => {
                mismatch(range.describe(&self.interner), lit.kind().into())
            }
            (range, Term::Id(target)) => mismatch(
                range.describe(&self.interner),
                format!("reference to {}", self.interner.display(*target)),
            ),
        }
    }

    fn index_triple(inner: &mut StoreInner, subject: SubjectId, predicate: SubjectId, object: Term) {
        inner
            .pos
            .entry((predicate, object.clone()))
            .or_default()
            .push(subject);
        inner
            .spo
            .entry(subject)
            .or_default()
            .entry(predicate)
            .or_default()
            .push(object);
        inner.triple_count += 1;
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Shared handle to the current store generation.
///
/// Readers take cheap `Arc` snapshots and are never blocked. Mutations hold
/// a read lease on the rebuild gate; a rebuild flips the rebuilding flag
/// (new mutations bounce with a transient error), drains in-flight leases by
/// taking the gate exclusively, builds the replacement aside, then publishes
/// it with a single pointer swap.
#[derive(Debug)]
pub struct SharedGraph {
    current: RwLock<Arc<FactStore>>,
    gate: RwLock<()>,
    rebuilding: AtomicBool,
}

/// Lease permitting in-place mutation of the current store.
pub struct MutationLease<'a> {
    store: Arc<FactStore>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl MutationLease<'_> {
    pub fn store(&self) -> &FactStore {
        &self.store
    }
}

/// Exclusive rebuild window. Dropping it clears the rebuilding flag.
pub struct RebuildGuard<'a> {
    graph: &'a SharedGraph,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.graph.rebuilding.store(false, Ordering::SeqCst);
    }
}

impl SharedGraph {
    pub fn new(initial: FactStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            gate: RwLock::new(()),
            rebuilding: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current generation for reads.
    pub fn handle(&self) -> Arc<FactStore> {
        Arc::clone(&self.current.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Acquire a mutation lease, or `None` while a rebuild is pending.
    pub fn try_lease(&self) -> Option<MutationLease<'_>> {
        if self.rebuilding.load(Ordering::SeqCst) {
            return None;
        }
        let gate = self.gate.read().unwrap_or_else(|p| p.into_inner());
        // Re-check after acquiring: a rebuild may have flipped the flag
        // between the load and the lock. It now waits on our guard, so bail
        // out rather than mutate a store about to be replaced.
        if self.rebuilding.load(Ordering::SeqCst) {
            return None;
        }
        Some(MutationLease {
            store: self.handle(),
            _gate: gate,
        })
    }

    /// Enter a rebuild window. Returns `None` if one is already in progress.
    ///
    /// Blocks until in-flight mutation leases drain.
    pub fn begin_rebuild(&self) -> Option<RebuildGuard<'_>> {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let gate = self.gate.write().unwrap_or_else(|p| p.into_inner());
        Some(RebuildGuard {
            graph: self,
            _gate: gate,
        })
    }

    /// Publish a freshly built store as the current generation.
    pub fn publish(&self, store: FactStore) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(store);
    }
}
