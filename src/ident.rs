//! Subject identifiers and canonical-name derivation.
//!
//! Every node in the fact graph is identified by a [`SubjectId`] — an
//! interned handle into a shared [`Interner`] that maps identifiers
//! (IRI-like strings such as `recipe:oat_bowl`) to compact `NonZeroU64`
//! handles. Edges are handle pairs, so the graph carries no pointer cycles.
//!
//! Recipe and ingredient identity is derived from a canonical token form of
//! the human-readable name: case-insensitive, whitespace collapsed to
//! underscores. The derivation is stable — the same title always yields the
//! same identifier.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Unique, niche-optimized handle for a graph subject.
///
/// Uses `NonZeroU64` so that `Option<SubjectId>` is the same size as
/// `SubjectId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SubjectId(NonZeroU64);

impl SubjectId {
    /// Create a `SubjectId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SubjectId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Thread-safe bidirectional identifier interner.
///
/// Interning is idempotent: the same string always yields the same handle.
/// The interner is shared by all store generations, so handles stay stable
/// across full rebuilds and cached dependency sets survive a store swap.
#[derive(Debug)]
pub struct Interner {
    forward: DashMap<String, SubjectId>,
    reverse: DashMap<SubjectId, String>,
    next: AtomicU64,
}

impl Interner {
    /// Create an empty interner. IDs start from 1.
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Intern an identifier, returning its stable handle.
    pub fn intern(&self, iri: &str) -> SubjectId {
        if let Some(existing) = self.forward.get(iri) {
            return *existing.value();
        }
        // Entry API keeps allocation race-free: the loser of a race reuses
        // the winner's handle.
        let id = *self
            .forward
            .entry(iri.to_string())
            .or_insert_with(|| {
                let raw = self.next.fetch_add(1, Ordering::Relaxed);
                SubjectId::new(raw).unwrap_or_else(|| unreachable!("u64 id space exhausted"))
            })
            .value();
        self.reverse.entry(id).or_insert_with(|| iri.to_string());
        id
    }

    /// Look up a handle without interning. Returns `None` if unknown.
    pub fn get(&self, iri: &str) -> Option<SubjectId> {
        self.forward.get(iri).map(|e| *e.value())
    }

    /// Resolve a handle back to its identifier string.
    pub fn resolve(&self, id: SubjectId) -> Option<String> {
        self.reverse.get(&id).map(|e| e.value().clone())
    }

    /// Resolve a handle, falling back to the numeric form for diagnostics.
    pub fn display(&self, id: SubjectId) -> String {
        self.resolve(id).unwrap_or_else(|| id.to_string())
    }

    /// Number of interned identifiers.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether no identifiers have been interned.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the canonical token form of a human-readable name.
///
/// Lowercases, trims, collapses whitespace runs to single underscores, and
/// spells out `%` and `&`. Everything else passes through unchanged, so two
/// titles differing only in case or spacing collide on purpose.
pub fn canonical_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true; // swallow leading separators
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else if ch == '%' {
            out.push_str("percent");
            last_was_sep = false;
        } else if ch == '&' {
            out.push_str("and");
            last_was_sep = false;
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_was_sep = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Derive the stable recipe identifier for a title.
pub fn recipe_iri(title: &str) -> String {
    format!("recipe:{}", canonical_token(title))
}

/// Derive the stable ingredient identifier for an ingredient name.
pub fn ingredient_iri(name: &str) -> String {
    format!("ingredient:{}", canonical_token(name))
}

/// Derive the identifier of the per-recipe ingredient-use node.
///
/// Use nodes are owned by their recipe: deleting the recipe removes them.
pub fn use_iri(recipe_id: &str, ingredient_name: &str) -> String {
    format!("use:{}:{}", recipe_id, canonical_token(ingredient_name))
}

/// Derive the identifier of a shared nutrient-fact node.
///
/// Facts are keyed by kind and value so recipes with equal nutrient values
/// share one node, matching `fmt_decimal` normalization.
pub fn nutrient_iri(kind: &str, value: f64) -> String {
    format!("nutrient:{}:{}", kind, fmt_decimal(value))
}

/// Canonical decimal formatting: shortest round-trip form, no trailing zeros.
///
/// `12.0` and `12` render identically, which keeps derived identifiers and
/// cache keys stable across numerically equal inputs.
pub fn fmt_decimal(value: f64) -> String {
    format!("{value}")
}
