//! Full graph construction: base schema individuals plus replayed records.
//!
//! A build always happens off to the side, against a fresh [`FactStore`].
//! The caller publishes the result only on success, so a failing build never
//! disturbs the currently served generation.

use std::sync::Arc;

use tracing::info;

use crate::error::BuildError;
use crate::ident::Interner;
use crate::recipe::RecipeRecord;
use crate::schema::Schema;
use crate::store::FactStore;

/// Build a complete store generation from an instance snapshot.
///
/// Records are replayed in creation-sequence order so derived result
/// ordering is identical across rebuilds and restarts.
pub fn build_graph(
    schema: Arc<Schema>,
    interner: Arc<Interner>,
    records: &[RecipeRecord],
    version: u64,
) -> Result<FactStore, BuildError> {
    let store = FactStore::new(Arc::clone(&schema), Arc::clone(&interner), version);

    for triple in schema.base_individuals(&interner) {
        let subject = triple.subject;
        store
            .add_triple(triple.subject, triple.predicate, triple.object)
            .map_err(|source| BuildError::Replay {
                id: interner.display(subject),
                source,
            })?;
    }

    let mut ordered: Vec<&RecipeRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.seq);
    for record in &ordered {
        for triple in record.to_triples(&interner, &schema) {
            store
                .add_triple(triple.subject, triple.predicate, triple.object)
                .map_err(|source| BuildError::Replay {
                    id: record.id.clone(),
                    source,
                })?;
        }
    }

    info!(
        version,
        recipes = ordered.len(),
        triples = store.triple_count(),
        "graph build complete"
    );
    Ok(store)
}
