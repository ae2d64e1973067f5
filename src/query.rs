//! Multi-criterion recipe search over the fact graph.
//!
//! Criteria are conjunctive: a recipe matches only if it passes every
//! present filter. A recipe missing a filtered property fails that filter —
//! absence is never treated as a wildcard. "No results" is an empty answer,
//! not an error; only malformed criteria (negative or non-finite
//! thresholds) are rejected.
//!
//! Filters are ordered cheap-first: boolean and tag checks, then numeric
//! thresholds, then the ingredient-subset test.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::ident::{self, fmt_decimal, SubjectId};
use crate::schema::{DifficultyTier, MealType};
use crate::store::{FactStore, Literal, Term};

/// Search criteria. All fields optional; present fields are ANDed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    #[serde(default)]
    pub min_protein: Option<f64>,
    #[serde(default)]
    pub min_fat: Option<f64>,
    #[serde(default)]
    pub min_carbohydrates: Option<f64>,
    #[serde(default)]
    pub max_calories: Option<f64>,
    #[serde(default)]
    pub vegan: Option<bool>,
    #[serde(default)]
    pub vegetarian: Option<bool>,
    #[serde(default)]
    pub meal_type: Option<MealType>,
    #[serde(default)]
    pub difficulty: Option<DifficultyTier>,
    #[serde(default)]
    pub max_time_minutes: Option<u32>,
    /// Pantry contents: matching recipes must use only these ingredients.
    #[serde(default)]
    pub available_ingredients: Option<Vec<String>>,
}

/// Opaque, stable cache key for a criteria set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Criteria {
    /// Whether no filter is present (matches every recipe).
    pub fn is_empty(&self) -> bool {
        self.min_protein.is_none()
            && self.min_fat.is_none()
            && self.min_carbohydrates.is_none()
            && self.max_calories.is_none()
            && self.vegan.is_none()
            && self.vegetarian.is_none()
            && self.meal_type.is_none()
            && self.difficulty.is_none()
            && self.max_time_minutes.is_none()
            && self.available_ingredients.is_none()
    }

    /// Reject non-finite or negative thresholds.
    pub fn validate(&self) -> QueryResult<()> {
        let check = |field: &'static str, value: Option<f64>| -> QueryResult<()> {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(QueryError::InvalidCriteria {
                        field,
                        message: "must be a finite number".into(),
                    });
                }
                if v < 0.0 {
                    return Err(QueryError::InvalidCriteria {
                        field,
                        message: "must not be negative".into(),
                    });
                }
            }
            Ok(())
        };
        check("minProtein", self.min_protein)?;
        check("minFat", self.min_fat)?;
        check("minCarbohydrates", self.min_carbohydrates)?;
        check("maxCalories", self.max_calories)?;
        Ok(())
    }

    /// Whether a cached answer for this query can be invalidated by any
    /// recipe change, not just by changes to its own matches.
    ///
    /// Ingredient-based queries can gain matches when an unrelated recipe
    /// changes its ingredient list; the empty query matches everything.
    pub fn is_broad(&self) -> bool {
        self.available_ingredients.is_some() || self.is_empty()
    }

    /// Canonical pantry tokens, when the ingredient filter is present.
    pub fn available_tokens(&self) -> Option<BTreeSet<String>> {
        self.available_ingredients.as_ref().map(|names| {
            names
                .iter()
                .map(|n| ident::canonical_token(n))
                .collect()
        })
    }

    /// Deterministic cache key: two equivalent criteria sets (up to
    /// ingredient order, spacing, and case) produce the same key.
    pub fn cache_key(&self) -> CacheKey {
        let mut parts: Vec<String> = Vec::new();
        let dec = |name: &str, value: Option<f64>, parts: &mut Vec<String>| {
            if let Some(v) = value {
                parts.push(format!("{name}={}", fmt_decimal(v)));
            }
        };
        dec("minProtein", self.min_protein, &mut parts);
        dec("minFat", self.min_fat, &mut parts);
        dec("minCarbohydrates", self.min_carbohydrates, &mut parts);
        dec("maxCalories", self.max_calories, &mut parts);
        if let Some(v) = self.vegan {
            parts.push(format!("vegan={v}"));
        }
        if let Some(v) = self.vegetarian {
            parts.push(format!("vegetarian={v}"));
        }
        if let Some(m) = self.meal_type {
            parts.push(format!("mealType={}", m.iri()));
        }
        if let Some(d) = self.difficulty {
            parts.push(format!("difficulty={}", d.iri()));
        }
        if let Some(t) = self.max_time_minutes {
            parts.push(format!("maxTimeMinutes={t}"));
        }
        if let Some(tokens) = self.available_tokens() {
            let joined: Vec<String> = tokens.into_iter().collect();
            parts.push(format!("availableIngredients={}", joined.join(",")));
        }
        CacheKey(parts.join(";"))
    }
}

/// Outcome of a criteria evaluation against one store generation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Matching recipe subjects, in creation order.
    pub matches: Vec<SubjectId>,
    /// Every recipe examined, matching or not. A cached answer stays
    /// valid only while none of these change, so this — not `matches` —
    /// is the dependency set the cache records.
    pub examined: Vec<SubjectId>,
}

impl Evaluation {
    /// How many recipes were examined.
    pub fn searched(&self) -> usize {
        self.examined.len()
    }
}

/// Evaluate criteria against a store snapshot.
pub fn evaluate(store: &FactStore, criteria: &Criteria) -> Evaluation {
    let v = store.schema().vocab();
    let candidates = store.subjects_of_type(v.class.recipe);
    let pantry = criteria.available_tokens();

    let meal_tag = criteria
        .meal_type
        .and_then(|m| store.interner().get(m.iri()));
    let tier_tag = criteria
        .difficulty
        .and_then(|d| store.interner().get(d.iri()));

    let matches = candidates
        .iter()
        .copied()
        .filter(|&recipe| passes(store, recipe, criteria, meal_tag, tier_tag, pantry.as_ref()))
        .collect();
    Evaluation {
        matches,
        examined: candidates,
    }
}

fn passes(
    store: &FactStore,
    recipe: SubjectId,
    criteria: &Criteria,
    meal_tag: Option<SubjectId>,
    tier_tag: Option<SubjectId>,
    pantry: Option<&BTreeSet<String>>,
) -> bool {
    let v = store.schema().vocab();

    if let Some(want) = criteria.vegan {
        match store.object_of(recipe, v.prop.vegan) {
            Some(Term::Lit(Literal::Bool(actual))) if actual == want => {}
            _ => return false,
        }
    }
    if let Some(want) = criteria.vegetarian {
        match store.object_of(recipe, v.prop.vegetarian) {
            Some(Term::Lit(Literal::Bool(actual))) if actual == want => {}
            _ => return false,
        }
    }
    if criteria.meal_type.is_some() {
        // A tag that was never interned cannot be carried by any recipe.
        let Some(tag) = meal_tag else { return false };
        if store.object_of(recipe, v.prop.meal_type) != Some(Term::Id(tag)) {
            return false;
        }
    }
    if criteria.difficulty.is_some() {
        let Some(tag) = tier_tag else { return false };
        if store.object_of(recipe, v.prop.difficulty) != Some(Term::Id(tag)) {
            return false;
        }
    }
    if let Some(max) = criteria.max_time_minutes {
        match store.object_of(recipe, v.prop.prep_time_minutes) {
            Some(Term::Lit(Literal::Int(minutes))) if minutes <= i64::from(max) => {}
            _ => return false,
        }
    }

    // Numeric thresholds, inclusive at the boundary.
    let nutrient = |prop: SubjectId| -> Option<f64> {
        let fact = match store.object_of(recipe, prop) {
            Some(Term::Id(fact)) => fact,
            _ => return None,
        };
        match store.object_of(fact, v.prop.value) {
            Some(Term::Lit(Literal::Dec(value))) => Some(value),
            _ => None,
        }
    };
    if let Some(min) = criteria.min_protein {
        match nutrient(v.prop.has_protein) {
            Some(value) if value >= min => {}
            _ => return false,
        }
    }
    if let Some(min) = criteria.min_fat {
        match nutrient(v.prop.has_fat) {
            Some(value) if value >= min => {}
            _ => return false,
        }
    }
    if let Some(min) = criteria.min_carbohydrates {
        match nutrient(v.prop.has_carbohydrates) {
            Some(value) if value >= min => {}
            _ => return false,
        }
    }
    if let Some(max) = criteria.max_calories {
        match nutrient(v.prop.has_calories) {
            Some(value) if value <= max => {}
            _ => return false,
        }
    }

    // Pantry check: every ingredient the recipe uses must be available.
    if let Some(available) = pantry {
        for usage in store.objects_of(recipe, v.prop.uses_ingredient) {
            let Term::Id(usage) = usage else { return false };
            let ingredient = match store.object_of(usage, v.prop.of_ingredient) {
                Some(Term::Id(ingredient)) => ingredient,
                _ => return false,
            };
            let Some(iri) = store.interner().resolve(ingredient) else {
                return false;
            };
            let token = iri.strip_prefix("ingredient:").unwrap_or(&iri);
            if !available.contains(token) {
                return false;
            }
        }
    }

    true
}
