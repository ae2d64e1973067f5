//! Recipe instance model: drafts coming in, records persisted, triples out.
//!
//! A [`RecipeDraft`] is what callers submit. Validation and identity
//! derivation turn it into a [`RecipeRecord`], the persisted authoritative
//! form. Records know how to render themselves as schema-conformant triples
//! for graph insertion; emission order guarantees a node's type triple lands
//! before anything references it.
//!
//! Recipe identity is derived from the title and is immutable — a patch
//! cannot rename a recipe. Rename by deleting and re-creating.

use serde::{Deserialize, Serialize};

use crate::error::{MutationError, MutationResult};
use crate::ident::{self, Interner};
use crate::schema::{DifficultyTier, MealType, Schema};
use crate::store::{Literal, Term, Triple};

/// One ingredient line of a recipe: what, how much, in which unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientUse {
    pub name: String,
    pub amount: f64,
    pub unit: String,
}

/// Caller-supplied recipe payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDraft {
    pub title: String,
    #[serde(default)]
    pub instructions: Vec<String>,
    pub prep_time_minutes: u32,
    /// Omitted: derived from ingredient count and prep time.
    #[serde(default)]
    pub difficulty: Option<DifficultyTier>,
    #[serde(default)]
    pub meal_type: Option<MealType>,
    #[serde(default)]
    pub vegan: bool,
    #[serde(default)]
    pub vegetarian: bool,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default)]
    pub carbohydrates: f64,
    #[serde(default)]
    pub ingredients: Vec<IngredientUse>,
}

/// Partial update. Absent fields keep their current value.
///
/// There is no `title` field on purpose: identity derives from the title.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipePatch {
    #[serde(default)]
    pub instructions: Option<Vec<String>>,
    #[serde(default)]
    pub prep_time_minutes: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<DifficultyTier>,
    #[serde(default)]
    pub meal_type: Option<Option<MealType>>,
    #[serde(default)]
    pub vegan: Option<bool>,
    #[serde(default)]
    pub vegetarian: Option<bool>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub protein: Option<f64>,
    #[serde(default)]
    pub fat: Option<f64>,
    #[serde(default)]
    pub carbohydrates: Option<f64>,
    #[serde(default)]
    pub ingredients: Option<Vec<IngredientUse>>,
}

/// The persisted, fully resolved form of a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: String,
    /// Creation sequence; drives stable result ordering.
    pub seq: u64,
    pub title: String,
    pub instructions: Vec<String>,
    pub prep_time_minutes: u32,
    pub difficulty: DifficultyTier,
    pub meal_type: Option<MealType>,
    pub vegan: bool,
    pub vegetarian: bool,
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
    pub ingredients: Vec<IngredientUse>,
}

/// Derive a difficulty tier from ingredient count and prep time.
///
/// Score is `ingredients * 3 + minutes`: under 20 is easy, under 60 is
/// moderate, anything above is hard.
pub fn derive_difficulty(ingredient_count: usize, prep_time_minutes: u32) -> DifficultyTier {
    let score = ingredient_count as u64 * 3 + u64::from(prep_time_minutes);
    if score < 20 {
        DifficultyTier::Easy
    } else if score < 60 {
        DifficultyTier::Moderate
    } else {
        DifficultyTier::Hard
    }
}

fn invalid(message: impl Into<String>) -> MutationError {
    MutationError::Validation {
        message: message.into(),
    }
}

fn check_nutrient(name: &str, value: f64) -> MutationResult<()> {
    if !value.is_finite() {
        return Err(invalid(format!("{name} must be a finite number")));
    }
    if value < 0.0 {
        return Err(invalid(format!("{name} must not be negative")));
    }
    Ok(())
}

fn check_common(
    title: &str,
    instructions: &[String],
    vegan: bool,
    vegetarian: bool,
    nutrients: [(&str, f64); 4],
    ingredients: &[IngredientUse],
) -> MutationResult<()> {
    if title.trim().is_empty() {
        return Err(invalid("title must not be empty"));
    }
    if instructions.is_empty() {
        return Err(invalid("at least one instruction step is required"));
    }
    if instructions.iter().any(|step| step.trim().is_empty()) {
        return Err(invalid("instruction steps must not be empty"));
    }
    if vegan && !vegetarian {
        return Err(invalid("a vegan recipe must also be vegetarian"));
    }
    for (name, value) in nutrients {
        check_nutrient(name, value)?;
    }
    let mut seen = std::collections::HashSet::new();
    for ing in ingredients {
        if ing.name.trim().is_empty() {
            return Err(invalid("ingredient names must not be empty"));
        }
        check_nutrient("ingredient amount", ing.amount)?;
        // Two names that canonicalize to the same token would collide on
        // the derived use-node identifier.
        if !seen.insert(ident::canonical_token(&ing.name)) {
            return Err(invalid(format!("duplicate ingredient \"{}\"", ing.name)));
        }
    }
    Ok(())
}

impl RecipeDraft {
    /// Validate all draft invariants.
    pub fn validate(&self) -> MutationResult<()> {
        check_common(
            &self.title,
            &self.instructions,
            self.vegan,
            self.vegetarian,
            [
                ("calories", self.calories),
                ("protein", self.protein),
                ("fat", self.fat),
                ("carbohydrates", self.carbohydrates),
            ],
            &self.ingredients,
        )
    }

    /// The identifier this draft's title derives.
    pub fn derived_id(&self) -> String {
        ident::recipe_iri(&self.title)
    }

    /// Resolve the draft into its persisted record form.
    pub fn into_record(self, id: String, seq: u64) -> RecipeRecord {
        let difficulty = self
            .difficulty
            .unwrap_or_else(|| derive_difficulty(self.ingredients.len(), self.prep_time_minutes));
        RecipeRecord {
            id,
            seq,
            title: self.title,
            instructions: self.instructions,
            prep_time_minutes: self.prep_time_minutes,
            difficulty,
            meal_type: self.meal_type,
            vegan: self.vegan,
            vegetarian: self.vegetarian,
            calories: self.calories,
            protein: self.protein,
            fat: self.fat,
            carbohydrates: self.carbohydrates,
            ingredients: self.ingredients,
        }
    }
}

impl RecipeRecord {
    /// Apply a patch in place. Difficulty is re-derived when ingredients or
    /// prep time change and the patch does not set it explicitly.
    pub fn apply_patch(&mut self, patch: &RecipePatch) {
        let shape_changed = patch.ingredients.is_some() || patch.prep_time_minutes.is_some();
        if let Some(instructions) = &patch.instructions {
            self.instructions = instructions.clone();
        }
        if let Some(minutes) = patch.prep_time_minutes {
            self.prep_time_minutes = minutes;
        }
        if let Some(meal_type) = patch.meal_type {
            self.meal_type = meal_type;
        }
        if let Some(vegan) = patch.vegan {
            self.vegan = vegan;
        }
        if let Some(vegetarian) = patch.vegetarian {
            self.vegetarian = vegetarian;
        }
        if let Some(calories) = patch.calories {
            self.calories = calories;
        }
        if let Some(protein) = patch.protein {
            self.protein = protein;
        }
        if let Some(fat) = patch.fat {
            self.fat = fat;
        }
        if let Some(carbohydrates) = patch.carbohydrates {
            self.carbohydrates = carbohydrates;
        }
        if let Some(ingredients) = &patch.ingredients {
            self.ingredients = ingredients.clone();
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = difficulty;
        } else if shape_changed {
            self.difficulty =
                derive_difficulty(self.ingredients.len(), self.prep_time_minutes);
        }
    }

    /// Validate record invariants (used after patching).
    pub fn validate(&self) -> MutationResult<()> {
        check_common(
            &self.title,
            &self.instructions,
            self.vegan,
            self.vegetarian,
            [
                ("calories", self.calories),
                ("protein", self.protein),
                ("fat", self.fat),
                ("carbohydrates", self.carbohydrates),
            ],
            &self.ingredients,
        )
    }

    /// Nutrient kinds and values, paired for uniform handling.
    pub fn nutrients(&self) -> [(&'static str, f64); 4] {
        [
            ("calories", self.calories),
            ("protein", self.protein),
            ("fat", self.fat),
            ("carbohydrates", self.carbohydrates),
        ]
    }

    /// Render the record as schema-conformant triples.
    ///
    /// Emission order matters: every node's type triple precedes any triple
    /// referencing that node, so the sequence can be replayed into a fresh
    /// store without dangling references.
    pub fn to_triples(&self, interner: &Interner, schema: &Schema) -> Vec<Triple> {
        let v = schema.vocab();
        let recipe = interner.intern(&self.id);
        let mut triples = Vec::new();

        triples.push(Triple::new(recipe, v.prop.ty, Term::Id(v.class.recipe)));
        triples.push(Triple::new(
            recipe,
            v.prop.title,
            Term::Lit(Literal::Str(self.title.clone())),
        ));
        for step in &self.instructions {
            triples.push(Triple::new(
                recipe,
                v.prop.instruction,
                Term::Lit(Literal::Str(step.clone())),
            ));
        }
        triples.push(Triple::new(
            recipe,
            v.prop.prep_time_minutes,
            Term::Lit(Literal::Int(i64::from(self.prep_time_minutes))),
        ));
        triples.push(Triple::new(
            recipe,
            v.prop.vegan,
            Term::Lit(Literal::Bool(self.vegan)),
        ));
        triples.push(Triple::new(
            recipe,
            v.prop.vegetarian,
            Term::Lit(Literal::Bool(self.vegetarian)),
        ));
        triples.push(Triple::new(
            recipe,
            v.prop.difficulty,
            Term::Id(interner.intern(self.difficulty.iri())),
        ));
        if let Some(meal) = self.meal_type {
            triples.push(Triple::new(
                recipe,
                v.prop.meal_type,
                Term::Id(interner.intern(meal.iri())),
            ));
        }

        // Shared nutrient-fact nodes, keyed by kind and value.
        let nutrient_props = [
            v.prop.has_calories,
            v.prop.has_protein,
            v.prop.has_fat,
            v.prop.has_carbohydrates,
        ];
        for ((kind, value), prop) in self.nutrients().into_iter().zip(nutrient_props) {
            let fact = interner.intern(&ident::nutrient_iri(kind, value));
            triples.push(Triple::new(fact, v.prop.ty, Term::Id(v.class.nutrient_fact)));
            triples.push(Triple::new(
                fact,
                v.prop.value,
                Term::Lit(Literal::Dec(value)),
            ));
            triples.push(Triple::new(recipe, prop, Term::Id(fact)));
        }

        // Ingredients and their per-recipe use nodes.
        for ing in &self.ingredients {
            let ingredient = interner.intern(&ident::ingredient_iri(&ing.name));
            triples.push(Triple::new(
                ingredient,
                v.prop.ty,
                Term::Id(v.class.ingredient),
            ));
            // The shared ingredient node carries the canonical token, not the
            // raw spelling: recipes differing only in case or spacing must
            // agree on the shared node's functional name value.
            triples.push(Triple::new(
                ingredient,
                v.prop.name,
                Term::Lit(Literal::Str(ident::canonical_token(&ing.name))),
            ));

            let usage = interner.intern(&ident::use_iri(&self.id, &ing.name));
            triples.push(Triple::new(
                usage,
                v.prop.ty,
                Term::Id(v.class.ingredient_use),
            ));
            triples.push(Triple::new(usage, v.prop.of_ingredient, Term::Id(ingredient)));
            triples.push(Triple::new(
                usage,
                v.prop.amount,
                Term::Lit(Literal::Dec(ing.amount)),
            ));
            triples.push(Triple::new(
                usage,
                v.prop.unit,
                Term::Lit(Literal::Str(ing.unit.clone())),
            ));
            triples.push(Triple::new(recipe, v.prop.uses_ingredient, Term::Id(usage)));
        }

        triples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn draft(title: &str) -> RecipeDraft {
        RecipeDraft {
            title: title.to_string(),
            instructions: vec!["Mix everything".into()],
            prep_time_minutes: 5,
            difficulty: None,
            meal_type: Some(MealType::Breakfast),
            vegan: true,
            vegetarian: true,
            calories: 300.0,
            protein: 12.0,
            fat: 6.0,
            carbohydrates: 45.0,
            ingredients: vec![
                IngredientUse {
                    name: "Rolled Oats".into(),
                    amount: 80.0,
                    unit: "g".into(),
                },
                IngredientUse {
                    name: "Oat Milk".into(),
                    amount: 200.0,
                    unit: "ml".into(),
                },
            ],
        }
    }

    #[test]
    fn difficulty_tiers_from_score() {
        // 2 ingredients, 5 minutes: score 11.
        assert_eq!(derive_difficulty(2, 5), DifficultyTier::Easy);
        // Boundary: score exactly 20 is moderate.
        assert_eq!(derive_difficulty(0, 20), DifficultyTier::Moderate);
        assert_eq!(derive_difficulty(5, 40), DifficultyTier::Moderate);
        // Boundary: score exactly 60 is hard.
        assert_eq!(derive_difficulty(0, 60), DifficultyTier::Hard);
        assert_eq!(derive_difficulty(10, 90), DifficultyTier::Hard);
    }

    #[test]
    fn explicit_difficulty_wins_over_derivation() {
        let mut d = draft("Oat Bowl");
        d.difficulty = Some(DifficultyTier::Hard);
        let record = d.into_record("recipe:oat_bowl".into(), 0);
        assert_eq!(record.difficulty, DifficultyTier::Hard);
    }

    #[test]
    fn derived_difficulty_fills_in() {
        let record = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        assert_eq!(record.difficulty, DifficultyTier::Easy);
    }

    #[test]
    fn validation_rejects_bad_drafts() {
        let mut empty_title = draft(" ");
        empty_title.title = "  ".into();
        assert!(empty_title.validate().is_err());

        let mut no_steps = draft("Oat Bowl");
        no_steps.instructions.clear();
        assert!(no_steps.validate().is_err());

        let mut vegan_paradox = draft("Oat Bowl");
        vegan_paradox.vegetarian = false;
        assert!(vegan_paradox.validate().is_err());

        let mut negative = draft("Oat Bowl");
        negative.protein = -1.0;
        assert!(negative.validate().is_err());

        let mut nan = draft("Oat Bowl");
        nan.calories = f64::NAN;
        assert!(nan.validate().is_err());

        let mut dup = draft("Oat Bowl");
        dup.ingredients.push(IngredientUse {
            name: "rolled  oats".into(),
            amount: 10.0,
            unit: "g".into(),
        });
        assert!(dup.validate().is_err());

        assert!(draft("Oat Bowl").validate().is_ok());
    }

    #[test]
    fn patch_rederives_difficulty_when_shape_changes() {
        let mut record = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        assert_eq!(record.difficulty, DifficultyTier::Easy);

        record.apply_patch(&RecipePatch {
            prep_time_minutes: Some(55),
            ..Default::default()
        });
        assert_eq!(record.difficulty, DifficultyTier::Hard);

        // Explicit difficulty in the patch is not overridden.
        record.apply_patch(&RecipePatch {
            prep_time_minutes: Some(5),
            difficulty: Some(DifficultyTier::Moderate),
            ..Default::default()
        });
        assert_eq!(record.difficulty, DifficultyTier::Moderate);
    }

    #[test]
    fn patch_leaves_unrelated_fields_alone() {
        let mut record = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        record.apply_patch(&RecipePatch {
            protein: Some(20.0),
            ..Default::default()
        });
        assert_eq!(record.protein, 20.0);
        assert_eq!(record.calories, 300.0);
        assert_eq!(record.title, "Oat Bowl");
        assert_eq!(record.difficulty, DifficultyTier::Easy);
    }

    #[test]
    fn meal_type_can_be_cleared_by_patch() {
        let mut record = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        record.apply_patch(&RecipePatch {
            meal_type: Some(None),
            ..Default::default()
        });
        assert_eq!(record.meal_type, None);
    }

    #[test]
    fn triples_type_nodes_before_referencing_them() {
        let interner = Arc::new(Interner::new());
        let schema = Schema::base(&interner);
        let record = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        let triples = record.to_triples(&interner, &schema);
        let v = schema.vocab();

        // Every Term::Id object must have its type triple earlier in the
        // sequence (or be a base individual such as a tier or meal tag).
        let mut typed: std::collections::HashSet<_> = std::collections::HashSet::new();
        for t in schema.base_individuals(&interner) {
            typed.insert(t.subject);
        }
        for triple in &triples {
            if triple.predicate == v.prop.ty {
                typed.insert(triple.subject);
            } else if let Term::Id(target) = triple.object {
                assert!(
                    typed.contains(&target),
                    "reference to untyped node {}",
                    interner.display(target)
                );
            }
        }
    }

    #[test]
    fn triples_share_nutrient_nodes_by_value() {
        let interner = Arc::new(Interner::new());
        let schema = Schema::base(&interner);
        let a = draft("Oat Bowl").into_record("recipe:oat_bowl".into(), 0);
        let mut b_draft = draft("Oat Porridge");
        b_draft.protein = 12.0; // same as a
        let b = b_draft.into_record("recipe:oat_porridge".into(), 1);

        let _ = a.to_triples(&interner, &schema);
        let _ = b.to_triples(&interner, &schema);
        // Both recipes interned the same protein fact node.
        assert!(interner.get("nutrient:protein:12").is_some());
        assert_eq!(
            interner.get("nutrient:protein:12"),
            interner.get(&ident::nutrient_iri("protein", 12.0))
        );
    }

    #[test]
    fn draft_deserializes_from_camel_case_json() {
        let json = r#"{
            "title": "Oat Bowl",
            "instructions": ["Mix"],
            "prepTimeMinutes": 5,
            "mealType": "breakfast",
            "vegan": true,
            "vegetarian": true,
            "calories": 300,
            "protein": 12,
            "ingredients": [{"name": "Oats", "amount": 80, "unit": "g"}]
        }"#;
        let draft: RecipeDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.prep_time_minutes, 5);
        assert_eq!(draft.meal_type, Some(MealType::Breakfast));
        assert_eq!(draft.fat, 0.0);
    }
}
