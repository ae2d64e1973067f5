//! The immutable base schema: class hierarchy, property declarations, and
//! well-known vocabulary handles.
//!
//! The hierarchy is fixed and small — this is deliberately not a general OWL
//! reasoner. `Entity` is the root; `Recipe`, `Ingredient`, `IngredientUse`,
//! `NutrientFact`, and `Tag` sit under it; `MealType` and `DifficultyTier`
//! specialize `Tag`. Subclass inference goes exactly as deep as this tree.
//!
//! The base schema also carries its static individuals: the three meal-type
//! tags and the three difficulty tiers. They live in the immutable partition
//! and are seeded into every store generation by the graph builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ident::{Interner, SubjectId};
use crate::store::{Literal, Term, Triple};

/// Meal-type tag for a recipe. At most one per recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub const ALL: [MealType; 3] = [MealType::Breakfast, MealType::Lunch, MealType::Dinner];

    /// Stable identifier of this tag's subject.
    pub fn iri(self) -> &'static str {
        match self {
            MealType::Breakfast => "meal:breakfast",
            MealType::Lunch => "meal:lunch",
            MealType::Dinner => "meal:dinner",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
        }
    }
}

impl std::fmt::Display for MealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            other => Err(format!("unknown meal type \"{other}\"")),
        }
    }
}

/// Difficulty tier of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyTier {
    Easy,
    Moderate,
    Hard,
}

impl DifficultyTier {
    pub const ALL: [DifficultyTier; 3] = [
        DifficultyTier::Easy,
        DifficultyTier::Moderate,
        DifficultyTier::Hard,
    ];

    /// Stable identifier of this tier's subject.
    pub fn iri(self) -> &'static str {
        match self {
            DifficultyTier::Easy => "tier:easy",
            DifficultyTier::Moderate => "tier:moderate",
            DifficultyTier::Hard => "tier:hard",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            DifficultyTier::Easy => "Easy",
            DifficultyTier::Moderate => "Moderate",
            DifficultyTier::Hard => "Hard",
        }
    }
}

impl std::fmt::Display for DifficultyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for DifficultyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(DifficultyTier::Easy),
            "moderate" => Ok(DifficultyTier::Moderate),
            "hard" => Ok(DifficultyTier::Hard),
            other => Err(format!("unknown difficulty tier \"{other}\"")),
        }
    }
}

/// Declared range of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    /// String literal.
    Str,
    /// Integer literal.
    Int,
    /// Decimal literal.
    Dec,
    /// Boolean literal.
    Bool,
    /// Reference to a subject typed as the given class (or a subclass).
    Instance(SubjectId),
}

impl Range {
    /// Short description for diagnostics.
    pub fn describe(&self, interner: &Interner) -> String {
        match self {
            Range::Str => "string".into(),
            Range::Int => "integer".into(),
            Range::Dec => "decimal".into(),
            Range::Bool => "boolean".into(),
            Range::Instance(class) => format!("instance of {}", interner.display(*class)),
        }
    }
}

/// A class in the fixed hierarchy.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: SubjectId,
    pub name: String,
    pub parent: Option<SubjectId>,
}

/// A declared property with domain, range, and cardinality.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub id: SubjectId,
    pub name: String,
    pub domain: SubjectId,
    pub range: Range,
    /// Functional properties hold at most one value per subject.
    pub functional: bool,
}

/// Well-known class handles, interned once per engine.
#[derive(Debug, Clone, Copy)]
pub struct ClassIds {
    pub entity: SubjectId,
    pub recipe: SubjectId,
    pub ingredient: SubjectId,
    pub ingredient_use: SubjectId,
    pub nutrient_fact: SubjectId,
    pub tag: SubjectId,
    pub meal_type: SubjectId,
    pub difficulty_tier: SubjectId,
}

/// Well-known property handles.
#[derive(Debug, Clone, Copy)]
pub struct PropIds {
    pub ty: SubjectId,
    pub title: SubjectId,
    pub instruction: SubjectId,
    pub prep_time_minutes: SubjectId,
    pub vegan: SubjectId,
    pub vegetarian: SubjectId,
    pub difficulty: SubjectId,
    pub meal_type: SubjectId,
    pub uses_ingredient: SubjectId,
    pub of_ingredient: SubjectId,
    pub amount: SubjectId,
    pub unit: SubjectId,
    pub name: SubjectId,
    pub has_calories: SubjectId,
    pub has_protein: SubjectId,
    pub has_fat: SubjectId,
    pub has_carbohydrates: SubjectId,
    pub value: SubjectId,
    pub label: SubjectId,
}

/// Pre-interned vocabulary: every well-known class and property handle.
#[derive(Debug, Clone, Copy)]
pub struct Vocab {
    pub class: ClassIds,
    pub prop: PropIds,
}

/// The immutable base schema.
#[derive(Debug)]
pub struct Schema {
    vocab: Vocab,
    classes: HashMap<SubjectId, ClassDef>,
    properties: HashMap<SubjectId, PropertyDef>,
}

impl Schema {
    /// Build the fixed base schema, interning its vocabulary.
    pub fn base(interner: &Interner) -> Self {
        let class = ClassIds {
            entity: interner.intern("Entity"),
            recipe: interner.intern("Recipe"),
            ingredient: interner.intern("Ingredient"),
            ingredient_use: interner.intern("IngredientUse"),
            nutrient_fact: interner.intern("NutrientFact"),
            tag: interner.intern("Tag"),
            meal_type: interner.intern("MealType"),
            difficulty_tier: interner.intern("DifficultyTier"),
        };
        let prop = PropIds {
            ty: interner.intern("type"),
            title: interner.intern("title"),
            instruction: interner.intern("instruction"),
            prep_time_minutes: interner.intern("prepTimeMinutes"),
            vegan: interner.intern("vegan"),
            vegetarian: interner.intern("vegetarian"),
            difficulty: interner.intern("difficulty"),
            meal_type: interner.intern("mealType"),
            uses_ingredient: interner.intern("usesIngredient"),
            of_ingredient: interner.intern("ofIngredient"),
            amount: interner.intern("amount"),
            unit: interner.intern("unit"),
            name: interner.intern("name"),
            has_calories: interner.intern("hasCalories"),
            has_protein: interner.intern("hasProtein"),
            has_fat: interner.intern("hasFat"),
            has_carbohydrates: interner.intern("hasCarbohydrates"),
            value: interner.intern("value"),
            label: interner.intern("label"),
        };

        let mut classes = HashMap::new();
        let mut declare_class = |id: SubjectId, name: &str, parent: Option<SubjectId>| {
            classes.insert(
                id,
                ClassDef {
                    id,
                    name: name.to_string(),
                    parent,
                },
            );
        };
        declare_class(class.entity, "Entity", None);
        declare_class(class.recipe, "Recipe", Some(class.entity));
        declare_class(class.ingredient, "Ingredient", Some(class.entity));
        declare_class(class.ingredient_use, "IngredientUse", Some(class.entity));
        declare_class(class.nutrient_fact, "NutrientFact", Some(class.entity));
        declare_class(class.tag, "Tag", Some(class.entity));
        declare_class(class.meal_type, "MealType", Some(class.tag));
        declare_class(class.difficulty_tier, "DifficultyTier", Some(class.tag));

        let mut properties = HashMap::new();
        let mut declare = |id: SubjectId, name: &str, domain: SubjectId, range: Range, functional: bool| {
            properties.insert(
                id,
                PropertyDef {
                    id,
                    name: name.to_string(),
                    domain,
                    range,
                    functional,
                },
            );
        };
        declare(prop.title, "title", class.recipe, Range::Str, true);
        declare(prop.instruction, "instruction", class.recipe, Range::Str, false);
        declare(
            prop.prep_time_minutes,
            "prepTimeMinutes",
            class.recipe,
            Range::Int,
            true,
        );
        declare(prop.vegan, "vegan", class.recipe, Range::Bool, true);
        declare(prop.vegetarian, "vegetarian", class.recipe, Range::Bool, true);
        declare(
            prop.difficulty,
            "difficulty",
            class.recipe,
            Range::Instance(class.difficulty_tier),
            true,
        );
        declare(
            prop.meal_type,
            "mealType",
            class.recipe,
            Range::Instance(class.meal_type),
            true,
        );
        declare(
            prop.uses_ingredient,
            "usesIngredient",
            class.recipe,
            Range::Instance(class.ingredient_use),
            false,
        );
        declare(
            prop.of_ingredient,
            "ofIngredient",
            class.ingredient_use,
            Range::Instance(class.ingredient),
            true,
        );
        declare(prop.amount, "amount", class.ingredient_use, Range::Dec, true);
        declare(prop.unit, "unit", class.ingredient_use, Range::Str, true);
        declare(prop.name, "name", class.ingredient, Range::Str, true);
        for (id, name) in [
            (prop.has_calories, "hasCalories"),
            (prop.has_protein, "hasProtein"),
            (prop.has_fat, "hasFat"),
            (prop.has_carbohydrates, "hasCarbohydrates"),
        ] {
            declare(id, name, class.recipe, Range::Instance(class.nutrient_fact), true);
        }
        declare(prop.value, "value", class.nutrient_fact, Range::Dec, true);
        declare(prop.label, "label", class.tag, Range::Str, true);

        Self {
            vocab: Vocab { class, prop },
            classes,
            properties,
        }
    }

    /// The pre-interned vocabulary handles.
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Look up a class declaration.
    pub fn class(&self, id: SubjectId) -> Option<&ClassDef> {
        self.classes.get(&id)
    }

    /// Look up a property declaration.
    pub fn property(&self, id: SubjectId) -> Option<&PropertyDef> {
        self.properties.get(&id)
    }

    /// Whether `sub` is `sup` or a (transitive) subclass of it.
    pub fn is_subclass(&self, sub: SubjectId, sup: SubjectId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.classes.get(&id).and_then(|c| c.parent);
        }
        false
    }

    /// All classes at or below `class` in the hierarchy (including itself).
    pub fn subclasses_of(&self, class: SubjectId) -> Vec<SubjectId> {
        self.classes
            .keys()
            .copied()
            .filter(|&c| self.is_subclass(c, class))
            .collect()
    }

    /// Triples for the static base individuals: meal-type tags and
    /// difficulty tiers. Seeded into every store generation.
    pub fn base_individuals(&self, interner: &Interner) -> Vec<Triple> {
        let v = &self.vocab;
        let mut triples = Vec::with_capacity(12);
        for meal in MealType::ALL {
            let subject = interner.intern(meal.iri());
            triples.push(Triple::new(subject, v.prop.ty, Term::Id(v.class.meal_type)));
            triples.push(Triple::new(
                subject,
                v.prop.label,
                Term::Lit(Literal::Str(meal.label().to_string())),
            ));
        }
        for tier in DifficultyTier::ALL {
            let subject = interner.intern(tier.iri());
            triples.push(Triple::new(
                subject,
                v.prop.ty,
                Term::Id(v.class.difficulty_tier),
            ));
            triples.push(Triple::new(
                subject,
                v.prop.label,
                Term::Lit(Literal::Str(tier.label().to_string())),
            ));
        }
        triples
    }
}
