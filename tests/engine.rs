//! End-to-end engine behavior through the public API.

use std::time::Duration;

use larder::engine::{Engine, EngineConfig};
use larder::jobs::JobState;
use larder::query::Criteria;
use larder::recipe::{IngredientUse, RecipeDraft, RecipePatch};
use larder::schema::MealType;

fn draft(title: &str, protein: f64, calories: f64, vegan: bool, minutes: u32) -> RecipeDraft {
    RecipeDraft {
        title: title.to_string(),
        instructions: vec!["Combine and serve".into()],
        prep_time_minutes: minutes,
        difficulty: None,
        meal_type: Some(MealType::Breakfast),
        vegan,
        vegetarian: true,
        calories,
        protein,
        fat: 5.0,
        carbohydrates: 40.0,
        ingredients: Vec::new(),
    }
}

fn with_ingredients(mut d: RecipeDraft, names: &[&str]) -> RecipeDraft {
    d.ingredients = names
        .iter()
        .map(|n| IngredientUse {
            name: (*n).to_string(),
            amount: 1.0,
            unit: "unit".into(),
        })
        .collect();
    d
}

fn commit(engine: &Engine, draft: RecipeDraft) {
    let job = engine.submit_create(draft).unwrap();
    let status = engine.wait(job, Duration::from_secs(10)).unwrap();
    assert_eq!(status.state, JobState::Committed, "{:?}", status.error);
}

#[test]
fn empty_criteria_return_all_in_creation_order() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));
    commit(&engine, draft("Steak Dinner", 40.0, 700.0, false, 45));
    commit(&engine, draft("Fruit Salad", 2.0, 150.0, true, 10));

    let outcome = engine.search(&Criteria::default()).unwrap();
    assert_eq!(
        outcome.matches,
        vec!["recipe:oat_bowl", "recipe:steak_dinner", "recipe:fruit_salad"]
    );
    assert_eq!(outcome.searched, 3);
}

#[test]
fn pantry_scenario() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(
        &engine,
        with_ingredients(draft("Oat Bowl", 12.0, 300.0, true, 5), &["Oats", "Milk"]),
    );

    // Nutrition plus vegan filter matches.
    let outcome = engine
        .search(&Criteria {
            min_protein: Some(10.0),
            max_calories: Some(350.0),
            vegan: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(outcome.matches, vec!["recipe:oat_bowl"]);

    // Pantry missing milk excludes the recipe.
    let outcome = engine
        .search(&Criteria {
            available_ingredients: Some(vec!["Oats".into()]),
            ..Default::default()
        })
        .unwrap();
    assert!(outcome.matches.is_empty());

    // Pantry superset includes it again.
    let outcome = engine
        .search(&Criteria {
            available_ingredients: Some(vec!["oats".into(), "Milk".into(), "Honey".into()]),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(outcome.matches, vec!["recipe:oat_bowl"]);
}

#[test]
fn delete_twice_commits_both() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));

    for _ in 0..2 {
        let job = engine.submit_delete("recipe:oat_bowl".into()).unwrap();
        let status = engine.wait(job, Duration::from_secs(10)).unwrap();
        assert_eq!(status.state, JobState::Committed);
    }
    let outcome = engine.search(&Criteria::default()).unwrap();
    assert!(outcome.matches.is_empty());
}

#[test]
fn search_after_update_sees_fresh_results() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));

    let criteria = Criteria {
        min_protein: Some(20.0),
        ..Default::default()
    };
    assert!(engine.search(&criteria).unwrap().matches.is_empty());

    let job = engine
        .submit_update(
            "recipe:oat_bowl".into(),
            RecipePatch {
                protein: Some(25.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        engine.wait(job, Duration::from_secs(10)).unwrap().state,
        JobState::Committed
    );

    // The cached empty answer must not be served stale.
    let outcome = engine.search(&criteria).unwrap();
    assert_eq!(outcome.matches, vec!["recipe:oat_bowl"]);
}

#[test]
fn same_identity_updates_apply_in_submission_order() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));

    let patch = |protein: f64| RecipePatch {
        protein: Some(protein),
        ..Default::default()
    };
    let first = engine
        .submit_update("recipe:oat_bowl".into(), patch(1.0))
        .unwrap();
    let second = engine
        .submit_update("recipe:oat_bowl".into(), patch(2.0))
        .unwrap();
    engine.wait(first, Duration::from_secs(10)).unwrap();
    let status = engine.wait(second, Duration::from_secs(10)).unwrap();
    assert_eq!(status.state, JobState::Committed);

    assert_eq!(engine.recipe("recipe:oat_bowl").unwrap().protein, 2.0);
}

#[test]
fn duplicate_create_fails_terminally() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));

    let job = engine
        .submit_create(draft("oat  bowl", 1.0, 1.0, false, 1))
        .unwrap();
    let status = engine.wait(job, Duration::from_secs(10)).unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts, 1);
    assert!(status.error.unwrap().contains("already exists"));
}

#[test]
fn rebuild_preserves_answers_and_bumps_version() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));
    commit(&engine, draft("Fruit Salad", 2.0, 150.0, true, 10));
    let before = engine.search(&Criteria::default()).unwrap();

    let job = engine.trigger_rebuild().unwrap();
    assert_eq!(
        engine.wait(job, Duration::from_secs(10)).unwrap().state,
        JobState::Committed
    );

    assert_eq!(engine.store_version(), 2);
    let after = engine.search(&Criteria::default()).unwrap();
    assert!(!after.cached);
    assert_eq!(after.matches, before.matches);
}

#[test]
fn invalid_draft_reports_validation_error() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut bad = draft("Oat Bowl", 12.0, 300.0, true, 5);
    bad.vegetarian = false; // vegan but not vegetarian

    let job = engine.submit_create(bad).unwrap();
    let status = engine.wait(job, Duration::from_secs(10)).unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("vegetarian"));
}

#[test]
fn invalid_criteria_rejected_without_evaluation() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let err = engine.search(&Criteria {
        min_protein: Some(-3.0),
        ..Default::default()
    });
    assert!(err.is_err());
}

#[test]
fn job_registry_tracks_history() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    commit(&engine, draft("Oat Bowl", 12.0, 300.0, true, 5));
    let job = engine.submit_delete("recipe:oat_bowl".into()).unwrap();
    engine.wait(job, Duration::from_secs(10)).unwrap();

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].kind, "create");
    assert_eq!(jobs[1].kind, "delete");
    assert!(jobs.iter().all(|j| j.state == JobState::Committed));
}
