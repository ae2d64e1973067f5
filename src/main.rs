//! larder CLI: recipe knowledge-graph engine.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use larder::config::ConfigFile;
use larder::engine::Engine;
use larder::jobs::{JobId, JobState};
use larder::query::Criteria;
use larder::recipe::RecipeDraft;
use larder::schema::{DifficultyTier, MealType};

#[derive(Parser)]
#[command(name = "larder", version, about = "Recipe knowledge-graph engine")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file path.
    #[arg(long, global = true, default_value = "larder.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data directory and write a starter config.
    Init,

    /// Add recipes from a JSON file (one draft or an array of drafts).
    Add {
        /// Path to the JSON file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Search recipes by criteria.
    Search {
        #[arg(long)]
        min_protein: Option<f64>,

        #[arg(long)]
        min_fat: Option<f64>,

        #[arg(long)]
        min_carbohydrates: Option<f64>,

        #[arg(long)]
        max_calories: Option<f64>,

        /// Filter by vegan flag (true/false).
        #[arg(long)]
        vegan: Option<bool>,

        /// Filter by vegetarian flag (true/false).
        #[arg(long)]
        vegetarian: Option<bool>,

        /// Meal type: breakfast, lunch, or dinner.
        #[arg(long)]
        meal_type: Option<MealType>,

        /// Difficulty tier: easy, moderate, or hard.
        #[arg(long)]
        difficulty: Option<DifficultyTier>,

        /// Maximum prep time in minutes.
        #[arg(long)]
        max_time: Option<u32>,

        /// Pantry contents, comma-separated. Matches use only these.
        #[arg(long)]
        available: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a recipe record as JSON.
    Show {
        /// Recipe identifier (e.g. "recipe:oat_bowl").
        id: String,
    },

    /// Delete a recipe.
    Delete {
        /// Recipe identifier.
        id: String,
    },

    /// Trigger a full graph rebuild.
    Rebuild,

    /// Inspect the job registry.
    Jobs {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Show engine info and statistics.
    Info,
}

#[derive(Subcommand)]
enum JobAction {
    /// List all jobs.
    List,
    /// Show one job's status.
    Show {
        /// Numeric job id.
        id: u64,
    },
    /// Cancel a queued job.
    Cancel {
        /// Numeric job id.
        id: u64,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConfigFile::load(&cli.config).into_diagnostic()?;
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }

    match cli.command {
        Commands::Init => {
            let data_dir = config
                .data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".larder"));
            let file = ConfigFile {
                data_dir: Some(data_dir.clone()),
                ..config
            };
            let engine = Engine::new(file.clone().into_engine_config()).into_diagnostic()?;
            if !cli.config.exists() {
                file.save(&cli.config).into_diagnostic()?;
                println!("Wrote {}", cli.config.display());
            }
            println!("Initialized larder at {}", data_dir.display());
            println!("{}", engine.info());
        }

        Commands::Add { file } => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            let drafts: Vec<RecipeDraft> = if content.trim_start().starts_with('[') {
                serde_json::from_str(&content).into_diagnostic()?
            } else {
                vec![serde_json::from_str(&content).into_diagnostic()?]
            };

            let mut added = 0;
            let mut skipped = 0;
            for draft in drafts {
                let id = draft.derived_id();
                if engine.recipe(&id).is_some() {
                    eprintln!("Skipping \"{id}\": already exists");
                    skipped += 1;
                    continue;
                }
                let job = engine.submit_create(draft).into_diagnostic()?;
                match wait(&engine, job)? {
                    JobState::Committed => added += 1,
                    _ => skipped += 1,
                }
            }
            println!("Added {added} recipes ({skipped} skipped) from {}", file.display());
            println!("{}", engine.info());
        }

        Commands::Search {
            min_protein,
            min_fat,
            min_carbohydrates,
            max_calories,
            vegan,
            vegetarian,
            meal_type,
            difficulty,
            max_time,
            available,
            json,
        } => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            let criteria = Criteria {
                min_protein,
                min_fat,
                min_carbohydrates,
                max_calories,
                vegan,
                vegetarian,
                meal_type,
                difficulty,
                max_time_minutes: max_time,
                available_ingredients: available
                    .map(|s| s.split(',').map(|i| i.trim().to_string()).collect()),
            };
            let outcome = engine.search(&criteria).into_diagnostic()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).into_diagnostic()?
                );
            } else {
                if outcome.matches.is_empty() {
                    println!("No matching recipes.");
                } else {
                    println!("Matches ({}):", outcome.matches.len());
                    for id in &outcome.matches {
                        match engine.recipe(id) {
                            Some(record) => println!("  {} — \"{}\"", id, record.title),
                            None => println!("  {id}"),
                        }
                    }
                }
                println!(
                    "searched {} recipes in {}ms{}",
                    outcome.searched,
                    outcome.took_ms,
                    if outcome.cached { " (cached)" } else { "" }
                );
            }
        }

        Commands::Show { id } => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            match engine.recipe(&id) {
                Some(record) => println!(
                    "{}",
                    serde_json::to_string_pretty(&record).into_diagnostic()?
                ),
                None => miette::bail!("no recipe with id \"{id}\""),
            }
        }

        Commands::Delete { id } => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            let job = engine.submit_delete(id.clone()).into_diagnostic()?;
            match wait(&engine, job)? {
                JobState::Committed => println!("Deleted \"{id}\""),
                state => miette::bail!("delete job ended in state {state}"),
            }
        }

        Commands::Rebuild => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            let job = engine.trigger_rebuild().into_diagnostic()?;
            match wait(&engine, job)? {
                JobState::Committed => {
                    println!("Rebuilt graph (version {})", engine.store_version())
                }
                state => miette::bail!("rebuild job ended in state {state}"),
            }
        }

        Commands::Jobs { action } => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            match action {
                JobAction::List => {
                    let jobs = engine.jobs();
                    if jobs.is_empty() {
                        println!("No jobs.");
                    } else {
                        for job in jobs {
                            println!(
                                "  {} {} {} [{}] attempts={}",
                                job.id, job.kind, job.identity, job.state, job.attempts
                            );
                        }
                    }
                }
                JobAction::Show { id } => match engine.job_status(JobId::from_raw(id)) {
                    Some(status) => println!(
                        "{}",
                        serde_json::to_string_pretty(&status).into_diagnostic()?
                    ),
                    None => miette::bail!("no job with id {id}"),
                },
                JobAction::Cancel { id } => {
                    if engine.cancel(JobId::from_raw(id)) {
                        println!("Cancelled job {id}");
                    } else {
                        miette::bail!("job {id} cannot be cancelled");
                    }
                }
            }
        }

        Commands::Info => {
            let engine = Engine::new(config.into_engine_config()).into_diagnostic()?;
            println!("{}", engine.info());
        }
    }

    Ok(())
}

fn wait(engine: &Engine, job: JobId) -> Result<JobState> {
    match engine.wait(job, Duration::from_secs(60)) {
        Some(status) => {
            if let Some(error) = &status.error {
                if status.state == JobState::Failed {
                    eprintln!("{}: {error}", status.id);
                }
            }
            Ok(status.state)
        }
        None => miette::bail!("job {job} disappeared from the registry"),
    }
}
