use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::error;

mod aggregate;
mod db;
mod error;
mod lifecycle;
mod models;
mod percentile;
mod reconcile;
mod report;
mod store;

use db::PgLedger;
use error::LedgerError;
use models::{Actor, DifficultyFilter, NewUser, Role};
use store::Ledger;

#[derive(Parser)]
#[command(name = "cyberedu-cohort-stats")]
#[command(about = "Module completions and age-group benchmarks for CyberEdu", long_about = None)]
struct Cli {
    /// Maximum number of pooled Postgres connections
    #[arg(long, global = true, default_value_t = 5)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the module catalogue and sample accounts
    Seed,
    /// Register a learner or tutor
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: Option<String>,
        /// Credential as produced by the authentication layer
        #[arg(long)]
        password_hash: String,
        #[arg(long, value_enum)]
        role: Role,
        /// Share scores with the age-group benchmark
        #[arg(long)]
        consent: bool,
        #[arg(long)]
        age_group: Option<String>,
    },
    /// List modules in the catalogue
    Modules {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, value_enum, default_value_t = DifficultyFilter::All)]
        difficulty: DifficultyFilter,
    },
    /// Mark a module completed for a user
    Complete {
        #[arg(long)]
        email: String,
        #[arg(long)]
        module: String,
        #[arg(long, allow_negative_numbers = true)]
        score: i32,
    },
    /// Show whether a user completed a module
    Status {
        #[arg(long)]
        email: String,
        #[arg(long)]
        module: String,
    },
    /// Reset a user's progress on a module
    Reset {
        #[arg(long)]
        email: String,
        #[arg(long)]
        module: String,
    },
    /// Credit activity points to a learner
    AwardPoints {
        #[arg(long)]
        email: String,
        #[arg(long, allow_negative_numbers = true)]
        points: i32,
    },
    /// Change a user's email and optionally their username
    UpdateAccount {
        #[arg(long)]
        email: String,
        #[arg(long)]
        new_email: String,
        #[arg(long)]
        username: Option<String>,
    },
    /// Points, completed modules and recommendations for a user
    Dashboard {
        #[arg(long)]
        email: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete an account and withdraw its scores
    DeleteAccount {
        #[arg(long)]
        email: String,
    },
    /// Show per age-group statistics
    Stats {
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Recompute min/max scores for every cohort
    Reconcile {
        /// Keep sweeping until interrupted
        #[arg(long)]
        watch: bool,
        #[arg(long, default_value_t = reconcile::DEFAULT_INTERVAL.as_secs())]
        interval_secs: u64,
    },
    /// Top learners by points
    Leaderboard {
        #[arg(long, default_value_t = 15)]
        limit: i64,
    },
    /// Most completed modules
    Popular {
        #[arg(long, default_value_t = 3)]
        limit: i64,
    },
    /// Write a markdown progress report for a user
    Report {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Import completions from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cyberedu_cohort_stats=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let ledger = PgLedger::new(pool);

    if let Err(err) = run(cli.command, &ledger).await {
        // Storage failures are reported generically; caller mistakes verbatim.
        if let Some(failure) = err.downcast_ref::<LedgerError>() {
            if !failure.is_client_error() {
                error!(error = %failure, "storage failure");
                anyhow::bail!("internal server error");
            }
        }
        return Err(err);
    }

    Ok(())
}

async fn actor_for(ledger: &PgLedger, email: &str) -> anyhow::Result<Actor> {
    let user = ledger
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(email.to_string()))?;
    Ok(Actor::new(user.id))
}

async fn run(command: Commands, ledger: &PgLedger) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(ledger.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let recorded = db::seed(ledger).await?;
            println!("Seed data inserted ({recorded} new completions).");
        }
        Commands::Signup {
            email,
            username,
            password_hash,
            role,
            consent,
            age_group,
        } => {
            let user = lifecycle::signup(
                ledger,
                NewUser {
                    email,
                    username,
                    password_hash,
                    role,
                    consented: consent,
                    age_group,
                },
            )
            .await?;
            println!("Created {} {} ({}).", user.role, user.display_name(), user.id);
        }
        Commands::Modules { search, difficulty } => {
            let modules = ledger.list_modules(&search, difficulty.difficulty()).await?;
            if modules.is_empty() {
                println!("No modules match.");
            }
            for module in modules {
                println!(
                    "- {} [{}] {} (max {} points) {}",
                    module.title, module.slug, module.difficulty, module.max_points, module.link
                );
            }
        }
        Commands::Complete {
            email,
            module,
            score,
        } => {
            let actor = actor_for(ledger, &email).await?;
            let outcome = lifecycle::complete_module(ledger, &actor, &module, score).await?;
            if outcome.newly_completed {
                println!(
                    "Module {} completed: {} out of {} points.",
                    outcome.module_slug, outcome.points_credited, outcome.max_points
                );
            } else {
                println!("Module {} was already completed.", outcome.module_slug);
            }
            match outcome.percentile {
                Some(percentile) => println!("Performance: {percentile}"),
                None => println!("Performance: Not calculated"),
            }
        }
        Commands::Status { email, module } => {
            let actor = actor_for(ledger, &email).await?;
            let status = lifecycle::completion_status(ledger, &actor, &module).await?;
            if status.completed {
                println!(
                    "{}: completed with {} points.",
                    status.module_slug,
                    status.points_earned.unwrap_or_default()
                );
            } else {
                println!("{}: not completed.", status.module_slug);
            }
            if let Some(percentile) = status.percentile {
                println!("Performance: {percentile}");
            }
        }
        Commands::Reset { email, module } => {
            let actor = actor_for(ledger, &email).await?;
            let deducted = lifecycle::reset_module(ledger, &actor, &module).await?;
            println!("Module progress has been reset and {deducted} points deducted.");
        }
        Commands::AwardPoints { email, points } => {
            let actor = actor_for(ledger, &email).await?;
            let total = lifecycle::award_points(ledger, &actor, points).await?;
            println!("Awarded {points} points; total is now {total}.");
        }
        Commands::UpdateAccount {
            email,
            new_email,
            username,
        } => {
            let actor = actor_for(ledger, &email).await?;
            lifecycle::update_account(ledger, &actor, &new_email, username.as_deref()).await?;
            println!("Account information updated.");
        }
        Commands::Dashboard { email, json } => {
            let actor = actor_for(ledger, &email).await?;
            let dashboard = lifecycle::dashboard(ledger, &actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                print!("{}", report::render_dashboard(&dashboard));
            }
        }
        Commands::DeleteAccount { email } => {
            let actor = actor_for(ledger, &email).await?;
            let removed = lifecycle::delete_account(ledger, &actor).await?;
            println!("Account deleted and {removed} completions removed.");
        }
        Commands::Stats { module, json } => {
            let summaries = ledger.cohort_overview(module.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print!("{}", report::render_cohort_table(&summaries));
            }
        }
        Commands::Reconcile {
            watch,
            interval_secs,
        } => {
            if watch {
                let every = Duration::from_secs(interval_secs.max(1));
                reconcile::run(ledger, every, async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        error!(error = %err, "failed to listen for shutdown signal");
                    }
                })
                .await;
            } else {
                let summary = reconcile::sweep(ledger).await?;
                println!(
                    "Examined {} cohorts, repaired {}.",
                    summary.examined, summary.repaired
                );
            }
        }
        Commands::Leaderboard { limit } => {
            let entries = ledger.leaderboard(limit).await?;
            if entries.is_empty() {
                println!("No learners yet.");
            }
            for (position, entry) in entries.iter().enumerate() {
                println!(
                    "{}. {} {} points",
                    position + 1,
                    entry.username.as_deref().unwrap_or(&entry.email),
                    entry.points
                );
            }
        }
        Commands::Popular { limit } => {
            for module in ledger.popular_modules(limit).await? {
                println!(
                    "- {} [{}] {}: completed {} times",
                    module.title, module.slug, module.difficulty, module.completed_count
                );
            }
        }
        Commands::Report { email, out } => {
            let user = ledger
                .find_user_by_email(&email)
                .await?
                .ok_or_else(|| LedgerError::UserNotFound(email.clone()))?;
            let catalogue = ledger.list_modules("", None).await?;
            let report = report::build_report(&user, &catalogue, Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(ledger, &csv).await?;
            println!("Recorded {inserted} completions from {}.", csv.display());
        }
    }

    Ok(())
}
