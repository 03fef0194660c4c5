use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::percentile::Percentile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Tutor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Learner => "learner",
            Role::Tutor => "tutor",
        }
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "learner" => Ok(Role::Learner),
            "tutor" => Ok(Role::Tutor),
            other => Err(LedgerError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Easy" => Ok(Difficulty::Easy),
            "Medium" => Ok(Difficulty::Medium),
            "Hard" => Ok(Difficulty::Hard),
            other => Err(LedgerError::Validation(format!(
                "unknown difficulty '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue filter accepted on the command line; `all` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DifficultyFilter {
    #[value(name = "all")]
    All,
    #[value(name = "Easy")]
    Easy,
    #[value(name = "Medium")]
    Medium,
    #[value(name = "Hard")]
    Hard,
}

impl DifficultyFilter {
    pub fn difficulty(self) -> Option<Difficulty> {
        match self {
            DifficultyFilter::All => None,
            DifficultyFilter::Easy => Some(Difficulty::Easy),
            DifficultyFilter::Medium => Some(Difficulty::Medium),
            DifficultyFilter::Hard => Some(Difficulty::Hard),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub difficulty: Difficulty,
    pub link: String,
    pub max_points: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub module_id: Uuid,
    pub points_earned: i32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: String,
    pub role: Role,
    pub points: i32,
    pub age_group: Option<String>,
    pub consented: bool,
    pub completions: Vec<Completion>,
}

impl User {
    /// The age-group cohort this user's scores are aggregated into, if any.
    /// Only consenting learners with a recorded age group belong to one.
    pub fn cohort(&self) -> Option<&str> {
        match (self.role, self.consented, self.age_group.as_deref()) {
            (Role::Learner, true, Some(group)) if !group.is_empty() => Some(group),
            _ => None,
        }
    }

    pub fn completion_for(&self, module_id: Uuid) -> Option<&Completion> {
        self.completions
            .iter()
            .find(|completion| completion.module_id == module_id)
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub consented: bool,
    pub age_group: Option<String>,
}

/// Running statistics for one module within one age-group cohort.
/// `min_score`/`max_score` are `None` when there is no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CohortStats {
    pub total_score: i64,
    pub count: i32,
    pub min_score: Option<i32>,
    pub max_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CohortKey {
    pub module_id: Uuid,
    pub age_group: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortSummary {
    pub module_title: String,
    pub module_slug: String,
    pub age_group: String,
    pub stats: CohortStats,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub username: Option<String>,
    pub email: String,
    pub points: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopularModule {
    pub title: String,
    pub slug: String,
    pub difficulty: Difficulty,
    pub completed_count: i64,
}

/// The authenticated caller of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub module_slug: String,
    pub newly_completed: bool,
    pub points_credited: i32,
    pub max_points: i32,
    pub percentile: Option<Percentile>,
}

#[derive(Debug, Clone)]
pub struct CompletionStatus {
    pub module_slug: String,
    pub completed: bool,
    pub points_earned: Option<i32>,
    pub percentile: Option<Percentile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedModule {
    pub title: String,
    pub slug: String,
    pub points_earned: i32,
    pub max_points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendedModule {
    pub title: String,
    pub slug: String,
}

/// What a signed-in user sees on their dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub username: Option<String>,
    pub points: i32,
    pub completed: Vec<CompletedModule>,
    pub recommended: Vec<RecommendedModule>,
}
