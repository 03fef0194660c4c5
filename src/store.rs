use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::CohortUpdate;
use crate::error::LedgerError;
use crate::models::{CohortKey, CohortStats, Module, NewUser, User};

/// Storage behind the score ledger and the per-cohort aggregates.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn find_module_by_slug(&self, slug: &str) -> Result<Option<Module>, LedgerError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, LedgerError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError>;

    async fn create_user(&self, user: NewUser) -> Result<User, LedgerError>;

    /// Every module in the catalogue, ordered by title.
    async fn all_modules(&self) -> Result<Vec<Module>, LedgerError>;

    /// Credits `points` to the user outside any module and returns the new total.
    async fn add_points(&self, user_id: Uuid, points: i32) -> Result<i32, LedgerError>;

    /// Replaces the email and, when given, the username.
    async fn update_account(
        &self,
        user_id: Uuid,
        email: &str,
        username: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Inserts the completion and credits `points` to the user in one step.
    /// Returns `false` without changes when the module is already completed.
    async fn record_completion(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        points: i32,
    ) -> Result<bool, LedgerError>;

    /// Deletes the completion and deducts its points, floored at zero.
    /// Returns the removed points, or `None` when there was no completion.
    async fn remove_completion(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<i32>, LedgerError>;

    /// Every score currently recorded for the module within the cohort.
    async fn cohort_scores(&self, module_id: Uuid, cohort: &str)
        -> Result<Vec<i32>, LedgerError>;

    async fn cohort_stats(
        &self,
        module_id: Uuid,
        cohort: &str,
    ) -> Result<Option<CohortStats>, LedgerError>;

    async fn list_cohorts(&self) -> Result<Vec<(CohortKey, CohortStats)>, LedgerError>;

    /// Reads the pair's stats and score set, applies `update` and persists
    /// the result, with no other writer on the same pair in between.
    async fn update_cohort(
        &self,
        module_id: Uuid,
        cohort: &str,
        update: CohortUpdate,
    ) -> Result<CohortStats, LedgerError>;

    /// Removes the user, their completions and every roster link naming them.
    async fn delete_user(&self, user_id: Uuid) -> Result<(), LedgerError>;
}
