use tracing::{info, warn};

use crate::aggregate;
use crate::error::LedgerError;
use crate::models::{
    Actor, CompletionOutcome, CompletionStatus, Dashboard, Module, NewUser, Role, User,
};
use crate::percentile::{self, Percentile};
use crate::report;
use crate::store::Ledger;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 20;

pub fn validate_email(email: &str) -> Result<(), LedgerError> {
    let invalid = || LedgerError::Validation(format!("invalid email format '{email}'"));

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

pub fn validate_username(username: &str) -> Result<(), LedgerError> {
    let length = username.chars().count();
    if (USERNAME_MIN..=USERNAME_MAX).contains(&length) {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )))
    }
}

/// Normalises a signup request. Tutors never carry a username, consent or
/// age group; learners must have a username, and an age group when they
/// consent to benchmarking.
pub fn prepare_signup(mut user: NewUser) -> Result<NewUser, LedgerError> {
    user.email = user.email.trim().to_string();
    if user.email.is_empty() || user.password_hash.is_empty() {
        return Err(LedgerError::Validation(
            "email, password and role are required".to_string(),
        ));
    }
    validate_email(&user.email)?;

    match user.role {
        Role::Tutor => {
            user.username = None;
            user.consented = false;
            user.age_group = None;
        }
        Role::Learner => {
            let username = user.username.as_deref().map(str::trim).unwrap_or_default();
            if username.is_empty() {
                return Err(LedgerError::Validation(
                    "learners must provide a username".to_string(),
                ));
            }
            validate_username(username)?;
            user.username = Some(username.to_string());

            let age_group = user
                .age_group
                .as_deref()
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(str::to_string);
            if user.consented && age_group.is_none() {
                return Err(LedgerError::Validation(
                    "learners who consent must provide an age group".to_string(),
                ));
            }
            user.age_group = if user.consented { age_group } else { None };
        }
    }

    Ok(user)
}

pub async fn signup<L: Ledger + ?Sized>(ledger: &L, request: NewUser) -> Result<User, LedgerError> {
    let request = prepare_signup(request)?;
    let user = ledger.create_user(request).await?;
    info!(user = %user.id, role = %user.role, cohort = user.cohort(), "user signed up");
    Ok(user)
}

/// Rejects credits that would push the user's total past `i32::MAX`.
fn ensure_headroom(user: &User, points: i32) -> Result<(), LedgerError> {
    if points > i32::MAX - user.points {
        return Err(LedgerError::Validation(format!(
            "{points} points would overflow the current total of {}",
            user.points
        )));
    }
    Ok(())
}

async fn load<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    module_slug: &str,
) -> Result<(User, Module), LedgerError> {
    let module = ledger
        .find_module_by_slug(module_slug)
        .await?
        .ok_or_else(|| LedgerError::ModuleNotFound(module_slug.to_string()))?;
    let user = ledger
        .find_user(actor.user_id)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(actor.user_id.to_string()))?;
    Ok((user, module))
}

/// Marks `module_slug` completed for the actor with `score` points.
/// A module already completed is neither re-added nor re-scored.
pub async fn complete_module<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    module_slug: &str,
    score: i32,
) -> Result<CompletionOutcome, LedgerError> {
    if module_slug.trim().is_empty() {
        return Err(LedgerError::Validation("module slug is required".to_string()));
    }
    if score < 0 {
        return Err(LedgerError::Validation(format!(
            "score must not be negative, got {score}"
        )));
    }

    let (user, module) = load(ledger, actor, module_slug).await?;
    let points = match user.role {
        Role::Learner => score,
        Role::Tutor => 0,
    };
    if user.completion_for(module.id).is_none() {
        ensure_headroom(&user, points)?;
    }

    let newly_completed = ledger.record_completion(user.id, module.id, points).await?;
    if newly_completed {
        info!(user = %user.id, module = %module.slug, points, "module completed");
        if let Some(cohort) = user.cohort() {
            aggregate::apply_completion(ledger, module.id, cohort, points).await?;
        }
    } else {
        info!(user = %user.id, module = %module.slug, "module already completed, score ignored");
    }

    let percentile = match user.cohort() {
        Some(cohort) => Some(percentile::compute_percentile(ledger, module.id, cohort, score).await?),
        None => None,
    };

    Ok(CompletionOutcome {
        module_slug: module.slug,
        newly_completed,
        points_credited: if newly_completed { points } else { 0 },
        max_points: module.max_points,
        percentile,
    })
}

pub async fn reset_module<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    module_slug: &str,
) -> Result<i32, LedgerError> {
    let (user, module) = load(ledger, actor, module_slug).await?;

    let deducted = ledger
        .remove_completion(user.id, module.id)
        .await?
        .ok_or_else(|| LedgerError::NotCompleted {
            module: module.slug.clone(),
        })?;
    info!(user = %user.id, module = %module.slug, deducted, "module progress reset");

    if let Some(cohort) = user.cohort() {
        aggregate::apply_removal(ledger, module.id, cohort, deducted).await?;
    }

    Ok(deducted)
}

/// Withdraws every cohort score the actor contributed, then removes the
/// account and its roster links. Returns the number of completions dropped.
pub async fn delete_account<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
) -> Result<usize, LedgerError> {
    let user = ledger
        .find_user(actor.user_id)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(actor.user_id.to_string()))?;

    // Each completion leaves the ledger before its cohort is recomputed, so
    // the rescan only sees the scores that remain.
    for completion in &user.completions {
        let removed = ledger
            .remove_completion(user.id, completion.module_id)
            .await?;
        if let (Some(cohort), Some(points)) = (user.cohort(), removed) {
            aggregate::apply_removal(ledger, completion.module_id, cohort, points).await?;
        }
    }

    ledger.delete_user(user.id).await?;
    info!(user = %user.id, completions = user.completions.len(), "account deleted");
    Ok(user.completions.len())
}

async fn current_user<L: Ledger + ?Sized>(ledger: &L, actor: &Actor) -> Result<User, LedgerError> {
    ledger
        .find_user(actor.user_id)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(actor.user_id.to_string()))
}

/// Credits activity points earned outside module completion. Only learners
/// collect points; returns the new total.
pub async fn award_points<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    points: i32,
) -> Result<i32, LedgerError> {
    if points < 0 {
        return Err(LedgerError::Validation(format!(
            "points must not be negative, got {points}"
        )));
    }

    let user = current_user(ledger, actor).await?;
    if user.role != Role::Learner {
        return Err(LedgerError::Validation(
            "only learners can earn activity points".to_string(),
        ));
    }
    ensure_headroom(&user, points)?;

    let total = ledger.add_points(user.id, points).await?;
    info!(user = %user.id, points, total, "activity points awarded");
    Ok(total)
}

/// Changes the actor's email and, when one is supplied, their username.
pub async fn update_account<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    email: &str,
    username: Option<&str>,
) -> Result<(), LedgerError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(LedgerError::Validation("email is required".to_string()));
    }
    let username = username.map(str::trim).filter(|name| !name.is_empty());
    if let Some(name) = username {
        validate_username(name)?;
    }
    validate_email(email)?;

    let user = current_user(ledger, actor).await?;
    ledger.update_account(user.id, email, username).await?;
    info!(user = %user.id, username_changed = username.is_some(), "account information updated");
    Ok(())
}

pub async fn dashboard<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
) -> Result<Dashboard, LedgerError> {
    let user = current_user(ledger, actor).await?;
    let catalogue = ledger.all_modules().await?;
    Ok(report::build_dashboard(&user, &catalogue))
}

/// Whether the actor has completed the module, with the standing of the
/// recorded score for cohort members.
pub async fn completion_status<L: Ledger + ?Sized>(
    ledger: &L,
    actor: &Actor,
    module_slug: &str,
) -> Result<CompletionStatus, LedgerError> {
    let (user, module) = load(ledger, actor, module_slug).await?;
    let points_earned = user
        .completion_for(module.id)
        .map(|completion| completion.points_earned);

    let percentile = match (user.cohort(), points_earned) {
        (Some(cohort), Some(points)) => {
            Some(percentile::compute_percentile(ledger, module.id, cohort, points).await?)
        }
        (Some(_), None) => Some(Percentile::NoBenchmark),
        _ => None,
    };
    if matches!(percentile, Some(Percentile::NoBenchmark)) && points_earned.is_some() {
        warn!(user = %user.id, module = %module.slug, "completed module has no cohort benchmark");
    }

    Ok(CompletionStatus {
        module_slug: module.slug,
        completed: points_earned.is_some(),
        points_earned,
        percentile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CohortStats;
    use crate::reconcile;
    use crate::store::memory::MemoryLedger;

    fn learner(email: &str, age_group: Option<&str>) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: Some(email.split('@').next().unwrap_or("learner").to_string()),
            password_hash: "$2b$10$hash".to_string(),
            role: Role::Learner,
            consented: age_group.is_some(),
            age_group: age_group.map(str::to_string),
        }
    }

    fn tutor(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: None,
            password_hash: "$2b$10$hash".to_string(),
            role: Role::Tutor,
            consented: false,
            age_group: None,
        }
    }

    async fn actor(ledger: &MemoryLedger, request: NewUser) -> Actor {
        Actor::new(signup(ledger, request).await.unwrap().id)
    }

    fn expect(total_score: i64, count: i32, min: i32, max: i32) -> CohortStats {
        CohortStats {
            total_score,
            count,
            min_score: Some(min),
            max_score: Some(max),
        }
    }

    #[tokio::test]
    async fn cohort_scenario_tracks_completions_and_resets() {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("intro-to-cyber", 8);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;
        let b = actor(&ledger, learner("blake@example.com", Some("13-15"))).await;

        let outcome = complete_module(&ledger, &a, "intro-to-cyber", 8).await.unwrap();
        assert!(outcome.newly_completed);
        assert_eq!(outcome.max_points, 8);
        assert_eq!(outcome.percentile, Some(Percentile::Top(1)));
        assert_eq!(ledger.stats_for(module, "13-15"), expect(8, 1, 8, 8));

        let outcome = complete_module(&ledger, &b, "intro-to-cyber", 4).await.unwrap();
        assert_eq!(outcome.percentile, Some(Percentile::Top(50)));
        assert_eq!(ledger.stats_for(module, "13-15"), expect(12, 2, 4, 8));

        let deducted = reset_module(&ledger, &a, "intro-to-cyber").await.unwrap();
        assert_eq!(deducted, 8);
        assert_eq!(ledger.points_of(a.user_id), 0);
        assert_eq!(ledger.stats_for(module, "13-15"), expect(4, 1, 4, 4));

        reset_module(&ledger, &b, "intro-to-cyber").await.unwrap();
        assert_eq!(ledger.stats_for(module, "13-15"), CohortStats::default());
    }

    #[tokio::test]
    async fn completion_is_at_most_once_until_reset() {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("network-basics", 20);
        let a = actor(&ledger, learner("avery@example.com", Some("16-18"))).await;

        complete_module(&ledger, &a, "network-basics", 12).await.unwrap();
        let again = complete_module(&ledger, &a, "network-basics", 20).await.unwrap();
        assert!(!again.newly_completed);
        assert_eq!(again.points_credited, 0);
        assert_eq!(ledger.points_of(a.user_id), 12);
        assert_eq!(ledger.stats_for(module, "16-18"), expect(12, 1, 12, 12));

        reset_module(&ledger, &a, "network-basics").await.unwrap();
        let redo = complete_module(&ledger, &a, "network-basics", 20).await.unwrap();
        assert!(redo.newly_completed);
        assert_eq!(ledger.points_of(a.user_id), 20);
        assert_eq!(ledger.stats_for(module, "16-18"), expect(20, 1, 20, 20));
    }

    #[tokio::test]
    async fn non_consenting_learners_and_tutors_skip_aggregation() {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("intro-to-cyber", 8);
        let private = actor(&ledger, learner("quinn@example.com", None)).await;
        let tutor_actor = actor(&ledger, tutor("tutor@example.com")).await;

        let outcome = complete_module(&ledger, &private, "intro-to-cyber", 6).await.unwrap();
        assert_eq!(outcome.percentile, None);
        assert_eq!(ledger.points_of(private.user_id), 6);

        let outcome = complete_module(&ledger, &tutor_actor, "intro-to-cyber", 7).await.unwrap();
        assert!(outcome.newly_completed);
        assert_eq!(outcome.points_credited, 0);
        assert_eq!(ledger.points_of(tutor_actor.user_id), 0);

        assert!(ledger.state().stats.is_empty());
        assert_eq!(ledger.stats_for(module, "13-15").count, 0);
    }

    #[tokio::test]
    async fn invalid_requests_do_not_touch_state() {
        let ledger = MemoryLedger::new();
        ledger.add_module("intro-to-cyber", 8);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;

        let err = complete_module(&ledger, &a, "intro-to-cyber", -1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = complete_module(&ledger, &a, "missing", 3).await.unwrap_err();
        assert!(matches!(err, LedgerError::ModuleNotFound(_)));

        let ghost = Actor::new(uuid::Uuid::new_v4());
        let err = complete_module(&ledger, &ghost, "intro-to-cyber", 3).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));

        let err = reset_module(&ledger, &a, "intro-to-cyber").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotCompleted { .. }));

        assert!(ledger.state().stats.is_empty());
        assert_eq!(ledger.points_of(a.user_id), 0);
    }

    #[tokio::test]
    async fn deleting_an_account_withdraws_its_scores() {
        let ledger = MemoryLedger::new();
        let intro = ledger.add_module("intro-to-cyber", 8);
        let network = ledger.add_module("network-basics", 20);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;
        let b = actor(&ledger, learner("blake@example.com", Some("13-15"))).await;
        let tutor_actor = actor(&ledger, tutor("tutor@example.com")).await;
        ledger.state().roster.push((tutor_actor.user_id, a.user_id));
        ledger.state().roster.push((tutor_actor.user_id, b.user_id));

        complete_module(&ledger, &a, "intro-to-cyber", 8).await.unwrap();
        complete_module(&ledger, &a, "network-basics", 15).await.unwrap();
        complete_module(&ledger, &b, "intro-to-cyber", 5).await.unwrap();

        let dropped = delete_account(&ledger, &a).await.unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(ledger.stats_for(intro, "13-15"), expect(5, 1, 5, 5));
        assert_eq!(ledger.stats_for(network, "13-15"), CohortStats::default());
        assert_eq!(ledger.state().roster, vec![(tutor_actor.user_id, b.user_id)]);
        assert!(ledger.find_user(a.user_id).await.unwrap().is_none());

        let err = delete_account(&ledger, &a).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn count_tracks_active_completions_across_sequences() {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("network-basics", 20);
        let mut actors = Vec::new();
        for (i, score) in [3, 17, 9, 20, 0, 11].into_iter().enumerate() {
            let a = actor(&ledger, learner(&format!("user{i}@example.com"), Some("19-24"))).await;
            complete_module(&ledger, &a, "network-basics", score).await.unwrap();
            actors.push((a, score));
        }
        for (a, _) in actors.iter().step_by(2) {
            reset_module(&ledger, a, "network-basics").await.unwrap();
        }

        let active: Vec<i32> = actors.iter().skip(1).step_by(2).map(|(_, s)| *s).collect();
        let stats = ledger.stats_for(module, "19-24");
        assert_eq!(stats.count as usize, active.len());
        assert_eq!(stats.total_score, active.iter().map(|&s| i64::from(s)).sum::<i64>());
        for score in &active {
            assert!(stats.min_score.unwrap() <= *score);
            assert!(*score <= stats.max_score.unwrap());
        }

        // already consistent, so a sweep changes nothing
        reconcile::sweep(&ledger).await.unwrap();
        assert_eq!(ledger.stats_for(module, "19-24"), stats);
    }

    #[tokio::test]
    async fn status_reports_completion_and_standing() {
        let ledger = MemoryLedger::new();
        ledger.add_module("intro-to-cyber", 8);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;
        let b = actor(&ledger, learner("blake@example.com", Some("13-15"))).await;

        let status = completion_status(&ledger, &a, "intro-to-cyber").await.unwrap();
        assert!(!status.completed);
        assert_eq!(status.percentile, Some(Percentile::NoBenchmark));

        complete_module(&ledger, &a, "intro-to-cyber", 7).await.unwrap();
        complete_module(&ledger, &b, "intro-to-cyber", 2).await.unwrap();
        let status = completion_status(&ledger, &b, "intro-to-cyber").await.unwrap();
        assert!(status.completed);
        assert_eq!(status.points_earned, Some(2));
        assert_eq!(status.percentile, Some(Percentile::Top(50)));
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_normalises_roles() {
        let ledger = MemoryLedger::new();
        signup(&ledger, learner("avery@example.com", Some("13-15"))).await.unwrap();
        let err = signup(&ledger, learner("avery@example.com", None)).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEmail(_)));

        let mut request = tutor("tutor@example.com");
        request.username = Some("mentor".to_string());
        request.consented = true;
        request.age_group = Some("25+".to_string());
        let created = signup(&ledger, request).await.unwrap();
        assert_eq!(created.username, None);
        assert_eq!(created.cohort(), None);
    }

    #[tokio::test]
    async fn completion_that_would_overflow_points_is_rejected() {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("network-basics", 20);
        ledger.add_module("intro-to-cyber", 8);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;

        complete_module(&ledger, &a, "network-basics", i32::MAX - 5).await.unwrap();
        let err = complete_module(&ledger, &a, "intro-to-cyber", 6).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.points_of(a.user_id), i32::MAX - 5);
        assert_eq!(ledger.state().users[&a.user_id].completions.len(), 1);
        assert_eq!(ledger.stats_for(module, "13-15").count, 1);

        // resubmitting a completed module credits nothing, so it is not an overflow
        let again = complete_module(&ledger, &a, "network-basics", 20).await.unwrap();
        assert!(!again.newly_completed);
        complete_module(&ledger, &a, "intro-to-cyber", 5).await.unwrap();
        assert_eq!(ledger.points_of(a.user_id), i32::MAX);
    }

    #[tokio::test]
    async fn activity_points_are_for_learners_only() {
        let ledger = MemoryLedger::new();
        let a = actor(&ledger, learner("avery@example.com", None)).await;
        let tutor_actor = actor(&ledger, tutor("tutor@example.com")).await;

        assert_eq!(award_points(&ledger, &a, 3).await.unwrap(), 3);
        assert_eq!(award_points(&ledger, &a, 4).await.unwrap(), 7);

        let err = award_points(&ledger, &tutor_actor, 3).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.points_of(tutor_actor.user_id), 0);

        let err = award_points(&ledger, &a, -1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = award_points(&ledger, &a, i32::MAX).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.points_of(a.user_id), 7);

        let ghost = Actor::new(uuid::Uuid::new_v4());
        let err = award_points(&ledger, &ghost, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn account_updates_validate_before_writing() {
        let ledger = MemoryLedger::new();
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;
        actor(&ledger, learner("blake@example.com", None)).await;

        update_account(&ledger, &a, " avery.lee@example.com ", Some("averylee"))
            .await
            .unwrap();
        let user = ledger.find_user(a.user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "avery.lee@example.com");
        assert_eq!(user.username.as_deref(), Some("averylee"));

        // no username keeps the current one
        update_account(&ledger, &a, "avery@example.org", None).await.unwrap();
        let user = ledger.find_user(a.user_id).await.unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("averylee"));

        for (email, username) in [
            ("", None),
            ("not-an-email", None),
            ("avery@example.org", Some("av")),
            ("avery@example.org", Some("a-username-far-too-long")),
        ] {
            let err = update_account(&ledger, &a, email, username).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{email:?} {username:?}");
        }

        let err = update_account(&ledger, &a, "blake@example.com", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEmail(_)));
        let user = ledger.find_user(a.user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "avery@example.org");
    }

    #[tokio::test]
    async fn dashboard_shows_progress_and_recommendations() {
        let ledger = MemoryLedger::new();
        ledger.add_module("intro-to-cyber", 8);
        ledger.add_module("network-basics", 20);
        let a = actor(&ledger, learner("avery@example.com", Some("13-15"))).await;
        complete_module(&ledger, &a, "network-basics", 14).await.unwrap();

        let view = dashboard(&ledger, &a).await.unwrap();
        assert_eq!(view.username.as_deref(), Some("avery"));
        assert_eq!(view.points, 14);
        assert_eq!(view.completed.len(), 1);
        assert_eq!(view.completed[0].slug, "network-basics");
        assert_eq!(view.completed[0].max_points, 20);
        assert_eq!(view.recommended.len(), 1);
        assert_eq!(view.recommended[0].slug, "intro-to-cyber");
    }

    #[test]
    fn signup_validation_rules() {
        let mut missing_group = learner("avery@example.com", Some("13-15"));
        missing_group.age_group = Some("  ".to_string());
        assert!(prepare_signup(missing_group).is_err());

        let mut no_username = learner("avery@example.com", None);
        no_username.username = None;
        assert!(prepare_signup(no_username).is_err());

        let mut short_name = learner("avery@example.com", None);
        short_name.username = Some("av".to_string());
        assert!(prepare_signup(short_name).is_err());

        let mut declined = learner("avery@example.com", Some("13-15"));
        declined.consented = false;
        let prepared = prepare_signup(declined).unwrap();
        assert_eq!(prepared.age_group, None);

        assert!(prepare_signup(learner("not-an-email", None)).is_err());
    }

    #[test]
    fn email_format_checks() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("first.last@school.org.uk").is_ok());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("@c.com").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }
}
