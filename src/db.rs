use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::aggregate::CohortUpdate;
use crate::error::LedgerError;
use crate::lifecycle;
use crate::models::{
    Actor, CohortKey, CohortStats, CohortSummary, Completion, Difficulty, LeaderboardEntry,
    Module, NewUser, PopularModule, Role, User,
};
use crate::store::Ledger;

const UNIQUE_VIOLATION: &str = "23505";

// Accounts created outside the signup flow carry a credential that no
// password hash can match, so they cannot log in until a reset.
const SEED_CREDENTIAL: &str = "!seed";
const IMPORT_CREDENTIAL: &str = "!import";

const COHORT_SCORES: &str = r#"
    SELECT c.points_earned
    FROM cyberedu.completions c
    JOIN cyberedu.users u ON u.id = c.user_id
    WHERE c.module_id = $1
      AND u.age_group = $2
      AND u.consented
      AND u.role = 'learner'
"#;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(ledger: &PgLedger) -> anyhow::Result<usize> {
    let modules = vec![
        (
            Uuid::parse_str("5b0c8e2e-6a4f-4c1e-9a57-1f1f3f6f7a01")?,
            "Introduction to Cybersecurity",
            "intro-to-cyber",
            Difficulty::Easy,
            "/modules/intro-to-cyber.html",
            8,
        ),
        (
            Uuid::parse_str("a3d4f1c2-0b6e-4d1a-8f39-6c2b9e8d7a02")?,
            "Network Security Basics",
            "network-basics",
            Difficulty::Medium,
            "/modules/network-basics.html",
            20,
        ),
        (
            Uuid::parse_str("e9c7b5a3-2d4f-4e6a-b8c1-3f5d7e9a1b03")?,
            "Advanced Malware Analysis",
            "advanced-malware-analysis",
            Difficulty::Hard,
            "/modules/advanced-malware-analysis.html",
            0,
        ),
    ];

    for (id, title, slug, difficulty, link, max_points) in modules {
        sqlx::query(
            r#"
            INSERT INTO cyberedu.modules (id, title, slug, difficulty, link, max_points)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE
            SET title = EXCLUDED.title, difficulty = EXCLUDED.difficulty,
                link = EXCLUDED.link, max_points = EXCLUDED.max_points
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(slug)
        .bind(difficulty.as_str())
        .bind(link)
        .bind(max_points)
        .execute(ledger.pool())
        .await?;
    }

    let people = vec![
        ("avery.lee@cyberedu.dev", Some("averylee"), Role::Learner, Some("13-15")),
        ("jules.moreno@cyberedu.dev", Some("jules_m"), Role::Learner, Some("13-15")),
        ("kiara.patel@cyberedu.dev", Some("kiarap"), Role::Learner, Some("16-18")),
        ("sam.ortiz@cyberedu.dev", Some("samortiz"), Role::Learner, None),
        ("morgan.hale@cyberedu.dev", None, Role::Tutor, None),
    ];

    for (email, username, role, age_group) in people {
        if ledger.find_user_by_email(email).await?.is_some() {
            continue;
        }
        lifecycle::signup(
            ledger,
            NewUser {
                email: email.to_string(),
                username: username.map(str::to_string),
                password_hash: SEED_CREDENTIAL.to_string(),
                role,
                consented: age_group.is_some(),
                age_group: age_group.map(str::to_string),
            },
        )
        .await?;
    }

    let tutor = existing_user(ledger, "morgan.hale@cyberedu.dev").await?;
    for email in ["avery.lee@cyberedu.dev", "kiara.patel@cyberedu.dev"] {
        let learner = existing_user(ledger, email).await?;
        ledger.link_learner(tutor.id, learner.id).await?;
    }

    let completions = vec![
        ("avery.lee@cyberedu.dev", "intro-to-cyber", 8),
        ("jules.moreno@cyberedu.dev", "intro-to-cyber", 4),
        ("kiara.patel@cyberedu.dev", "intro-to-cyber", 6),
        ("avery.lee@cyberedu.dev", "network-basics", 15),
        ("sam.ortiz@cyberedu.dev", "network-basics", 18),
    ];

    let mut recorded = 0usize;
    for (email, slug, score) in completions {
        let user = existing_user(ledger, email).await?;
        let outcome = lifecycle::complete_module(ledger, &Actor::new(user.id), slug, score).await?;
        if outcome.newly_completed {
            recorded += 1;
        }
    }

    Ok(recorded)
}

async fn existing_user(ledger: &PgLedger, email: &str) -> anyhow::Result<User> {
    ledger
        .find_user_by_email(email)
        .await?
        .with_context(|| format!("user {email} missing after seeding"))
}

/// Imports completions from CSV, signing up any learner or tutor not yet
/// known. Returns how many completions were newly recorded.
pub async fn import_csv(ledger: &PgLedger, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        username: Option<String>,
        role: String,
        consented: bool,
        age_group: Option<String>,
        module_slug: String,
        score: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed CSV record {}", line + 1))?;
        let user = match ledger.find_user_by_email(row.email.trim()).await? {
            Some(user) => user,
            None => {
                lifecycle::signup(
                    ledger,
                    NewUser {
                        email: row.email.clone(),
                        username: row.username.clone(),
                        password_hash: IMPORT_CREDENTIAL.to_string(),
                        role: row.role.parse()?,
                        consented: row.consented,
                        age_group: row.age_group.clone(),
                    },
                )
                .await
                .with_context(|| format!("failed to sign up {}", row.email))?
            }
        };

        let outcome =
            lifecycle::complete_module(ledger, &Actor::new(user.id), &row.module_slug, row.score)
                .await
                .with_context(|| format!("failed to record {} for {}", row.module_slug, row.email))?;
        if outcome.newly_completed {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn completions_of(&self, user_id: Uuid) -> Result<Vec<Completion>, LedgerError> {
        let rows = sqlx::query(
            "SELECT module_id, points_earned, completed_at \
             FROM cyberedu.completions WHERE user_id = $1 ORDER BY completed_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Completion {
                module_id: row.get("module_id"),
                points_earned: row.get("points_earned"),
                completed_at: row.get("completed_at"),
            })
            .collect())
    }

    async fn user_from_row(&self, row: Option<PgRow>) -> Result<Option<User>, LedgerError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.get("id");
        let role: String = row.get("role");

        Ok(Some(User {
            id,
            username: row.get("username"),
            email: row.get("email"),
            role: role.parse()?,
            points: row.get("points"),
            age_group: row.get("age_group"),
            consented: row.get("consented"),
            completions: self.completions_of(id).await?,
        }))
    }

    /// Modules whose title contains `search` (case-insensitive), optionally
    /// restricted to one difficulty.
    pub async fn list_modules(
        &self,
        search: &str,
        difficulty: Option<Difficulty>,
    ) -> Result<Vec<Module>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, slug, difficulty, link, max_points
            FROM cyberedu.modules
            WHERE POSITION(LOWER($1) IN LOWER(title)) > 0
              AND ($2::TEXT IS NULL OR difficulty = $2)
            ORDER BY title
            "#,
        )
        .bind(search)
        .bind(difficulty.map(|value| value.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(module_from_row).collect()
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT username, email, points
            FROM cyberedu.users
            WHERE role = 'learner'
            ORDER BY points DESC, created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LeaderboardEntry {
                username: row.get("username"),
                email: row.get("email"),
                points: row.get("points"),
            })
            .collect())
    }

    pub async fn popular_modules(&self, limit: i64) -> Result<Vec<PopularModule>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT m.title, m.slug, m.difficulty, COUNT(c.user_id) AS completed_count
            FROM cyberedu.modules m
            LEFT JOIN cyberedu.completions c ON c.module_id = m.id
            GROUP BY m.id, m.title, m.slug, m.difficulty
            ORDER BY completed_count DESC, m.title
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut popular = Vec::new();
        for row in rows {
            let difficulty: String = row.get("difficulty");
            popular.push(PopularModule {
                title: row.get("title"),
                slug: row.get("slug"),
                difficulty: difficulty.parse()?,
                completed_count: row.get("completed_count"),
            });
        }
        Ok(popular)
    }

    pub async fn cohort_overview(
        &self,
        module_slug: Option<&str>,
    ) -> Result<Vec<CohortSummary>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT m.title, m.slug, s.age_group, s.total_score, s.completion_count,
                   s.min_score, s.max_score
            FROM cyberedu.cohort_stats s
            JOIN cyberedu.modules m ON m.id = s.module_id
            WHERE ($1::TEXT IS NULL OR m.slug = $1)
            ORDER BY m.title, s.age_group
            "#,
        )
        .bind(module_slug)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let stats = stats_from_row(row);
                CohortSummary {
                    module_title: row.get("title"),
                    module_slug: row.get("slug"),
                    age_group: row.get("age_group"),
                    average: stats.average(),
                    stats,
                }
            })
            .collect())
    }

    pub async fn link_learner(&self, tutor_id: Uuid, learner_id: Uuid) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO cyberedu.tutor_learners (tutor_id, learner_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tutor_id)
        .bind(learner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn module_from_row(row: &PgRow) -> Result<Module, LedgerError> {
    let difficulty: String = row.get("difficulty");
    Ok(Module {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        difficulty: difficulty.parse()?,
        link: row.get("link"),
        max_points: row.get("max_points"),
    })
}

fn stats_from_row(row: &PgRow) -> CohortStats {
    CohortStats {
        total_score: row.get("total_score"),
        count: row.get("completion_count"),
        min_score: row.get("min_score"),
        max_score: row.get("max_score"),
    }
}

async fn locked_stats(
    tx: &mut Transaction<'_, Postgres>,
    module_id: Uuid,
    cohort: &str,
) -> Result<CohortStats, LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO cyberedu.cohort_stats (module_id, age_group)
        VALUES ($1, $2)
        ON CONFLICT (module_id, age_group) DO NOTHING
        "#,
    )
    .bind(module_id)
    .bind(cohort)
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT total_score, completion_count, min_score, max_score
        FROM cyberedu.cohort_stats
        WHERE module_id = $1 AND age_group = $2
        FOR UPDATE
        "#,
    )
    .bind(module_id)
    .bind(cohort)
    .fetch_one(&mut **tx)
    .await?;

    Ok(stats_from_row(&row))
}

const USER_COLUMNS: &str =
    "SELECT id, username, email, role, points, age_group, consented FROM cyberedu.users";

#[async_trait]
impl Ledger for PgLedger {
    async fn find_module_by_slug(&self, slug: &str) -> Result<Option<Module>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, title, slug, difficulty, link, max_points \
             FROM cyberedu.modules WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(module_from_row).transpose()
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, LedgerError> {
        let row = sqlx::query(&format!("{USER_COLUMNS} WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        self.user_from_row(row).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        let row = sqlx::query(&format!("{USER_COLUMNS} WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        self.user_from_row(row).await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, LedgerError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO cyberedu.users
            (id, username, email, password_hash, role, age_group, consented)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.age_group)
        .bind(user.consented)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                return Err(LedgerError::DuplicateEmail(user.email));
            }
            Err(err) => return Err(err.into()),
        }

        Ok(User {
            id,
            username: user.username,
            email: user.email,
            role: user.role,
            points: 0,
            age_group: user.age_group,
            consented: user.consented,
            completions: Vec::new(),
        })
    }

    async fn all_modules(&self) -> Result<Vec<Module>, LedgerError> {
        self.list_modules("", None).await
    }

    async fn add_points(&self, user_id: Uuid, points: i32) -> Result<i32, LedgerError> {
        let row = sqlx::query(
            "UPDATE cyberedu.users SET points = points + $2 WHERE id = $1 RETURNING points",
        )
        .bind(user_id)
        .bind(points)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        Ok(row.get("points"))
    }

    async fn update_account(
        &self,
        user_id: Uuid,
        email: &str,
        username: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE cyberedu.users
            SET email = $2, username = COALESCE($3, username)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(username)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(LedgerError::UserNotFound(user_id.to_string()))
            }
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(LedgerError::DuplicateEmail(email.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_completion(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        points: i32,
    ) -> Result<bool, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO cyberedu.completions (user_id, module_id, points_earned)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, module_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(module_id)
        .bind(points)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE cyberedu.users SET points = points + $2 WHERE id = $1")
            .bind(user_id)
            .bind(points)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn remove_completion(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<i32>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let removed: Option<i32> = sqlx::query(
            r#"
            DELETE FROM cyberedu.completions
            WHERE user_id = $1 AND module_id = $2
            RETURNING points_earned
            "#,
        )
        .bind(user_id)
        .bind(module_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get("points_earned"));

        let Some(points) = removed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE cyberedu.users SET points = GREATEST(points - $2, 0) WHERE id = $1")
            .bind(user_id)
            .bind(points)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(points))
    }

    async fn cohort_scores(
        &self,
        module_id: Uuid,
        cohort: &str,
    ) -> Result<Vec<i32>, LedgerError> {
        let rows = sqlx::query(COHORT_SCORES)
            .bind(module_id)
            .bind(cohort)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("points_earned")).collect())
    }

    async fn cohort_stats(
        &self,
        module_id: Uuid,
        cohort: &str,
    ) -> Result<Option<CohortStats>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT total_score, completion_count, min_score, max_score
            FROM cyberedu.cohort_stats
            WHERE module_id = $1 AND age_group = $2
            "#,
        )
        .bind(module_id)
        .bind(cohort)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stats_from_row))
    }

    async fn list_cohorts(&self) -> Result<Vec<(CohortKey, CohortStats)>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT module_id, age_group, total_score, completion_count, min_score, max_score
            FROM cyberedu.cohort_stats
            ORDER BY module_id, age_group
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let key = CohortKey {
                    module_id: row.get("module_id"),
                    age_group: row.get("age_group"),
                };
                (key, stats_from_row(row))
            })
            .collect())
    }

    async fn update_cohort(
        &self,
        module_id: Uuid,
        cohort: &str,
        update: CohortUpdate,
    ) -> Result<CohortStats, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let current = locked_stats(&mut tx, module_id, cohort).await?;

        let scores: Vec<i32> = sqlx::query(COHORT_SCORES)
            .bind(module_id)
            .bind(cohort)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.get("points_earned"))
            .collect();

        let next = current.apply(update, &scores);

        sqlx::query(
            r#"
            UPDATE cyberedu.cohort_stats
            SET total_score = $3, completion_count = $4, min_score = $5, max_score = $6,
                updated_at = NOW()
            WHERE module_id = $1 AND age_group = $2
            "#,
        )
        .bind(module_id)
        .bind(cohort)
        .bind(next.total_score)
        .bind(next.count)
        .bind(next.min_score)
        .bind(next.max_score)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cyberedu.tutor_learners WHERE tutor_id = $1 OR learner_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cyberedu.completions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cyberedu.users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
