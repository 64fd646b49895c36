//! Postgres-backed store.
//!
//! Problem writes are upserts on (description, source_key, source_filter,
//! project_id), so two jobs racing past the dedup gate converge on one row
//! per problem.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use issuelens_common::{
    ExtractionContext, ProblemRecord, ProblemReport, ProjectSettings, PromptSet, RawIssueRecord,
    Severity,
};

use crate::traits::{IssueSource, ProblemStore, ReportSink};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS raw_issues (
        id            BIGSERIAL    PRIMARY KEY,
        project_id    TEXT         NOT NULL,
        source_filter TEXT         NOT NULL,
        issue_key     TEXT,
        payload       JSONB        NOT NULL,
        imported_at   TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS raw_issues_project_idx ON raw_issues (project_id, source_filter)",
    // NULL keys never conflict, so keyless records are still appended.
    "CREATE UNIQUE INDEX IF NOT EXISTS raw_issues_key_idx ON raw_issues (project_id, issue_key)",
    r#"
    CREATE TABLE IF NOT EXISTS problems (
        description   TEXT         NOT NULL,
        source_key    TEXT         NOT NULL,
        source_filter TEXT         NOT NULL,
        project_id    TEXT         NOT NULL,
        severity      TEXT         NOT NULL,
        impact        TEXT         NOT NULL,
        problem_type  TEXT         NOT NULL,
        version       TEXT         NOT NULL,
        customer_id   TEXT,
        updated_at    TIMESTAMPTZ  NOT NULL DEFAULT now(),
        PRIMARY KEY (description, source_key, source_filter, project_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extractions (
        source_key    TEXT         NOT NULL,
        version       TEXT         NOT NULL,
        project_id    TEXT         NOT NULL,
        source_filter TEXT         NOT NULL,
        problem_count INTEGER      NOT NULL,
        extracted_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
        PRIMARY KEY (source_key, version, project_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        project_id    TEXT         PRIMARY KEY,
        source_filter TEXT,
        prompts       JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        project_id    TEXT         PRIMARY KEY,
        report        JSONB        NOT NULL,
        generated_at  TIMESTAMPTZ  NOT NULL
    )
    "#,
];

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing. Safe to run on every start.
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Postgres schema ready");
        Ok(())
    }

    /// Insert or replace the overrides for a project.
    pub async fn upsert_project_settings(&self, settings: &ProjectSettings) -> Result<()> {
        let prompts = settings
            .prompts
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO projects (project_id, source_filter, prompts)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE
            SET source_filter = EXCLUDED.source_filter, prompts = EXCLUDED.prompts
            "#,
        )
        .bind(&settings.project_id)
        .bind(&settings.source_filter)
        .bind(prompts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct ProblemRow {
    description: String,
    source_key: String,
    source_filter: String,
    project_id: String,
    severity: String,
    impact: String,
    problem_type: String,
    version: String,
    customer_id: Option<String>,
}

impl From<ProblemRow> for ProblemRecord {
    fn from(row: ProblemRow) -> Self {
        ProblemRecord {
            description: row.description,
            severity: Severity::from_model(&row.severity),
            impact: row.impact,
            problem_type: row.problem_type,
            version: row.version,
            customer_id: row.customer_id,
            source_key: row.source_key,
            source_filter: row.source_filter,
            project_id: row.project_id,
        }
    }
}

// ---------------------------------------------------------------------------
// ProblemStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ProblemStore for PgStore {
    async fn extraction_exists(&self, source_key: &str, version: &str, project_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM extractions
                WHERE source_key = $1 AND version = $2 AND project_id = $3
            )
            "#,
        )
        .bind(source_key)
        .bind(version)
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn record_extraction(
        &self,
        ctx: &ExtractionContext,
        source_key: &str,
        problem_count: usize,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO extractions (source_key, version, project_id, source_filter, problem_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key, version, project_id) DO UPDATE
            SET problem_count = EXCLUDED.problem_count, extracted_at = now()
            "#,
        )
        .bind(source_key)
        .bind(&ctx.version)
        .bind(&ctx.project_id)
        .bind(&ctx.source_filter)
        .bind(i32::try_from(problem_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_problem(&self, problem: &ProblemRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO problems
                (description, source_key, source_filter, project_id,
                 severity, impact, problem_type, version, customer_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (description, source_key, source_filter, project_id) DO UPDATE
            SET severity = EXCLUDED.severity,
                impact = EXCLUDED.impact,
                problem_type = EXCLUDED.problem_type,
                version = EXCLUDED.version,
                customer_id = EXCLUDED.customer_id,
                updated_at = now()
            "#,
        )
        .bind(&problem.description)
        .bind(&problem.source_key)
        .bind(&problem.source_filter)
        .bind(&problem.project_id)
        .bind(problem.severity.as_str())
        .bind(&problem.impact)
        .bind(&problem.problem_type)
        .bind(&problem.version)
        .bind(&problem.customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn problems(&self, project_id: &str, source_filter: &str) -> Result<Vec<ProblemRecord>> {
        let rows = sqlx::query_as::<_, ProblemRow>(
            r#"
            SELECT description, source_key, source_filter, project_id,
                   severity, impact, problem_type, version, customer_id
            FROM problems
            WHERE project_id = $1 AND source_filter = $2
            ORDER BY source_key, description
            "#,
        )
        .bind(project_id)
        .bind(source_filter)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ProblemRecord::from).collect())
    }

    async fn project_settings(&self, project_id: &str) -> Result<Option<ProjectSettings>> {
        let row = sqlx::query_as::<_, (String, Option<String>, Option<serde_json::Value>)>(
            "SELECT project_id, source_filter, prompts FROM projects WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((project_id, source_filter, prompts)) = row else {
            return Ok(None);
        };
        let prompts = prompts
            .map(serde_json::from_value::<PromptSet>)
            .transpose()
            .context("stored prompt overrides are malformed")?;
        Ok(Some(ProjectSettings {
            project_id,
            source_filter,
            prompts,
        }))
    }
}

// ---------------------------------------------------------------------------
// IssueSource
// ---------------------------------------------------------------------------

#[async_trait]
impl IssueSource for PgStore {
    async fn fetch_issues(&self, project_id: &str, source_filter: &str) -> Result<Vec<RawIssueRecord>> {
        let rows = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"
            SELECT payload FROM raw_issues
            WHERE project_id = $1 AND source_filter = $2
            ORDER BY id ASC
            "#,
        )
        .bind(project_id)
        .bind(source_filter)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_value(payload).context("stored raw issue is malformed")
            })
            .collect()
    }

    async fn save_issues(&self, issues: &[RawIssueRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for issue in issues {
            sqlx::query(
                r#"
                INSERT INTO raw_issues (project_id, source_filter, issue_key, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (project_id, issue_key) DO UPDATE SET
                    source_filter = EXCLUDED.source_filter,
                    payload = EXCLUDED.payload,
                    imported_at = now()
                "#,
            )
            .bind(&issue.project_id)
            .bind(&issue.source_filter)
            .bind(issue.identity())
            .bind(serde_json::to_value(issue)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(issues.len())
    }
}

// ---------------------------------------------------------------------------
// ReportSink
// ---------------------------------------------------------------------------

#[async_trait]
impl ReportSink for PgStore {
    async fn save_report(&self, report: &ProblemReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reports (project_id, report, generated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE
            SET report = EXCLUDED.report, generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(&report.project_id)
        .bind(serde_json::to_value(report)?)
        .bind(report.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_report(&self, project_id: &str) -> Result<Option<ProblemReport>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT report FROM reports WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(report,)| serde_json::from_value(report).context("stored report is malformed"))
            .transpose()
    }
}
