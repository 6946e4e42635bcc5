//! DDL statements and seed data for the SQLite schema.
//!
//! Everything the initial migration creates lives here as a static catalog:
//! tables, indexes, triggers, the default cost-rate table, and the mutable
//! storage knobs. Timestamps are TEXT ISO 8601, booleans INTEGER 0/1, JSON
//! documents TEXT.

/// Core DDL statements executed by the initial migration.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Jobs table ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id            TEXT PRIMARY KEY,
        type          TEXT NOT NULL DEFAULT 'chat',
        status        TEXT NOT NULL DEFAULT 'pending',
        title         TEXT NOT NULL,
        description   TEXT,
        provider      TEXT,
        model         TEXT,
        input_tokens  INTEGER NOT NULL DEFAULT 0 CHECK (input_tokens >= 0),
        output_tokens INTEGER NOT NULL DEFAULT 0 CHECK (output_tokens >= 0),
        total_cost    REAL NOT NULL DEFAULT 0 CHECK (total_cost >= 0),
        currency      TEXT NOT NULL DEFAULT 'USD',
        duration_ms   INTEGER CHECK (duration_ms IS NULL OR duration_ms >= 0),
        error_message TEXT,
        stack_trace   TEXT,
        params        TEXT DEFAULT '{}',
        metadata      TEXT DEFAULT '{}',
        parent_job_id TEXT REFERENCES jobs(id) ON DELETE SET NULL,
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        started_at    TEXT,
        completed_at  TEXT
    )
    "#,
    // -- Indexes on jobs -----------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_type_created ON jobs(type, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_provider_model ON jobs(provider, model)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_parent ON jobs(parent_job_id)",
    // -- Artifacts table -----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS job_artifacts (
        id          TEXT PRIMARY KEY,
        job_id      TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        type        TEXT NOT NULL DEFAULT 'file',
        name        TEXT NOT NULL,
        file_path   TEXT NOT NULL,
        file_size   INTEGER NOT NULL DEFAULT 0 CHECK (file_size >= 0),
        mime_type   TEXT,
        hash_sha256 TEXT NOT NULL,
        metadata    TEXT DEFAULT '{}',
        is_deleted  INTEGER NOT NULL DEFAULT 0,
        suspect     INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_artifacts_job ON job_artifacts(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON job_artifacts(hash_sha256)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_created_at ON job_artifacts(created_at DESC)",
    // -- Events table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS job_events (
        id         TEXT PRIMARY KEY,
        job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        message    TEXT,
        level      TEXT NOT NULL DEFAULT 'info',
        data       TEXT DEFAULT '{}',
        metadata   TEXT DEFAULT '{}',
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_job_created ON job_events(job_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_events_level_created ON job_events(level, created_at)",
    // Events are append-only; reject in-place mutation at the schema level.
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_job_events_no_update
    BEFORE UPDATE ON job_events
    BEGIN
        SELECT RAISE(ABORT, 'job_events rows are immutable');
    END
    "#,
    // -- Cost rates table ----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS cost_rates (
        id                TEXT PRIMARY KEY,
        provider          TEXT NOT NULL,
        model             TEXT NOT NULL,
        input_token_rate  REAL NOT NULL CHECK (input_token_rate >= 0),
        output_token_rate REAL NOT NULL CHECK (output_token_rate >= 0),
        currency          TEXT NOT NULL DEFAULT 'USD',
        effective_from    TEXT NOT NULL,
        effective_to      TEXT,
        created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cost_rates_lookup ON cost_rates(provider, model, effective_from)",
    // -- Usage stats table ---------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS usage_stats (
        id                  TEXT PRIMARY KEY,
        date                TEXT NOT NULL,
        provider            TEXT NOT NULL,
        model               TEXT NOT NULL,
        job_type            TEXT NOT NULL,
        total_jobs          INTEGER NOT NULL DEFAULT 0,
        total_input_tokens  INTEGER NOT NULL DEFAULT 0,
        total_output_tokens INTEGER NOT NULL DEFAULT 0,
        total_cost          REAL NOT NULL DEFAULT 0,
        average_duration_ms REAL NOT NULL DEFAULT 0,
        success_rate        REAL NOT NULL DEFAULT 0,
        currency            TEXT NOT NULL DEFAULT 'USD'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_usage_stats_lookup ON usage_stats(date, provider, model)",
    // -- Storage config table ------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS storage_config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Mutable knobs seeded into `storage_config` on first init.
pub const DEFAULT_STORAGE_CONFIG: &[(&str, &str)] = &[
    ("default_artifact_retention_days", "90"),
    ("max_artifact_size_mb", "100"),
    ("cleanup_enabled", "true"),
    ("usage_stats_rollup_hour", "2"),
];

/// Default cost rates seeded on first init:
/// `(provider, model, input_rate, output_rate)` in USD per 1 000 tokens,
/// effective from 2024-01-01, open-ended.
pub const DEFAULT_COST_RATES: &[(&str, &str, f64, f64)] = &[
    ("openai", "gpt-4o", 0.0025, 0.01),
    ("openai", "gpt-4o-mini", 0.00015, 0.0006),
    ("openai", "gpt-4-turbo", 0.01, 0.03),
    ("openai", "o1", 0.015, 0.06),
    ("anthropic", "claude-3-5-sonnet", 0.003, 0.015),
    ("anthropic", "claude-3-5-haiku", 0.001, 0.005),
    ("anthropic", "claude-3-opus", 0.015, 0.075),
    ("google", "gemini-1.5-pro", 0.00125, 0.005),
    ("google", "gemini-1.5-flash", 0.000075, 0.0003),
    ("ollama", "llama3.1", 0.0, 0.0),
];

/// Date from which the seeded rates apply.
pub const DEFAULT_RATES_EFFECTIVE_FROM: &str = "2024-01-01";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_default_rates() {
        assert_eq!(DEFAULT_COST_RATES.len(), 10);
    }

    #[test]
    fn gpt_4o_rate_matches_published_pricing() {
        let (_, _, input, output) = DEFAULT_COST_RATES
            .iter()
            .find(|(p, m, _, _)| *p == "openai" && *m == "gpt-4o")
            .copied()
            .unwrap();
        assert_eq!(input, 0.0025);
        assert_eq!(output, 0.01);
    }
}
