//! Database module
//!
//! Connectivity, schema verification and schema creation for the Postgres
//! summary store. Table names are configurable, so every statement that
//! names a table goes through `is_valid_identifier` first.

use sqlx::PgPool;

/// Table used by the Postgres dead-letter sink
pub const DEAD_LETTER_TABLE: &str = "dead_letters";

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Lowercase SQL identifier: `[a-z_][a-z0-9_]*`, at most 55 bytes so the
/// ledger suffix still fits the 63-byte Postgres limit.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 55 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Name of the idempotence ledger table paired with a summary table
pub fn ledger_table_name(summary_table: &str) -> String {
    format!("{}_events", summary_table)
}

/// Check if required tables exist
pub async fn check_schema(
    pool: &PgPool,
    summary_table: &str,
    needs_dead_letter_table: bool,
) -> Result<bool, sqlx::Error> {
    let mut required_tables = vec![summary_table.to_string(), ledger_table_name(summary_table)];
    if needs_dead_letter_table {
        required_tables.push(DEAD_LETTER_TABLE.to_string());
    }

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(&table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create the summary, ledger and dead-letter tables if they are missing.
///
/// Mirrors `migrations/0001_init.sql` for a configurable summary table name.
pub async fn create_schema(pool: &PgPool, summary_table: &str) -> Result<(), sqlx::Error> {
    if !is_valid_identifier(summary_table) {
        return Err(sqlx::Error::Configuration(
            format!("invalid summary table name: {}", summary_table).into(),
        ));
    }
    let ledger = ledger_table_name(summary_table);

    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {summary} (
                account_id    TEXT PRIMARY KEY,
                account_total NUMERIC NOT NULL DEFAULT 0 CHECK (account_total >= 0),
                version       BIGINT NOT NULL CHECK (version > 0),
                created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            summary = summary_table
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {ledger} (
                account_id   TEXT NOT NULL REFERENCES {summary} (account_id),
                event_id     TEXT NOT NULL,
                kind         TEXT NOT NULL CHECK (kind IN ('upsert', 'remove', 'pending_remove')),
                amount       NUMERIC NOT NULL CHECK (amount >= 0),
                retracts     TEXT,
                retracted_by TEXT,
                applied_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (account_id, event_id)
            )
            "#,
            ledger = ledger,
            summary = summary_table
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS {ledger}_pending_idx
                ON {ledger} (account_id, retracts) WHERE kind = 'pending_remove'
            "#,
            ledger = ledger
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS {ledger}_applied_at_idx ON {ledger} (applied_at)
            "#,
            ledger = ledger
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {dead_letters} (
                id         UUID PRIMARY KEY,
                source     TEXT NOT NULL,
                event_id   TEXT,
                account_id TEXT,
                payload    TEXT NOT NULL,
                error      TEXT NOT NULL,
                attempts   INTEGER NOT NULL,
                failed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            dead_letters = DEAD_LETTER_TABLE
        ),
    ];

    for statement in statements.iter() {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Schema ensured for summary table '{}'", summary_table);
    Ok(())
}
