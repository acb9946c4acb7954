//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "procurement_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS vendors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                company TEXT NOT NULL,
                phone TEXT,
                specialization TEXT,
                address TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rfps (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                budget_amount TEXT NOT NULL,
                budget_currency TEXT NOT NULL DEFAULT 'USD',
                requirements TEXT NOT NULL DEFAULT '[]',
                delivery_value INTEGER,
                delivery_unit TEXT,
                payment_terms TEXT NOT NULL DEFAULT 'Net 30',
                warranty TEXT,
                additional_terms TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                raw_input TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rfps_status ON rfps(status);
            CREATE INDEX IF NOT EXISTS idx_rfps_created ON rfps(created_at);

            CREATE TABLE IF NOT EXISTS rfp_dispatches (
                rfp_id TEXT NOT NULL REFERENCES rfps(id) ON DELETE CASCADE,
                vendor_id TEXT NOT NULL REFERENCES vendors(id) ON DELETE CASCADE,
                sent_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rfp_dispatches_rfp ON rfp_dispatches(rfp_id);

            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                rfp_id TEXT NOT NULL REFERENCES rfps(id) ON DELETE CASCADE,
                vendor_id TEXT NOT NULL REFERENCES vendors(id) ON DELETE CASCADE,
                total_amount TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USD',
                breakdown TEXT NOT NULL DEFAULT '[]',
                delivery_timeline TEXT,
                payment_terms TEXT,
                warranty TEXT,
                additional_terms TEXT,
                compliance_score INTEGER,
                ai_summary TEXT,
                ai_score INTEGER,
                ai_recommendation TEXT,
                raw_email_content TEXT,
                email_received_at TEXT,
                attachments TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'received',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (rfp_id, vendor_id)
            );
            CREATE INDEX IF NOT EXISTS idx_proposals_rfp ON proposals(rfp_id);

            CREATE TABLE IF NOT EXISTS inbound_emails (
                message_id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                outcome TEXT NOT NULL,
                rfp_id TEXT,
                proposal_id TEXT,
                processed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_inbound_emails_sender ON inbound_emails(sender);
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "vendors",
            "rfps",
            "rfp_dispatches",
            "proposals",
            "inbound_emails",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().map(|m| m.version).unwrap());
    }

    #[tokio::test]
    async fn proposals_unique_per_rfp_and_vendor() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let insert = "INSERT INTO proposals (id, rfp_id, vendor_id, total_amount, created_at, updated_at)
                      VALUES (?1, 'rfp-1', 'vendor-1', '100', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')";
        conn.execute(insert, libsql::params!["p-1"]).await.unwrap();
        let second = conn.execute(insert, libsql::params!["p-2"]).await;
        assert!(second.is_err());
    }
}
