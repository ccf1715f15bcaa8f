use anyhow::{Context, Result};
use rusqlite::Connection;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "chado_core",
        sql: include_str!("migrations/001_chado_core.sql"),
    },
    Migration {
        version: "002",
        name: "essential_terms",
        sql: include_str!("migrations/002_essential_terms.sql"),
    },
    Migration {
        version: "003",
        name: "names_and_literature",
        sql: include_str!("migrations/003_names_and_literature.sql"),
    },
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .context("Failed to create schema_migrations table")?;

    // A Chado instance created by other tooling already has the core tables
    if check_needs_baseline(conn)? {
        mark_migration_applied(conn, "001", "chado_core")?;
        tracing::info!("Detected existing Chado schema, marked migration 001 as applied");
    }

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if !applied.iter().any(|version| version == migration.version) {
            apply_migration(conn, migration)?;
        }
    }

    Ok(())
}

fn check_needs_baseline(conn: &Connection) -> Result<bool> {
    let migration_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;

    if migration_count > 0 {
        return Ok(false);
    }

    let tables_exist: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='feature'",
        [],
        |row| row.get(0),
    )?;

    Ok(tables_exist > 0)
}

fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn mark_migration_applied(conn: &Connection, version: &str, name: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        (version, name, &now),
    )?;
    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying migration {}: {}",
        migration.version,
        migration.name
    );

    conn.execute_batch(&format!("BEGIN TRANSACTION; {} COMMIT;", migration.sql))
        .with_context(|| {
            format!(
                "Failed to apply migration {}: {}",
                migration.version, migration.name
            )
        })?;

    mark_migration_applied(conn, migration.version, migration.name)?;

    tracing::debug!("Migration {} applied", migration.version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='feature_cvtermprop'"
            ),
            1
        );
        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001", "002", "003"]);
    }

    #[test]
    fn test_essential_terms_are_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let relationship_types = count(
            &conn,
            "SELECT COUNT(*) FROM cvterm JOIN cv USING (cv_id)
             WHERE cv.name = 'relationship' AND cvterm.is_relationshiptype = 1",
        );
        assert_eq!(relationship_types, 3);

        let gene = count(
            &conn,
            "SELECT COUNT(*) FROM cvterm JOIN cv USING (cv_id)
             WHERE cv.name = 'sequence' AND cvterm.name = 'gene'",
        );
        assert_eq!(gene, 1);

        let placeholder_pub = count(&conn, "SELECT COUNT(*) FROM pub WHERE uniquename = 'null'");
        assert_eq!(placeholder_pub, 1);

        let synonym_types = count(
            &conn,
            "SELECT COUNT(*) FROM cvterm JOIN cv USING (cv_id) WHERE cv.name = 'genedb_synonym_type'",
        );
        assert_eq!(synonym_types, 3);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let terms = count(&conn, "SELECT COUNT(*) FROM cvterm");

        run_migrations(&conn).unwrap();

        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001", "002", "003"]);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cvterm"), terms);
    }

    #[test]
    fn test_existing_chado_gets_baseline() {
        let conn = Connection::open_in_memory().unwrap();

        // Core schema created outside migration tracking
        conn.execute_batch(include_str!("migrations/001_chado_core.sql"))
            .unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_applied_migrations(&conn).unwrap(), vec!["001", "002", "003"]);
        assert!(count(&conn, "SELECT COUNT(*) FROM cv") >= 5);
    }
}
