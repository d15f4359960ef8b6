//! Schema classification and forward migration.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{store_err, LotError, Result};

use super::schema::{CREATE_SCHEMA_VERSIONS_SQL, CREATE_TABLES_SQL, EXPECTED_TABLES, TARGET_SCHEMA_VERSION};

const OP: &str = "migrate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Fresh,
    LegacyV0,
    Versioned(i64),
    Incompatible(String),
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map_err(store_err(OP))
    .map(|row| row.is_some())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(store_err(OP))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(cols)
}

fn columns_match(conn: &Connection, table: &str, expected: &[&str]) -> Result<bool> {
    let mut actual = table_columns(conn, table)?;
    actual.sort_unstable();
    let mut expected: Vec<String> = expected.iter().map(|s| (*s).to_string()).collect();
    expected.sort_unstable();
    Ok(actual == expected)
}

/// Classifies the database's current state relative to `TARGET_SCHEMA_VERSION`.
pub fn classify(conn: &Connection) -> Result<Classification> {
    let any_expected_table_exists = {
        let mut exists = false;
        for (name, _) in EXPECTED_TABLES {
            if table_exists(conn, name)? {
                exists = true;
                break;
            }
        }
        exists
    };

    if !any_expected_table_exists {
        return Ok(Classification::Fresh);
    }

    for (name, expected_cols) in EXPECTED_TABLES {
        if !table_exists(conn, name)? {
            return Ok(Classification::Incompatible(format!(
                "expected table `{name}` is missing (schema mismatch)"
            )));
        }
        if !columns_match(conn, name, expected_cols)? {
            return Ok(Classification::Incompatible(format!(
                "table `{name}` has unexpected columns (schema mismatch, possible data loss if migrated)"
            )));
        }
    }

    if !table_exists(conn, "schema_versions")? {
        return Ok(Classification::LegacyV0);
    }

    let version: i64 = conn
        .query_row("SELECT version FROM schema_versions WHERE id = 1", [], |row| row.get(0))
        .map_err(store_err(OP))?;
    Ok(Classification::Versioned(version))
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_versions (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [version],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

/// Rewrites every `path` in `paths` so it ends with `/` (v0 -> v1).
fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT path FROM paths WHERE path NOT LIKE '%/'")
        .map_err(store_err(OP))?;
    let stale: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    drop(stmt);

    for path in stale {
        let normalized = format!("{path}/");
        conn.execute(
            "UPDATE paths SET path = ?1 WHERE path = ?2",
            rusqlite::params![normalized, path],
        )
        .map_err(store_err(OP))?;
    }
    Ok(())
}

fn apply_step(conn: &Connection, from_version: i64) -> Result<()> {
    match from_version {
        0 => migrate_v0_to_v1(conn),
        other => Err(LotError::migration_refused(
            OP,
            format!("no migration defined from version {other}"),
        )),
    }
}

/// Brings the database up to `TARGET_SCHEMA_VERSION`
pub fn migrate(conn: &Connection) -> Result<()> {
    match classify(conn)? {
        Classification::Fresh => {
            conn.execute_batch(CREATE_TABLES_SQL).map_err(store_err(OP))?;
            conn.execute_batch(CREATE_SCHEMA_VERSIONS_SQL).map_err(store_err(OP))?;
            set_version(conn, TARGET_SCHEMA_VERSION)?;
            tracing::info!(version = TARGET_SCHEMA_VERSION, "created fresh lotman schema");
        }
        Classification::LegacyV0 => {
            conn.execute_batch(CREATE_SCHEMA_VERSIONS_SQL).map_err(store_err(OP))?;
            let mut version = 0;
            while version < TARGET_SCHEMA_VERSION {
                conn.execute_batch("BEGIN IMMEDIATE").map_err(store_err(OP))?;
                let result = apply_step(conn, version);
                match result {
                    Ok(()) => {
                        version += 1;
                        set_version(conn, version)?;
                        conn.execute_batch("COMMIT").map_err(store_err(OP))?;
                    }
                    Err(e) => {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(e);
                    }
                }
            }
            tracing::info!(version, "migrated legacy (v0) lotman schema");
        }
        Classification::Versioned(n) if n < TARGET_SCHEMA_VERSION => {
            let mut version = n;
            while version < TARGET_SCHEMA_VERSION {
                conn.execute_batch("BEGIN IMMEDIATE").map_err(store_err(OP))?;
                match apply_step(conn, version) {
                    Ok(()) => {
                        version += 1;
                        set_version(conn, version)?;
                        conn.execute_batch("COMMIT").map_err(store_err(OP))?;
                    }
                    Err(e) => {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(e);
                    }
                }
            }
            tracing::info!(from = n, to = version, "migrated lotman schema");
        }
        Classification::Versioned(n) if n == TARGET_SCHEMA_VERSION => {
            tracing::debug!(version = n, "lotman schema already current");
        }
        Classification::Versioned(n) => {
            return Err(LotError::migration_refused(
                OP,
                format!(
                    "database schema version {n} is newer than this build's target {TARGET_SCHEMA_VERSION} (possible data loss, schema mismatch)"
                ),
            ));
        }
        Classification::Incompatible(detail) => {
            return Err(LotError::migration_refused(OP, detail));
        }
    }
    Ok(())
}
