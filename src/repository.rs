//! Typed CRUD over the five per-lot tables.
//!
//! Every function here takes `&Connection` rather than `&Store`: callers
//! (the [`crate::facade`]) always hold an open [`crate::store::Txn`] and
//! pass its connection through, so a single facade call's writes land in
//! exactly one transaction without this module needing to know about
//! transaction boundaries itself.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{internal_err, store_err, Result};
use crate::types::{LotName, LotUsage, ManagementPolicyAttrs, NewLotSpec, PathEntry};

const OP: &str = "repository";

/// Inserts a brand-new lot: owner, every parent edge, every path, policy
/// attributes, and a zero-initialized usage row.
pub fn write_new(conn: &Connection, spec: &NewLotSpec) -> Result<()> {
    conn.execute(
        "INSERT INTO owners (lot_name, owner) VALUES (?1, ?2)",
        params![spec.lot_name, spec.owner],
    )
    .map_err(store_err(OP))?;

    let parents: Vec<&str> = if spec.parents.is_empty() {
        vec![spec.lot_name.as_str()] // a lot with no declared parent is its own root
    } else {
        spec.parents.iter().map(String::as_str).collect()
    };
    store_new_parents(conn, &spec.lot_name, &parents)?;

    let paths: Vec<PathEntry> = spec.paths.clone();
    store_new_paths(conn, &spec.lot_name, &paths)?;

    write_policy(conn, &spec.lot_name, &spec.management_policy_attrs)?;
    write_zero_usage(conn, &spec.lot_name)?;
    Ok(())
}

pub fn write_policy(conn: &Connection, lot_name: &str, attrs: &ManagementPolicyAttrs) -> Result<()> {
    conn.execute(
        "INSERT INTO management_policy_attributes
            (lot_name, dedicated_gb, opportunistic_gb, max_num_objects, creation_time, expiration_time, deletion_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(lot_name) DO UPDATE SET
            dedicated_gb = excluded.dedicated_gb,
            opportunistic_gb = excluded.opportunistic_gb,
            max_num_objects = excluded.max_num_objects,
            creation_time = excluded.creation_time,
            expiration_time = excluded.expiration_time,
            deletion_time = excluded.deletion_time",
        params![
            lot_name,
            attrs.dedicated_gb,
            attrs.opportunistic_gb,
            attrs.max_num_objects,
            attrs.creation_time,
            attrs.expiration_time,
            attrs.deletion_time,
        ],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

fn write_zero_usage(conn: &Connection, lot_name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO lot_usage (lot_name) VALUES (?1)",
        params![lot_name],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

/// Deletes every row keyed by `name` from all five per-lot tables.
pub fn delete_lot(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM owners WHERE lot_name = ?1", params![name])
        .map_err(store_err(OP))?;
    conn.execute(
        "DELETE FROM parents WHERE lot_name = ?1 OR parent = ?1",
        params![name],
    )
    .map_err(store_err(OP))?;
    conn.execute("DELETE FROM paths WHERE lot_name = ?1", params![name])
        .map_err(store_err(OP))?;
    conn.execute(
        "DELETE FROM management_policy_attributes WHERE lot_name = ?1",
        params![name],
    )
    .map_err(store_err(OP))?;
    conn.execute("DELETE FROM lot_usage WHERE lot_name = ?1", params![name])
        .map_err(store_err(OP))?;
    Ok(())
}

pub fn store_new_parents(conn: &Connection, lot_name: &str, parents: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO parents (lot_name, parent) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
        )
        .map_err(store_err(OP))?;
    for parent in parents {
        stmt.execute(params![lot_name, parent]).map_err(store_err(OP))?;
    }
    Ok(())
}

pub fn store_new_paths(conn: &Connection, lot_name: &str, paths: &[PathEntry]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO paths (path, lot_name, recursive) VALUES (?1, ?2, ?3)")
        .map_err(store_err(OP))?;
    for p in paths {
        let normalized = crate::path_index::normalize_path(&p.path);
        stmt.execute(params![normalized, lot_name, p.recursive])
            .map_err(store_err(OP))?;
    }
    Ok(())
}

pub fn remove_parents(conn: &Connection, lot_name: &str, parents: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("DELETE FROM parents WHERE lot_name = ?1 AND parent = ?2")
        .map_err(store_err(OP))?;
    for parent in parents {
        stmt.execute(params![lot_name, parent]).map_err(store_err(OP))?;
    }
    Ok(())
}

pub fn remove_paths(conn: &Connection, paths: &[String]) -> Result<()> {
    let mut stmt = conn.prepare_cached("DELETE FROM paths WHERE path = ?1").map_err(store_err(OP))?;
    for path in paths {
        let normalized = crate::path_index::normalize_path(path);
        stmt.execute(params![normalized]).map_err(store_err(OP))?;
    }
    Ok(())
}

pub fn rename_parent(conn: &Connection, lot_name: &str, current: &str, new: &str) -> Result<()> {
    conn.execute(
        "UPDATE parents SET parent = ?1 WHERE lot_name = ?2 AND parent = ?3",
        params![new, lot_name, current],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

pub fn rewrite_path(conn: &Connection, current: &str, new: &str, recursive: bool) -> Result<()> {
    let current_n = crate::path_index::normalize_path(current);
    let new_n = crate::path_index::normalize_path(new);
    conn.execute(
        "UPDATE paths SET path = ?1, recursive = ?2 WHERE path = ?3",
        params![new_n, recursive, current_n],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

pub fn update_owner(conn: &Connection, lot_name: &str, new_owner: &str) -> Result<()> {
    conn.execute(
        "UPDATE owners SET owner = ?1 WHERE lot_name = ?2",
        params![new_owner, lot_name],
    )
    .map_err(store_err(OP))?;
    Ok(())
}

pub fn lot_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row("SELECT 1 FROM owners WHERE lot_name = ?1", params![name], |_| Ok(()))
        .optional()
        .map_err(store_err(OP))
        .map(|r| r.is_some())
}

pub fn fetch_owner(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row("SELECT owner FROM owners WHERE lot_name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(store_err(OP))
}

pub fn fetch_policy(conn: &Connection, name: &str) -> Result<Option<ManagementPolicyAttrs>> {
    conn.query_row(
        "SELECT dedicated_gb, opportunistic_gb, max_num_objects, creation_time, expiration_time, deletion_time
         FROM management_policy_attributes WHERE lot_name = ?1",
        params![name],
        |row| {
            Ok(ManagementPolicyAttrs {
                dedicated_gb: row.get(0)?,
                opportunistic_gb: row.get(1)?,
                max_num_objects: row.get(2)?,
                creation_time: row.get(3)?,
                expiration_time: row.get(4)?,
                deletion_time: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(store_err(OP))
}

pub fn fetch_usage(conn: &Connection, name: &str) -> Result<Option<LotUsage>> {
    conn.query_row(
        "SELECT self_gb, children_gb, self_objects, children_objects,
                self_gb_being_written, children_gb_being_written,
                self_objects_being_written, children_objects_being_written
         FROM lot_usage WHERE lot_name = ?1",
        params![name],
        |row| {
            Ok(LotUsage {
                self_gb: row.get(0)?,
                children_gb: row.get(1)?,
                self_objects: row.get(2)?,
                children_objects: row.get(3)?,
                self_gb_being_written: row.get(4)?,
                children_gb_being_written: row.get(5)?,
                self_objects_being_written: row.get(6)?,
                children_objects_being_written: row.get(7)?,
            })
        },
    )
    .optional()
    .map_err(store_err(OP))
}

pub fn fetch_paths(conn: &Connection, name: &str) -> Result<Vec<PathEntry>> {
    let mut stmt = conn
        .prepare_cached("SELECT path, recursive FROM paths WHERE lot_name = ?1 ORDER BY path")
        .map_err(store_err(OP))?;
    let rows = stmt
        .query_map(params![name], |row| {
            Ok(PathEntry { path: row.get(0)?, recursive: row.get(1)? })
        })
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(rows)
}

pub fn list_all_lots(conn: &Connection) -> Result<Vec<LotName>> {
    let mut stmt = conn
        .prepare_cached("SELECT lot_name FROM owners ORDER BY lot_name")
        .map_err(store_err(OP))?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Dynamic update
// ---------------------------------------------------------------------------

/// One dynamically-typed bound value plus the 1-based positions it should
/// be bound into. A single value may bind into several `?N` placeholders,
/// matching the original's "positional parameter maps".
#[derive(Debug, Clone)]
pub enum DynamicParam {
    Str(String),
    Int(i64),
    Double(f64),
}

impl rusqlite::ToSql for DynamicParam {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self {
            DynamicParam::Str(s) => s.to_sql(),
            DynamicParam::Int(i) => i.to_sql(),
            DynamicParam::Double(d) => d.to_sql(),
        }
    }
}

/// Runs a parameterized write built at runtime by `GraphEngine`/`UsageEngine`
/// (e.g. dynamic `UPDATE ... SET col = ? WHERE lot_name IN (...)` statements).
/// `bindings` maps each 1-based `?N` position to the value bound there.
///
/// # Errors
/// Returns [`crate::error::LotError::StoreError`] if preparing or executing
/// the statement fails, or [`crate::error::LotError::Internal`] if
/// `bindings` leaves a gap (some position in `1..=max_position` never
/// bound) -- a caller mistake building the dynamic query, not a store
/// failure.
pub fn execute_dynamic_update(
    conn: &Connection,
    sql: &str,
    bindings: &[(usize, DynamicParam)],
) -> Result<usize> {
    let max_position = bindings.iter().map(|(pos, _)| *pos).max().unwrap_or(0);
    let mut positional: Vec<Option<&DynamicParam>> = vec![None; max_position];
    for (pos, value) in bindings {
        positional[pos - 1] = Some(value);
    }

    let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(positional.len());
    for (idx, slot) in positional.iter().enumerate() {
        let value = slot.ok_or_else(|| {
            anyhow::anyhow!("dynamic update position {} of {max_position} was never bound", idx + 1)
        });
        values.push(value.map_err(internal_err(OP))? as &dyn rusqlite::ToSql);
    }

    let mut stmt = conn.prepare_cached(sql).map_err(store_err(OP))?;
    let affected = stmt.execute(rusqlite::params_from_iter(values)).map_err(store_err(OP))?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LotError;
    use crate::store::{Store, StoreConfig, TransactionKind};
    use crate::types::NewLotSpec;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("lotman.sqlite"), StoreConfig::default()).unwrap();
        (dir, store)
    }

    fn default_spec() -> NewLotSpec {
        NewLotSpec {
            lot_name: "default".into(),
            owner: "root".into(),
            parents: vec![],
            children: vec![],
            paths: vec![PathEntry { path: "/default/paths".into(), recursive: true }],
            management_policy_attrs: ManagementPolicyAttrs::default(),
        }
    }

    #[test]
    fn write_new_then_read_back() {
        let (_dir, store) = temp_store();
        let txn = store.transaction(TransactionKind::Immediate).unwrap();
        write_new(&txn, &default_spec()).unwrap();
        txn.commit().unwrap();

        let conn = store.acquire().unwrap();
        assert!(lot_exists(&conn, "default").unwrap());
        assert_eq!(fetch_owner(&conn, "default").unwrap().as_deref(), Some("root"));
        let paths = fetch_paths(&conn, "default").unwrap();
        assert_eq!(paths, vec![PathEntry { path: "/default/paths/".into(), recursive: true }]);
        let usage = fetch_usage(&conn, "default").unwrap().unwrap();
        assert_eq!(usage, LotUsage::default());
    }

    #[test]
    fn delete_lot_clears_every_table() {
        let (_dir, store) = temp_store();
        let txn = store.transaction(TransactionKind::Immediate).unwrap();
        write_new(&txn, &default_spec()).unwrap();
        delete_lot(&txn, "default").unwrap();
        txn.commit().unwrap();

        let conn = store.acquire().unwrap();
        assert!(!lot_exists(&conn, "default").unwrap());
        assert!(fetch_policy(&conn, "default").unwrap().is_none());
        assert!(fetch_usage(&conn, "default").unwrap().is_none());
    }

    #[test]
    fn execute_dynamic_update_binds_shared_value_to_multiple_positions() {
        let (_dir, store) = temp_store();
        let txn = store.transaction(TransactionKind::Immediate).unwrap();
        write_new(&txn, &default_spec()).unwrap();
        let affected = execute_dynamic_update(
            &txn,
            "UPDATE owners SET owner = ?1 WHERE lot_name = ?2 OR owner = ?1",
            &[
                (1, DynamicParam::Str("root2".into())),
                (2, DynamicParam::Str("default".into())),
            ],
        )
        .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(fetch_owner(&txn, "default").unwrap().as_deref(), Some("root2"));
    }

    #[test]
    fn execute_dynamic_update_rejects_unbound_gap() {
        let (_dir, store) = temp_store();
        let txn = store.transaction(TransactionKind::Immediate).unwrap();
        write_new(&txn, &default_spec()).unwrap();
        // position 2 is skipped even though the statement only needs ?1 and
        // ?3 -- max_position is 3, so position 2 is a genuine caller mistake.
        let err = execute_dynamic_update(
            &txn,
            "UPDATE owners SET owner = ?1 WHERE lot_name = ?3",
            &[(1, DynamicParam::Str("root2".into())), (3, DynamicParam::Str("default".into()))],
        )
        .unwrap_err();
        assert!(matches!(err, LotError::Internal { .. }));
    }
}
