//! Maps a filesystem path to its owning lot via longest-prefix match.

use rusqlite::Connection;

use crate::error::{store_err, Result};
use crate::types::LotName;

const OP: &str = "path_index";

/// Appends a single trailing slash if one isn't already present.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

struct PathRow {
    path: String,
    lot_name: String,
    recursive: bool,
}

fn fetch_all_paths(conn: &Connection) -> Result<Vec<PathRow>> {
    let mut stmt = conn
        .prepare_cached("SELECT path, lot_name, recursive FROM paths")
        .map_err(store_err(OP))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PathRow { path: row.get(0)?, lot_name: row.get(1)?, recursive: row.get(2)? })
        })
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(rows)
}

/// Recursive(row) beats non-recursive on equal-length match; ties beyond
/// that break lexicographically by lot name).
fn pick_better<'a>(a: &'a PathRow, b: &'a PathRow) -> &'a PathRow {
    use std::cmp::Ordering;
    match a.path.len().cmp(&b.path.len()) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.recursive != b.recursive {
                if a.recursive {
                    a
                } else {
                    b
                }
            } else if a.lot_name <= b.lot_name {
                a
            } else {
                b
            }
        }
    }
}

/// Resolves the lot owning `dir`. With `recursive`, also returns every lot
/// whose path falls anywhere under `dir` (subtree lookup).
///
/// # Errors
/// Returns [`crate::error::LotError::StoreError`] on a query failure.
pub fn get_lots_from_dir(conn: &Connection, dir: &str, recursive: bool) -> Result<Vec<LotName>> {
    let p = normalize_path(dir);
    let rows = fetch_all_paths(conn)?;

    let mut best: Option<&PathRow> = None;
    for row in &rows {
        let matches = row.path == p || (row.recursive && p.starts_with(&row.path));
        if !matches {
            continue;
        }
        best = Some(match best {
            None => row,
            Some(cur) => pick_better(cur, row),
        });
    }

    let mut result = Vec::new();
    if let Some(b) = best {
        result.push(b.lot_name.clone());
    }

    if recursive {
        let mut subtree: Vec<&PathRow> = rows.iter().filter(|r| r.path.starts_with(&p)).collect();
        subtree.sort_by(|a, b| a.lot_name.cmp(&b.lot_name));
        for r in subtree {
            if !result.contains(&r.lot_name) {
                result.push(r.lot_name.clone());
            }
        }
    }

    Ok(result)
}

/// Looks up whether `path` (normalized) is itself a claimed Path row, and
/// if so, whether that row is recursive. Used by the directory-tree usage
/// update to decide subtree-dedup.
pub fn own_path_recursive_flag(conn: &Connection, path: &str) -> Result<bool> {
    let normalized = normalize_path(path);
    conn.query_row(
        "SELECT recursive FROM paths WHERE path = ?1",
        [normalized],
        |row| row.get(0),
    )
    .optional_or_false()
}

trait OptionalOrFalse {
    fn optional_or_false(self) -> Result<bool>;
}

impl OptionalOrFalse for std::result::Result<bool, rusqlite::Error> {
    fn optional_or_false(self) -> Result<bool> {
        match self {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(store_err(OP)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreConfig};

    fn store_with_paths(paths: &[(&str, &str, bool)]) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("lotman.sqlite"), StoreConfig::default()).unwrap();
        let conn = store.acquire().unwrap();
        conn.execute("INSERT INTO owners (lot_name, owner) VALUES ('x', 'o')", [])
            .unwrap();
        for (path, lot, recursive) in paths {
            conn.execute(
                "INSERT INTO paths (path, lot_name, recursive) VALUES (?1, ?2, ?3)",
                rusqlite::params![normalize_path(path), lot, recursive],
            )
            .unwrap();
        }
        drop(conn);
        (dir, store)
    }

    #[test]
    fn normalize_adds_single_trailing_slash() {
        assert_eq!(normalize_path("/a/b"), "/a/b/");
        assert_eq!(normalize_path("/a/b/"), "/a/b/");
    }

    #[test]
    fn non_recursive_does_not_extend_to_subdirs() {
        let (_dir, store) = store_with_paths(&[("/a/b", "lot_x", false), ("/a/", "lot_y", true)]);
        let conn = store.acquire().unwrap();
        assert_eq!(get_lots_from_dir(&conn, "/a/b", false).unwrap(), vec!["lot_x"]);
        assert_eq!(get_lots_from_dir(&conn, "/a/c", false).unwrap(), vec!["lot_y"]);
        assert_eq!(get_lots_from_dir(&conn, "/a/b/sub", false).unwrap(), vec!["lot_y"]);
    }

    #[test]
    fn recursive_lookup_includes_subtree() {
        let (_dir, store) =
            store_with_paths(&[("/a/", "lot_a", true), ("/a/b/", "lot_b", true), ("/a/c/", "lot_c", false)]);
        let conn = store.acquire().unwrap();
        let mut lots = get_lots_from_dir(&conn, "/a", true).unwrap();
        lots.sort();
        assert_eq!(lots, vec!["lot_a", "lot_b", "lot_c"]);
    }

    #[test]
    fn pick_better_prefers_recursive_then_lexicographic_name() {
        // `path` is a primary key, so two rows can never tie on the exact
        // same string; this exercises the tie-break rule directly in case
        // that constraint is ever relaxed.
        let recursive = PathRow { path: "/a/".into(), lot_name: "lot_z".into(), recursive: true };
        let non_recursive = PathRow { path: "/a/".into(), lot_name: "lot_a".into(), recursive: false };
        assert_eq!(pick_better(&recursive, &non_recursive).lot_name, "lot_z");

        let a = PathRow { path: "/a/".into(), lot_name: "lot_a".into(), recursive: true };
        let b = PathRow { path: "/a/".into(), lot_name: "lot_b".into(), recursive: true };
        assert_eq!(pick_better(&a, &b).lot_name, "lot_a");
    }
}
