//! Self-usage overwrites and the directory-tree usage update algorithm.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::{store_err, Result};
use crate::graph;
use crate::path_index;
use crate::types::{DirUsageNode, LotName, SelfUsageKey, UsageDelta};

const OP: &str = "usage";

/// Overwrites one of the four self-* counters on `name`'s usage row.
///
/// # Errors
/// Returns a store error if `name` has no usage row (it should always have
/// one once created by `LotRepository::write_new`).
pub fn update_self_usage(conn: &Connection, name: &str, key: SelfUsageKey, value: f64) -> Result<()> {
    let column = match key {
        SelfUsageKey::SelfGb => "self_gb",
        SelfUsageKey::SelfObjects => "self_objects",
        SelfUsageKey::SelfGbBeingWritten => "self_gb_being_written",
        SelfUsageKey::SelfObjectsBeingWritten => "self_objects_being_written",
    };
    let sql = format!("UPDATE lot_usage SET {column} = ?1 WHERE lot_name = ?2");
    conn.execute(&sql, params![value, name]).map_err(store_err(OP))?;
    Ok(())
}

/// Joins a parent canonical path and a child's own `path` field into a
/// single canonical path, with exactly one separating slash.
fn join_path(parent: &str, child: &str) -> String {
    let parent_trimmed = parent.trim_end_matches('/');
    let child_trimmed = child.trim_start_matches('/');
    if parent_trimmed.is_empty() {
        format!("/{child_trimmed}")
    } else {
        format!("{parent_trimmed}/{child_trimmed}")
    }
}

fn node_delta(node: &DirUsageNode) -> UsageDelta {
    UsageDelta {
        gb: node.size_gb,
        objects: node.num_obj,
        gb_being_written: node.gb_being_written,
        objects_being_written: node.objects_being_written,
    }
}

/// Walks `node` (at canonical path `path`), attributing its own (possibly
/// subdir-deduplicated) usage to its owning lot in `acc`, then recurses.
fn walk_node(conn: &Connection, path: &str, node: &DirUsageNode, acc: &mut HashMap<LotName, UsageDelta>) -> Result<()> {
    let lots = path_index::get_lots_from_dir(conn, path, false)?;
    let recursive_flag = path_index::own_path_recursive_flag(conn, path)?;

    let mut delta = node_delta(node);
    if node.includes_subdirs && !recursive_flag {
        for subdir in &node.subdirs {
            delta -= node_delta(subdir);
        }
    }

    if let Some(lot) = lots.into_iter().next() {
        *acc.entry(lot).or_default() += delta;
    }

    for subdir in &node.subdirs {
        let child_path = join_path(path, &subdir.path);
        walk_node(conn, &child_path, subdir, acc)?;
    }
    Ok(())
}

/// Runs the full directory-tree usage algorithm over `tree`, writing net
/// deltas into `lot_usage.self_*` for every touched lot and propagating the
/// same deltas into `children_*` up each touched lot's ancestor chain.
///
/// # Errors
/// Returns a store error on any query/write failure.
pub fn update_usage_by_dirs(conn: &Connection, tree: &[DirUsageNode]) -> Result<()> {
    let mut acc: HashMap<LotName, UsageDelta> = HashMap::new();
    for root in tree {
        walk_node(conn, &root.path, root, &mut acc)?;
    }

    for (lot, delta) in &acc {
        conn.execute(
            "UPDATE lot_usage SET
                self_gb = self_gb + ?1,
                self_objects = self_objects + ?2,
                self_gb_being_written = self_gb_being_written + ?3,
                self_objects_being_written = self_objects_being_written + ?4
             WHERE lot_name = ?5",
            params![delta.gb, delta.objects, delta.gb_being_written, delta.objects_being_written, lot],
        )
        .map_err(store_err(OP))?;

        for ancestor in graph::recursive_ancestors(conn, lot)? {
            conn.execute(
                "UPDATE lot_usage SET
                    children_gb = children_gb + ?1,
                    children_objects = children_objects + ?2,
                    children_gb_being_written = children_gb_being_written + ?3,
                    children_objects_being_written = children_objects_being_written + ?4
                 WHERE lot_name = ?5",
                params![delta.gb, delta.objects, delta.gb_being_written, delta.objects_being_written, ancestor],
            )
            .map_err(store_err(OP))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository;
    use crate::store::{Store, StoreConfig};
    use crate::types::{ManagementPolicyAttrs, NewLotSpec, PathEntry};

    fn seeded_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("lotman.sqlite"), StoreConfig::default()).unwrap();
        let conn = store.acquire().unwrap();
        repository::write_new(
            &conn,
            &NewLotSpec {
                lot_name: "default".into(),
                owner: "root".into(),
                parents: vec![],
                children: vec![],
                paths: vec![PathEntry { path: "/".into(), recursive: true }],
                management_policy_attrs: ManagementPolicyAttrs::default(),
            },
        )
        .unwrap();
        repository::write_new(
            &conn,
            &NewLotSpec {
                lot_name: "project".into(),
                owner: "alice".into(),
                parents: vec!["default".into()],
                children: vec![],
                paths: vec![PathEntry { path: "/data/project".into(), recursive: false }],
                management_policy_attrs: ManagementPolicyAttrs::default(),
            },
        )
        .unwrap();
        drop(conn);
        (dir, store)
    }

    #[test]
    fn self_usage_overwrite() {
        let (_dir, store) = seeded_store();
        let conn = store.acquire().unwrap();
        update_self_usage(&conn, "project", SelfUsageKey::SelfGb, 12.5).unwrap();
        let usage = repository::fetch_usage(&conn, "project").unwrap().unwrap();
        assert_eq!(usage.self_gb, 12.5);
    }

    #[test]
    fn dir_tree_attributes_leaf_usage_to_owning_lot() {
        let (_dir, store) = seeded_store();
        let conn = store.acquire().unwrap();
        let tree = vec![DirUsageNode {
            path: "/data/project".into(),
            size_gb: 5.0,
            num_obj: 10,
            gb_being_written: 0.0,
            objects_being_written: 0,
            includes_subdirs: false,
            subdirs: vec![],
        }];
        update_usage_by_dirs(&conn, &tree).unwrap();
        let usage = repository::fetch_usage(&conn, "project").unwrap().unwrap();
        assert_eq!(usage.self_gb, 5.0);
        assert_eq!(usage.self_objects, 10);

        let default_usage = repository::fetch_usage(&conn, "default").unwrap().unwrap();
        assert_eq!(default_usage.children_gb, 5.0);
        assert_eq!(default_usage.children_objects, 10);
    }

    #[test]
    fn non_recursive_includes_subdirs_deduplicates_against_children() {
        let (_dir, store) = seeded_store();
        let conn = store.acquire().unwrap();
        let tree = vec![DirUsageNode {
            path: "/data/project".into(),
            size_gb: 10.0,
            num_obj: 20,
            gb_being_written: 0.0,
            objects_being_written: 0,
            includes_subdirs: true,
            subdirs: vec![DirUsageNode {
                path: "sub".into(),
                size_gb: 4.0,
                num_obj: 8,
                gb_being_written: 0.0,
                objects_being_written: 0,
                includes_subdirs: false,
                subdirs: vec![],
            }],
        }];
        update_usage_by_dirs(&conn, &tree).unwrap();
        // /data/project deduplicated: 10 - 4 = 6 GB, 20 - 8 = 12 objects.
        let project_usage = repository::fetch_usage(&conn, "project").unwrap().unwrap();
        assert_eq!(project_usage.self_gb, 6.0);
        assert_eq!(project_usage.self_objects, 12);
        // /data/project's own path row is non-recursive, so the subdir (no
        // path row of its own) resolves through "/" back to "default".
        let default_usage = repository::fetch_usage(&conn, "default").unwrap().unwrap();
        assert_eq!(default_usage.self_gb, 4.0);
        assert_eq!(default_usage.self_objects, 8);
    }
}
