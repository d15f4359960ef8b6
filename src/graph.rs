//! Ancestor/descendant traversal, cycle prevention, insertion splicing, and
//! orphan analysis over the `Parent` edge table.
//!
//! Stateless: every function takes `&Connection` and reads the edge table
//! fresh each call. The lot graph lives in the relational store, not as an
//! in-memory pointer structure -- traversal is explicit and always bounded
//! by the acyclicity invariant.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection, OptionalExtension};

use crate::context::Context;
use crate::error::{store_err, LotError, Result};
use crate::types::{LotName, PolicyAttrKey};

const OP: &str = "graph";

/// `true` iff `(name, name)` is an edge in `Parent` -- `name` is a root.
pub fn check_if_root(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM parents WHERE lot_name = ?1 AND parent = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional_bool()
}

trait OptionalBool {
    fn optional_bool(self) -> Result<bool>;
}
impl OptionalBool for std::result::Result<(), rusqlite::Error> {
    fn optional_bool(self) -> Result<bool> {
        match self {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(store_err(OP)(e)),
        }
    }
}

/// Direct parents of `name`, excluding a self-loop.
pub(crate) fn direct_parents(conn: &Connection, name: &str) -> Result<Vec<LotName>> {
    let mut stmt = conn
        .prepare_cached("SELECT parent FROM parents WHERE lot_name = ?1 AND parent != ?1")
        .map_err(store_err(OP))?;
    let rows = stmt
        .query_map(params![name], |row| row.get(0))
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(rows)
}

/// Direct children of `name`, excluding a self-loop.
pub(crate) fn direct_children(conn: &Connection, name: &str) -> Result<Vec<LotName>> {
    let mut stmt = conn
        .prepare_cached("SELECT lot_name FROM parents WHERE parent = ?1 AND lot_name != ?1")
        .map_err(store_err(OP))?;
    let rows = stmt
        .query_map(params![name], |row| row.get(0))
        .map_err(store_err(OP))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(store_err(OP))?;
    Ok(rows)
}

/// BFS over `step` from `start`, not including `start` itself, deduplicated,
/// with ties broken by name (BFS already visits in a deterministic order
/// because `step` returns sorted names at each node -- see callers).
fn bfs_closure(
    conn: &Connection,
    start: &str,
    step: impl Fn(&Connection, &str) -> Result<Vec<LotName>>,
) -> Result<Vec<LotName>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());
    seen.insert(start.to_string());

    while let Some(current) = queue.pop_front() {
        let mut next = step(conn, &current)?;
        next.sort();
        for n in next {
            if seen.insert(n.clone()) {
                order.push(n.clone());
                queue.push_back(n);
            }
        }
    }
    Ok(order)
}

/// All ancestors of `name` (parents, transitively), deduplicated, BFS order
/// with ties broken by name. Self-loops terminate traversal rather than
/// being walked as edges.
pub fn recursive_ancestors(conn: &Connection, name: &str) -> Result<Vec<LotName>> {
    bfs_closure(conn, name, direct_parents)
}

/// All descendants of `name` (children, transitively), same ordering rules.
pub fn recursive_descendants(conn: &Connection, name: &str) -> Result<Vec<LotName>> {
    bfs_closure(conn, name, direct_children)
}

/// Before inserting `start` with the given proposed parent/child edges,
/// verifies the resulting graph would stay acyclic.
///
/// Two distinct failure modes are checked. First, `start` may already exist
/// with its own ancestors/descendants (this function is also used by
/// `update_lot`/`add_to_lot` to vet edges added to an existing lot): walking
/// the ancestors of every proposed parent fails if `start` is reached (it
/// would become its own ancestor), and symmetrically for descendants of
/// every proposed child. Second, even when `start` is brand new, the two
/// new edges together can bridge an *existing* path: if some proposed
/// child `c` is already an ancestor of some proposed parent `p`, the new
/// edges `c -> start -> p` close a loop through the pre-existing `p -> .. ->
/// c` chain. Finally, a proposed parent/child pair that coincide on some
/// lot other than `start` itself would silently create a non-root
/// self-loop and is rejected too.
///
/// # Errors
/// Returns [`LotError::InvariantViolation`] if a cycle or stray self-loop
/// would result.
pub fn cycle_check(
    conn: &Connection,
    start: &str,
    parents: &[String],
    children: &[String],
) -> Result<()> {
    for parent in parents {
        if parent == start {
            continue; // declaring start as its own parent is the root self-loop, not a cycle
        }
        if recursive_ancestors(conn, parent)?.iter().any(|a| a == start) {
            return Err(LotError::invariant(
                OP,
                format!("adding {start} as a descendant of {parent} would create a cycle"),
            ));
        }
    }
    for child in children {
        if child == start {
            continue;
        }
        if recursive_descendants(conn, child)?.iter().any(|d| d == start) {
            return Err(LotError::invariant(
                OP,
                format!("adding {start} as an ancestor of {child} would create a cycle"),
            ));
        }
    }
    for parent in parents {
        for child in children {
            if parent == child {
                if parent != start {
                    return Err(LotError::invariant(
                        OP,
                        format!("{parent} would gain a non-root self-loop"),
                    ));
                }
                continue;
            }
            if parent == start || child == start {
                continue;
            }
            if recursive_ancestors(conn, parent)?.iter().any(|a| a == child) {
                return Err(LotError::invariant(
                    OP,
                    format!(
                        "{child} is already an ancestor of {parent}; bridging them through {start} would create a cycle"
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Given a new lot `new_lot` inserted with parent `parent` and child
/// `child`, returns `true` if `(parent, child)` is currently an edge that
/// must be spliced out (replaced by `(parent, new_lot)` + `(new_lot,
/// child)`) to preserve graph shape.
pub fn edge_needs_splice(conn: &Connection, parent: &str, child: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM parents WHERE lot_name = ?1 AND parent = ?2",
        params![child, parent],
        |_| Ok(()),
    )
    .optional_bool()
}

/// Every `(parent, child)` pair among the cross product of `new_parents` x
/// `new_children` whose edge currently exists and must be removed once the
/// new lot's own parent/child edges are written.
pub fn splice_targets(
    conn: &Connection,
    new_parents: &[LotName],
    new_children: &[LotName],
) -> Result<Vec<(LotName, LotName)>> {
    let mut out = Vec::new();
    for parent in new_parents {
        for child in new_children {
            if edge_needs_splice(conn, parent, child)? {
                out.push((parent.clone(), child.clone()));
            }
        }
    }
    Ok(out)
}

/// A child `child` of `removed` is an orphan iff `removed` is its only
/// parent.
pub fn is_orphan_of(conn: &Connection, child: &str, removed: &str) -> Result<bool> {
    let parents = direct_parents(conn, child)?;
    Ok(parents.len() == 1 && parents[0] == removed)
}

fn caller_owns_any(conn: &Connection, caller: Option<&str>, candidates: &[LotName]) -> Result<bool> {
    let Some(caller) = caller else { return Ok(false) };
    for name in candidates {
        let owner: Option<String> = conn
            .query_row("SELECT owner FROM owners WHERE lot_name = ?1", params![name], |row| row.get(0))
            .optional()
            .map_err(store_err(OP))?;
        if owner.as_deref() == Some(caller) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Requires the caller to own at least one recursive ancestor of every
/// target in `targets` (or the target itself, when `include_self`).
///
/// # Errors
/// Returns [`LotError::Unauthorized`] for the first target the caller
/// doesn't have standing over.
pub fn check_context_for_parents(
    conn: &Connection,
    ctx: &Context,
    targets: &[LotName],
    include_self: bool,
) -> Result<()> {
    let caller = ctx.caller();
    for target in targets {
        let mut candidates = recursive_ancestors(conn, target)?;
        if include_self {
            candidates.push(target.clone());
        }
        if !caller_owns_any(conn, caller.as_deref(), &candidates)? {
            return Err(LotError::unauthorized("check_context_for_parents", caller.clone(), target.clone()));
        }
    }
    Ok(())
}

/// Symmetric to [`check_context_for_parents`], walking descendants instead.
///
/// # Errors
/// Returns [`LotError::Unauthorized`] for the first target the caller
/// doesn't have standing over.
pub fn check_context_for_children(
    conn: &Connection,
    ctx: &Context,
    targets: &[LotName],
    include_self: bool,
) -> Result<()> {
    let caller = ctx.caller();
    for target in targets {
        let mut candidates = recursive_descendants(conn, target)?;
        if include_self {
            candidates.push(target.clone());
        }
        if !caller_owns_any(conn, caller.as_deref(), &candidates)? {
            return Err(LotError::unauthorized("check_context_for_children", caller.clone(), target.clone()));
        }
    }
    Ok(())
}

fn is_sentinel_capacity(v: f64) -> bool {
    v <= 0.0
}

fn is_sentinel_int(v: i64) -> bool {
    v <= 0
}

/// The most restrictive value of `key` across `lot` and, if `recursive`,
/// every ancestor: minimum for capacities/deadlines/object caps, maximum
/// for `creation_time`. Sentinel (non-positive) values are skipped; `None`
/// means no ancestor in scope declares a usable value.
///
/// # Errors
/// Returns a store error if reading policy rows fails.
pub fn get_restricting_attribute(
    conn: &Connection,
    key: PolicyAttrKey,
    lot: &str,
    recursive: bool,
) -> Result<Option<f64>> {
    let mut scope = vec![lot.to_string()];
    if recursive {
        scope.extend(recursive_ancestors(conn, lot)?);
    }

    let mut best: Option<f64> = None;
    for name in &scope {
        let Some(attrs) = crate::repository::fetch_policy(conn, name)? else { continue };
        let raw = match key {
            PolicyAttrKey::DedicatedGb => attrs.dedicated_gb,
            PolicyAttrKey::OpportunisticGb => attrs.opportunistic_gb,
            PolicyAttrKey::MaxNumObjects => attrs.max_num_objects as f64,
            PolicyAttrKey::CreationTime => attrs.creation_time as f64,
            PolicyAttrKey::ExpirationTime => attrs.expiration_time as f64,
            PolicyAttrKey::DeletionTime => attrs.deletion_time as f64,
        };
        let is_sentinel = match key {
            PolicyAttrKey::MaxNumObjects
            | PolicyAttrKey::CreationTime
            | PolicyAttrKey::ExpirationTime
            | PolicyAttrKey::DeletionTime => is_sentinel_int(raw as i64),
            PolicyAttrKey::DedicatedGb | PolicyAttrKey::OpportunisticGb => is_sentinel_capacity(raw),
        };
        if is_sentinel {
            continue;
        }
        best = Some(match best {
            None => raw,
            Some(cur) => {
                if key.restricts_via_max() {
                    cur.max(raw)
                } else {
                    cur.min(raw)
                }
            }
        });
    }
    Ok(best)
}
