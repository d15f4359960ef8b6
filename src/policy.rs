//! Reports lots violating management policy.

use rusqlite::Connection;

use crate::clock::ClockSource;
use crate::error::Result;
use crate::graph;
use crate::repository;
use crate::types::{LotName, PolicyAttrKey};

fn all_lot_names(conn: &Connection) -> Result<Vec<LotName>> {
    repository::list_all_lots(conn)
}

/// Lots whose `expiration_time` is non-zero and has passed `now_millis`;
/// with `recursive`, also lots with a recursive ancestor past expiration.
///
/// # Errors
/// Returns a store error on query failure.
pub fn get_lots_past_exp(conn: &Connection, clock: &dyn ClockSource, recursive: bool) -> Result<Vec<LotName>> {
    past_deadline(conn, clock, PolicyAttrKey::ExpirationTime, recursive)
}

/// Analogous to [`get_lots_past_exp`] for `deletion_time`.
///
/// # Errors
/// Returns a store error on query failure.
pub fn get_lots_past_del(conn: &Connection, clock: &dyn ClockSource, recursive: bool) -> Result<Vec<LotName>> {
    past_deadline(conn, clock, PolicyAttrKey::DeletionTime, recursive)
}

fn past_deadline(
    conn: &Connection,
    clock: &dyn ClockSource,
    key: PolicyAttrKey,
    recursive: bool,
) -> Result<Vec<LotName>> {
    let now = clock.now_millis();
    let mut out = Vec::new();
    for name in all_lot_names(conn)? {
        if let Some(value) = graph::get_restricting_attribute(conn, key, &name, recursive)? {
            if value as i64 <= now {
                out.push(name);
            }
        }
    }
    Ok(out)
}

/// Lots whose opportunistic GB usage exceeds their opportunistic capacity.
///
/// `recursive_quota` takes the capacity from the most-restrictive recursive
/// ancestor rather than just the lot itself; `recursive_children` adds the
/// lot's `children_gb` to its `self_gb` before comparing.
///
/// # Errors
/// Returns a store error on query failure.
pub fn get_lots_past_opp(conn: &Connection, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
    past_capacity(conn, PolicyAttrKey::OpportunisticGb, recursive_quota, recursive_children)
}

/// Analogous to [`get_lots_past_opp`] for dedicated GB.
///
/// # Errors
/// Returns a store error on query failure.
pub fn get_lots_past_ded(conn: &Connection, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
    past_capacity(conn, PolicyAttrKey::DedicatedGb, recursive_quota, recursive_children)
}

/// Lots whose object count exceeds `max_num_objects`.
///
/// # Errors
/// Returns a store error on query failure.
pub fn get_lots_past_obj(conn: &Connection, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
    let mut out = Vec::new();
    for name in all_lot_names(conn)? {
        let Some(restriction) = graph::get_restricting_attribute(conn, PolicyAttrKey::MaxNumObjects, &name, recursive_quota)? else { continue };
        let Some(usage) = repository::fetch_usage(conn, &name)? else { continue };
        let total = if recursive_children { usage.self_objects + usage.children_objects } else { usage.self_objects };
        if (total as f64) > restriction {
            out.push(name);
        }
    }
    Ok(out)
}

fn past_capacity(
    conn: &Connection,
    key: PolicyAttrKey,
    recursive_quota: bool,
    recursive_children: bool,
) -> Result<Vec<LotName>> {
    let mut out = Vec::new();
    for name in all_lot_names(conn)? {
        let Some(restriction) = graph::get_restricting_attribute(conn, key, &name, recursive_quota)? else { continue };
        let Some(usage) = repository::fetch_usage(conn, &name)? else { continue };
        let total_gb = match key {
            PolicyAttrKey::OpportunisticGb | PolicyAttrKey::DedicatedGb => {
                if recursive_children {
                    usage.self_gb + usage.children_gb
                } else {
                    usage.self_gb
                }
            }
            _ => unreachable!("past_capacity only called with GB-valued keys"),
        };
        if total_gb > restriction {
            out.push(name);
        }
    }
    Ok(out)
}
