//! Public operation set orchestrating Store/LotRepository/PathIndex/
//! GraphEngine/UsageEngine/PolicyEvaluator behind the `Context` caller
//! check. Every mutating call runs in one immediate transaction; reads
//! run on a plain pooled connection.

use rusqlite::Connection;

use crate::clock::{ClockSource, SystemClock};
use crate::context::Context;
use crate::error::{LotError, Result};
use crate::graph;
use crate::path_index;
use crate::repository;
use crate::store::{Store, StoreConfig, TransactionKind};
use crate::types::{
    AdditionsSpec, DirUsageNode, LotName, LotUsage, LotView, ManagementPolicyAttrs, NewLotSpec,
    ReassignmentPolicy, SubtractionsSpec, UpdateLotSpec, UpdateUsageSpec, DEFAULT_LOT,
};
use crate::usage;

/// The operation set exposed to embedders (and, ultimately, the C shim).
pub struct Facade {
    store: Store,
    clock: Box<dyn ClockSource>,
}

impl Facade {
    /// Opens the store at the `Context`-resolved `lot_home` and wires up a
    /// wall-clock [`SystemClock`].
    ///
    /// # Errors
    /// Returns any error [`Store::open`] can return.
    pub fn open(ctx: &Context, config: StoreConfig) -> Result<Self> {
        Ok(Self { store: Store::open(ctx, config)?, clock: Box::new(SystemClock) })
    }

    /// As [`Self::open`], but with an injectable clock (tests, or an
    /// embedder wanting deterministic policy evaluation).
    ///
    /// # Errors
    /// Returns any error [`Store::open`] can return.
    pub fn open_with_clock(ctx: &Context, config: StoreConfig, clock: Box<dyn ClockSource>) -> Result<Self> {
        Ok(Self { store: Store::open(ctx, config)?, clock })
    }

    fn require_exists(conn: &Connection, op: &'static str, name: &str) -> Result<()> {
        if repository::lot_exists(conn, name)? {
            Ok(())
        } else {
            Err(LotError::not_found(op, name))
        }
    }

    // -- mutating operations -------------------------------------------------

    /// Creates a new lot.
    ///
    /// # Errors
    /// [`LotError::AlreadyExists`] if the lot already exists,
    /// [`LotError::InvariantViolation`] if `default` doesn't exist yet (and
    /// this isn't the bootstrap call), parents are empty for a non-`default`
    /// lot, or the declared edges would create a cycle,
    /// [`LotError::Unauthorized`] if the caller doesn't own the declared
    /// ancestry.
    pub fn add_lot(&self, ctx: &Context, spec: NewLotSpec) -> Result<()> {
        const OP_NAME: &str = "add_lot";
        let txn = self.store.transaction(TransactionKind::Immediate)?;

        if spec.lot_name != DEFAULT_LOT && !repository::lot_exists(&txn, DEFAULT_LOT)? {
            return Err(LotError::invariant(OP_NAME, "default lot does not exist yet"));
        }
        if repository::lot_exists(&txn, &spec.lot_name)? {
            return Err(LotError::already_exists(OP_NAME, spec.lot_name));
        }
        if spec.lot_name != DEFAULT_LOT && spec.parents.is_empty() {
            return Err(LotError::invariant(OP_NAME, "only the default lot may have no parent"));
        }

        graph::check_context_for_parents(&txn, ctx, &spec.parents, true)?;
        if !spec.children.is_empty() {
            graph::check_context_for_children(&txn, ctx, &spec.children, true)?;
        }

        if spec.lot_name != DEFAULT_LOT {
            graph::cycle_check(&txn, &spec.lot_name, &spec.parents, &spec.children)?;
        }
        let splices = graph::splice_targets(&txn, &spec.parents, &spec.children)?;

        let lot_name = spec.lot_name.clone();
        let children = spec.children.clone();
        repository::write_new(&txn, &spec)?;
        for child in &children {
            repository::store_new_parents(&txn, child, &[lot_name.as_str()])?;
        }
        for (parent, child) in &splices {
            repository::remove_parents(&txn, child, &[parent.as_str()])?;
        }

        txn.commit()?;
        tracing::info!(lot = %lot_name, "created lot");
        Ok(())
    }

    /// Removes a single lot, reassigning its children per `policy`.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist,
    /// [`LotError::Unauthorized`] if the caller lacks standing,
    /// [`LotError::InvariantViolation`] if asked to remove `default` while
    /// other lots remain.
    pub fn remove_lot(&self, ctx: &Context, name: &str, policy: ReassignmentPolicy) -> Result<()> {
        const OP_NAME: &str = "remove_lot";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&name.to_string()), true)?;

        if name == DEFAULT_LOT {
            let others = repository::list_all_lots(&txn)?.into_iter().any(|n| n != DEFAULT_LOT);
            if others {
                return Err(LotError::invariant(OP_NAME, "default cannot be removed while other lots exist"));
            }
        }

        let removed_parents = graph::direct_parents(&txn, name)?;
        let children = graph::direct_children(&txn, name)?;
        let removed_policy = repository::fetch_policy(&txn, name)?;

        for child in &children {
            let orphan = graph::is_orphan_of(&txn, child, name)?;
            let should_reparent =
                (orphan && policy.assign_ltbr_parent_as_parent_to_orphans)
                    || (!orphan && policy.assign_ltbr_parent_as_parent_to_non_orphans);
            if should_reparent {
                repository::remove_parents(&txn, child, &[name])?;
                let parents: Vec<&str> = removed_parents.iter().map(String::as_str).collect();
                repository::store_new_parents(&txn, child, &parents)?;
            }
            if policy.assign_policy_to_children {
                if let Some(attrs) = removed_policy {
                    repository::write_policy(&txn, child, &attrs)?;
                }
            }
        }

        repository::delete_lot(&txn, name)?;
        txn.commit()?;
        tracing::info!(lot = %name, "removed lot");
        Ok(())
    }

    /// Deletes `name` and its entire descendant subtree.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist,
    /// [`LotError::Unauthorized`] if the caller lacks standing.
    pub fn remove_lot_recursive(&self, ctx: &Context, name: &str) -> Result<()> {
        const OP_NAME: &str = "remove_lot_recursive";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&name.to_string()), true)?;

        let mut subtree = graph::recursive_descendants(&txn, name)?;
        subtree.push(name.to_string());
        for lot in &subtree {
            repository::delete_lot(&txn, lot)?;
        }
        txn.commit()?;
        tracing::info!(lot = %name, removed = subtree.len(), "removed lot subtree");
        Ok(())
    }

    /// Applies an owner change, parent renames, path rewrites, and/or a
    /// partial policy attribute update to an existing lot.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist,
    /// [`LotError::Unauthorized`] if the caller lacks standing,
    /// [`LotError::InvariantViolation`] if a parent rename would create a
    /// cycle.
    pub fn update_lot(&self, ctx: &Context, spec: UpdateLotSpec) -> Result<()> {
        const OP_NAME: &str = "update_lot";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, &spec.lot_name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&spec.lot_name), true)?;

        if let Some(owner) = &spec.owner {
            repository::update_owner(&txn, &spec.lot_name, owner)?;
        }
        for rename in &spec.parents {
            graph::cycle_check(&txn, &spec.lot_name, &[rename.new.clone()], &[])?;
            repository::rename_parent(&txn, &spec.lot_name, &rename.current, &rename.new)?;
        }
        for rewrite in &spec.paths {
            repository::rewrite_path(&txn, &rewrite.current, &rewrite.new, rewrite.recursive)?;
        }
        if let Some(update) = &spec.management_policy_attrs {
            let mut attrs = repository::fetch_policy(&txn, &spec.lot_name)?.unwrap_or_default();
            if let Some(v) = update.dedicated_gb {
                attrs.dedicated_gb = v;
            }
            if let Some(v) = update.opportunistic_gb {
                attrs.opportunistic_gb = v;
            }
            if let Some(v) = update.max_num_objects {
                attrs.max_num_objects = v;
            }
            if let Some(v) = update.creation_time {
                attrs.creation_time = v;
            }
            if let Some(v) = update.expiration_time {
                attrs.expiration_time = v;
            }
            if let Some(v) = update.deletion_time {
                attrs.deletion_time = v;
            }
            repository::write_policy(&txn, &spec.lot_name, &attrs)?;
        }

        txn.commit()?;
        Ok(())
    }

    /// Appends parent edges and/or paths to an existing lot.
    ///
    /// # Errors
    /// As [`Self::update_lot`].
    pub fn add_to_lot(&self, ctx: &Context, spec: AdditionsSpec) -> Result<()> {
        const OP_NAME: &str = "add_to_lot";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, &spec.lot_name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&spec.lot_name), true)?;

        if !spec.parents.is_empty() {
            graph::cycle_check(&txn, &spec.lot_name, &spec.parents, &[])?;
            let parents: Vec<&str> = spec.parents.iter().map(String::as_str).collect();
            repository::store_new_parents(&txn, &spec.lot_name, &parents)?;
        }
        if !spec.paths.is_empty() {
            repository::store_new_paths(&txn, &spec.lot_name, &spec.paths)?;
        }

        txn.commit()?;
        Ok(())
    }

    /// Removes parent edges and/or paths from an existing lot.
    ///
    /// # Errors
    /// As [`Self::update_lot`].
    pub fn remove_from_lot(&self, ctx: &Context, spec: SubtractionsSpec) -> Result<()> {
        const OP_NAME: &str = "remove_from_lot";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, &spec.lot_name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&spec.lot_name), true)?;

        if !spec.parents.is_empty() {
            let parents: Vec<&str> = spec.parents.iter().map(String::as_str).collect();
            repository::remove_parents(&txn, &spec.lot_name, &parents)?;
        }
        if !spec.paths.is_empty() {
            repository::remove_paths(&txn, &spec.paths)?;
        }

        txn.commit()?;
        Ok(())
    }

    /// Overwrites this lot's self-usage counters.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist,
    /// [`LotError::Unauthorized`] if the caller lacks standing.
    pub fn update_lot_usage(&self, ctx: &Context, spec: UpdateUsageSpec) -> Result<()> {
        const OP_NAME: &str = "update_lot_usage";
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        Self::require_exists(&txn, OP_NAME, &spec.lot_name)?;
        graph::check_context_for_parents(&txn, ctx, std::slice::from_ref(&spec.lot_name), true)?;

        if let Some(v) = spec.self_gb {
            usage::update_self_usage(&txn, &spec.lot_name, crate::types::SelfUsageKey::SelfGb, v)?;
        }
        if let Some(v) = spec.self_objects {
            usage::update_self_usage(&txn, &spec.lot_name, crate::types::SelfUsageKey::SelfObjects, v as f64)?;
        }
        if let Some(v) = spec.self_gb_being_written {
            usage::update_self_usage(&txn, &spec.lot_name, crate::types::SelfUsageKey::SelfGbBeingWritten, v)?;
        }
        if let Some(v) = spec.self_objects_being_written {
            usage::update_self_usage(
                &txn,
                &spec.lot_name,
                crate::types::SelfUsageKey::SelfObjectsBeingWritten,
                v as f64,
            )?;
        }

        txn.commit()?;
        Ok(())
    }

    /// Runs the directory-tree usage algorithm over `tree`.
    ///
    /// # Errors
    /// Returns a store error on any query/write failure.
    pub fn update_lot_usage_by_dir(&self, tree: &[DirUsageNode]) -> Result<()> {
        let txn = self.store.transaction(TransactionKind::Immediate)?;
        usage::update_usage_by_dirs(&txn, tree)?;
        txn.commit()?;
        Ok(())
    }

    // -- read operations ------------------------------------------------------

    /// # Errors
    /// Returns a store error on query failure.
    pub fn list_all_lots(&self) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        repository::list_all_lots(&conn)
    }

    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_parents(&self, name: &str) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_parents", name)?;
        graph::direct_parents(&conn, name)
    }

    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_children(&self, name: &str) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_children", name)?;
        graph::direct_children(&conn, name)
    }

    /// Every distinct owner across `name` and its recursive ancestors.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_owners(&self, name: &str) -> Result<Vec<String>> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_owners", name)?;
        recursive_owners(&conn, name)
    }

    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_lot_dirs(&self, name: &str) -> Result<Vec<crate::types::PathEntry>> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_lot_dirs", name)?;
        repository::fetch_paths(&conn, name)
    }

    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_policy_attributes(&self, name: &str) -> Result<ManagementPolicyAttrs> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_policy_attributes", name)?;
        Ok(repository::fetch_policy(&conn, name)?.unwrap_or_default())
    }

    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_lot_usage(&self, name: &str) -> Result<LotUsage> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_lot_usage", name)?;
        Ok(repository::fetch_usage(&conn, name)?.unwrap_or_default())
    }

    /// Full joined view of one lot.
    ///
    /// # Errors
    /// [`LotError::NotFound`] if the lot doesn't exist.
    pub fn get_lot_as_json(&self, name: &str) -> Result<LotView> {
        let conn = self.store.acquire()?;
        Self::require_exists(&conn, "get_lot_as_json", name)?;
        Ok(LotView {
            lot_name: name.to_string(),
            owner: repository::fetch_owner(&conn, name)?.unwrap_or_default(),
            parents: graph::direct_parents(&conn, name)?,
            children: graph::direct_children(&conn, name)?,
            recursive_owners: recursive_owners(&conn, name)?,
            paths: repository::fetch_paths(&conn, name)?,
            management_policy_attrs: repository::fetch_policy(&conn, name)?.unwrap_or_default(),
            usage: repository::fetch_usage(&conn, name)?.unwrap_or_default(),
        })
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_from_dir(&self, dir: &str, recursive: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        path_index::get_lots_from_dir(&conn, dir, recursive)
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_past_exp(&self, recursive: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        crate::policy::get_lots_past_exp(&conn, self.clock.as_ref(), recursive)
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_past_del(&self, recursive: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        crate::policy::get_lots_past_del(&conn, self.clock.as_ref(), recursive)
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_past_opp(&self, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        crate::policy::get_lots_past_opp(&conn, recursive_quota, recursive_children)
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_past_ded(&self, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        crate::policy::get_lots_past_ded(&conn, recursive_quota, recursive_children)
    }

    /// # Errors
    /// Returns a store error on query failure.
    pub fn get_lots_past_obj(&self, recursive_quota: bool, recursive_children: bool) -> Result<Vec<LotName>> {
        let conn = self.store.acquire()?;
        crate::policy::get_lots_past_obj(&conn, recursive_quota, recursive_children)
    }
}

fn recursive_owners(conn: &Connection, name: &str) -> Result<Vec<String>> {
    let mut scope = graph::recursive_ancestors(conn, name)?;
    scope.push(name.to_string());
    let mut owners: Vec<String> = scope
        .iter()
        .filter_map(|n| repository::fetch_owner(conn, n).transpose())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    owners.sort();
    owners.dedup();
    Ok(owners)
}
