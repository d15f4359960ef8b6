//! Core data types shared across `lotman` modules.
//!
//! These mirror the five persistent entities from the data model: `Owner`,
//! `Parent`, `Path`, `ManagementPolicyAttributes`, and `LotUsage`. Request
//! DTOs that a C shim would deserialize from JSON before calling the
//! [`crate::facade`] live at the bottom of this file — field names are
//! load-bearing, matching the JSON schemas this crate publishes.

use serde::{Deserialize, Serialize};

/// The reserved name of the bootstrap root lot.
pub const DEFAULT_LOT: &str = "default";

pub type LotName = String;

/// A single claimed storage path prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    pub recursive: bool,
}

/// Management policy attributes for one lot (one row per lot).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManagementPolicyAttrs {
    pub dedicated_gb: f64,
    pub opportunistic_gb: f64,
    pub max_num_objects: i64,
    pub creation_time: i64,
    pub expiration_time: i64,
    pub deletion_time: i64,
}

impl Default for ManagementPolicyAttrs {
    fn default() -> Self {
        Self {
            dedicated_gb: 0.0,
            opportunistic_gb: 0.0,
            max_num_objects: 0,
            creation_time: 0,
            expiration_time: 0,
            deletion_time: 0,
        }
    }
}

/// Usage counters for one lot (one row per lot, zero-initialized on create).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LotUsage {
    pub self_gb: f64,
    pub children_gb: f64,
    pub self_objects: i64,
    pub children_objects: i64,
    pub self_gb_being_written: f64,
    pub children_gb_being_written: f64,
    pub self_objects_being_written: i64,
    pub children_objects_being_written: i64,
}

/// Which of the four self-usage counters an `update_self_usage` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfUsageKey {
    SelfGb,
    SelfObjects,
    SelfGbBeingWritten,
    SelfObjectsBeingWritten,
}

/// A key into `ManagementPolicyAttrs`, used by `get_restricting_attribute`
/// and the policy-query DTOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAttrKey {
    DedicatedGb,
    OpportunisticGb,
    MaxNumObjects,
    CreationTime,
    ExpirationTime,
    DeletionTime,
}

impl PolicyAttrKey {
    /// `true` for keys where the most-restrictive ancestor value is the
    /// *maximum* rather than the minimum (only `creation_time`).
    #[must_use]
    pub fn restricts_via_max(self) -> bool {
        matches!(self, PolicyAttrKey::CreationTime)
    }
}

/// The three booleans controlling how a removed lot's children/paths are
/// reparented, carried verbatim from the original `init_reassignment_policy`
/// call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentPolicy {
    pub assign_ltbr_parent_as_parent_to_orphans: bool,
    pub assign_ltbr_parent_as_parent_to_non_orphans: bool,
    pub assign_policy_to_children: bool,
}

/// Full, joined view of one lot, as returned by `get_lot_as_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotView {
    pub lot_name: LotName,
    pub owner: String,
    pub parents: Vec<LotName>,
    pub children: Vec<LotName>,
    pub recursive_owners: Vec<String>,
    pub paths: Vec<PathEntry>,
    pub management_policy_attrs: ManagementPolicyAttrs,
    pub usage: LotUsage,
}

// ---------------------------------------------------------------------------
// Facade request DTOs (§6 JSON schemas)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLotSpec {
    pub lot_name: LotName,
    pub owner: String,
    pub parents: Vec<LotName>,
    #[serde(default)]
    pub children: Vec<LotName>,
    pub paths: Vec<PathEntry>,
    pub management_policy_attrs: ManagementPolicyAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rename {
    pub current: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRewrite {
    pub current: String,
    pub new: String,
    pub recursive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementPolicyAttrsUpdate {
    pub dedicated_gb: Option<f64>,
    pub opportunistic_gb: Option<f64>,
    pub max_num_objects: Option<i64>,
    pub creation_time: Option<i64>,
    pub expiration_time: Option<i64>,
    pub deletion_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLotSpec {
    pub lot_name: LotName,
    pub owner: Option<String>,
    #[serde(default)]
    pub parents: Vec<Rename>,
    #[serde(default)]
    pub paths: Vec<PathRewrite>,
    pub management_policy_attrs: Option<ManagementPolicyAttrsUpdate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionsSpec {
    pub lot_name: LotName,
    #[serde(default)]
    pub parents: Vec<LotName>,
    #[serde(default)]
    pub paths: Vec<PathEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtractionsSpec {
    pub lot_name: LotName,
    #[serde(default)]
    pub parents: Vec<LotName>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUsageSpec {
    pub lot_name: LotName,
    pub self_gb: Option<f64>,
    pub self_objects: Option<i64>,
    pub self_gb_being_written: Option<f64>,
    pub self_objects_being_written: Option<i64>,
}

/// One node of a directory-usage report tree (`update_usage_by_dir`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirUsageNode {
    pub path: String,
    #[serde(default)]
    pub size_gb: f64,
    #[serde(default)]
    pub num_obj: i64,
    #[serde(default)]
    pub gb_being_written: f64,
    #[serde(default)]
    pub objects_being_written: i64,
    pub includes_subdirs: bool,
    #[serde(default)]
    pub subdirs: Vec<DirUsageNode>,
}

/// Net resource delta attributed to a single lot during a directory-tree
/// usage update, before being folded into `LotUsage`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageDelta {
    pub gb: f64,
    pub objects: i64,
    pub gb_being_written: f64,
    pub objects_being_written: i64,
}

impl std::ops::AddAssign for UsageDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.gb += rhs.gb;
        self.objects += rhs.objects;
        self.gb_being_written += rhs.gb_being_written;
        self.objects_being_written += rhs.objects_being_written;
    }
}

impl std::ops::SubAssign for UsageDelta {
    fn sub_assign(&mut self, rhs: Self) {
        self.gb -= rhs.gb;
        self.objects -= rhs.objects;
        self.gb_being_written -= rhs.gb_being_written;
        self.objects_being_written -= rhs.objects_being_written;
    }
}
