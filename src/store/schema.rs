//! DDL for the five persistent entities plus `schema_versions`.

pub const TARGET_SCHEMA_VERSION: i64 = 1;

/// Table name -> expected column names, used by migration classification to
/// detect an incompatible (wrong-shape) existing database.
pub const EXPECTED_TABLES: &[(&str, &[&str])] = &[
    ("owners", &["lot_name", "owner"]),
    ("parents", &["lot_name", "parent"]),
    ("paths", &["path", "lot_name", "recursive"]),
    (
        "management_policy_attributes",
        &[
            "lot_name",
            "dedicated_gb",
            "opportunistic_gb",
            "max_num_objects",
            "creation_time",
            "expiration_time",
            "deletion_time",
        ],
    ),
    (
        "lot_usage",
        &[
            "lot_name",
            "self_gb",
            "children_gb",
            "self_objects",
            "children_objects",
            "self_gb_being_written",
            "children_gb_being_written",
            "self_objects_being_written",
            "children_objects_being_written",
        ],
    ),
];

pub const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS owners (
    lot_name TEXT PRIMARY KEY,
    owner TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS parents (
    lot_name TEXT NOT NULL,
    parent TEXT NOT NULL,
    PRIMARY KEY (lot_name, parent)
);
CREATE TABLE IF NOT EXISTS paths (
    path TEXT PRIMARY KEY,
    lot_name TEXT NOT NULL,
    recursive INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS management_policy_attributes (
    lot_name TEXT PRIMARY KEY,
    dedicated_gb REAL NOT NULL,
    opportunistic_gb REAL NOT NULL,
    max_num_objects INTEGER NOT NULL,
    creation_time INTEGER NOT NULL,
    expiration_time INTEGER NOT NULL,
    deletion_time INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS lot_usage (
    lot_name TEXT PRIMARY KEY,
    self_gb REAL NOT NULL DEFAULT 0,
    children_gb REAL NOT NULL DEFAULT 0,
    self_objects INTEGER NOT NULL DEFAULT 0,
    children_objects INTEGER NOT NULL DEFAULT 0,
    self_gb_being_written REAL NOT NULL DEFAULT 0,
    children_gb_being_written REAL NOT NULL DEFAULT 0,
    self_objects_being_written INTEGER NOT NULL DEFAULT 0,
    children_objects_being_written INTEGER NOT NULL DEFAULT 0
);
";

pub const CREATE_SCHEMA_VERSIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_versions (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
";
