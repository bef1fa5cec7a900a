/// SQL DDL for the converge state database.
///
/// Instances are stored as JSON text so the schema stays independent of
/// provider attribute layouts.

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES_SQL: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- One row per state id
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    resource_type TEXT NOT NULL,
    provider TEXT NOT NULL DEFAULT '',
    dependencies_json TEXT NOT NULL DEFAULT '[]',
    primary_json TEXT,
    deposed_json TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

-- Planned diffs waiting to be applied
CREATE TABLE IF NOT EXISTS diffs (
    id TEXT PRIMARY KEY,
    diff_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type);
CREATE INDEX IF NOT EXISTS idx_resources_provider ON resources(provider);
";
