//! Identities of workspaces and the tables they contain.
//!
//! A [`TableHandle`] is the immutable key every other part of the toolkit uses:
//! the field registry caches schemas per handle, cursor sessions borrow one for
//! their whole lifetime, and edit sessions guard the [`WorkspacePath`] inside it.

use std::fmt;

/// Location of a workspace (file or enterprise geodatabase).
///
/// Two paths refer to the same workspace when they are equal after
/// normalization: backslashes become forward slashes, trailing separators are
/// dropped and the comparison ignores ASCII case, matching how geodatabase
/// paths behave on the platforms the engines run on.
#[derive(Debug, Clone)]
pub struct WorkspacePath {
    raw: String,
    key: String,
}

impl WorkspacePath {
    /// Creates a workspace path from any string-like value.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let raw = path.into();
        let key = normalize(&raw);
        Self { raw, key }
    }

    /// Returns the path exactly as it was supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` for file geodatabases (`*.gdb`).
    #[must_use]
    pub fn is_file_gdb(&self) -> bool {
        self.key.ends_with(".gdb")
    }

    /// Returns `true` for enterprise connection files (`*.sde`).
    #[must_use]
    pub fn is_enterprise(&self) -> bool {
        self.key.ends_with(".sde")
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

impl PartialEq for WorkspacePath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for WorkspacePath {}

impl std::hash::Hash for WorkspacePath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for WorkspacePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkspacePath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A table or feature class inside a workspace.
///
/// # Examples
///
/// ```
/// use gpf_core_common::TableHandle;
///
/// let parcels = TableHandle::new("C:/data/city.gdb", "Parcels");
/// assert_eq!(parcels.name(), "Parcels");
/// assert_eq!(parcels.to_string(), "C:/data/city.gdb/Parcels");
/// assert_eq!(parcels, TableHandle::new(r"c:\data\city.gdb\", "PARCELS"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableHandle {
    workspace: WorkspacePath,
    name: TableName,
}

impl TableHandle {
    /// Creates a handle for `name` inside `workspace`.
    #[must_use]
    pub fn new(workspace: impl Into<WorkspacePath>, name: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            name: TableName::new(name.into()),
        }
    }

    /// The workspace that contains this table.
    #[must_use]
    pub fn workspace(&self) -> &WorkspacePath {
        &self.workspace
    }

    /// The table name as supplied by the caller.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name.raw
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.workspace.as_str().trim_end_matches(['/', '\\']),
            self.name.raw
        )
    }
}

/// Table names compare case-insensitively.
#[derive(Debug, Clone)]
struct TableName {
    raw: String,
    key: String,
}

impl TableName {
    fn new(raw: String) -> Self {
        let key = raw.to_ascii_uppercase();
        Self { raw, key }
    }
}

impl PartialEq for TableName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TableName {}

impl std::hash::Hash for TableName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_workspace_normalization() {
        let a = WorkspacePath::new(r"C:\Temp\Test.gdb\");
        let b = WorkspacePath::new("c:/temp/test.gdb");
        assert_eq!(a, b);
        assert!(a.is_file_gdb());
        assert!(!a.is_enterprise());
        assert_eq!(a.as_str(), r"C:\Temp\Test.gdb\");
    }

    #[test]
    fn test_enterprise_workspace() {
        let ws = WorkspacePath::new("C:/connections/prod.sde");
        assert!(ws.is_enterprise());
        assert!(!ws.is_file_gdb());
    }

    #[test]
    fn test_table_handles_hash_case_insensitively() {
        let mut set = HashSet::new();
        set.insert(TableHandle::new("C:/a.gdb", "Parcels"));
        set.insert(TableHandle::new("C:/A.gdb/", "PARCELS"));
        set.insert(TableHandle::new("C:/a.gdb", "Roads"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_joins_workspace_and_name() {
        let table = TableHandle::new("C:/a.gdb/", "Roads");
        assert_eq!(table.to_string(), "C:/a.gdb/Roads");
    }
}
