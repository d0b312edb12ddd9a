use serde::{Deserialize, Serialize};

/// An unresolved import as extracted from source: `source_file` names a
/// project-relative path, `imported_module` is the raw dotted module name
/// before resolution against known files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub source_file: String,
    pub imported_module: String,
}

/// A resolved import: `target_file` is a known project file, not a module
/// name. Produced by `DependencyIndex::resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source_file: String,
    pub target_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub last_indexed: i64,
}
