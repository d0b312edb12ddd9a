//! Persistent import graph mapping modified source files to affected test
//! files. Three tables (`files`, `imports`, `dependencies`) in a single
//! SQLite database, rebuilt on demand rather than kept live.
//!
//! Grounded in the teacher's `Store` migration discipline (a versioned
//! `MIGRATIONS` table applied once via a `schema_migrations` ledger) but
//! scoped to the three tables the distilled spec names, since this index
//! has nothing to do with the teacher's event/session/plan persistence.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use span_core::{DependencyEdge, FileRecord, ImportEdge};

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        last_indexed INTEGER NOT NULL
     );
     CREATE TABLE IF NOT EXISTS imports (
        source_file TEXT NOT NULL,
        imported_module TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_imports_source_module
        ON imports(source_file, imported_module);
     CREATE TABLE IF NOT EXISTS dependencies (
        source_file TEXT NOT NULL,
        target_file TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_dependencies_target
        ON dependencies(target_file);",
)];

/// The persistent dependency index. One SQLite connection per instance
/// (single exclusive connection policy, per the concurrency model).
pub struct DependencyIndex {
    conn: Connection,
}

impl DependencyIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening index db {}", db_path.display()))?;
        let index = Self { conn };
        index.migrate()?;
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let index = Self { conn };
        index.migrate()?;
        Ok(index)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )?;
        for (version, sql) in MIGRATIONS {
            let already: i64 = self.conn.query_row(
                "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                [*version],
                |r| r.get(0),
            )?;
            if already == 0 {
                self.conn.execute_batch(sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }

    /// Replaces `path`'s file record and its outgoing imports atomically.
    /// `timestamp` is a caller-supplied epoch value (the index never reads
    /// the clock itself, so callers can pass a fixed value in tests).
    pub fn upsert(
        &mut self,
        path: &str,
        content_hash: &str,
        imports: &[String],
        timestamp: i64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO files (path, content_hash, last_indexed) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET content_hash = excluded.content_hash,
                last_indexed = excluded.last_indexed",
            params![path, content_hash, timestamp],
        )?;
        tx.execute("DELETE FROM imports WHERE source_file = ?1", params![path])?;
        for module in imports {
            tx.execute(
                "INSERT INTO imports (source_file, imported_module) VALUES (?1, ?2)",
                params![path, module],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content_hash, last_indexed FROM files WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        if let Some(row) = rows.next()? {
            Ok(Some(FileRecord {
                path: row.get(0)?,
                content_hash: row.get(1)?,
                last_indexed: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Rebuilds the `dependencies` table from scratch by resolving every
    /// `imports` row against known files. A dotted module `a.b` resolves to
    /// `a/b.py` or `a/b/__init__.py`, first match wins. Not incrementally
    /// patched: the whole table is regenerated on each call.
    pub fn resolve(&mut self) -> Result<()> {
        let known: BTreeSet<String> = {
            let mut stmt = self.conn.prepare("SELECT path FROM files")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let edges: Vec<ImportEdge> = {
            let mut stmt = self
                .conn
                .prepare("SELECT source_file, imported_module FROM imports")?;
            let rows = stmt.query_map([], |r| {
                Ok(ImportEdge {
                    source_file: r.get(0)?,
                    imported_module: r.get(1)?,
                })
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut resolved: Vec<DependencyEdge> = Vec::new();
        for edge in &edges {
            if let Some(target_file) = resolve_module(&edge.imported_module, &known) {
                resolved.push(DependencyEdge {
                    source_file: edge.source_file.clone(),
                    target_file,
                });
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM dependencies", [])?;
        for edge in &resolved {
            tx.execute(
                "INSERT INTO dependencies (source_file, target_file) VALUES (?1, ?2)",
                params![edge.source_file, edge.target_file],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Sorted union of: test files that directly depend on any modified
    /// file and whose path contains one of `test_patterns`, plus any
    /// modified file that is itself a test. Direct edges only — depth-1
    /// closure is a documented limitation, not an oversight (see
    /// DESIGN.md).
    pub fn find_affected_tests(
        &self,
        modified_files: &[String],
        test_patterns: &[String],
    ) -> Result<Vec<String>> {
        let mut affected: BTreeSet<String> = BTreeSet::new();

        for modified in modified_files {
            if is_test_path(modified, test_patterns) {
                affected.insert(modified.clone());
            }

            let mut stmt = self
                .conn
                .prepare("SELECT source_file FROM dependencies WHERE target_file = ?1")?;
            let rows = stmt.query_map(params![modified], |r| r.get::<_, String>(0))?;
            for row in rows {
                let source = row?;
                if is_test_path(&source, test_patterns) {
                    affected.insert(source);
                }
            }
        }

        Ok(affected.into_iter().collect())
    }
}

fn is_test_path(path: &str, test_patterns: &[String]) -> bool {
    test_patterns.iter().any(|p| path.contains(p.as_str()))
}

/// Resolves a dotted module name to a known project file. Candidate forms,
/// in order: `a/b.py`, `a/b/__init__.py`. First match against `known` wins.
fn resolve_module(module: &str, known: &BTreeSet<String>) -> Option<String> {
    if module.is_empty() {
        return None;
    }
    let joined = module.replace('.', "/");
    let single_file = format!("{joined}.py");
    if known.contains(&single_file) {
        return Some(single_file);
    }
    let package_init = format!("{joined}/__init__.py");
    if known.contains(&package_init) {
        return Some(package_init);
    }
    None
}

/// Groups per-file import extraction results before a batch of `upsert`
/// calls, matching how the original implementation walks a changed-file
/// batch before a single `resolve()`.
pub fn group_by_file(edges: &[(String, String)]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (source, module) in edges {
        grouped.entry(source.clone()).or_default().push(module.clone());
    }
    grouped
}
