//! Ordered, validated collections of migrations.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::DiscoveryError;
use crate::migration::Migration;

/// An ordered list of migrations with unique versions.
///
/// Order is always ascending by version, regardless of the order in which
/// migrations were discovered. Gaps between versions are allowed, duplicates
/// are not.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Builds a set from migrations in any order.
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, DiscoveryError> {
        let mut by_version: BTreeMap<i64, Migration> = BTreeMap::new();
        for migration in migrations {
            if let Some(existing) = by_version.get(&migration.version()) {
                return Err(DiscoveryError::DuplicateVersion {
                    version: migration.version(),
                    first: existing.source().to_string(),
                    second: migration.source().to_string(),
                });
            }
            by_version.insert(migration.version(), migration);
        }

        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    /// Loads every `*.sql` file in `dir` (not recursive).
    ///
    /// Files with other extensions are ignored. A `.sql` file whose name does
    /// not follow `V{version}__{description}.sql` is an error.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let dir = dir.as_ref();
        let io_err = |path: &Path, source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().into_owned();
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            log::debug!("Discovered migration file {}", path.display());
            migrations.push(Migration::from_file(file_name, contents)?);
        }

        Self::new(migrations)
    }

    /// Builds a set from `(file_name, contents)` pairs, typically embedded
    /// with `include_str!`.
    pub fn from_embedded(files: &[(&str, &str)]) -> Result<Self, DiscoveryError> {
        let migrations = files
            .iter()
            .map(|(name, contents)| Migration::from_file(*name, *contents))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(migrations)
    }

    /// Iterates migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    /// Number of migrations in the set.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the set has no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Looks up a migration by version.
    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version())
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// The highest version in the set, if any.
    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version())
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}
