//! File-based manual migrations.
//!
//! Directory layout: `<version>_<description>.up.sql` with an optional
//! matching `.down.sql`. Versions are the numeric prefix; files are applied
//! ascending and rolled back descending, statements split on `;`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    Migrator, applied_versions, delete_version, exec_ddl, record_version, sha256_hex,
};
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Up,
    Down,
}

/// A version's up/down file pair on disk.
#[derive(Debug, Clone, Default)]
pub(crate) struct MigrationPair {
    pub(crate) up: Option<PathBuf>,
    pub(crate) down: Option<PathBuf>,
}

/// Parse `^(\d+)_<description>.(up|down).sql$`.
fn parse_migration_filename(name: &str) -> Option<(i64, FileKind)> {
    let (stem, kind) = if let Some(stem) = name.strip_suffix(".up.sql") {
        (stem, FileKind::Up)
    } else if let Some(stem) = name.strip_suffix(".down.sql") {
        (stem, FileKind::Down)
    } else {
        return None;
    };

    let digits_end = stem
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)?;
    if digits_end == 0 || !stem[digits_end..].starts_with('_') {
        return None;
    }
    let version = stem[..digits_end].parse::<i64>().ok()?;
    Some((version, kind))
}

/// Scan a migration directory into version-ordered pairs.
pub(crate) fn scan_dir(dir: &Path) -> DbResult<BTreeMap<i64, MigrationPair>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        DbError::migration(format!("failed to read migrations dir {}: {e}", dir.display()))
    })?;

    let mut pairs: BTreeMap<i64, MigrationPair> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            DbError::migration(format!("failed to read entry in {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((version, kind)) = parse_migration_filename(name) else {
            continue;
        };

        let slot = pairs.entry(version).or_default();
        match kind {
            FileKind::Up => {
                if slot.up.is_some() {
                    return Err(DbError::migration(format!(
                        "duplicate up migration for version {version}"
                    )));
                }
                slot.up = Some(path);
            }
            FileKind::Down => {
                if slot.down.is_some() {
                    return Err(DbError::migration(format!(
                        "duplicate down migration for version {version}"
                    )));
                }
                slot.down = Some(path);
            }
        }
    }
    Ok(pairs)
}

fn read_body(path: &Path) -> DbResult<String> {
    fs::read_to_string(path)
        .map_err(|e| DbError::migration(format!("failed to read {}: {e}", path.display())))
}

/// Statements in a migration body: split on `;`, whitespace-only segments
/// dropped.
fn split_statements(body: &str) -> Vec<&str> {
    body.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl Migrator {
    /// Apply every not-yet-applied up migration from `dir`, ascending, in a
    /// single transaction under the advisory lock. Each version is recorded
    /// with the checksum of its up body. Returns the applied versions.
    pub async fn migrate_up_dir(&self, dir: impl AsRef<Path>) -> DbResult<Vec<i64>> {
        let pairs = scan_dir(dir.as_ref())?;
        let tx = self.begin().await?;

        let applied: Vec<i64> = applied_versions(&tx).await?;
        let mut done = Vec::new();
        for (version, pair) in &pairs {
            if applied.contains(version) {
                continue;
            }
            let up_path = pair.up.as_ref().ok_or_else(|| {
                DbError::migration(format!("version {version} has a down file but no up file"))
            })?;
            let body = read_body(up_path)?;
            for statement in split_statements(&body) {
                exec_ddl(&tx, statement).await?;
            }
            record_version(&tx, *version, &sha256_hex(&body)).await?;
            done.push(*version);
        }

        tx.commit().await?;
        Ok(done)
    }

    /// Roll back up to `steps` applied migrations, newest first, in a
    /// single transaction under the advisory lock.
    ///
    /// Safety gates: `DROP TABLE` statements are blocked unless
    /// `allow_table_drop` is set, `DROP COLUMN` unless `allow_column_drop`.
    /// Returns the rolled-back versions, newest first.
    pub async fn migrate_down_dir(&self, dir: impl AsRef<Path>, steps: usize) -> DbResult<Vec<i64>> {
        if steps == 0 {
            return Ok(Vec::new());
        }
        let pairs = scan_dir(dir.as_ref())?;
        let tx = self.begin().await?;

        let mut applied = applied_versions(&tx).await?;
        applied.reverse();

        let mut done = Vec::new();
        for version in applied.into_iter().take(steps) {
            let pair = pairs.get(&version).ok_or_else(|| {
                DbError::migration(format!(
                    "cannot roll back version {version}: migration file not found"
                ))
            })?;
            let down_path = pair.down.as_ref().ok_or_else(|| {
                DbError::migration(format!(
                    "cannot roll back version {version}: missing down migration"
                ))
            })?;
            let body = read_body(down_path)?;
            for statement in split_statements(&body) {
                self.check_down_gates(version, statement)?;
                exec_ddl(&tx, statement).await?;
            }
            delete_version(&tx, version).await?;
            done.push(version);
        }

        tx.commit().await?;
        Ok(done)
    }

    fn check_down_gates(&self, version: i64, statement: &str) -> DbResult<()> {
        let upper = statement.to_ascii_uppercase();
        if upper.contains("DROP TABLE") && !self.options.allow_table_drop {
            return Err(DbError::migration(format!(
                "version {version}: DROP TABLE blocked; set allow_table_drop to proceed"
            )));
        }
        if upper.contains("DROP COLUMN") && !self.options.allow_column_drop {
            return Err(DbError::migration(format!(
                "version {version}: DROP COLUMN blocked; set allow_column_drop to proceed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_temp_dir() -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("pglayer-migrate-test-{nonce}"));
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn parses_filename_variants() {
        assert_eq!(
            parse_migration_filename("1000001_init.up.sql"),
            Some((1000001, FileKind::Up))
        );
        assert_eq!(
            parse_migration_filename("1000001_init.down.sql"),
            Some((1000001, FileKind::Down))
        );
        assert_eq!(parse_migration_filename("init.up.sql"), None);
        assert_eq!(parse_migration_filename("1000001.up.sql"), None);
        assert_eq!(parse_migration_filename("1000001_init.sql"), None);
        assert_eq!(parse_migration_filename("notes.txt"), None);
    }

    #[test]
    fn scan_collects_pairs_in_version_order() {
        let dir = make_temp_dir();
        fs::write(dir.join("2_later.up.sql"), "SELECT 2;").unwrap();
        fs::write(dir.join("1_init.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("1_init.down.sql"), "SELECT 0;").unwrap();
        fs::write(dir.join("README.md"), "ignored").unwrap();

        let pairs = scan_dir(&dir).unwrap();
        let versions: Vec<i64> = pairs.keys().copied().collect();
        assert_eq!(versions, vec![1, 2]);
        assert!(pairs[&1].up.is_some());
        assert!(pairs[&1].down.is_some());
        assert!(pairs[&2].down.is_none());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn scan_rejects_duplicate_versions() {
        let dir = make_temp_dir();
        fs::write(dir.join("1_a.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("1_b.up.sql"), "SELECT 1;").unwrap();

        let err = scan_dir(&dir).unwrap_err();
        assert!(err.message().contains("duplicate up migration"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn split_statements_drops_blank_segments() {
        let body = "CREATE TABLE x(id BIGINT);\n\nALTER TABLE x ADD COLUMN age INTEGER;\n;\n  ";
        let statements = split_statements(body);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].starts_with("ALTER TABLE"));
    }
}
