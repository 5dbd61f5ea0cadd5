//! Revision scripts on disk.
//!
//! Every revision is one TOML file named `<id>_<slug>.toml`:
//!
//! ```toml
//! revision = "1975ea83b712"
//! down_revision = ["ae1027a6acf0"]
//! branch_labels = []
//! depends_on = []
//! message = "add account table"
//! create_date = "2024-05-01T12:00:00Z"
//!
//! [[upgrade]]
//! bind = ""
//!
//! [[upgrade.ops]]
//! op = "create_table"
//! # ...
//!
//! [[downgrade]]
//! bind = ""
//! # ...
//! ```
//!
//! Upgrade and downgrade bodies are grouped per bind, so one revision can
//! change several databases at once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::graph::RevisionMap;
use crate::ops::{BindOps, Operation};

/// Maximum length of the message part of a script file name.
pub const SLUG_LENGTH: usize = 40;

/// Migration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

/// A revision script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Revision id.
    #[serde(rename = "revision")]
    pub id: String,
    /// Parent revisions. Empty for a base, several for a merge.
    #[serde(default, rename = "down_revision")]
    pub down_revisions: Vec<String>,
    /// Branch labels declared by this revision.
    #[serde(default)]
    pub branch_labels: Vec<String>,
    /// Revisions that must be applied first without being parents.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the script was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    /// Upgrade operations per bind.
    #[serde(default, rename = "upgrade")]
    pub upgrades: Vec<BindOps>,
    /// Downgrade operations per bind.
    #[serde(default, rename = "downgrade")]
    pub downgrades: Vec<BindOps>,
    /// Where the script was read from or written to.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Revision {
    /// Create an empty revision.
    pub fn new(id: impl Into<String>, message: Option<String>) -> Self {
        Self {
            id: id.into(),
            down_revisions: Vec::new(),
            branch_labels: Vec::new(),
            depends_on: Vec::new(),
            message,
            create_date: Some(Utc::now()),
            upgrades: Vec::new(),
            downgrades: Vec::new(),
            path: PathBuf::new(),
        }
    }

    /// Set parents.
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.down_revisions = parents;
        self
    }

    /// Whether this revision has no parents.
    pub fn is_base(&self) -> bool {
        self.down_revisions.is_empty()
    }

    /// Whether this revision joins several parents.
    pub fn is_merge_point(&self) -> bool {
        self.down_revisions.len() > 1
    }

    /// Operations of `bind` for `direction`.
    pub fn ops_for(&self, bind: &str, direction: Direction) -> &[Operation] {
        let groups = match direction {
            Direction::Upgrade => &self.upgrades,
            Direction::Downgrade => &self.downgrades,
        };
        groups
            .iter()
            .find(|g| g.bind == bind)
            .map(|g| g.ops.as_slice())
            .unwrap_or(&[])
    }

    /// The file name this revision is written under.
    pub fn file_name(&self) -> String {
        let slug = self.message.as_deref().map(slugify).unwrap_or_default();
        if slug.is_empty() {
            format!("{}_.toml", self.id)
        } else {
            format!("{}_{}.toml", self.id, slug)
        }
    }

    /// First line of the message.
    pub fn doc(&self) -> &str {
        self.message
            .as_deref()
            .and_then(|m| m.lines().next())
            .unwrap_or("")
    }

    /// Parse a script.
    pub fn from_toml(content: &str, path: &Path) -> MigrateResult<Self> {
        let mut revision: Revision = toml::from_str(content)
            .map_err(|e| MigrationError::script(path.display().to_string(), e.to_string()))?;
        if revision.id.trim().is_empty() {
            return Err(MigrationError::script(
                path.display().to_string(),
                "missing revision id",
            ));
        }
        revision.path = path.to_path_buf();
        Ok(revision)
    }

    /// Render the script.
    pub fn to_toml(&self) -> MigrateResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MigrationError::script(self.file_name(), e.to_string()))
    }

    /// Read a script file.
    pub async fn load(path: &Path) -> MigrateResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(MigrationError::Io)?;
        Self::from_toml(&content, path)
    }

    /// Write the script into `dir` and remember the path.
    pub async fn write(&mut self, dir: &Path) -> MigrateResult<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(MigrationError::Io)?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, self.to_toml()?)
            .await
            .map_err(MigrationError::Io)?;
        self.path = path.clone();
        Ok(path)
    }
}

/// A new random revision id: 12 lowercase hex characters.
pub fn generate_rev_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// File-name-safe version of a message.
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;
    for ch in message.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
        if slug.len() >= SLUG_LENGTH {
            break;
        }
    }
    slug.truncate(SLUG_LENGTH);
    slug
}

fn is_script_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('_') && !name.starts_with('.') && name.ends_with(".toml") && path.is_file()
}

/// Read every script found directly inside the given directories.
///
/// Directories are scanned in order, each file at most once; missing
/// directories are skipped.
pub async fn scan_scripts(search_path: &[PathBuf]) -> MigrateResult<Vec<Revision>> {
    let mut seen_dirs = HashSet::new();
    let mut seen_files = HashSet::new();
    let mut revisions = Vec::new();

    for dir in search_path {
        if !dir.is_dir() || !seen_dirs.insert(dir.clone()) {
            continue;
        }

        let mut entries = tokio::fs::read_dir(dir).await.map_err(MigrationError::Io)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let path = entry.path();
            if is_script_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let key = tokio::fs::canonicalize(&path).await.unwrap_or(path.clone());
            if !seen_files.insert(key) {
                continue;
            }
            debug!(path = %path.display(), "Loading revision script");
            revisions.push(Revision::load(&path).await?);
        }
    }

    Ok(revisions)
}

/// The scripts visible to a session, indexed as a revision graph.
#[derive(Debug)]
pub struct ScriptDirectory {
    search_path: Vec<PathBuf>,
    map: RevisionMap,
}

impl ScriptDirectory {
    /// Scan `search_path` and build the graph.
    pub async fn load(search_path: Vec<PathBuf>) -> MigrateResult<Self> {
        let revisions = scan_scripts(&search_path).await?;
        let map = RevisionMap::new(revisions)?;
        Ok(Self { search_path, map })
    }

    /// Directories that were scanned.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Append an extra directory. It must be empty or absent.
    pub fn add_version_path(&mut self, dir: PathBuf) -> MigrateResult<()> {
        if dir.is_dir() {
            let mut entries = std::fs::read_dir(&dir).map_err(MigrationError::Io)?;
            if entries.next().is_some() {
                return Err(MigrationError::usage(format!(
                    "version path {} must be empty or not exist",
                    dir.display()
                )));
            }
        }
        warn!(
            path = %dir.display(),
            "Version path added for this run only; add it to version_locations to keep it"
        );
        if !self.search_path.contains(&dir) {
            self.search_path.push(dir);
        }
        Ok(())
    }

    /// The revision graph.
    pub fn map(&self) -> &RevisionMap {
        &self.map
    }

    /// The revision graph, mutably.
    pub fn map_mut(&mut self) -> &mut RevisionMap {
        &mut self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Operation;
    use pretty_assertions::assert_eq;
    use strata_schema::{Column, Table};
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add account table"), "add_account_table");
        assert_eq!(slugify("  fix: user.name!! "), "fix_user_name");
        assert_eq!(slugify(&"x".repeat(100)).len(), SLUG_LENGTH);
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_rev_id_shape() {
        let id = generate_rev_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_rev_id());
    }

    #[test]
    fn test_file_name() {
        let rev = Revision::new("abc123", Some("Create users".to_string()));
        assert_eq!(rev.file_name(), "abc123_create_users.toml");
        assert_eq!(Revision::new("abc123", None).file_name(), "abc123_.toml");
    }

    #[tokio::test]
    async fn test_write_and_scan() {
        let dir = TempDir::new().unwrap();
        let mut rev = Revision::new("a1", Some("init".to_string()));
        rev.branch_labels = vec!["plugin_a".to_string()];
        rev.upgrades = vec![BindOps::new(
            "",
            vec![Operation::CreateTable {
                table: Table::new("plugin_a_user")
                    .column(Column::new("id", "integer").primary_key()),
            }],
        )];
        rev.downgrades = vec![BindOps::new(
            "",
            vec![Operation::DropTable {
                name: "plugin_a_user".to_string(),
                table: None,
            }],
        )];
        let path = rev.write(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("_template.toml"), "not a script").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scanned = scan_scripts(&[dir.path().to_path_buf(), dir.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].path, path);
        assert_eq!(scanned[0].branch_labels, rev.branch_labels);
        assert_eq!(scanned[0].upgrades, rev.upgrades);
        assert_eq!(
            scanned[0].ops_for("", Direction::Downgrade).len(),
            1
        );
        assert!(scanned[0].ops_for("other", Direction::Upgrade).is_empty());
    }

    #[test]
    fn test_invalid_script() {
        let err = Revision::from_toml("down_revision = []", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_version_path_must_be_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.toml"), "").unwrap();
        let mut scripts = ScriptDirectory {
            search_path: vec![],
            map: RevisionMap::new(vec![]).unwrap(),
        };
        assert!(scripts.add_version_path(dir.path().to_path_buf()).is_err());
        assert!(
            scripts
                .add_version_path(dir.path().join("fresh"))
                .is_ok()
        );
        assert_eq!(scripts.search_path().len(), 1);
    }
}
