//! Script directory templates.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ENV_FILE_NAME;
use crate::error::{MigrateResult, MigrationError};

/// A bundled migration environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Name passed to `init --template`.
    pub name: &'static str,
    /// README; its first line is the synopsis.
    pub readme: &'static str,
    /// Contents of `env.toml`.
    pub env: &'static str,
}

impl Template {
    /// First line of the README.
    pub fn synopsis(&self) -> &'static str {
        self.readme.lines().next().unwrap_or("")
    }
}

const GENERIC: Template = Template {
    name: "generic",
    readme: "Single-database configuration.\n\n\
             Only the default bind is migrated. Revision scripts live in versions/.\n",
    env: "# Migration environment\nmode = \"single\"\n",
};

const MULTIDB: Template = Template {
    name: "multidb",
    readme: "Multi-database configuration.\n\n\
             Every configured bind is migrated, each in its own transaction.\n\
             Set two_phase = true to commit them with a two-phase commit.\n",
    env: "# Migration environment\nmode = \"multidb\"\ntwo_phase = false\n",
};

const TEMPLATES: &[Template] = &[GENERIC, MULTIDB];

/// Bundled templates.
pub fn list_templates() -> &'static [Template] {
    TEMPLATES
}

/// Look up a template by name.
pub fn find_template(name: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Create a script directory at `dir` from `template`.
///
/// With `package`, placeholder files keep the empty directories under
/// version control.
pub async fn init(dir: &Path, template: &str, package: bool) -> MigrateResult<Vec<PathBuf>> {
    if dir.is_dir() {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(MigrationError::Io)?;
        if entries.next_entry().await.map_err(MigrationError::Io)?.is_some() {
            return Err(MigrationError::usage(format!(
                "Directory {} already exists and is not empty",
                dir.display()
            )));
        }
    }
    let Some(template) = find_template(template) else {
        return Err(MigrationError::usage(format!(
            "No such template '{}'",
            template
        )));
    };

    let versions = dir.join("versions");
    tokio::fs::create_dir_all(&versions)
        .await
        .map_err(MigrationError::Io)?;

    let mut files = vec![
        (dir.join("README"), template.readme),
        (dir.join(ENV_FILE_NAME), template.env),
    ];
    if package {
        files.push((dir.join(".gitkeep"), ""));
        files.push((versions.join(".gitkeep"), ""));
    }

    let mut created = vec![versions];
    for (path, content) in files {
        tokio::fs::write(&path, content)
            .await
            .map_err(MigrationError::Io)?;
        created.push(path);
    }

    info!(path = %dir.display(), template = template.name, "Initialized script directory");
    Ok(created)
}
