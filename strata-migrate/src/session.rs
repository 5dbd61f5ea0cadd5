//! Migration sessions.
//!
//! A [`MigrationSession`] is built once per invocation. It owns the merged
//! workspace, the revision graph and the binds, and implements every
//! user-facing command on top of them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use strata_schema::Registry;
use tracing::{debug, info};

use crate::autogen::CompareOptions;
use crate::config::{ContextOptions, EnvMode, EnvSettings, MigrateConfig};
use crate::engine::Engine;
use crate::error::{MigrateResult, MigrationError};
use crate::graph::{FormatOptions, split_range};
use crate::ops::BindOps;
use crate::plugin::{PluginInfo, PluginSet};
use crate::relocate::{Relocation, relocate};
use crate::report::{Reporter, TracingReporter};
use crate::runner::{Bind, BindSet, OfflineScript, Runner};
use crate::script::{Revision, ScriptDirectory, generate_rev_id};
use crate::version::VersionTable;
use crate::workspace::{Aggregator, MergedWorkspace};

/// Options for [`MigrationSession::revision`].
#[derive(Debug, Clone)]
pub struct RevisionOptions {
    /// Revision message.
    pub message: Option<String>,
    /// Compare the database with the declared tables.
    pub autogenerate: bool,
    /// Parent spec: `head`, `base`, or any revision spec.
    pub head: String,
    /// Allow a parent that is not a head.
    pub splice: bool,
    /// Branch label, usually a plugin name.
    pub branch_label: Option<String>,
    /// Write to this directory instead of the default.
    pub version_path: Option<PathBuf>,
    /// Use this id instead of a generated one.
    pub rev_id: Option<String>,
    /// Revisions the new one depends on.
    pub depends_on: Vec<String>,
}

impl Default for RevisionOptions {
    fn default() -> Self {
        Self {
            message: None,
            autogenerate: true,
            head: "head".to_string(),
            splice: false,
            branch_label: None,
            version_path: None,
            rev_id: None,
            depends_on: Vec::new(),
        }
    }
}

/// Options shared by the commands that run migrations.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Arbitrary tag passed to reports and SQL output.
    pub tag: Option<String>,
    /// Allow the empty-database fast path.
    pub fast: bool,
}

/// Builds a [`MigrationSession`].
pub struct SessionBuilder {
    config: MigrateConfig,
    plugins: Vec<PluginInfo>,
    registry: Registry,
    engines: IndexMap<String, Arc<dyn Engine>>,
    reporter: Arc<dyn Reporter>,
}

impl SessionBuilder {
    /// Start from a configuration.
    pub fn new(config: MigrateConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            registry: Registry::new(),
            engines: IndexMap::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Add loaded plugins.
    pub fn plugins(mut self, plugins: impl IntoIterator<Item = PluginInfo>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Set the declared tables.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Attach a database to a bind.
    pub fn engine(mut self, bind: impl Into<String>, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(bind.into(), engine);
        self
    }

    /// Receive progress messages.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Build the workspace, load scripts and assemble binds.
    pub async fn build(self) -> MigrateResult<MigrationSession> {
        self.config.validate()?;

        let plugins = PluginSet::new(self.plugins);
        let workspace = Aggregator::new(&self.config, &plugins).build().await?;
        let env = EnvSettings::load(self.config.script_location.as_deref()).await?;
        let scripts = ScriptDirectory::load(workspace.search_path().to_vec()).await?;
        debug!(revisions = scripts.map().len(), "Loaded revision scripts");

        for (bind, metadata) in self.registry.binds() {
            if !metadata.is_empty() && !self.engines.contains_key(bind) {
                return Err(MigrationError::config(format!(
                    "tables are declared for bind '{}' but no database is configured for it",
                    bind
                )));
            }
        }

        let mut binds = BindSet::default();
        for (name, engine) in self.engines {
            let metadata = self.registry.metadata(&name).cloned().unwrap_or_default();
            binds.push(Bind::new(name, engine, metadata));
        }
        if env.mode == EnvMode::Single {
            binds.retain(|b| b.name.is_empty());
        }

        let mut context = self.config.context;
        if let Some(two_phase) = env.two_phase {
            context.two_phase = two_phase;
        }

        Ok(MigrationSession {
            version: VersionTable::new(&self.config.version_table),
            config: self.config,
            plugins,
            workspace,
            scripts,
            binds,
            env,
            context,
            reporter: self.reporter,
        })
    }
}

/// One migration session.
pub struct MigrationSession {
    config: MigrateConfig,
    plugins: PluginSet,
    workspace: MergedWorkspace,
    scripts: ScriptDirectory,
    binds: BindSet,
    env: EnvSettings,
    context: ContextOptions,
    version: VersionTable,
    reporter: Arc<dyn Reporter>,
}

impl MigrationSession {
    /// Start building a session.
    pub fn builder(config: MigrateConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// The configuration.
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// The environment settings.
    pub fn env(&self) -> &EnvSettings {
        &self.env
    }

    /// The merged workspace.
    pub fn workspace(&self) -> &MergedWorkspace {
        &self.workspace
    }

    /// The loaded scripts.
    pub fn scripts(&self) -> &ScriptDirectory {
        &self.scripts
    }

    /// Active binds.
    pub fn binds(&self) -> &BindSet {
        &self.binds
    }

    /// Delete the workspace.
    pub fn close(self) -> MigrateResult<()> {
        self.workspace.close()
    }

    fn runner(&self) -> Runner<'_> {
        Runner::new(self.scripts.map(), &self.binds, self.reporter.as_ref())
            .version_table(self.version.clone())
            .context(self.context)
    }

    fn compare_options(&self) -> CompareOptions {
        CompareOptions::new(&self.context, self.version.name())
    }

    /// Union of the applied heads of every bind.
    async fn current_heads(&self) -> MigrateResult<Vec<String>> {
        let mut heads: Vec<String> = Vec::new();
        for (_, current) in self.runner().current().await? {
            for id in current {
                if !heads.contains(&id) {
                    heads.push(id);
                }
            }
        }
        Ok(heads)
    }

    /// Resolve specs, substituting `current` with the applied heads.
    async fn resolve_specs(&self, specs: &[String]) -> MigrateResult<Vec<String>> {
        let mut out = Vec::new();
        for spec in specs {
            let ids = if spec == "current" {
                self.current_heads().await?
            } else {
                self.scripts.map().get_revisions(spec)?
            };
            for id in ids {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    /// Fail if the database is behind the scripts or differs from the
    /// declared tables.
    pub async fn check(&self) -> MigrateResult<()> {
        let heads = self.scripts.map().heads();
        let expected: HashSet<&String> = heads.iter().collect();
        for (_, current) in self.runner().current().await? {
            if current.iter().collect::<HashSet<_>>() != expected {
                return Err(MigrationError::OutOfDate { current, heads });
            }
        }

        let options = self.compare_options().include_unmanaged_tables(false);
        let mut diffs = Vec::new();
        for (bind, ops) in self.runner().compare(&options).await? {
            for diff in ops.as_diffs() {
                if bind.is_empty() {
                    diffs.push(diff.to_string());
                } else {
                    diffs.push(format!("[{}] {}", bind, diff));
                }
            }
        }
        if !diffs.is_empty() {
            return Err(MigrationError::DriftDetected { diffs });
        }
        self.reporter.info("No new upgrade operations detected.");
        Ok(())
    }

    fn resolve_parents(
        &self,
        head: &str,
        splice: bool,
        label: Option<&str>,
    ) -> MigrateResult<Vec<String>> {
        let map = self.scripts.map();
        match head {
            "base" => Ok(Vec::new()),
            "head" => match label {
                Some(label) if map.has_label(label) => {
                    map.get_revisions(&format!("{}@head", label))
                }
                Some(_) => Ok(Vec::new()),
                None => map.get_revisions("head"),
            },
            spec => {
                let ids = map.get_revisions(spec)?;
                if !splice {
                    if let Some(id) = ids.iter().find(|id| !map.children(id).is_empty()) {
                        return Err(MigrationError::usage(format!(
                            "Revision {} is not a head revision; use --splice to create a new branch from it",
                            id
                        )));
                    }
                }
                Ok(ids)
            }
        }
    }

    async fn ensure_up_to_date(&self, parents: &[String], label: Option<&str>) -> MigrateResult<()> {
        let map = self.scripts.map();
        let heads = map.heads();
        // Only an owner-scoped comparison can ignore other branches.
        let scoped = label.filter(|l| self.plugins.contains(l));
        for (_, current) in self.runner().current().await? {
            let behind = match scoped {
                Some(_) => {
                    let applied = map.ancestors(&current);
                    parents.iter().any(|p| !applied.contains(p))
                }
                None => {
                    current.iter().collect::<HashSet<_>>() != heads.iter().collect::<HashSet<_>>()
                }
            };
            if behind {
                let wanted = if scoped.is_some() {
                    parents.to_vec()
                } else {
                    heads.clone()
                };
                return Err(MigrationError::OutOfDate {
                    current,
                    heads: wanted,
                });
            }
        }
        Ok(())
    }

    async fn autogenerate(&self, label: Option<&str>) -> MigrateResult<(Vec<BindOps>, Vec<BindOps>)> {
        let mut options = self.compare_options();
        if let Some(label) = label.filter(|l| self.plugins.contains(l)) {
            options = options.owner(label);
        }

        let mut upgrades = Vec::new();
        let mut downgrades = Vec::new();
        for (bind, ops) in self.runner().compare(&options).await? {
            if ops.is_empty() {
                continue;
            }
            downgrades.push(BindOps::new(bind.clone(), ops.reverse().ops));
            upgrades.push(BindOps::new(bind, ops.ops));
        }
        Ok((upgrades, downgrades))
    }

    fn output_dir(&self, parents: &[String], label: Option<&str>) -> MigrateResult<PathBuf> {
        let from_parent = parents
            .first()
            .and_then(|id| self.scripts.map().get(id))
            .and_then(|rev| rev.path.parent())
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_path_buf());
        if let Some(dir) = from_parent {
            return Ok(dir);
        }
        if let Some(dir) = label.and_then(|l| self.workspace.plugin_dir(l)) {
            return Ok(dir);
        }
        self.workspace.default_dir().ok_or_else(|| {
            MigrationError::config("no version location configured; run `init` or set script_location")
        })
    }

    /// Add a written revision to the graph and move it to its persistent
    /// location.
    async fn store(&mut self, mut rev: Revision, dir: PathBuf) -> MigrateResult<PathBuf> {
        self.scripts.map_mut().add_revision(rev.clone())?;
        let mut path = rev.write(&dir).await?;

        if let Some(root) = self.workspace.root() {
            match relocate(&path, root, self.workspace.locations(), &self.plugins).await? {
                Relocation::Moved(moved) => path = moved,
                Relocation::Orphaned => self.reporter.warn(&format!(
                    "No version location for {}; it will be lost when the session ends",
                    path.display()
                )),
                Relocation::Unchanged => {}
            }
        }
        self.scripts.map_mut().set_path(&rev.id, path.clone());
        self.reporter
            .info(&format!("Generating {} ... done", path.display()));
        Ok(path)
    }

    /// Create a revision. Returns `None` when autogenerate found nothing.
    pub async fn revision(&mut self, options: RevisionOptions) -> MigrateResult<Option<PathBuf>> {
        if let Some(dir) = &options.version_path {
            self.scripts.add_version_path(dir.clone())?;
        }

        let label = options.branch_label.as_deref();
        let parents = self.resolve_parents(&options.head, options.splice, label)?;

        let mut rev = Revision::new(
            options.rev_id.clone().unwrap_or_else(generate_rev_id),
            options.message.clone(),
        )
        .with_parents(parents.clone());
        if let Some(label) = label {
            if !self.scripts.map().has_label(label) {
                rev.branch_labels.push(label.to_string());
            }
        }
        rev.depends_on = self.scripts.map().get_revisions_many(&options.depends_on)?;

        if options.autogenerate {
            self.ensure_up_to_date(&parents, label).await?;
            let (upgrades, downgrades) = self.autogenerate(label).await?;
            if upgrades.is_empty() {
                self.reporter.info("No changes in schema detected.");
                return Ok(None);
            }
            rev.upgrades = upgrades;
            rev.downgrades = downgrades;
        }

        let dir = match &options.version_path {
            Some(dir) => dir.clone(),
            None => self.output_dir(&parents, label)?,
        };
        let path = self.store(rev, dir).await?;
        info!(path = %path.display(), "Created revision");
        Ok(Some(path))
    }

    /// Create a revision joining `revisions`.
    pub async fn merge(
        &mut self,
        revisions: &[String],
        message: Option<String>,
        branch_label: Option<String>,
        rev_id: Option<String>,
    ) -> MigrateResult<PathBuf> {
        let parents = self.scripts.map().get_revisions_many(revisions)?;
        if parents.is_empty() {
            return Err(MigrationError::EmptyTarget);
        }

        let mut rev = Revision::new(rev_id.unwrap_or_else(generate_rev_id), message)
            .with_parents(parents);
        if let Some(label) = branch_label {
            if !self.scripts.map().has_label(&label) {
                rev.branch_labels.push(label);
            }
        }

        let dir = self.workspace.default_dir().ok_or_else(|| {
            MigrationError::config("no version location configured; run `init` or set script_location")
        })?;
        self.store(rev, dir).await
    }

    /// Upgrade to `spec`.
    pub async fn upgrade(&self, spec: &str, options: &RunOptions) -> MigrateResult<()> {
        self.runner()
            .tag(options.tag.clone())
            .fast_upgrade(options.fast || self.config.fast_upgrade)
            .upgrade(spec)
            .await
    }

    /// Upgrade statements for `spec`, which may be a range.
    pub fn upgrade_sql(&self, spec: &str, tag: Option<String>) -> MigrateResult<Vec<OfflineScript>> {
        self.runner().tag(tag).upgrade_sql(spec)
    }

    /// Downgrade to `spec`.
    pub async fn downgrade(&self, spec: &str, options: &RunOptions) -> MigrateResult<()> {
        self.runner().tag(options.tag.clone()).downgrade(spec).await
    }

    /// Downgrade statements for a range.
    pub fn downgrade_sql(&self, spec: &str, tag: Option<String>) -> MigrateResult<Vec<OfflineScript>> {
        self.runner().tag(tag).downgrade_sql(spec)
    }

    /// Rebuild the schema, optionally by replaying revisions up to `target`.
    pub async fn sync(&self, target: Option<&str>) -> MigrateResult<()> {
        self.runner().sync(target).await
    }

    /// Record revisions as applied without running them.
    pub async fn stamp(&self, specs: &[String], purge: bool) -> MigrateResult<()> {
        self.runner().stamp(specs, purge).await
    }

    /// Stamp statements.
    pub fn stamp_sql(
        &self,
        spec: &str,
        purge: bool,
        tag: Option<String>,
    ) -> MigrateResult<Vec<OfflineScript>> {
        self.runner().tag(tag).stamp_sql(spec, purge)
    }

    /// Create the version table on every bind.
    pub async fn ensure_version(&self) -> MigrateResult<()> {
        self.runner().ensure_version().await
    }

    /// Version table DDL per bind.
    pub fn ensure_version_sql(&self) -> Vec<OfflineScript> {
        self.binds
            .iter()
            .map(|bind| OfflineScript {
                bind: bind.name.clone(),
                sql: format!("{};\n", self.version.create_sql(bind.engine.dialect())),
            })
            .collect()
    }

    /// Verbose description of revisions. `current` is accepted.
    pub async fn show(&self, specs: &[String]) -> MigrateResult<Vec<String>> {
        let ids = self.resolve_specs(specs).await?;
        let map = self.scripts.map();
        let options = FormatOptions {
            verbose: true,
            current: &[],
        };
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id))
            .map(|rev| map.format_revision(rev, &options))
            .collect())
    }

    /// Revision history, newest first.
    ///
    /// `range` is `[start]:[end]`; either side may be `current`.
    pub async fn history(
        &self,
        range: Option<&str>,
        verbose: bool,
        indicate_current: bool,
    ) -> MigrateResult<Vec<String>> {
        let map = self.scripts.map();
        let (start, end) = match range {
            None => (None, None),
            Some(range) => {
                let (start, end) = split_range(range).ok_or_else(|| {
                    MigrationError::usage(
                        "History range requires [start]:[end], [start]:, or :[end]",
                    )
                })?;
                let side = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
                (side(start), side(end))
            }
        };

        let uses_current = start.as_deref() == Some("current") || end.as_deref() == Some("current");
        let current = if indicate_current || uses_current {
            self.current_heads().await?
        } else {
            Vec::new()
        };
        let resolve = |spec: &str| -> MigrateResult<Vec<String>> {
            if spec == "current" {
                Ok(current.clone())
            } else {
                map.get_revisions(spec)
            }
        };

        let head_ids = match &end {
            Some(end) => resolve(end)?,
            None => map.heads(),
        };
        let lower: Option<HashSet<String>> = match &start {
            Some(start) => Some(map.descendants(&resolve(start)?)),
            None => None,
        };

        let mut revs: Vec<&Revision> = map
            .walk_revisions(&[], &head_ids)
            .filter(|rev| lower.as_ref().is_none_or(|l| l.contains(&rev.id)))
            .collect();
        revs.reverse();

        let marked: &[String] = if indicate_current { &current } else { &[] };
        let options = FormatOptions {
            verbose,
            current: marked,
        };
        Ok(revs
            .into_iter()
            .map(|rev| map.format_revision(rev, &options))
            .collect())
    }

    /// Current heads of the scripts.
    pub fn heads(&self, verbose: bool, resolve_dependencies: bool) -> Vec<String> {
        let map = self.scripts.map();
        let ids = if resolve_dependencies {
            map.heads_resolving_dependencies()
        } else {
            map.heads()
        };
        let options = FormatOptions {
            verbose,
            current: &[],
        };
        ids.iter()
            .filter_map(|id| map.get(id))
            .map(|rev| map.format_revision(rev, &options))
            .collect()
    }

    /// Branch points and the branches leaving them.
    pub fn branches(&self, verbose: bool) -> Vec<String> {
        let map = self.scripts.map();
        let options = FormatOptions {
            verbose,
            current: &[],
        };
        let brief = FormatOptions::default();
        let mut out = Vec::new();
        for rev in map.branch_points() {
            out.push(map.format_revision(rev, &options));
            let indent = " ".repeat(rev.id.len());
            for child in map.children(&rev.id) {
                if let Some(child) = map.get(child) {
                    out.push(format!("{}-> {}", indent, map.format_revision(child, &brief)));
                }
            }
        }
        out
    }

    /// Applied revisions per bind.
    pub async fn current(&self, verbose: bool) -> MigrateResult<Vec<String>> {
        let map = self.scripts.map();
        let options = FormatOptions {
            verbose,
            current: &[],
        };
        let mut out = Vec::new();
        for (name, heads) in self.runner().current().await? {
            if verbose {
                if let Some(bind) = self.binds.get(&name) {
                    out.push(format!(
                        "Current revision(s) for {}:",
                        bind.engine.display_url()
                    ));
                }
            }
            for id in heads {
                match map.get(&id) {
                    Some(rev) => out.push(map.format_revision(rev, &options)),
                    None => out.push(format!("{} (unknown)", id)),
                }
            }
        }
        Ok(out)
    }

    /// Scripts to open in an editor for `spec`, moved to their persistent
    /// location first.
    pub async fn edit_targets(&mut self, spec: &str) -> MigrateResult<Vec<PathBuf>> {
        let ids = self.resolve_specs(&[spec.to_string()]).await?;
        if ids.is_empty() {
            return Err(MigrationError::EmptyTarget);
        }

        let mut paths = Vec::new();
        for id in ids {
            let Some(rev) = self.scripts.map().get(&id) else {
                return Err(MigrationError::bad_reference(id));
            };
            let mut path = rev.path.clone();
            if let Some(root) = self.workspace.root() {
                match relocate(&path, root, self.workspace.locations(), &self.plugins).await? {
                    Relocation::Moved(moved) => {
                        path = moved;
                        self.scripts.map_mut().set_path(&id, path.clone());
                    }
                    Relocation::Orphaned => self.reporter.warn(&format!(
                        "No version location for {}; edits are lost when the session ends",
                        path.display()
                    )),
                    Relocation::Unchanged => {}
                }
            }
            paths.push(path);
        }
        Ok(paths)
    }

    /// Check the database when the application starts.
    ///
    /// An empty database is created directly when fast upgrade is allowed.
    /// Otherwise a pending upgrade or detected drift is offered to `prompt`;
    /// declining returns the error.
    pub async fn startup_check<F>(&mut self, fast: bool, mut prompt: F) -> MigrateResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        let fast = fast || self.config.fast_upgrade;
        if fast && self.runner().is_empty().await? {
            self.reporter
                .info("Empty database, creating declared tables");
            return self
                .upgrade(
                    "heads",
                    &RunOptions {
                        tag: None,
                        fast: true,
                    },
                )
                .await;
        }

        let mut upgraded = false;
        loop {
            match self.check().await {
                Err(e @ MigrationError::OutOfDate { .. }) if !upgraded => {
                    if !prompt("Database is not up to date. Upgrade now?") {
                        return Err(e);
                    }
                    self.upgrade("heads", &RunOptions::default()).await?;
                    upgraded = true;
                }
                Err(e @ MigrationError::DriftDetected { .. }) => {
                    if !prompt("Database schema differs from the declared tables. Generate a revision and upgrade?") {
                        return Err(e);
                    }
                    let created = self
                        .revision(RevisionOptions {
                            message: Some("auto migrate".to_string()),
                            ..RevisionOptions::default()
                        })
                        .await?;
                    if created.is_some() {
                        self.upgrade("heads", &RunOptions::default()).await?;
                    }
                    return Ok(());
                }
                other => return other,
            }
        }
    }
}
