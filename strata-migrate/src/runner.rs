//! Transactional migration execution.
//!
//! Every command opens one transaction per bind. All binds commit together
//! (optionally through a two-phase commit) or all roll back:
//!
//! ```text
//!   bind ""  ──BEGIN──step──step──write rows──┐
//!   bind "a" ──BEGIN──step──────write rows────┼──(PREPARE)──COMMIT all
//!   bind "b" ──BEGIN──────────────────────────┘        └── or ROLLBACK all
//! ```
//!
//! In SQL emission mode nothing is executed; the statements are returned
//! per bind instead.

use std::collections::HashSet;
use std::sync::Arc;

use strata_schema::MetaData;
use tracing::{debug, info, warn};

use crate::autogen::{CompareOptions, compare_metadata};
use crate::config::ContextOptions;
use crate::engine::{Connection, Engine};
use crate::error::{MigrateResult, MigrationError};
use crate::graph::{DowngradeTarget, RevisionMap, split_range};
use crate::ops::{Operation, UpgradeOps};
use crate::report::Reporter;
use crate::script::{Direction, Revision};
use crate::sql::{Dialect, RenderOptions, render_operation};
use crate::state::apply_operation;
use crate::version::VersionTable;

/// A named database and the tables declared for it.
#[derive(Debug, Clone)]
pub struct Bind {
    /// Bind key. `""` is the default database.
    pub name: String,
    /// The database.
    pub engine: Arc<dyn Engine>,
    /// Declared tables.
    pub metadata: MetaData,
}

impl Bind {
    /// Create a bind.
    pub fn new(name: impl Into<String>, engine: Arc<dyn Engine>, metadata: MetaData) -> Self {
        Self {
            name: name.into(),
            engine,
            metadata,
        }
    }
}

/// Binds taking part in a run.
#[derive(Debug, Clone, Default)]
pub struct BindSet {
    binds: Vec<Bind>,
}

impl BindSet {
    /// Create a set. Later duplicates replace earlier ones.
    pub fn new(binds: impl IntoIterator<Item = Bind>) -> Self {
        let mut set = Self::default();
        for bind in binds {
            set.push(bind);
        }
        set
    }

    /// Add or replace a bind.
    pub fn push(&mut self, bind: Bind) {
        match self.binds.iter_mut().find(|b| b.name == bind.name) {
            Some(existing) => *existing = bind,
            None => self.binds.push(bind),
        }
    }

    /// Look up a bind.
    pub fn get(&self, name: &str) -> Option<&Bind> {
        self.binds.iter().find(|b| b.name == name)
    }

    /// Binds in order.
    pub fn iter(&self) -> impl Iterator<Item = &Bind> {
        self.binds.iter()
    }

    /// Bind names in order.
    pub fn names(&self) -> Vec<&str> {
        self.binds.iter().map(|b| b.name.as_str()).collect()
    }

    /// Keep the binds matching `keep`.
    pub fn retain(&mut self, keep: impl Fn(&Bind) -> bool) {
        self.binds.retain(|b| keep(b));
    }

    /// Number of binds.
    pub fn len(&self) -> usize {
        self.binds.len()
    }

    /// Whether there are no binds.
    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

/// SQL emitted for one bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineScript {
    /// Bind key.
    pub bind: String,
    /// Statements, `;`-terminated, one per line.
    pub sql: String,
}

struct Tx<'b> {
    bind: &'b Bind,
    conn: Box<dyn Connection>,
}

fn bind_label(bind: &str) -> String {
    if bind.is_empty() {
        "database <default>".to_string()
    } else {
        format!("database '{}'", bind)
    }
}

fn step_message(direction: Direction, bind: &str, rev: &Revision) -> String {
    let parents = rev.down_revisions.join(", ");
    let line = match direction {
        Direction::Upgrade => format!("Running upgrade {} -> {}, {}", parents, rev.id, rev.doc()),
        Direction::Downgrade => {
            format!("Running downgrade {} -> {}, {}", rev.id, parents, rev.doc())
        }
    };
    if bind.is_empty() {
        line
    } else {
        format!("[{}] {}", bind, line)
    }
}

/// Runs migrations against a set of binds.
pub struct Runner<'a> {
    map: &'a RevisionMap,
    binds: &'a BindSet,
    reporter: &'a dyn Reporter,
    version: VersionTable,
    context: ContextOptions,
    fast_upgrade: bool,
    tag: Option<String>,
}

impl<'a> Runner<'a> {
    /// Create a runner with default settings.
    pub fn new(map: &'a RevisionMap, binds: &'a BindSet, reporter: &'a dyn Reporter) -> Self {
        Self {
            map,
            binds,
            reporter,
            version: VersionTable::default(),
            context: ContextOptions::default(),
            fast_upgrade: false,
            tag: None,
        }
    }

    /// Use a different version table.
    pub fn version_table(mut self, version: VersionTable) -> Self {
        self.version = version;
        self
    }

    /// Set context options.
    pub fn context(mut self, context: ContextOptions) -> Self {
        self.context = context;
        self
    }

    /// Allow creating the declared schema directly on empty databases.
    pub fn fast_upgrade(mut self, enabled: bool) -> Self {
        self.fast_upgrade = enabled;
        self
    }

    /// Attach an arbitrary tag to the run.
    pub fn tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            render_as_batch: self.context.render_as_batch,
        }
    }

    fn revision(&self, id: &str) -> MigrateResult<&'a Revision> {
        self.map
            .get(id)
            .ok_or_else(|| MigrationError::bad_reference(id))
    }

    fn check_known(&self, current: &[String]) -> MigrateResult<()> {
        match current.iter().find(|id| self.map.get(id).is_none()) {
            Some(unknown) => Err(MigrationError::bad_reference(unknown.as_str())),
            None => Ok(()),
        }
    }

    async fn open_all(&self) -> MigrateResult<Vec<Tx<'a>>> {
        let mut txs: Vec<Tx<'a>> = Vec::with_capacity(self.binds.len());
        for bind in self.binds.iter() {
            let opened: MigrateResult<Box<dyn Connection>> = async {
                let mut conn = bind.engine.connect().await?;
                if self.context.two_phase && !conn.supports_two_phase() {
                    return Err(MigrationError::usage(format!(
                        "two-phase commit requested but bind '{}' ({}) doesn't support it",
                        bind.name,
                        bind.engine.display_url()
                    )));
                }
                conn.begin().await?;
                Ok(conn)
            }
            .await;
            match opened {
                Ok(conn) => txs.push(Tx { bind, conn }),
                Err(e) => return Err(Self::rollback_all(txs, e).await),
            }
        }
        Ok(txs)
    }

    async fn rollback_all(txs: Vec<Tx<'a>>, err: MigrationError) -> MigrationError {
        for mut tx in txs {
            if let Err(e) = tx.conn.rollback().await {
                warn!(bind = %tx.bind.name, error = %e, "Rollback failed");
            }
        }
        err
    }

    async fn finish(&self, mut txs: Vec<Tx<'a>>, result: MigrateResult<()>) -> MigrateResult<()> {
        if let Err(e) = result {
            return Err(Self::rollback_all(txs, e).await);
        }

        if self.context.two_phase {
            let run = uuid::Uuid::new_v4().simple().to_string();
            let mut failed = None;
            for (i, tx) in txs.iter_mut().enumerate() {
                let xid = format!("strata_{}_{}", run, i);
                debug!(bind = %tx.bind.name, xid = %xid, "Preparing transaction");
                if let Err(e) = tx.conn.prepare(&xid).await {
                    failed = Some(e);
                    break;
                }
            }
            if let Some(e) = failed {
                return Err(Self::rollback_all(txs, e).await);
            }
        }

        let mut pending = txs.into_iter();
        while let Some(mut tx) = pending.next() {
            if let Err(e) = tx.conn.commit().await {
                let mut open = vec![tx];
                open.extend(pending);
                return Err(Self::rollback_all(open, e).await);
            }
            debug!(bind = %tx.bind.name, "Committed");
        }
        Ok(())
    }

    async fn apply_ops(
        &self,
        conn: &mut dyn Connection,
        dialect: &dyn Dialect,
        ops: &[Operation],
    ) -> MigrateResult<()> {
        for op in ops {
            let current = match op {
                Operation::AlterTable { table, .. } if !dialect.supports_alter() => {
                    conn.reflect().await?.remove_table(table)
                }
                _ => None,
            };
            for stmt in render_operation(dialect, op, current.as_ref(), self.render_options())? {
                conn.execute(&stmt).await?;
            }
        }
        Ok(())
    }

    async fn create_all(&self, bind: &Bind, conn: &mut dyn Connection) -> MigrateResult<()> {
        let dialect = bind.engine.dialect();
        for table in bind.metadata.tables() {
            let op = Operation::CreateTable {
                table: table.clone(),
            };
            for stmt in render_operation(dialect, &op, None, self.render_options())? {
                conn.execute(&stmt).await?;
            }
        }
        Ok(())
    }

    async fn drop_all(&self, bind: &Bind, conn: &mut dyn Connection) -> MigrateResult<()> {
        let dialect = bind.engine.dialect();
        let reflected = conn.reflect().await?;
        for name in reflected.table_names() {
            conn.execute(&dialect.drop_table_cascade(name)).await?;
        }
        Ok(())
    }

    async fn fast_bind(
        &self,
        bind: &Bind,
        conn: &mut dyn Connection,
        heads: &[String],
    ) -> MigrateResult<()> {
        self.create_all(bind, conn).await?;
        self.version.write(conn, bind.engine.dialect(), heads).await
    }

    /// Whether a bind has no version rows and none of its declared tables.
    async fn bind_is_empty(&self, bind: &Bind, conn: &mut dyn Connection) -> MigrateResult<bool> {
        if !self
            .version
            .current(conn, bind.engine.dialect())
            .await?
            .is_empty()
        {
            return Ok(false);
        }
        for table in bind.metadata.tables() {
            if conn.has_table(&table.name).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether every bind is empty.
    pub async fn is_empty(&self) -> MigrateResult<bool> {
        for bind in self.binds.iter() {
            let mut conn = bind.engine.connect().await?;
            if !self.bind_is_empty(bind, conn.as_mut()).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Applied heads per bind.
    pub async fn current(&self) -> MigrateResult<Vec<(String, Vec<String>)>> {
        let mut out = Vec::new();
        for bind in self.binds.iter() {
            let mut conn = bind.engine.connect().await?;
            let heads = self
                .version
                .current(conn.as_mut(), bind.engine.dialect())
                .await?;
            out.push((bind.name.clone(), heads));
        }
        Ok(out)
    }

    /// Compare every bind with its declared tables.
    pub async fn compare(&self, options: &CompareOptions) -> MigrateResult<Vec<(String, UpgradeOps)>> {
        let mut out = Vec::new();
        for bind in self.binds.iter() {
            let mut conn = bind.engine.connect().await?;
            let reflected = conn.reflect().await?;
            out.push((
                bind.name.clone(),
                compare_metadata(&reflected, &bind.metadata, options),
            ));
        }
        Ok(out)
    }

    async fn upgrade_bind(
        &self,
        bind: &Bind,
        conn: &mut dyn Connection,
        start: Option<&[String]>,
        targets: &[String],
    ) -> MigrateResult<()> {
        let dialect = bind.engine.dialect();
        let current = match start {
            Some(start) => start.to_vec(),
            None => self.version.current(conn, dialect).await?,
        };
        self.check_known(&current)?;

        let plan = self.map.plan_upgrade(&current, targets);
        let mut applied = self.map.ancestors(&current);
        for id in plan {
            let rev = self.revision(&id)?;
            self.reporter
                .step(&step_message(Direction::Upgrade, &bind.name, rev));
            self.apply_ops(conn, dialect, rev.ops_for(&bind.name, Direction::Upgrade))
                .await?;
            applied.insert(id);
            self.version
                .write(conn, dialect, &self.map.heads_of(&applied))
                .await?;
        }
        Ok(())
    }

    /// Upgrade every bind to `spec`.
    ///
    /// With fast upgrade on, a `head`/`heads` target and empty databases,
    /// the declared tables are created directly and stamped.
    pub async fn upgrade(&self, spec: &str) -> MigrateResult<()> {
        let targets = self.map.get_revisions(spec)?;
        let to_heads = matches!(spec.trim(), "head" | "heads");

        if let Some(tag) = &self.tag {
            info!(tag = %tag, "Upgrading");
        }
        let mut txs = self.open_all().await?;
        let result: MigrateResult<()> = async {
            let mut fast = self.fast_upgrade && to_heads;
            if fast {
                for tx in txs.iter_mut() {
                    if !self.bind_is_empty(tx.bind, tx.conn.as_mut()).await? {
                        fast = false;
                        break;
                    }
                }
                if !fast {
                    self.reporter
                        .info("Database is not empty, running every revision");
                }
            }

            for tx in txs.iter_mut() {
                let outcome = if fast {
                    info!(bind = %tx.bind.name, "Creating declared tables directly");
                    self.fast_bind(tx.bind, tx.conn.as_mut(), &targets).await
                } else {
                    self.upgrade_bind(tx.bind, tx.conn.as_mut(), None, &targets)
                        .await
                };
                self.reporter.bind_finished(&tx.bind.name, outcome.is_ok());
                outcome?;
            }
            Ok(())
        }
        .await;
        self.finish(txs, result).await
    }

    /// Parse a downgrade target.
    pub fn downgrade_target(&self, spec: &str) -> MigrateResult<DowngradeTarget> {
        let spec = spec.trim();
        if split_range(spec).is_some() {
            return Err(MigrationError::InvalidRange(spec.to_string()));
        }
        if spec == "base" {
            return Ok(DowngradeTarget::Base);
        }
        if let Some(label) = spec.strip_suffix("@base") {
            return Ok(DowngradeTarget::BranchBase(label.to_string()));
        }
        let ids = self.map.get_revisions(spec)?;
        if ids.is_empty() {
            return Ok(DowngradeTarget::Base);
        }
        Ok(DowngradeTarget::Revisions(ids))
    }

    async fn downgrade_bind(
        &self,
        bind: &Bind,
        conn: &mut dyn Connection,
        target: &DowngradeTarget,
    ) -> MigrateResult<()> {
        let dialect = bind.engine.dialect();
        let current = self.version.current(conn, dialect).await?;
        self.check_known(&current)?;

        let plan = self.map.plan_downgrade(&current, target)?;
        let mut applied = self.map.ancestors(&current);
        for id in plan {
            let rev = self.revision(&id)?;
            self.reporter
                .step(&step_message(Direction::Downgrade, &bind.name, rev));
            self.apply_ops(conn, dialect, rev.ops_for(&bind.name, Direction::Downgrade))
                .await?;
            applied.remove(&id);
            self.version
                .write(conn, dialect, &self.map.heads_of(&applied))
                .await?;
        }
        Ok(())
    }

    /// Downgrade every bind to `spec`.
    pub async fn downgrade(&self, spec: &str) -> MigrateResult<()> {
        let target = self.downgrade_target(spec)?;
        if let Some(tag) = &self.tag {
            info!(tag = %tag, "Downgrading");
        }
        let mut txs = self.open_all().await?;
        let result: MigrateResult<()> = async {
            for tx in txs.iter_mut() {
                let outcome = self
                    .downgrade_bind(tx.bind, tx.conn.as_mut(), &target)
                    .await;
                self.reporter.bind_finished(&tx.bind.name, outcome.is_ok());
                outcome?;
            }
            Ok(())
        }
        .await;
        self.finish(txs, result).await
    }

    fn stamp_rows(&self, current: &[String], targets: &[String]) -> Vec<String> {
        if targets.is_empty() {
            return Vec::new();
        }
        let newer = self.map.descendants(targets);
        let mut applied: HashSet<String> = self
            .map
            .ancestors(current)
            .into_iter()
            .filter(|id| !newer.contains(id))
            .collect();
        applied.extend(self.map.ancestors(targets));
        self.map.heads_of(&applied)
    }

    /// Record `specs` as applied without running any migration.
    ///
    /// With `purge`, existing rows are discarded first, unknown ones
    /// included.
    pub async fn stamp(&self, specs: &[String], purge: bool) -> MigrateResult<()> {
        let targets = self.map.get_revisions_many(specs)?;
        let mut txs = self.open_all().await?;
        let result: MigrateResult<()> = async {
            for tx in txs.iter_mut() {
                let dialect = tx.bind.engine.dialect();
                let current = if purge {
                    self.version.purge(tx.conn.as_mut(), dialect).await?;
                    Vec::new()
                } else {
                    let current = self.version.current(tx.conn.as_mut(), dialect).await?;
                    self.check_known(&current)?;
                    current
                };
                let rows = self.stamp_rows(&current, &targets);
                self.reporter.info(&format!(
                    "Stamping {} to {}",
                    bind_label(&tx.bind.name),
                    crate::error::display_ids(&rows)
                ));
                self.version.write(tx.conn.as_mut(), dialect, &rows).await?;
            }
            Ok(())
        }
        .await;
        self.finish(txs, result).await
    }

    /// Drop and rebuild the schema.
    ///
    /// With a target, every table is dropped and the revisions up to the
    /// target replayed. Without one, binds whose schema differs from the
    /// declared tables are dropped, recreated from the declarations and
    /// left without version rows.
    pub async fn sync(&self, target: Option<&str>) -> MigrateResult<()> {
        let targets = match target {
            Some(spec) => Some(self.map.get_revisions(spec)?),
            None => None,
        };
        let options = CompareOptions::new(&self.context, self.version.name());

        let mut txs = self.open_all().await?;
        let result: MigrateResult<()> = async {
            for tx in txs.iter_mut() {
                let outcome = self
                    .sync_bind(tx.bind, tx.conn.as_mut(), targets.as_deref(), &options)
                    .await;
                self.reporter.bind_finished(&tx.bind.name, outcome.is_ok());
                outcome?;
            }
            Ok(())
        }
        .await;
        self.finish(txs, result).await
    }

    async fn sync_bind(
        &self,
        bind: &Bind,
        conn: &mut dyn Connection,
        targets: Option<&[String]>,
        options: &CompareOptions,
    ) -> MigrateResult<()> {
        if let Some(targets) = targets {
            self.drop_all(bind, conn).await?;
            return self.upgrade_bind(bind, conn, Some(&[]), targets).await;
        }

        let reflected = conn.reflect().await?;
        if compare_metadata(&reflected, &bind.metadata, options).is_empty() {
            self.reporter.info(&format!(
                "{} matches the declared tables",
                bind_label(&bind.name)
            ));
            return Ok(());
        }
        self.reporter.info(&format!(
            "Rebuilding {} from declared tables",
            bind_label(&bind.name)
        ));
        self.drop_all(bind, conn).await?;
        self.create_all(bind, conn).await?;
        self.version.write(conn, bind.engine.dialect(), &[]).await
    }

    /// Create the version table on every bind.
    pub async fn ensure_version(&self) -> MigrateResult<()> {
        let mut txs = self.open_all().await?;
        let result: MigrateResult<()> = async {
            for tx in txs.iter_mut() {
                self.version
                    .ensure(tx.conn.as_mut(), tx.bind.engine.dialect())
                    .await?;
            }
            Ok(())
        }
        .await;
        self.finish(txs, result).await
    }

    /// Schema after applying every revision up to `heads` for one bind.
    fn simulate(&self, bind: &str, heads: &[String]) -> MigrateResult<MetaData> {
        let mut state = MetaData::new();
        for rev in self.map.walk_revisions(&[], heads) {
            for op in rev.ops_for(bind, Direction::Upgrade) {
                apply_operation(&mut state, op)?;
            }
        }
        Ok(state)
    }

    fn emit_ops(
        &self,
        dialect: &dyn Dialect,
        state: &mut MetaData,
        ops: &[Operation],
        out: &mut Vec<String>,
    ) -> MigrateResult<()> {
        for op in ops {
            let current = op.table_name().and_then(|t| state.table(t)).cloned();
            for stmt in render_operation(dialect, op, current.as_ref(), self.render_options())? {
                out.push(format!("{};", stmt));
            }
            apply_operation(state, op)?;
        }
        Ok(())
    }

    fn offline<F>(&self, mut body: F) -> MigrateResult<Vec<OfflineScript>>
    where
        F: FnMut(&Bind, &dyn Dialect, &mut Vec<String>) -> MigrateResult<()>,
    {
        let mut scripts = Vec::new();
        for bind in self.binds.iter() {
            let dialect = bind.engine.dialect();
            let mut out = Vec::new();
            if let Some(tag) = &self.tag {
                out.push(format!("-- tag: {}", tag));
            }
            out.push("BEGIN;".to_string());
            out.push(String::new());
            out.push(format!("{};", self.version.create_sql(dialect)));
            out.push(String::new());
            body(bind, dialect, &mut out)?;
            out.push("COMMIT;".to_string());
            let mut sql = out.join("\n");
            sql.push('\n');
            scripts.push(OfflineScript {
                bind: bind.name.clone(),
                sql,
            });
        }
        Ok(scripts)
    }

    /// Upgrade statements for `spec`, which may be a `start:end` range.
    pub fn upgrade_sql(&self, spec: &str) -> MigrateResult<Vec<OfflineScript>> {
        let (start, end) = match split_range(spec.trim()) {
            Some((start, end)) => (self.map.get_revisions(start)?, end),
            None => (Vec::new(), spec),
        };
        let targets = self.map.get_revisions(end)?;
        let plan = self.map.plan_upgrade(&start, &targets);

        self.offline(|bind, dialect, out| {
            let mut state = self.simulate(&bind.name, &start)?;
            let mut applied = self.map.ancestors(&start);
            for id in &plan {
                let rev = self.revision(id)?;
                out.push(format!("-- {}", step_message(Direction::Upgrade, "", rev)));
                self.emit_ops(dialect, &mut state, rev.ops_for(&bind.name, Direction::Upgrade), out)?;
                applied.insert(id.clone());
                for stmt in self.version.write_sql(dialect, &self.map.heads_of(&applied)) {
                    out.push(format!("{};", stmt));
                }
                out.push(String::new());
            }
            Ok(())
        })
    }

    /// Downgrade statements for a `start:end` range.
    pub fn downgrade_sql(&self, spec: &str) -> MigrateResult<Vec<OfflineScript>> {
        let Some((start, end)) = split_range(spec.trim()) else {
            return Err(MigrationError::usage(
                "downgrade with --sql requires <fromrev>:<torev>",
            ));
        };
        let start = self.map.get_revisions(start)?;
        let target = self.downgrade_target(end)?;
        let plan = self.map.plan_downgrade(&start, &target)?;

        self.offline(|bind, dialect, out| {
            let mut state = self.simulate(&bind.name, &start)?;
            let mut applied = self.map.ancestors(&start);
            for id in &plan {
                let rev = self.revision(id)?;
                out.push(format!("-- {}", step_message(Direction::Downgrade, "", rev)));
                self.emit_ops(dialect, &mut state, rev.ops_for(&bind.name, Direction::Downgrade), out)?;
                applied.remove(id);
                for stmt in self.version.write_sql(dialect, &self.map.heads_of(&applied)) {
                    out.push(format!("{};", stmt));
                }
                out.push(String::new());
            }
            Ok(())
        })
    }

    /// Stamp statements. `spec` may name one starting revision as
    /// `start:end`.
    pub fn stamp_sql(&self, spec: &str, purge: bool) -> MigrateResult<Vec<OfflineScript>> {
        let (current, end) = match split_range(spec.trim()) {
            Some((start, end)) => {
                let current = self.map.get_revisions(start)?;
                if current.len() > 1 {
                    return Err(MigrationError::usage(
                        "stamp with --sql accepts a single starting revision",
                    ));
                }
                (current, end)
            }
            None => (Vec::new(), spec),
        };
        let targets = self.map.get_revisions(end)?;
        let current = if purge { Vec::new() } else { current };
        let rows = self.stamp_rows(&current, &targets);

        self.offline(|_, dialect, out| {
            for stmt in self.version.write_sql(dialect, &rows) {
                out.push(format!("{};", stmt));
            }
            out.push(String::new());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BindOps;
    use crate::report::TracingReporter;
    use crate::sqlite::SqliteEngine;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use strata_schema::{Column, ColumnType, Table};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct RecordingEngine {
        name: &'static str,
        log: Log,
        fail_on: Option<&'static str>,
    }

    struct RecordingConnection {
        name: &'static str,
        log: Log,
        fail_on: Option<&'static str>,
    }

    impl RecordingConnection {
        fn record(&self, event: String) {
            self.log.lock().push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait]
    impl Engine for RecordingEngine {
        fn dialect(&self) -> &dyn Dialect {
            &crate::sql::PostgresDialect
        }

        fn display_url(&self) -> String {
            format!("mock://{}", self.name)
        }

        async fn connect(&self) -> MigrateResult<Box<dyn Connection>> {
            Ok(Box::new(RecordingConnection {
                name: self.name,
                log: self.log.clone(),
                fail_on: self.fail_on,
            }))
        }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        async fn begin(&mut self) -> MigrateResult<()> {
            self.record("begin".into());
            Ok(())
        }

        async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
            if self.fail_on.is_some_and(|needle| sql.contains(needle)) {
                return Err(MigrationError::database("boom"));
            }
            if sql.starts_with("SELECT") {
                self.record(format!("execute {}", sql));
            }
            Ok(())
        }

        async fn fetch_column(&mut self, _sql: &str) -> MigrateResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn reflect(&mut self) -> MigrateResult<MetaData> {
            Ok(MetaData::new())
        }

        async fn has_table(&mut self, _name: &str) -> MigrateResult<bool> {
            Ok(false)
        }

        fn supports_two_phase(&self) -> bool {
            true
        }

        async fn prepare(&mut self, _xid: &str) -> MigrateResult<()> {
            self.record("prepare".into());
            Ok(())
        }

        async fn commit(&mut self) -> MigrateResult<()> {
            if self.fail_on == Some("COMMIT") {
                return Err(MigrationError::database("commit failed"));
            }
            self.record("commit".into());
            Ok(())
        }

        async fn rollback(&mut self) -> MigrateResult<()> {
            self.record("rollback".into());
            Ok(())
        }
    }

    fn recording_binds(log: &Log, fail_on: Option<&'static str>) -> BindSet {
        BindSet::new([
            Bind::new(
                "",
                Arc::new(RecordingEngine {
                    name: "main",
                    log: log.clone(),
                    fail_on: None,
                }),
                MetaData::new(),
            ),
            Bind::new(
                "other",
                Arc::new(RecordingEngine {
                    name: "other",
                    log: log.clone(),
                    fail_on,
                }),
                MetaData::new(),
            ),
        ])
    }

    fn sql_revision(id: &str, parents: &[&str], sql: &str) -> Revision {
        let mut rev = Revision::new(id, Some(format!("rev {}", id)))
            .with_parents(parents.iter().map(|p| p.to_string()).collect());
        for bind in ["", "other"] {
            rev.upgrades.push(BindOps::new(
                bind,
                vec![Operation::Execute {
                    sql: format!("SELECT '{} {}'", sql, bind),
                }],
            ));
        }
        rev
    }

    fn user_revision() -> Revision {
        let table = Table::new("user")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("name", ColumnType::Text));
        let mut rev = Revision::new("a1", Some("create user".into()));
        rev.upgrades.push(BindOps::new(
            "",
            vec![Operation::CreateTable {
                table: table.clone(),
            }],
        ));
        rev.downgrades.push(BindOps::new(
            "",
            vec![Operation::DropTable {
                name: "user".into(),
                table: Some(table),
            }],
        ));
        rev
    }

    #[tokio::test]
    async fn test_two_phase_prepares_every_bind_before_commit() {
        let log: Log = Arc::default();
        let binds = recording_binds(&log, None);
        let map = RevisionMap::new(vec![sql_revision("a", &[], "one")]).unwrap();
        let reporter = TracingReporter;
        let context = ContextOptions {
            two_phase: true,
            ..ContextOptions::default()
        };

        Runner::new(&map, &binds, &reporter)
            .context(context)
            .upgrade("heads")
            .await
            .unwrap();

        let events = log.lock().clone();
        let last_prepare = events.iter().rposition(|e| e.ends_with(":prepare")).unwrap();
        let first_commit = events.iter().position(|e| e.ends_with(":commit")).unwrap();
        assert!(last_prepare < first_commit);
        assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 2);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_every_bind() {
        let log: Log = Arc::default();
        let binds = recording_binds(&log, Some("one other"));
        let map = RevisionMap::new(vec![sql_revision("a", &[], "one")]).unwrap();
        let reporter = TracingReporter;

        let err = Runner::new(&map, &binds, &reporter)
            .upgrade("heads")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));

        let events = log.lock().clone();
        assert!(events.contains(&"main:rollback".to_string()));
        assert!(events.contains(&"other:rollback".to_string()));
        assert!(!events.iter().any(|e| e.ends_with(":commit")));
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_remaining_binds() {
        let log: Log = Arc::default();
        let binds = BindSet::new([
            Bind::new(
                "",
                Arc::new(RecordingEngine {
                    name: "main",
                    log: log.clone(),
                    fail_on: Some("COMMIT"),
                }),
                MetaData::new(),
            ),
            Bind::new(
                "other",
                Arc::new(RecordingEngine {
                    name: "other",
                    log: log.clone(),
                    fail_on: None,
                }),
                MetaData::new(),
            ),
        ]);
        let map = RevisionMap::new(vec![sql_revision("a", &[], "one")]).unwrap();
        let reporter = TracingReporter;

        let err = Runner::new(&map, &binds, &reporter)
            .upgrade("heads")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));

        let events = log.lock().clone();
        assert!(events.contains(&"main:rollback".to_string()));
        assert!(events.contains(&"other:rollback".to_string()));
        assert!(!events.iter().any(|e| e.ends_with(":commit")));
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_sqlite_usable() {
        let engine: Arc<dyn Engine> = Arc::new(SqliteEngine::memory().await.unwrap());
        let binds = BindSet::new([
            Bind::new(
                "",
                Arc::new(RecordingEngine {
                    name: "main",
                    log: Log::default(),
                    fail_on: Some("COMMIT"),
                }),
                MetaData::new(),
            ),
            Bind::new("other", engine.clone(), MetaData::new()),
        ]);
        let mut rev = user_revision();
        for ops in &mut rev.upgrades {
            ops.bind = "other".into();
        }
        for ops in &mut rev.downgrades {
            ops.bind = "other".into();
        }
        let map = RevisionMap::new(vec![rev]).unwrap();
        let reporter = TracingReporter;

        Runner::new(&map, &binds, &reporter)
            .upgrade("heads")
            .await
            .unwrap_err();

        let mut conn = engine.connect().await.unwrap();
        conn.begin().await.unwrap();
        assert!(!conn.has_table("user").await.unwrap());
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_downgrade_sqlite() {
        let engine: Arc<dyn Engine> = Arc::new(SqliteEngine::memory().await.unwrap());
        let binds = BindSet::new([Bind::new("", engine.clone(), MetaData::new())]);
        let map = RevisionMap::new(vec![user_revision()]).unwrap();
        let reporter = TracingReporter;
        let runner = Runner::new(&map, &binds, &reporter);

        runner.upgrade("head").await.unwrap();
        assert_eq!(runner.current().await.unwrap(), vec![("".to_string(), vec!["a1".to_string()])]);
        let mut conn = engine.connect().await.unwrap();
        assert!(conn.has_table("user").await.unwrap());

        runner.downgrade("base").await.unwrap();
        assert!(!conn.has_table("user").await.unwrap());
        assert_eq!(runner.current().await.unwrap()[0].1, Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_stamp_runs_no_ddl() {
        let engine: Arc<dyn Engine> = Arc::new(SqliteEngine::memory().await.unwrap());
        let binds = BindSet::new([Bind::new("", engine.clone(), MetaData::new())]);
        let map = RevisionMap::new(vec![user_revision()]).unwrap();
        let reporter = TracingReporter;
        let runner = Runner::new(&map, &binds, &reporter);

        runner.stamp(&["heads".to_string()], false).await.unwrap();
        assert_eq!(runner.current().await.unwrap()[0].1, vec!["a1".to_string()]);
        let mut conn = engine.connect().await.unwrap();
        assert!(!conn.has_table("user").await.unwrap());

        runner.stamp(&["base".to_string()], false).await.unwrap();
        assert!(runner.current().await.unwrap()[0].1.is_empty());
    }

    #[test]
    fn test_ranges_rejected_online_allowed_offline() {
        let log: Log = Arc::default();
        let binds = recording_binds(&log, None);
        let map = RevisionMap::new(vec![sql_revision("a", &[], "one"), sql_revision("b", &["a"], "two")])
            .unwrap();
        let reporter = TracingReporter;
        let runner = Runner::new(&map, &binds, &reporter);

        assert!(matches!(
            runner.downgrade_target("a:b"),
            Err(MigrationError::InvalidRange(_))
        ));

        let scripts = runner.upgrade_sql("a:b").unwrap();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].sql.starts_with("BEGIN;"));
        assert!(scripts[0].sql.contains("SELECT 'two ';"));
        assert!(!scripts[0].sql.contains("SELECT 'one ';"));
        assert!(scripts[0].sql.contains("-- Running upgrade a -> b, rev b"));
        assert!(scripts[0].sql.trim_end().ends_with("COMMIT;"));

        assert!(matches!(
            runner.downgrade_sql("b"),
            Err(MigrationError::Usage(_))
        ));
        let down = runner.downgrade_sql("b:base").unwrap();
        assert!(down[1].sql.contains("Running downgrade b -> a"));
        assert!(down[1].sql.contains("DELETE FROM \"strata_version\";"));
    }

    #[test]
    fn test_stamp_rows_on_branches() {
        let log: Log = Arc::default();
        let binds = recording_binds(&log, None);
        let map = RevisionMap::new(vec![
            sql_revision("a", &[], "a"),
            sql_revision("b", &["a"], "b"),
            sql_revision("c", &["a"], "c"),
        ])
        .unwrap();
        let reporter = TracingReporter;
        let runner = Runner::new(&map, &binds, &reporter);

        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(runner.stamp_rows(&ids(&["b"]), &ids(&["c"])), ids(&["b", "c"]));
        assert_eq!(runner.stamp_rows(&ids(&["b", "c"]), &ids(&["a"])), ids(&["a"]));
        assert!(runner.stamp_rows(&ids(&["b"]), &[]).is_empty());
    }
}
