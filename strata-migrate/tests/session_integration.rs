//! Integration tests for migration sessions.
//!
//! These tests run whole sessions against in-memory SQLite databases with
//! scripts laid out on disk the way plugins ship them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata_migrate::{
    BindOps, Engine, MigrateConfig, MigrationError, MigrationSession, Operation, PluginInfo,
    Revision, RevisionOptions, RunOptions, SqliteEngine,
};
use strata_schema::{Column, Registry, Table};
use tempfile::TempDir;

async fn memory_engine() -> Arc<dyn Engine> {
    Arc::new(SqliteEngine::memory().await.unwrap())
}

fn simple_table(name: &str) -> Table {
    Table::new(name)
        .column(Column::new("id", "integer").primary_key())
        .column(Column::new("title", "text"))
}

/// Write a linear chain of revisions, each creating one table.
async fn write_chain(dir: &Path, ids: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut parent: Option<String> = None;
    for id in ids {
        let table = simple_table(&format!("t_{}", id));
        let mut rev = Revision::new(id.clone(), Some(format!("create {}", table.name)))
            .with_parents(parent.iter().cloned().collect());
        rev.upgrades = vec![BindOps::new(
            "",
            vec![Operation::CreateTable {
                table: table.clone(),
            }],
        )];
        rev.downgrades = vec![BindOps::new(
            "",
            vec![Operation::DropTable {
                name: table.name.clone(),
                table: Some(table),
            }],
        )];
        paths.push(rev.write(dir).await.unwrap());
        parent = Some(id.clone());
    }
    paths
}

fn chain_registry(ids: &[String]) -> Registry {
    let mut registry = Registry::new();
    for id in ids {
        registry
            .register(None, simple_table(&format!("t_{}", id)))
            .unwrap();
    }
    registry
}

fn chain_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("r{:03}", i)).collect()
}

async fn project(dir: &TempDir) -> MigrateConfig {
    let location = dir.path().join("migrations");
    strata_migrate::init(&location, "multidb", false).await.unwrap();
    MigrateConfig::new().script_location(location)
}

async fn table_names(engine: &Arc<dyn Engine>) -> Vec<String> {
    let mut conn = engine.connect().await.unwrap();
    let mut names: Vec<String> = conn
        .reflect()
        .await
        .unwrap()
        .table_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_two_plugins_on_two_binds() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;

    let mut registry = Registry::with_binds(["analytics"]);
    registry.register(Some("blog"), simple_table("blog_post")).unwrap();
    registry
        .register(Some("stats"), simple_table("stats_event").bind("analytics"))
        .unwrap();

    let main_db = memory_engine().await;
    let analytics_db = memory_engine().await;
    let plugins = [
        PluginInfo::new("blog").migrations(dir.path().join("blog/migrations")),
        PluginInfo::new("stats").migrations(dir.path().join("stats/migrations")),
    ];

    let mut session = MigrationSession::builder(config.clone())
        .plugins(plugins.clone())
        .registry(registry.clone())
        .engine("", main_db.clone())
        .engine("analytics", analytics_db.clone())
        .build()
        .await
        .unwrap();

    let blog = session
        .revision(RevisionOptions {
            message: Some("blog tables".into()),
            branch_label: Some("blog".into()),
            ..RevisionOptions::default()
        })
        .await
        .unwrap()
        .unwrap();
    let stats = session
        .revision(RevisionOptions {
            message: Some("stats tables".into()),
            branch_label: Some("stats".into()),
            ..RevisionOptions::default()
        })
        .await
        .unwrap()
        .unwrap();

    let versions = dir.path().join("migrations/versions");
    assert!(blog.starts_with(versions.join("blog")), "{}", blog.display());
    assert!(stats.starts_with(versions.join("stats")), "{}", stats.display());
    assert_eq!(session.scripts().map().heads().len(), 2);

    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(table_names(&main_db).await, vec!["blog_post", "strata_version"]);
    assert_eq!(
        table_names(&analytics_db).await,
        vec!["stats_event", "strata_version"]
    );
    session.check().await.unwrap();
    session.close().unwrap();

    // A fresh session sees the relocated scripts.
    let session = MigrationSession::builder(config)
        .plugins(plugins)
        .registry(registry)
        .engine("", main_db)
        .engine("analytics", analytics_db)
        .build()
        .await
        .unwrap();
    assert_eq!(session.scripts().map().len(), 2);
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_fast_upgrade_matches_replay() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(50);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let fast_db = memory_engine().await;
    let fast = MigrationSession::builder(config.clone())
        .registry(chain_registry(&ids))
        .engine("", fast_db.clone())
        .build()
        .await
        .unwrap();
    fast.upgrade(
        "heads",
        &RunOptions {
            fast: true,
            ..RunOptions::default()
        },
    )
    .await
    .unwrap();

    let replay_db = memory_engine().await;
    let replay = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", replay_db.clone())
        .build()
        .await
        .unwrap();
    replay
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(table_names(&fast_db).await, table_names(&replay_db).await);
    assert_eq!(table_names(&fast_db).await.len(), 51);
    assert_eq!(fast.current(false).await.unwrap(), replay.current(false).await.unwrap());
    fast.check().await.unwrap();
    replay.check().await.unwrap();
}

#[tokio::test]
async fn test_fast_upgrade_skipped_for_non_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(3);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let db = memory_engine().await;
    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session
        .upgrade("r001", &RunOptions::default())
        .await
        .unwrap();
    session
        .upgrade(
            "heads",
            &RunOptions {
                fast: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(session.current(false).await.unwrap().len(), 1);
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_range_rejected_online_but_rendered_offline() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(3);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();

    let err = session
        .upgrade("r001:r003", &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::InvalidRange(_)), "{err}");

    let scripts = session
        .upgrade_sql("r001:r003", Some("release-1".into()))
        .unwrap();
    assert_eq!(scripts.len(), 1);
    let sql = &scripts[0].sql;
    assert!(sql.starts_with("-- tag: release-1"));
    assert!(!sql.contains("t_r001"));
    assert!(sql.contains("t_r002"));
    assert!(sql.contains("t_r003"));

    assert!(matches!(
        session.downgrade_sql("r001", None),
        Err(MigrationError::Usage(_))
    ));
}

#[tokio::test]
async fn test_check_reports_out_of_date() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(7);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();
    session
        .upgrade("r005", &RunOptions::default())
        .await
        .unwrap();

    match session.check().await {
        Err(MigrationError::OutOfDate { current, heads }) => {
            assert_eq!(current, vec!["r005".to_string()]);
            assert_eq!(heads, vec!["r007".to_string()]);
        }
        other => panic!("expected OutOfDate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_check_reports_drift() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(2);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let mut registry = chain_registry(&ids);
    registry.register(Some("blog"), simple_table("blog_post")).unwrap();

    let session = MigrationSession::builder(config)
        .registry(registry)
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();
    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();

    match session.check().await {
        Err(MigrationError::DriftDetected { diffs }) => {
            assert_eq!(diffs.len(), 1);
            assert!(diffs[0].contains("blog_post"), "{}", diffs[0]);
        }
        other => panic!("expected DriftDetected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_merge_joins_heads() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let versions = dir.path().join("migrations/versions");
    let mut base = Revision::new("aaa", Some("base".into()));
    base.write(&versions).await.unwrap();
    let mut left = Revision::new("bbb", Some("left".into())).with_parents(vec!["aaa".into()]);
    left.write(&versions).await.unwrap();
    let mut right = Revision::new("ccc", Some("right".into())).with_parents(vec!["aaa".into()]);
    right.write(&versions).await.unwrap();

    let mut session = MigrationSession::builder(config)
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();
    assert_eq!(session.scripts().map().heads(), vec!["bbb", "ccc"]);
    assert_eq!(session.branches(false).len(), 3);

    let path = session
        .merge(
            &["heads".to_string()],
            Some("merge branches".into()),
            None,
            Some("ddd".into()),
        )
        .await
        .unwrap();
    assert!(path.starts_with(&versions));
    assert_eq!(session.scripts().map().heads(), vec!["ddd"]);
    let merged = session.scripts().map().get("ddd").unwrap();
    assert_eq!(merged.down_revisions, vec!["bbb", "ccc"]);

    session
        .upgrade("head", &RunOptions::default())
        .await
        .unwrap();
    let current = session.current(false).await.unwrap();
    assert_eq!(current.len(), 1);
    assert!(current[0].contains("ddd"));
}

#[tokio::test]
async fn test_upgrade_then_downgrade_to_base() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(4);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let db = memory_engine().await;
    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    session
        .downgrade("r002", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(
        table_names(&db).await,
        vec!["strata_version", "t_r001", "t_r002"]
    );

    session
        .downgrade("base", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(table_names(&db).await, vec!["strata_version"]);
    assert!(session.current(false).await.unwrap().is_empty());

    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(
        table_names(&db).await,
        vec!["strata_version", "t_r001", "t_r002", "t_r003", "t_r004"]
    );
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_revision_refuses_out_of_date_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(2);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let mut session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();
    let err = session
        .revision(RevisionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::OutOfDate { .. }), "{err}");

    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    let created = session.revision(RevisionOptions::default()).await.unwrap();
    assert_eq!(created, None);
}

#[tokio::test]
async fn test_history_and_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(3);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let db = memory_engine().await;
    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session.stamp(&["r002".to_string()], false).await.unwrap();
    assert_eq!(table_names(&db).await, vec!["strata_version"]);

    let history = session.history(None, false, true).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].contains("r003"));
    assert!(history[1].contains("(current)"));

    let upcoming = session
        .history(Some("current:"), false, false)
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 2);
    assert!(matches!(
        session.history(Some("r001"), false, false).await,
        Err(MigrationError::Usage(_))
    ));
}

#[tokio::test]
async fn test_sync_rebuilds_drifted_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;

    let db = memory_engine().await;
    {
        let mut conn = db.connect().await.unwrap();
        conn.execute("CREATE TABLE legacy (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
    }

    let mut registry = Registry::new();
    registry.register(None, simple_table("note")).unwrap();
    let session = MigrationSession::builder(config)
        .registry(registry)
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session.sync(None).await.unwrap();

    assert_eq!(table_names(&db).await, vec!["note", "strata_version"]);
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_sync_to_revision_replays_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(3);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let db = memory_engine().await;
    let session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    {
        let mut conn = db.connect().await.unwrap();
        conn.execute("DROP TABLE t_r002").await.unwrap();
        conn.execute("CREATE TABLE legacy (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
    }
    assert!(session.check().await.is_err());

    session.sync(Some("heads")).await.unwrap();

    assert_eq!(
        table_names(&db).await,
        vec!["strata_version", "t_r001", "t_r002", "t_r003"]
    );
    let current = session.current(false).await.unwrap();
    assert_eq!(current.len(), 1);
    assert!(current[0].contains("r003"));
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_label_revision_requires_every_head_applied() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(1);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let mut session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();
    let shared = RevisionOptions {
        message: Some("shared".into()),
        branch_label: Some("shared".into()),
        ..RevisionOptions::default()
    };

    let err = session.revision(shared.clone()).await.unwrap_err();
    assert!(matches!(err, MigrationError::OutOfDate { .. }), "{err}");
    assert_eq!(session.scripts().map().len(), 1);

    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(session.revision(shared).await.unwrap(), None);
}

#[tokio::test]
async fn test_startup_check_offers_drift_fix_at_head() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;

    let mut registry = Registry::new();
    registry.register(None, simple_table("note")).unwrap();
    let db = memory_engine().await;
    let mut session = MigrationSession::builder(config)
        .registry(registry)
        .engine("", db.clone())
        .build()
        .await
        .unwrap();

    let err = session.startup_check(false, |_| false).await.unwrap_err();
    assert!(matches!(err, MigrationError::DriftDetected { .. }), "{err}");

    let mut prompts = Vec::new();
    session
        .startup_check(false, |question| {
            prompts.push(question.to_string());
            true
        })
        .await
        .unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("differs"));
    assert_eq!(session.scripts().map().len(), 1);
    assert_eq!(table_names(&db).await, vec!["note", "strata_version"]);
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_startup_check_fast_path_and_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let ids = chain_ids(2);
    write_chain(&dir.path().join("migrations/versions"), &ids).await;

    let db = memory_engine().await;
    let mut session = MigrationSession::builder(config.clone())
        .registry(chain_registry(&ids))
        .engine("", db.clone())
        .build()
        .await
        .unwrap();
    session
        .startup_check(true, |_| panic!("empty database needs no prompt"))
        .await
        .unwrap();
    assert_eq!(table_names(&db).await.len(), 3);

    let other = memory_engine().await;
    let mut session = MigrationSession::builder(config)
        .registry(chain_registry(&ids))
        .engine("", other.clone())
        .build()
        .await
        .unwrap();
    session.stamp(&["r001".to_string()], false).await.unwrap();
    {
        let mut conn = other.connect().await.unwrap();
        conn.execute(
            "CREATE TABLE t_r001 (id INTEGER NOT NULL PRIMARY KEY, title TEXT)",
        )
        .await
        .unwrap();
    }

    let err = session.startup_check(false, |_| false).await.unwrap_err();
    assert!(matches!(err, MigrationError::OutOfDate { .. }));

    let mut prompts = 0;
    session
        .startup_check(false, |_| {
            prompts += 1;
            true
        })
        .await
        .unwrap();
    assert_eq!(prompts, 1);
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_editable_plugin_writes_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(&dir).await;
    let plugin_dir = dir.path().join("local/migrations");
    tokio::fs::create_dir_all(&plugin_dir).await.unwrap();

    let mut registry = Registry::new();
    registry.register(Some("local"), simple_table("local_item")).unwrap();

    let mut session = MigrationSession::builder(config)
        .plugins([PluginInfo::new("local")
            .migrations(plugin_dir.clone())
            .editable(true)])
        .registry(registry)
        .engine("", memory_engine().await)
        .build()
        .await
        .unwrap();

    let path = session
        .revision(RevisionOptions {
            message: Some("local tables".into()),
            branch_label: Some("local".into()),
            ..RevisionOptions::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(path.parent().unwrap(), plugin_dir.as_path());

    let edited = session.edit_targets("local@head").await.unwrap();
    assert_eq!(edited, vec![path]);
}
