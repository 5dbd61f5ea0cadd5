//! Integration tests for the `strata` facade.
//!
//! These tests drive declared tables from model files through a full
//! session using only the re-exported API.

use std::sync::Arc;

use strata::migrate::{Engine, MigrationError, SqliteEngine};
use strata::prelude::*;
use strata::schema::ModelFile;

const MODELS: &str = r#"
[[tables]]
name = "blog_post"

[[tables.columns]]
name = "id"
type = "integer"
primary_key = true

[[tables.columns]]
name = "title"
type = "varchar(200)"
nullable = false

[[tables]]
name = "blog_visit"
bind = "analytics"

[[tables.columns]]
name = "id"
type = "integer"
primary_key = true
"#;

fn registry() -> Registry {
    let mut registry = Registry::with_binds(["analytics"]);
    for table in ModelFile::parse(MODELS, "models.toml").unwrap().tables {
        registry.register(Some("blog"), table).unwrap();
    }
    registry
}

#[test]
fn test_model_file_binds() {
    let registry = registry();
    assert_eq!(registry.bind_of("blog_post"), Some(""));
    assert_eq!(registry.bind_of("blog_visit"), Some("analytics"));

    let mut again = registry.clone();
    let err = again
        .register(None, Table::new("blog_post").column(Column::new("id", "integer")))
        .unwrap_err();
    assert!(err.to_string().contains("blog_post"));
}

#[tokio::test]
async fn test_revision_and_upgrade_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("migrations");
    strata::migrate::init(&location, "multidb", false)
        .await
        .unwrap();

    let main_db: Arc<dyn Engine> = Arc::new(SqliteEngine::memory().await.unwrap());
    let analytics_db: Arc<dyn Engine> = Arc::new(SqliteEngine::memory().await.unwrap());
    let mut session = MigrationSession::builder(MigrateConfig::new().script_location(&location))
        .plugins([PluginInfo::new("blog")])
        .registry(registry())
        .engine("", main_db)
        .engine("analytics", analytics_db)
        .build()
        .await
        .unwrap();

    let path = session
        .revision(RevisionOptions {
            message: Some("blog".into()),
            branch_label: Some("blog".into()),
            ..RevisionOptions::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert!(path.starts_with(location.join("versions")));

    session
        .upgrade("heads", &RunOptions::default())
        .await
        .unwrap();
    session.check().await.unwrap();
}

#[tokio::test]
async fn test_missing_engine_for_declared_bind() {
    let result = MigrationSession::builder(MigrateConfig::new())
        .registry(registry())
        .engine("", Arc::new(SqliteEngine::memory().await.unwrap()))
        .build()
        .await;
    assert!(matches!(result, Err(MigrationError::Config(_))));
}
