//! End-to-end snapshots between SQLite files.

mod common;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::{open_sqlite, seed_sqlite, sqlite_config};
use oxide_snapshot::prelude::*;
use tempfile::TempDir;

const SHOP: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, \
     email VARCHAR(100) NOT NULL UNIQUE, name TEXT, \
     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, \
     user_id INTEGER NOT NULL REFERENCES users (id), total REAL, note VARCHAR(5))",
    "CREATE INDEX idx_orders_user ON orders (user_id)",
    "CREATE TABLE temp_cache (k TEXT, v BLOB)",
    "CREATE TABLE log_events (id INTEGER PRIMARY KEY, message TEXT)",
    "INSERT INTO users (id, email, name) VALUES \
     (1, 'ada@corp.io', 'Ada'), (2, 'bob@corp.io', 'Bob'), (3, 'cy@corp.io', 'Cy'), \
     (4, 'di@corp.io', 'Di'), (5, 'ed@corp.io', 'Ed')",
    "INSERT INTO orders (id, user_id, total, note) VALUES \
     (10, 1, 9.5, 'new'), (11, 2, 20.0, 'delivered'), (12, 2, NULL, NULL)",
    "INSERT INTO temp_cache VALUES ('k', X'00FF')",
    "INSERT INTO log_events VALUES (1, 'boot')",
];

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    target: PathBuf,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.db");
    let target = dir.path().join("snapshots").join("target.db");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    seed_sqlite(&source, SHOP).await;
    Fixture {
        _dir: dir,
        source,
        target,
    }
}

async fn count(path: &Path, table: &str) -> u64 {
    let mut db = open_sqlite(path).await;
    let n = db.row_count(table).await.unwrap();
    db.disconnect().await.unwrap();
    n
}

async fn tables(path: &Path) -> Vec<String> {
    let mut db = open_sqlite(path).await;
    let names = db.list_tables().await.unwrap();
    db.disconnect().await.unwrap();
    names
}

#[tokio::test]
async fn test_full_snapshot() {
    let f = fixture().await;

    let result = MigrationEngine::new(sqlite_config(&f.source, &f.target)).run().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.tables_migrated, 4);
    assert_eq!(result.rows_migrated, 10);
    assert!(result.failed_tables.is_empty());

    assert_eq!(
        tables(&f.target).await,
        vec!["log_events", "orders", "temp_cache", "users"]
    );
    assert_eq!(count(&f.target, "users").await, 5);
    assert_eq!(count(&f.target, "orders").await, 3);

    let mut db = open_sqlite(&f.target).await;
    let users = db.describe_table("users").await.unwrap();
    assert!(users.get_column("id").unwrap().auto_increment);
    assert!(!users.get_column("email").unwrap().nullable);
    assert_eq!(
        users.get_column("created_at").unwrap().default.as_deref(),
        Some("CURRENT_TIMESTAMP")
    );
    assert!(users
        .indexes
        .iter()
        .any(|i| i.unique && i.columns == ["email"]));

    let orders = db.describe_table("orders").await.unwrap();
    assert_eq!(orders.foreign_keys.len(), 1);
    assert_eq!(orders.foreign_keys[0].referenced_table, "users");
    assert!(orders.indexes.iter().any(|i| i.name == "idx_orders_user"));

    let rows = db.fetch_page("temp_cache", 10, 0).await.unwrap();
    assert_eq!(rows, vec![vec![Value::from("k"), Value::Bytes(vec![0x00, 0xff])]]);
    db.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_validation_truncates_bounded_text() {
    let f = fixture().await;

    let result = MigrationEngine::new(sqlite_config(&f.source, &f.target)).run().await;
    assert!(result.success);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("orders.note: truncated 1 value(s)")));

    let mut db = open_sqlite(&f.target).await;
    let rows = db.fetch_page("orders", 10, 0).await.unwrap();
    assert_eq!(rows[1][3], Value::from("deliv"));
    assert_eq!(rows[2][2], Value::Null);
    db.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let f = fixture().await;

    for _ in 0..2 {
        let result = MigrationEngine::new(sqlite_config(&f.source, &f.target)).run().await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.rows_migrated, 10);
    }
    assert_eq!(count(&f.target, "users").await, 5);
    assert_eq!(count(&f.target, "orders").await, 3);
}

#[tokio::test]
async fn test_row_cap_wins_over_sampling() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.tables = vec!["users".into()];
    config.migration.data.max_rows = Some(3);
    config.migration.data.sample_data = true;
    config.migration.data.sample_percentage = 50;

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(count(&f.target, "users").await, 3);
}

#[tokio::test]
async fn test_sampling() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.tables = vec!["users".into()];
    config.migration.data.sample_data = true;
    config.migration.data.sample_percentage = 50;

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success);
    assert_eq!(count(&f.target, "users").await, 2);
}

#[tokio::test]
async fn test_exclude_patterns() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.exclude_tables = vec!["temp_*".into(), "LOG_*".into()];

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success);
    assert_eq!(result.tables_migrated, 2);
    assert_eq!(tables(&f.target).await, vec!["orders", "users"]);
}

#[tokio::test]
async fn test_explicit_include_list() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.tables = vec!["USERS".into(), "missing".into()];

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success);
    assert_eq!(tables(&f.target).await, vec!["users"]);
    assert!(result.warnings.iter().any(|w| w.contains("'missing'")));
}

#[tokio::test]
async fn test_anonymization() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.tables = vec!["users".into()];
    config.migration.data.anonymize_data = true;
    config.migration.data.anonymization_rules =
        HashMap::from([("name".to_string(), AnonymizationRule::Hash)]);

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);

    let mut db = open_sqlite(&f.target).await;
    let rows = db.fetch_page("users", 10, 0).await.unwrap();
    assert_eq!(rows.len(), 5);
    for row in &rows {
        let email = row[1].as_str().unwrap();
        assert!(email.starts_with("user_") && email.ends_with("@example.com"));
        let name = row[2].as_str().unwrap();
        assert_eq!(name.len(), 16);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }
    assert_eq!(rows[0][0], Value::Int(1));
    db.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_anonymized_unique_emails_load() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("people.db");
    let target = dir.path().join("people-snapshot.db");
    let values: Vec<String> = (1..=200)
        .map(|i| format!("('person{i}@corp.io')"))
        .collect();
    let insert = format!("INSERT INTO people (email) VALUES {}", values.join(", "));
    seed_sqlite(
        &source,
        &[
            "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             email VARCHAR(100) NOT NULL UNIQUE)",
            insert.as_str(),
        ],
    )
    .await;

    let mut config = sqlite_config(&source, &target);
    config.migration.data.anonymize_data = true;

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);
    assert!(result.failed_tables.is_empty(), "{:?}", result.warnings);
    assert_eq!(result.rows_migrated, 200);
    assert_eq!(count(&target, "people").await, 200);
}

#[tokio::test]
async fn test_auto_increment_survives_toggle() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.tables = vec!["users".into()];
    config.migration.constraints.disable_auto_increment_during_migration = true;

    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);

    let mut db = open_sqlite(&f.target).await;
    let users = db.describe_table("users").await.unwrap();
    assert!(users.get_column("id").unwrap().auto_increment);
    db.execute("INSERT INTO users (email, name) VALUES ('fay@corp.io', 'Fay')")
        .await
        .unwrap();
    let rows = db.fetch_page("users", 10, 5).await.unwrap();
    assert_eq!(rows[0][0], Value::Int(6));
    db.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_script_target() {
    let f = fixture().await;
    let script = f.target.with_extension("sql");
    let mut config = sqlite_config(&f.source, &f.target);
    config.target = DatabaseConfig::new("script").file(&script);
    config.migration.tables = vec!["users".into(), "orders".into()];

    let result = MigrationEngine::new(config.clone()).run().await;
    assert!(result.success, "{}", result.message);

    config.migration.existing_tables = ExistingTablePolicy::Skip;
    let skipping = config.target.file.clone().unwrap().with_extension("skip.sql");
    config.target = DatabaseConfig::new("script").file(&skipping);
    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);
    assert!(!std::fs::read_to_string(&skipping).unwrap().contains("DROP TABLE"));

    let sql = std::fs::read_to_string(&script).unwrap();
    assert!(sql.starts_with("-- oxide-snapshot script (h2)"));
    assert!(sql.contains(
        "CREATE TABLE users (id INT NOT NULL AUTO_INCREMENT, email VARCHAR(100) NOT NULL, \
         name CLOB, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, PRIMARY KEY (id));\n"
    ));
    assert!(sql.contains("CREATE UNIQUE INDEX uq_users_email ON users (email);\n"));
    assert!(sql.contains("INSERT INTO orders (id, user_id, total, note) VALUES (10, 1, 9.5, 'new'),"));
    assert!(sql.contains("ALTER TABLE users ALTER COLUMN id RESTART WITH 6;\n"));

    let drop = sql.find("DROP TABLE IF EXISTS users CASCADE;\n").unwrap();
    assert!(drop < sql.find("CREATE TABLE users").unwrap());

    let fk = sql
        .find("ALTER TABLE orders ADD CONSTRAINT fk_orders_user_id")
        .unwrap();
    assert!(sql.find("CREATE TABLE users").unwrap() < fk);
    assert!(sql.find("CREATE TABLE orders").unwrap() < fk);
}

#[tokio::test]
async fn test_unreachable_source() {
    let f = fixture().await;
    let missing = f.source.parent().unwrap().join("no").join("such").join("dir.db");
    let config = sqlite_config(&missing, &f.target);

    let result = MigrationEngine::new(config).run().await;
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Connectivity);
    assert!(!f.target.exists());
}

#[tokio::test]
async fn test_invalid_configuration_touches_nothing() {
    let f = fixture().await;
    let mut config = sqlite_config(&f.source, &f.target);
    config.migration.data.sample_percentage = 0;

    let result = MigrationEngine::new(config).run().await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Configuration);
    assert!(error.message.contains("samplePercentage"));
    assert!(!f.target.exists());
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let f = fixture().await;
    let path = f.source.with_file_name("snapshot.json");
    std::fs::write(
        &path,
        format!(
            r#"{{
                "source": {{"type": "sqlite", "file": {source:?}}},
                "target": {{"type": "sqlite", "file": {target:?}}},
                "migration": {{
                    "tables": ["users"],
                    "data": {{"maxRows": 2}}
                }},
                "output": {{"exitOnError": true}}
            }}"#,
            source = f.source.display().to_string(),
            target = f.target.display().to_string(),
        ),
    )
    .unwrap();

    let config = MigrationConfig::load(&path).unwrap();
    assert!(config.output.fail_fast);
    let result = MigrationEngine::new(config).run().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(count(&f.target, "users").await, 2);
}
