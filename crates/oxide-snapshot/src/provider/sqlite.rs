//! SQLite provider.
//!
//! Usable as source and as target. Metadata comes from the `pragma_*`
//! table-valued functions so table names can be bound instead of spliced in.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Row as _, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SnapshotError};
use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
use crate::value::{Row, Value};

use super::MetadataProvider;

/// Host parameter limit of older SQLite builds.
const MAX_BOUND_PARAMETERS: usize = 999;

/// SQLite endpoint backed by a single-connection pool.
pub struct SqliteProvider {
    file: Option<PathBuf>,
    url: Option<String>,
    memory: bool,
    pool: Option<SqlitePool>,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteProvider {
    /// Creates a provider from connection settings. Does not connect.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            file: config.file.clone(),
            url: config.url.clone(),
            memory: config.is_memory(),
            pool: None,
            tx: None,
        }
    }

    /// Creates a provider for a database file.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(&DatabaseConfig::new("sqlite").file(path))
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else if let Some(file) = &self.file {
            SqliteConnectOptions::new().filename(file)
        } else if let Some(url) = &self.url {
            SqliteConnectOptions::from_str(url)?
        } else {
            return Err(SnapshotError::Configuration(
                "sqlite requires a file, a url or memory mode".to_string(),
            ));
        };
        Ok(options.create_if_missing(true).foreign_keys(false))
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| SnapshotError::NotConnected("sqlite".to_string()))
    }

    async fn fetch(&mut self, sql: &str, binds: &[&str]) -> Result<Vec<SqliteRow>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        if let Some(tx) = self.tx.as_mut() {
            return Ok(query.fetch_all(&mut **tx).await?);
        }
        Ok(query.fetch_all(self.pool()?).await?)
    }

    async fn run<'a>(&mut self, query: Query<'a, Sqlite, SqliteArguments<'a>>) -> Result<u64> {
        if let Some(tx) = self.tx.as_mut() {
            return Ok(query.execute(&mut **tx).await?.rows_affected());
        }
        Ok(query.execute(self.pool()?).await?.rows_affected())
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .fetch(
                "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
                &[table],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    async fn read_indexes(&mut self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let list = self
            .fetch(
                "SELECT name, \"unique\" AS is_unique, origin FROM pragma_index_list(?1) ORDER BY seq DESC",
                &[table],
            )
            .await?;

        let mut indexes = Vec::new();
        for row in &list {
            let name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("is_unique")?;
            let origin: String = row.try_get("origin")?;
            if origin == "pk" {
                continue;
            }

            let info = self
                .fetch(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &[name.as_str()],
                )
                .await?;
            let columns: Vec<Option<String>> = info
                .iter()
                .map(|r| r.try_get::<Option<String>, _>("name"))
                .collect::<std::result::Result<_, _>>()?;
            if columns.iter().any(Option::is_none) {
                warn!(table = %table, index = %name, "Skipping expression index");
                continue;
            }
            let columns: Vec<String> = columns.into_iter().flatten().collect();

            let name = if origin == "u" {
                format!("uq_{}_{}", table, columns.join("_"))
            } else {
                name
            };
            indexes.push(IndexDescriptor::new(name, columns, unique != 0));
        }
        Ok(indexes)
    }

    async fn read_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let rows = self
            .fetch(
                "SELECT id, \"table\" AS ref_table, \"from\" AS from_col, \"to\" AS to_col \
                 FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
                &[table],
            )
            .await?;

        let mut grouped: Vec<(i64, String, Vec<String>, Vec<Option<String>>)> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let ref_table: String = row.try_get("ref_table")?;
            let from: String = row.try_get("from_col")?;
            let to: Option<String> = row.try_get("to_col")?;
            match grouped.last_mut() {
                Some(last) if last.0 == id => {
                    last.2.push(from);
                    last.3.push(to);
                }
                _ => grouped.push((id, ref_table, vec![from], vec![to])),
            }
        }

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        for (_, ref_table, columns, to) in grouped {
            // A missing target column means "the referenced table's primary key".
            let referenced_columns = if to.iter().all(Option::is_some) {
                to.into_iter().flatten().collect()
            } else {
                self.primary_key(&ref_table).await?
            };
            foreign_keys.push(ForeignKeyDescriptor {
                name: format!("fk_{}_{}", table, columns.join("_")),
                columns,
                referenced_table: ref_table,
                referenced_columns,
            });
        }
        Ok(foreign_keys)
    }
}

/// Splits a declared type such as `VARCHAR(255)` into name and size.
pub(crate) fn parse_declared_type(declared: &str) -> (String, i64) {
    let declared = declared.trim();
    if declared.is_empty() {
        return ("TEXT".to_string(), 0);
    }
    match declared.find('(') {
        Some(open) => {
            let name = declared[..open].trim().to_string();
            let size = declared[open + 1..]
                .split([',', ')'])
                .next()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            (name, size)
        }
        None => (declared.to_string(), 0),
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let storage = raw.type_info().name().to_ascii_uppercase();
        let value = match storage.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(i)?),
            "REAL" | "FLOAT" | "DOUBLE" => Value::Float(row.try_get::<f64, _>(i)?),
            "BLOB" => Value::Bytes(row.try_get::<Vec<u8>, _>(i)?),
            _ => Value::Text(row.try_get::<String, _>(i)?),
        };
        values.push(value);
    }
    Ok(values)
}

#[async_trait]
impl MetadataProvider for SqliteProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let options = self.connect_options()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        debug!(file = ?self.file, "Connected to SQLite");
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = self
            .fetch(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    async fn describe_table(&mut self, name: &str) -> Result<TableDescriptor> {
        let info = self
            .fetch(
                "SELECT name, type, \"notnull\" AS not_null, dflt_value, pk \
                 FROM pragma_table_info(?1) ORDER BY cid",
                &[name],
            )
            .await?;
        if info.is_empty() {
            return Err(SnapshotError::Schema {
                table: name.to_string(),
                message: "table not found".to_string(),
            });
        }

        let create_sql: Option<String> = self
            .fetch(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[name],
            )
            .await?
            .first()
            .map(|r| r.try_get::<Option<String>, _>("sql"))
            .transpose()?
            .flatten();
        let has_autoincrement = create_sql
            .as_deref()
            .is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"));

        let mut table = TableDescriptor::new(name);
        let mut pk: Vec<(i64, String)> = Vec::new();
        for row in &info {
            let col_name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("not_null")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk_pos: i64 = row.try_get("pk")?;

            let (type_name, size) = parse_declared_type(&declared);
            let mut column = ColumnDescriptor::new(col_name.clone(), type_name).size(size);
            column.nullable = not_null == 0;
            column.default = default;
            if pk_pos > 0 {
                pk.push((pk_pos, col_name));
            }
            table.columns.push(column);
        }
        pk.sort_by_key(|(pos, _)| *pos);
        table.primary_key = pk.into_iter().map(|(_, n)| n).collect();

        if has_autoincrement {
            if let [only] = table.primary_key.as_slice() {
                let only = only.clone();
                if let Some(col) = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name == only && c.type_name.eq_ignore_ascii_case("INTEGER"))
                {
                    col.auto_increment = true;
                    col.nullable = false;
                }
            }
        }

        table.indexes = self.read_indexes(name).await?;
        table.foreign_keys = self.read_foreign_keys(name).await?;
        Ok(table)
    }

    async fn row_count(&mut self, name: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote(name));
        let rows = self.fetch(&sql, &[]).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("n")?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_page(&mut self, name: &str, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let pk = self.primary_key(name).await?;
        let order = if pk.is_empty() {
            "rowid".to_string()
        } else {
            pk.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        };
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            quote(name),
            order,
            limit,
            offset
        );
        let rows = self.fetch(&sql, &[]).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(sql = %sql, "Executing SQL");
        self.run(sqlx::query(sql)).await
    }

    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_none() {
            let tx = self.pool()?.begin().await?;
            self.tx = Some(tx);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote(table),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        );
        let rows_per_statement = (MAX_BOUND_PARAMETERS / columns.len()).max(1);

        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = format!("{prefix}{}", vec![placeholders.as_str(); chunk.len()].join(", "));
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for value in row {
                    query = match value {
                        Value::Null => query.bind(None::<i64>),
                        Value::Bool(v) => query.bind(*v),
                        Value::Int(v) => query.bind(*v),
                        Value::Float(v) => query.bind(*v),
                        Value::Text(v) => query.bind(v.as_str()),
                        Value::Bytes(v) => query.bind(v.as_slice()),
                    };
                }
            }
            inserted += self.run(query).await?;
        }
        Ok(inserted)
    }

    fn dialect_name(&self) -> &str {
        "sqlite"
    }

    async fn engine_version(&mut self) -> Result<String> {
        let rows = self.fetch("SELECT sqlite_version() AS v", &[]).await?;
        match rows.first() {
            Some(row) => Ok(format!("SQLite {}", row.try_get::<String, _>("v")?)),
            None => Ok("SQLite".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> SqliteProvider {
        let mut config = DatabaseConfig::new("sqlite");
        config.mode = Some("memory".into());
        let mut provider = SqliteProvider::new(&config);
        provider.connect().await.unwrap();
        provider
    }

    #[test]
    fn test_parse_declared_type() {
        assert_eq!(parse_declared_type("VARCHAR(255)"), ("VARCHAR".into(), 255));
        assert_eq!(parse_declared_type("decimal(10, 2)"), ("decimal".into(), 10));
        assert_eq!(parse_declared_type("INTEGER"), ("INTEGER".into(), 0));
        assert_eq!(parse_declared_type(""), ("TEXT".into(), 0));
    }

    #[tokio::test]
    async fn test_describe_table() {
        let mut db = memory().await;
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             email VARCHAR(255) NOT NULL UNIQUE, status TEXT DEFAULT 'active')",
        )
        .await
        .unwrap();
        db.execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id))",
        )
        .await
        .unwrap();
        db.execute("CREATE INDEX idx_orders_user ON orders (user_id)")
            .await
            .unwrap();

        assert_eq!(db.list_tables().await.unwrap(), vec!["orders", "users"]);

        let users = db.describe_table("users").await.unwrap();
        assert_eq!(users.primary_key, vec!["id"]);
        assert!(users.columns[0].auto_increment);
        assert_eq!(users.columns[1].type_name, "VARCHAR");
        assert_eq!(users.columns[1].size, 255);
        assert!(!users.columns[1].nullable);
        assert_eq!(users.columns[2].default.as_deref(), Some("'active'"));
        assert_eq!(users.indexes.len(), 1);
        assert_eq!(users.indexes[0].name, "uq_users_email");
        assert!(users.indexes[0].unique);

        let orders = db.describe_table("orders").await.unwrap();
        assert!(!orders.columns[0].auto_increment);
        assert_eq!(orders.indexes[0].name, "idx_orders_user");
        assert_eq!(orders.foreign_keys.len(), 1);
        let fk = &orders.foreign_keys[0];
        assert_eq!(fk.name, "fk_orders_user_id");
        assert_eq!(fk.referenced_table, "users");
        assert_eq!(fk.referenced_columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let mut db = memory().await;
        assert!(db.describe_table("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_pages_and_transactions() {
        let mut db = memory().await;
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB)")
            .await
            .unwrap();

        let columns: Vec<String> = vec!["id".into(), "name".into(), "score".into(), "data".into()];
        let rows: Vec<Row> = (1..=5)
            .map(|i| {
                vec![
                    Value::Int(i),
                    Value::Text(format!("n{i}")),
                    Value::Float(0.5),
                    if i == 1 { Value::Bytes(vec![1, 2]) } else { Value::Null },
                ]
            })
            .collect();

        db.begin().await.unwrap();
        assert_eq!(db.insert_rows("t", &columns, &rows).await.unwrap(), 5);
        db.rollback().await.unwrap();
        assert_eq!(db.row_count("t").await.unwrap(), 0);

        db.begin().await.unwrap();
        db.insert_rows("t", &columns, &rows).await.unwrap();
        db.commit().await.unwrap();
        assert_eq!(db.row_count("t").await.unwrap(), 5);

        let page = db.fetch_page("t", 2, 3).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0][0], Value::Int(4));
        assert_eq!(page[0][1], Value::Text("n4".into()));
        assert_eq!(page[0][2], Value::Float(0.5));
        assert_eq!(page[0][3], Value::Null);

        let first = db.fetch_page("t", 1, 0).await.unwrap();
        assert_eq!(first[0][3], Value::Bytes(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut db = memory().await;
        db.execute("CREATE TABLE keep (x INTEGER)").await.unwrap();
        db.connect().await.unwrap();
        assert!(db.table_exists("KEEP").await.unwrap());
        assert!(db.engine_version().await.unwrap().starts_with("SQLite"));
        db.disconnect().await.unwrap();
        assert!(!db.is_connected());
    }
}
