//! PostgreSQL provider.
//!
//! Source only: metadata comes from `information_schema` and `pg_catalog`,
//! and types without a native [`Value`] counterpart are read as text.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Postgres, Row as _, Transaction, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SnapshotError};
use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
use crate::value::{Row, Value};

use super::MetadataProvider;

const COLUMNS_SQL: &str = "\
SELECT column_name::text AS name,
       data_type::text AS data_type,
       udt_name::text AS udt_name,
       COALESCE(character_maximum_length, 0)::bigint AS size,
       (is_nullable = 'YES') AS nullable,
       column_default::text AS dflt,
       (is_identity = 'YES') AS identity
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position";

const PRIMARY_KEY_SQL: &str = "\
SELECT kcu.column_name::text AS name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
 AND tc.table_name = kcu.table_name
WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2
ORDER BY kcu.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "\
SELECT con.conname::text AS name,
       ref.relname::text AS ref_table,
       att.attname::text AS col,
       ratt.attname::text AS ref_col
FROM pg_constraint con
JOIN pg_class cl ON cl.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = cl.relnamespace
JOIN pg_class ref ON ref.oid = con.confrelid
CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
JOIN pg_attribute ratt ON ratt.attrelid = con.confrelid AND ratt.attnum = k.refnum
WHERE con.contype = 'f' AND ns.nspname = $1 AND cl.relname = $2
ORDER BY con.conname, k.ord";

const INDEXES_SQL: &str = "\
SELECT ic.relname::text AS name,
       ix.indisunique AS is_unique,
       a.attname::text AS col
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace ns ON ns.oid = t.relnamespace
JOIN pg_class ic ON ic.oid = ix.indexrelid
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE NOT ix.indisprimary AND ns.nspname = $1 AND t.relname = $2
ORDER BY ic.relname, k.ord";

/// Column types read without a text cast.
const NATIVE_TYPES: &[&str] = &["bool", "int2", "int4", "int8", "float4", "float8", "bytea"];

/// PostgreSQL endpoint.
pub struct PostgresProvider {
    config: DatabaseConfig,
    schema: String,
    pool: Option<PgPool>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresProvider {
    /// Creates a provider from connection settings. Does not connect.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
            schema: config
                .schema
                .clone()
                .unwrap_or_else(|| "public".to_string()),
            pool: None,
            tx: None,
        }
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let mut options = match &self.config.url {
            Some(url) => PgConnectOptions::from_str(url)?,
            None => {
                let mut options = PgConnectOptions::new();
                if let Some(host) = &self.config.host {
                    options = options.host(host);
                }
                if let Some(port) = self.config.port {
                    options = options.port(port);
                }
                if let Some(database) = &self.config.database {
                    options = options.database(database);
                }
                if let Some(username) = &self.config.username {
                    options = options.username(username);
                }
                if let Some(password) = &self.config.password {
                    options = options.password(password);
                }
                options
            }
        };
        if self.config.ssl {
            options = options.ssl_mode(PgSslMode::Require);
        }
        Ok(options)
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| SnapshotError::NotConnected("postgresql".to_string()))
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote(&self.schema), quote(table))
    }

    async fn fetch(&mut self, sql: &str, binds: &[&str]) -> Result<Vec<PgRow>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        if let Some(tx) = self.tx.as_mut() {
            return Ok(query.fetch_all(&mut **tx).await?);
        }
        Ok(query.fetch_all(self.pool()?).await?)
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let schema = self.schema.clone();
        let rows = self.fetch(PRIMARY_KEY_SQL, &[&schema, table]).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let ty = raw.type_info().name().to_ascii_uppercase();
        let value = match ty.as_str() {
            "BOOL" => Value::Bool(row.try_get::<bool, _>(i)?),
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(i)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(i)?)),
            "INT8" => Value::Int(row.try_get::<i64, _>(i)?),
            "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
            "FLOAT8" => Value::Float(row.try_get::<f64, _>(i)?),
            "BYTEA" => Value::Bytes(row.try_get::<Vec<u8>, _>(i)?),
            _ => Value::Text(row.try_get::<String, _>(i)?),
        };
        values.push(value);
    }
    Ok(values)
}

#[async_trait]
impl MetadataProvider for PostgresProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let options = self.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        debug!(schema = %self.schema, "Connected to PostgreSQL");
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
        let schema = self.schema.clone();
        let rows = self
            .fetch(
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
                &[&schema],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    async fn describe_table(&mut self, name: &str) -> Result<TableDescriptor> {
        let schema = self.schema.clone();
        let rows = self.fetch(COLUMNS_SQL, &[&schema, name]).await?;
        if rows.is_empty() {
            return Err(SnapshotError::Schema {
                table: name.to_string(),
                message: format!("table not found in schema '{schema}'"),
            });
        }

        let mut table = TableDescriptor::new(name);
        for row in &rows {
            let col_name: String = row.try_get("name")?;
            let data_type: String = row.try_get("data_type")?;
            let udt_name: String = row.try_get("udt_name")?;
            let size: i64 = row.try_get("size")?;
            let nullable: bool = row.try_get("nullable")?;
            let default: Option<String> = row.try_get("dflt")?;
            let identity: bool = row.try_get("identity")?;

            let type_name = match data_type.as_str() {
                "USER-DEFINED" => udt_name,
                "ARRAY" => "ARRAY".to_string(),
                _ => data_type,
            };
            let serial = default
                .as_deref()
                .is_some_and(|d| d.trim_start().to_lowercase().starts_with("nextval("));

            let mut column = ColumnDescriptor::new(col_name, type_name).size(size);
            column.nullable = nullable;
            if identity || serial {
                column.auto_increment = true;
            } else {
                column.default = default;
            }
            table.columns.push(column);
        }

        table.primary_key = self.primary_key(name).await?;

        let fk_rows = self.fetch(FOREIGN_KEYS_SQL, &[&schema, name]).await?;
        for row in &fk_rows {
            let fk_name: String = row.try_get("name")?;
            let ref_table: String = row.try_get("ref_table")?;
            let col: String = row.try_get("col")?;
            let ref_col: String = row.try_get("ref_col")?;
            match table.foreign_keys.last_mut() {
                Some(last) if last.name == fk_name => {
                    last.columns.push(col);
                    last.referenced_columns.push(ref_col);
                }
                _ => table
                    .foreign_keys
                    .push(ForeignKeyDescriptor::new(fk_name, col, ref_table, ref_col)),
            }
        }

        let idx_rows = self.fetch(INDEXES_SQL, &[&schema, name]).await?;
        let mut expression_indexes: Vec<String> = Vec::new();
        for row in &idx_rows {
            let idx_name: String = row.try_get("name")?;
            let unique: bool = row.try_get("is_unique")?;
            let col: Option<String> = row.try_get("col")?;
            let Some(col) = col else {
                expression_indexes.push(idx_name);
                continue;
            };
            match table.indexes.last_mut() {
                Some(last) if last.name == idx_name => last.columns.push(col),
                _ => table
                    .indexes
                    .push(IndexDescriptor::new(idx_name, vec![col], unique)),
            }
        }
        if !expression_indexes.is_empty() {
            expression_indexes.dedup();
            for idx in &expression_indexes {
                warn!(table = %name, index = %idx, "Skipping expression index");
            }
            table
                .indexes
                .retain(|i| !expression_indexes.contains(&i.name));
        }

        Ok(table)
    }

    async fn row_count(&mut self, name: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.qualified(name));
        let rows = self.fetch(&sql, &[]).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("n")?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_page(&mut self, name: &str, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let schema = self.schema.clone();
        let columns = self.fetch(COLUMNS_SQL, &[&schema, name]).await?;
        let mut select = Vec::with_capacity(columns.len());
        for row in &columns {
            let col: String = row.try_get("name")?;
            let udt: String = row.try_get("udt_name")?;
            if NATIVE_TYPES.contains(&udt.as_str()) {
                select.push(quote(&col));
            } else {
                select.push(format!("{}::text", quote(&col)));
            }
        }

        let pk = self.primary_key(name).await?;
        let order = if pk.is_empty() {
            "ctid".to_string()
        } else {
            pk.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            select.join(", "),
            self.qualified(name),
            order,
            limit,
            offset
        );
        let rows = self.fetch(&sql, &[]).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(sql = %sql, "Executing SQL");
        if let Some(tx) = self.tx.as_mut() {
            return Ok(sqlx::query(sql).execute(&mut **tx).await?.rows_affected());
        }
        Ok(sqlx::query(sql).execute(self.pool()?).await?.rows_affected())
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

    async fn insert_rows(&mut self, _table: &str, _columns: &[String], _rows: &[Row]) -> Result<u64> {
        Err(SnapshotError::Unsupported {
            provider: "postgresql".to_string(),
            operation: "insert_rows".to_string(),
        })
    }

    fn dialect_name(&self) -> &str {
        "postgresql"
    }

    async fn engine_version(&mut self) -> Result<String> {
        let rows = self.fetch("SELECT version() AS v", &[]).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<String, _>("v")?),
            None => Ok("PostgreSQL".to_string()),
        }
    }
}
