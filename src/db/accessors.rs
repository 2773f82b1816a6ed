// db/accessors.rs
// Database accessor implementations for different database systems.

use super::descriptor::{ConnectionDescriptor, DatabaseKind};
use super::models::*;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use sqlx::{self, mysql::MySqlPoolOptions, postgres::PgPoolOptions, sqlite::SqlitePoolOptions};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tracing::debug;

/// Capability interface every supported database kind implements.
///
/// Each call may check out its own pooled connection, so a long data export
/// never monopolizes the connection used for catalog queries.
#[async_trait]
pub trait DumpSource: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    /// Namespace used when the caller does not name one.
    async fn default_namespace(&self) -> Result<Option<String>>;

    /// Table names in catalog order. Never re-sorted.
    async fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>>;

    /// All columns of one table, in catalog order. Zero columns is `TableVanished`.
    async fn describe_table(&self, namespace: Option<&str>, table: &str)
        -> Result<TableDescriptor>;

    /// One window of rows, values positionally matching `table.columns`.
    async fn fetch_page(&self, table: &TableDescriptor, page: &PageRequest) -> Result<Vec<Row>>;

    /// Release every pooled connection. Safe to call more than once.
    async fn close(&self);
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub max_connections: u32,
}

/// Open a source for `descriptor`. The only place that picks an implementation
/// per database kind.
pub async fn connect(
    descriptor: &ConnectionDescriptor,
    options: &ConnectOptions,
) -> Result<Box<dyn DumpSource>> {
    let max = options.max_connections.max(1);
    let source: Box<dyn DumpSource> = match descriptor.kind() {
        DatabaseKind::Postgres => Box::new(PostgresAccessor::new(descriptor.url(), max).await?),
        DatabaseKind::Mysql => Box::new(MySqlAccessor::new(descriptor.url(), max).await?),
        DatabaseKind::Sqlite => Box::new(SqliteAccessor::new(descriptor.url(), max).await?),
    };
    Ok(source)
}

/// Always-quoted identifier for queries issued against the source.
fn sql_ident(kind: DatabaseKind, name: &str) -> String {
    match kind {
        DatabaseKind::Mysql => format!("`{}`", name.replace('`', "``")),
        DatabaseKind::Postgres | DatabaseKind::Sqlite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

fn page_sql(from: &str, select: &[String], page: &PageRequest) -> String {
    let mut sql = format!("SELECT {} FROM {}", select.join(", "), from);
    if !page.order_by.is_empty() {
        let positions: Vec<String> = page.order_by.iter().map(|p| p.to_string()).collect();
        sql.push_str(&format!(" ORDER BY {}", positions.join(", ")));
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset));
    sql
}

fn catalog_error(what: &str, err: sqlx::Error) -> BackupError {
    BackupError::CatalogUnavailable(format!("{}: {}", what, err))
}

fn page_error(table: &TableDescriptor, page: &PageRequest, err: sqlx::Error) -> BackupError {
    BackupError::PageFetch {
        table: table.name.clone(),
        offset: page.offset,
        reason: err.to_string(),
    }
}

fn decode_error(table: &TableDescriptor, page: &PageRequest, column: &str, err: sqlx::Error) -> BackupError {
    BackupError::PageFetch {
        table: table.name.clone(),
        offset: page.offset,
        reason: format!("decoding column {}: {}", column, err),
    }
}

// ------------------- PostgreSQL -------------------
pub struct PostgresAccessor {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl PostgresAccessor {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| BackupError::Connection(format!("PostgreSQL: {}", e)))?;
        Ok(Self { pool })
    }

    async fn get_primary_keys_for_table(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT a.attname::text AS attname
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = $1::regclass AND i.indisprimary",
        )
        .bind(format!(
            "{}.{}",
            sql_ident(DatabaseKind::Postgres, schema),
            sql_ident(DatabaseKind::Postgres, table)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| catalog_error(&format!("primary key of {}.{}", schema, table), e))?;
        Ok(rows.into_iter().map(|row| row.get("attname")).collect())
    }
}

#[async_trait]
impl DumpSource for PostgresAccessor {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn default_namespace(&self) -> Result<Option<String>> {
        Ok(Some("public".to_string()))
    }

    async fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>> {
        let schema = namespace.unwrap_or("public");
        let rows = sqlx::query(
            "SELECT table_name::text AS table_name FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| catalog_error(&format!("listing tables in {}", schema), e))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("table_name")).collect())
    }

    async fn describe_table(&self, namespace: Option<&str>, table: &str) -> Result<TableDescriptor> {
        let schema = namespace.unwrap_or("public");
        let rows = sqlx::query(
            "SELECT c.column_name::text AS column_name,
                    CASE
                        WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name::text
                        WHEN c.data_type = 'ARRAY' THEN ltrim(c.udt_name::text, '_') || '[]'
                        WHEN c.character_maximum_length IS NOT NULL
                            THEN c.data_type::text || '(' || c.character_maximum_length::text || ')'
                        ELSE c.data_type::text
                    END AS declared_type
             FROM information_schema.columns c
             WHERE c.table_schema = $1 AND c.table_name = $2
             ORDER BY c.ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| catalog_error(&format!("describing {}.{}", schema, table), e))?;
        if rows.is_empty() {
            return Err(BackupError::TableVanished(table.to_string()));
        }
        let primary_keys = self.get_primary_keys_for_table(schema, table).await?;
        let columns = rows
            .into_iter()
            .map(|row| {
                let name: String = row.get("column_name");
                ColumnDescriptor {
                    primary_key: primary_keys.contains(&name),
                    declared_type: row.get("declared_type"),
                    name,
                }
            })
            .collect();
        Ok(TableDescriptor {
            namespace: Some(schema.to_string()),
            name: table.to_string(),
            columns,
        })
    }

    async fn fetch_page(&self, table: &TableDescriptor, page: &PageRequest) -> Result<Vec<Row>> {
        let kind = DatabaseKind::Postgres;
        let classes: Vec<ValueClass> = table
            .columns
            .iter()
            .map(|c| ValueClass::from_declared_type(&c.declared_type))
            .collect();
        let select: Vec<String> = table
            .columns
            .iter()
            .zip(&classes)
            .map(|(c, class)| {
                let cast = match class {
                    ValueClass::Integer => "bigint",
                    ValueClass::Float => "double precision",
                    ValueClass::Binary => "bytea",
                    ValueClass::Text | ValueClass::Other => "text",
                };
                format!("{}::{}", sql_ident(kind, &c.name), cast)
            })
            .collect();
        let from = match &table.namespace {
            Some(ns) => format!("{}.{}", sql_ident(kind, ns), sql_ident(kind, &table.name)),
            None => sql_ident(kind, &table.name),
        };
        let sql = page_sql(&from, &select, page);
        debug!(table = %table.name, %sql, "fetching page");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| page_error(table, page, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(classes.len());
            for (i, class) in classes.iter().enumerate() {
                let value = match class {
                    ValueClass::Integer => row
                        .try_get::<Option<i64>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Integer)),
                    ValueClass::Float => row
                        .try_get::<Option<f64>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Float)),
                    ValueClass::Text => row
                        .try_get::<Option<String>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Text)),
                    ValueClass::Binary => row
                        .try_get::<Option<Vec<u8>>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Binary)),
                    ValueClass::Other => row
                        .try_get::<Option<String>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Other)),
                }
                .map_err(|e| decode_error(table, page, &table.columns[i].name, e))?;
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ------------------- MySQL -------------------
pub struct MySqlAccessor {
    pool: sqlx::Pool<sqlx::MySql>,
}

impl MySqlAccessor {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| BackupError::Connection(format!("MySQL: {}", e)))?;
        Ok(Self { pool })
    }

    async fn resolve_db(&self, namespace: Option<&str>) -> Result<String> {
        match namespace {
            Some(db) => Ok(db.to_string()),
            None => self.default_namespace().await?.ok_or_else(|| {
                BackupError::CatalogUnavailable(
                    "no database selected; pass a schema or include it in the URL".into(),
                )
            }),
        }
    }
}

#[async_trait]
impl DumpSource for MySqlAccessor {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }

    async fn default_namespace(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT CAST(DATABASE() AS CHAR) AS db")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| catalog_error("resolving current database", e))?;
        Ok(row.get::<Option<String>, _>("db"))
    }

    async fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>> {
        let db = self.resolve_db(namespace).await?;
        let rows = sqlx::query(
            "SELECT CAST(table_name AS CHAR) AS table_name FROM information_schema.tables
             WHERE table_schema = ? AND table_type = 'BASE TABLE'",
        )
        .bind(&db)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| catalog_error(&format!("listing tables in {}", db), e))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("table_name")).collect())
    }

    async fn describe_table(&self, namespace: Option<&str>, table: &str) -> Result<TableDescriptor> {
        let db = self.resolve_db(namespace).await?;
        let rows = sqlx::query(
            "SELECT CAST(column_name AS CHAR) AS column_name,
                    CAST(column_type AS CHAR) AS declared_type,
                    CAST(column_key AS CHAR) AS column_key
             FROM information_schema.columns
             WHERE table_schema = ? AND table_name = ?
             ORDER BY ordinal_position",
        )
        .bind(&db)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| catalog_error(&format!("describing {}.{}", db, table), e))?;
        if rows.is_empty() {
            return Err(BackupError::TableVanished(table.to_string()));
        }
        let columns = rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.get("column_name"),
                declared_type: row.get("declared_type"),
                primary_key: row.get::<Option<String>, _>("column_key").as_deref() == Some("PRI"),
            })
            .collect();
        Ok(TableDescriptor {
            namespace: Some(db),
            name: table.to_string(),
            columns,
        })
    }

    async fn fetch_page(&self, table: &TableDescriptor, page: &PageRequest) -> Result<Vec<Row>> {
        let kind = DatabaseKind::Mysql;
        let classes: Vec<ValueClass> = table
            .columns
            .iter()
            .map(|c| ValueClass::from_declared_type(&c.declared_type))
            .collect();
        let select: Vec<String> = table
            .columns
            .iter()
            .zip(&classes)
            .map(|(c, class)| {
                let cast = match class {
                    ValueClass::Integer => "SIGNED",
                    ValueClass::Float => "DOUBLE",
                    // Raw bytes; a CHAR cast fails on anything that is not valid UTF-8.
                    ValueClass::Binary => return sql_ident(kind, &c.name),
                    ValueClass::Text | ValueClass::Other => "CHAR",
                };
                format!("CAST({} AS {})", sql_ident(kind, &c.name), cast)
            })
            .collect();
        let from = match &table.namespace {
            Some(db) => format!("{}.{}", sql_ident(kind, db), sql_ident(kind, &table.name)),
            None => sql_ident(kind, &table.name),
        };
        let sql = page_sql(&from, &select, page);
        debug!(table = %table.name, %sql, "fetching page");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| page_error(table, page, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(classes.len());
            for (i, class) in classes.iter().enumerate() {
                let value = match class {
                    ValueClass::Integer => row
                        .try_get::<Option<i64>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Integer)),
                    ValueClass::Float => row
                        .try_get::<Option<f64>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Float)),
                    ValueClass::Text => row
                        .try_get::<Option<String>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Text)),
                    ValueClass::Binary => row
                        .try_get::<Option<Vec<u8>>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Binary)),
                    ValueClass::Other => row
                        .try_get::<Option<String>, _>(i)
                        .map(|v| v.map_or(RowValue::Null, RowValue::Other)),
                }
                .map_err(|e| decode_error(table, page, &table.columns[i].name, e))?;
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ------------------- SQLite -------------------
pub struct SqliteAccessor {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl SqliteAccessor {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| BackupError::Connection(format!("SQLite: {}", e)))?;
        Ok(Self { pool })
    }
}

/// SQLite is dynamically typed: classify each value by its storage class
/// rather than by the column's declared type.
fn decode_sqlite_value(row: &sqlx::sqlite::SqliteRow, i: usize) -> std::result::Result<RowValue, sqlx::Error> {
    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(RowValue::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => RowValue::Integer(row.try_get(i)?),
        "REAL" | "FLOAT" | "DOUBLE" => RowValue::Float(row.try_get(i)?),
        "BLOB" => RowValue::Binary(row.try_get(i)?),
        _ => RowValue::Text(row.try_get(i)?),
    };
    Ok(value)
}

#[async_trait]
impl DumpSource for SqliteAccessor {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn default_namespace(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list_tables(&self, _namespace: Option<&str>) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| catalog_error("listing tables", e))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn describe_table(&self, _namespace: Option<&str>, table: &str) -> Result<TableDescriptor> {
        let rows = sqlx::query("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| catalog_error(&format!("describing {}", table), e))?;
        if rows.is_empty() {
            return Err(BackupError::TableVanished(table.to_string()));
        }
        let columns = rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.get("name"),
                declared_type: row.get("type"),
                primary_key: row.get::<i64, _>("pk") > 0,
            })
            .collect();
        Ok(TableDescriptor {
            namespace: None,
            name: table.to_string(),
            columns,
        })
    }

    async fn fetch_page(&self, table: &TableDescriptor, page: &PageRequest) -> Result<Vec<Row>> {
        let kind = DatabaseKind::Sqlite;
        let select: Vec<String> = table.columns.iter().map(|c| sql_ident(kind, &c.name)).collect();
        let sql = page_sql(&sql_ident(kind, &table.name), &select, page);
        debug!(table = %table.name, %sql, "fetching page");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| page_error(table, page, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let values = (0..table.columns.len())
                .map(|i| {
                    decode_sqlite_value(&row, i)
                        .map_err(|e| decode_error(table, page, &table.columns[i].name, e))
                })
                .collect::<Result<Row>>()?;
            out.push(values);
        }
        Ok(out)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
