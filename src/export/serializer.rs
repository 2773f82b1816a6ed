// export/serializer.rs
// Streams a table's rows as INSERT statements, one offset window at a time.

use crate::db::accessors::DumpSource;
use crate::db::models::{PageRequest, TableDescriptor};
use crate::error::{BackupError, Result};
use crate::export::statement::insert_statement;
use async_stream::try_stream;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct SerializeOptions {
    pub page_size: u64,
    /// Order pages by primary key (or every column) instead of the source's
    /// natural order. Without it, offset paging is not stable under concurrent
    /// writes to the table.
    pub stable_order: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            stable_order: false,
        }
    }
}

fn ordering_positions(table: &TableDescriptor) -> Vec<usize> {
    let pk = table.primary_key_positions();
    if pk.is_empty() {
        (1..=table.columns.len()).collect()
    } else {
        pk
    }
}

/// Lazily produce one `INSERT` per source row.
///
/// The stream is finite and stops after the first page holding fewer rows than
/// `page_size`, so a table whose row count is an exact multiple of the page size
/// costs one extra empty fetch. Re-invoking with the same arguments restarts from
/// offset zero; a stream cannot be resumed mid-table. Cancellation is checked
/// before each page, never inside one.
pub fn dump_table<'a>(
    source: &'a dyn DumpSource,
    table: &'a TableDescriptor,
    options: &SerializeOptions,
    cancel: CancellationToken,
) -> BoxStream<'a, Result<String>> {
    let kind = source.kind();
    let page_size = options.page_size.max(1);
    let order_by = if options.stable_order {
        ordering_positions(table)
    } else {
        Vec::new()
    };
    if order_by.is_empty() {
        debug!(table = %table.name, "paging in natural order");
    }

    Box::pin(try_stream! {
        let mut offset = 0u64;
        loop {
            if cancel.is_cancelled() {
                warn!(table = %table.name, offset, "cancelled between pages");
                Err::<(), _>(BackupError::Cancelled)?;
            }
            let page = PageRequest {
                limit: page_size,
                offset,
                order_by: order_by.clone(),
            };
            let rows = source.fetch_page(table, &page).await?;
            let fetched = rows.len() as u64;
            debug!(table = %table.name, offset, rows = fetched, "page fetched");

            for row in &rows {
                if row.len() != table.columns.len() {
                    Err::<(), _>(BackupError::PageFetch {
                        table: table.name.clone(),
                        offset,
                        reason: format!(
                            "row has {} values but table has {} columns",
                            row.len(),
                            table.columns.len()
                        ),
                    })?;
                }
                yield insert_statement(kind, &table.name, row);
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::descriptor::DatabaseKind;
    use crate::db::models::{ColumnDescriptor, Row, RowValue};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory source: each table is `(name, row_count)` of `(id, name)` rows.
    /// Tables in `vanished` are listed but cannot be described; tables in
    /// `unreadable` are listed but their catalog query fails.
    pub(crate) struct FakeSource {
        pub tables: Vec<(String, u64)>,
        pub vanished: Vec<String>,
        pub unreadable: Vec<String>,
        pub fail_listing: bool,
        pub closed: AtomicBool,
        pub fetches: AtomicUsize,
        pub requests: Mutex<Vec<PageRequest>>,
        pub fail_at_offset: Option<u64>,
        pub cancel_after_fetch: Option<CancellationToken>,
    }

    impl FakeSource {
        pub fn new(tables: &[(&str, u64)]) -> Self {
            Self {
                tables: tables.iter().map(|(n, r)| (n.to_string(), *r)).collect(),
                vanished: Vec::new(),
                unreadable: Vec::new(),
                fail_listing: false,
                closed: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail_at_offset: None,
                cancel_after_fetch: None,
            }
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn users_table(name: &str) -> TableDescriptor {
        let mut id = ColumnDescriptor::new("id", "integer");
        id.primary_key = true;
        TableDescriptor {
            namespace: None,
            name: name.to_string(),
            columns: vec![id, ColumnDescriptor::new("name", "text")],
        }
    }

    #[async_trait]
    impl DumpSource for FakeSource {
        fn kind(&self) -> DatabaseKind {
            DatabaseKind::Postgres
        }

        async fn default_namespace(&self) -> Result<Option<String>> {
            Ok(None)
        }

        async fn list_tables(&self, _namespace: Option<&str>) -> Result<Vec<String>> {
            if self.fail_listing {
                return Err(BackupError::CatalogUnavailable("listing tables: connection reset".into()));
            }
            Ok(self
                .tables
                .iter()
                .map(|(n, _)| n.clone())
                .chain(self.vanished.iter().cloned())
                .chain(self.unreadable.iter().cloned())
                .collect())
        }

        async fn describe_table(&self, _namespace: Option<&str>, table: &str) -> Result<TableDescriptor> {
            if self.unreadable.iter().any(|n| n == table) {
                return Err(BackupError::CatalogUnavailable(format!("describing {}: connection reset", table)));
            }
            if self.tables.iter().any(|(n, _)| n == table) {
                Ok(users_table(table))
            } else {
                Err(BackupError::TableVanished(table.to_string()))
            }
        }

        async fn fetch_page(&self, table: &TableDescriptor, page: &PageRequest) -> Result<Vec<Row>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(page.clone());
            if let Some(token) = &self.cancel_after_fetch {
                token.cancel();
            }
            if self.fail_at_offset == Some(page.offset) {
                return Err(BackupError::PageFetch {
                    table: table.name.clone(),
                    offset: page.offset,
                    reason: "connection reset by peer".into(),
                });
            }
            let total = self
                .tables
                .iter()
                .find(|(n, _)| *n == table.name)
                .map(|(_, r)| *r)
                .unwrap_or(0);
            let start = page.offset.min(total);
            let end = (page.offset + page.limit).min(total);
            Ok((start..end)
                .map(|i| {
                    vec![
                        RowValue::Integer(i as i64),
                        RowValue::Text(format!("user'{}", i)),
                    ]
                })
                .collect())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn collect(
        source: &FakeSource,
        table: &TableDescriptor,
        options: &SerializeOptions,
        cancel: CancellationToken,
    ) -> (Vec<String>, Option<BackupError>) {
        let mut stream = dump_table(source, table, options, cancel);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(stmt) => out.push(stmt),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    fn paged(page_size: u64) -> SerializeOptions {
        SerializeOptions {
            page_size,
            stable_order: false,
        }
    }

    #[tokio::test]
    async fn empty_table_issues_one_fetch() {
        let source = FakeSource::new(&[("users", 0)]);
        let (stmts, err) = collect(&source, &users_table("users"), &paged(100), CancellationToken::new()).await;
        assert!(err.is_none());
        assert!(stmts.is_empty());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn short_table_issues_one_fetch() {
        let source = FakeSource::new(&[("users", 99)]);
        let (stmts, _) = collect(&source, &users_table("users"), &paged(100), CancellationToken::new()).await;
        assert_eq!(stmts.len(), 99);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn exact_multiple_needs_extra_empty_page() {
        let source = FakeSource::new(&[("users", 200)]);
        let (stmts, err) = collect(&source, &users_table("users"), &paged(100), CancellationToken::new()).await;
        assert!(err.is_none());
        assert_eq!(stmts.len(), 200);
        // [0,100) full, [100,200) full, [200,200) empty -> stop.
        assert_eq!(source.fetch_count(), 3);
        let offsets: Vec<u64> = source.requests.lock().unwrap().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn statements_are_one_row_each_and_escaped() {
        let source = FakeSource::new(&[("users", 2)]);
        let (stmts, _) = collect(&source, &users_table("users"), &paged(100), CancellationToken::new()).await;
        assert_eq!(
            stmts,
            vec![
                "INSERT INTO \"users\" VALUES (0, 'user''0');".to_string(),
                "INSERT INTO \"users\" VALUES (1, 'user''1');".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn restart_reproduces_the_same_sequence() {
        let source = FakeSource::new(&[("users", 250)]);
        let table = users_table("users");
        let (first, _) = collect(&source, &table, &paged(100), CancellationToken::new()).await;
        let (second, _) = collect(&source, &table, &paged(100), CancellationToken::new()).await;
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 6);
    }

    #[tokio::test]
    async fn stable_order_uses_primary_key() {
        let source = FakeSource::new(&[("users", 5)]);
        let options = SerializeOptions {
            page_size: 100,
            stable_order: true,
        };
        collect(&source, &users_table("users"), &options, CancellationToken::new()).await;
        assert_eq!(source.requests.lock().unwrap()[0].order_by, vec![1]);
    }

    #[test]
    fn stable_order_without_primary_key_uses_every_column() {
        let mut table = users_table("t");
        table.columns[0].primary_key = false;
        assert_eq!(ordering_positions(&table), vec![1, 2]);
    }

    #[tokio::test]
    async fn fetch_error_keeps_earlier_statements() {
        let mut source = FakeSource::new(&[("users", 250)]);
        source.fail_at_offset = Some(100);
        let (stmts, err) = collect(&source, &users_table("users"), &paged(100), CancellationToken::new()).await;
        assert_eq!(stmts.len(), 100);
        assert!(matches!(err, Some(BackupError::PageFetch { offset: 100, .. })));
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_pages() {
        let token = CancellationToken::new();
        let mut source = FakeSource::new(&[("users", 250)]);
        source.cancel_after_fetch = Some(token.clone());
        let (stmts, err) = collect(&source, &users_table("users"), &paged(100), token).await;
        // The first page completes whole; the second is never requested.
        assert_eq!(stmts.len(), 100);
        assert_eq!(source.fetch_count(), 1);
        assert!(matches!(err, Some(BackupError::Cancelled)));
    }
}
