// export/orchestrator.rs
// Sequences a backup run: connect, list tables, dump each table, close.

use crate::config::{Config, TableErrorPolicy};
use crate::db::accessors::{self, ConnectOptions, DumpSource};
use crate::db::descriptor::{ConnectionDescriptor, DatabaseKind};
use crate::error::{BackupError, Result};
use crate::export::serializer::{dump_table, SerializeOptions};
use crate::export::writer::{ensure_dir, DumpWriter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one run. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackupState {
    Idle,
    Connecting,
    Listing,
    SchemaDump,
    DataDump,
    Closing,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// When set, the descriptor's scheme must name this kind.
    pub kind: Option<DatabaseKind>,
    pub namespace: Option<String>,
    pub serialize: SerializeOptions,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub retry_backoff: Duration,
    pub on_table_error: TableErrorPolicy,
}

impl BackupOptions {
    pub fn from_config(config: &Config) -> Self {
        BackupOptions {
            kind: None,
            namespace: config.namespace.clone(),
            serialize: SerializeOptions {
                page_size: config.page_size,
                stable_order: config.stable_order,
            },
            max_connections: config.max_connections,
            connect_retries: config.connect_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            on_table_error: config.on_table_error,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TableReport {
    pub name: String,
    pub rows: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SkippedTable {
    pub name: String,
    pub error: String,
    /// INSERTs already in the artifact for this table when it failed.
    pub rows_written: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct BackupReport {
    pub destination: PathBuf,
    pub database_kind: Option<DatabaseKind>,
    pub tables: Vec<TableReport>,
    pub skipped: Vec<SkippedTable>,
    pub bytes_written: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BackupReport {
    fn new(destination: &Path) -> Self {
        BackupReport {
            destination: destination.to_path_buf(),
            database_kind: None,
            tables: Vec::new(),
            skipped: Vec::new(),
            bytes_written: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

pub struct BackupOrchestrator {
    options: BackupOptions,
    cancel: CancellationToken,
    state: BackupState,
}

impl BackupOrchestrator {
    pub fn new(options: BackupOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
            state: BackupState::Idle,
        }
    }

    /// Share a token the caller can trip (e.g. on Ctrl-C). It is checked between
    /// tables and between pages.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    fn transition(&mut self, next: BackupState) {
        info!(from = ?self.state, to = ?next, "backup state");
        self.state = next;
    }

    /// Run a full backup of `url` into `destination`.
    pub async fn run(&mut self, url: &str, destination: &Path) -> Result<BackupReport> {
        let descriptor = match self.options.kind {
            Some(kind) => ConnectionDescriptor::parse_for(url, kind),
            None => ConnectionDescriptor::parse(url),
        }
        .inspect_err(|_| self.state = BackupState::Failed)?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).inspect_err(|_| self.state = BackupState::Failed)?;
        }

        self.transition(BackupState::Connecting);
        let source = match self.connect_with_retry(&descriptor).await {
            Ok(source) => source,
            Err(e) => {
                error!(error = %e, "connecting failed");
                self.transition(BackupState::Failed);
                return Err(e);
            }
        };
        self.run_with_source(source.as_ref(), destination).await
    }

    async fn connect_with_retry(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DumpSource>> {
        let options = ConnectOptions {
            max_connections: self.options.max_connections,
        };
        let mut attempt = 0u32;
        loop {
            match accessors::connect(descriptor, &options).await {
                Ok(source) => {
                    info!(kind = %descriptor.kind(), "connected");
                    return Ok(source);
                }
                Err(BackupError::Connection(reason)) if attempt < self.options.connect_retries => {
                    attempt += 1;
                    warn!(attempt, retries = self.options.connect_retries, %reason, "connect failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
                        _ = tokio::time::sleep(self.options.retry_backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Everything after `Connecting`, against an already open source. The source
    /// is closed and the artifact finalized on every path.
    pub async fn run_with_source(&mut self, source: &dyn DumpSource, destination: &Path) -> Result<BackupReport> {
        let mut report = BackupReport::new(destination);
        report.database_kind = Some(source.kind());

        let mut writer = match DumpWriter::create(destination) {
            Ok(writer) => writer,
            Err(e) => {
                self.transition(BackupState::Closing);
                source.close().await;
                self.transition(BackupState::Failed);
                return Err(e);
            }
        };

        let outcome = self.export(source, &mut writer, &mut report).await;

        self.transition(BackupState::Closing);
        source.close().await;
        report.bytes_written = writer.bytes_written();
        let finalized = writer.finish();
        report.finished_at = Some(Utc::now());

        // A finalize error never hides the error that ended the run.
        match outcome.and(finalized) {
            Ok(()) => {
                self.transition(BackupState::Done);
                info!(
                    tables = report.tables.len(),
                    skipped = report.skipped.len(),
                    rows = report.total_rows(),
                    "backup complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "backup failed");
                self.transition(BackupState::Failed);
                Err(e)
            }
        }
    }

    async fn export(&mut self, source: &dyn DumpSource, writer: &mut DumpWriter, report: &mut BackupReport) -> Result<()> {
        self.transition(BackupState::Listing);
        let namespace = match &self.options.namespace {
            Some(ns) => Some(ns.clone()),
            None => source.default_namespace().await?,
        };
        let tables = source.list_tables(namespace.as_deref()).await?;
        info!(count = tables.len(), namespace = ?namespace, "tables listed");

        for name in tables {
            let rows_before = writer.rows_written();
            match self.export_table(source, writer, namespace.as_deref(), &name).await {
                Ok(rows) => {
                    info!(table = %name, rows, "table exported");
                    report.tables.push(TableReport { name, rows });
                }
                Err(e) if self.options.on_table_error == TableErrorPolicy::Skip && e.is_table_scoped() => {
                    let rows_written = writer.rows_written() - rows_before;
                    warn!(table = %name, error = %e, rows_written, "table skipped");
                    report.skipped.push(SkippedTable {
                        name,
                        error: e.to_string(),
                        rows_written,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn export_table(
        &mut self,
        source: &dyn DumpSource,
        writer: &mut DumpWriter,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<u64> {
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        self.transition(BackupState::SchemaDump);
        let table = source.describe_table(namespace, name).await?;
        writer.write_schema(source.kind(), &table)?;

        self.transition(BackupState::DataDump);
        let rows = dump_table(source, &table, &self.options.serialize, self.cancel.clone());
        writer.write_rows(&table.name, rows).await
    }
}

/// Back up `url` into `destination`. The whole engine behind one call; `cancel`
/// may be tripped from elsewhere to stop between pages.
pub async fn run_backup(
    url: &str,
    destination: &Path,
    options: BackupOptions,
    cancel: CancellationToken,
) -> Result<BackupReport> {
    let mut orchestrator = BackupOrchestrator::new(options).with_cancellation(cancel);
    let result = orchestrator.run(url, destination).await;
    debug!(state = ?orchestrator.state(), "backup run finished");
    result
}
