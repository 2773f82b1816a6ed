// export/writer.rs
// Owns the dump artifact and appends statements to it

use crate::db::descriptor::DatabaseKind;
use crate::db::models::TableDescriptor;
use crate::error::{BackupError, Result};
use crate::export::statement::create_table_statement;
use futures::{Stream, StreamExt};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only writer for one backup run.
///
/// Statements are only ever written whole, and the buffer is flushed at every
/// table boundary, so a failure in a later table leaves earlier tables intact.
pub struct DumpWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    bytes_written: u64,
    rows_written: u64,
}

impl DumpWriter {
    /// Create (or truncate) the artifact, creating parent directories on demand.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        let file = File::create(path).map_err(|e| BackupError::write_failure(display(path), e))?;
        info!(path = %path.display(), "dump artifact created");
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            bytes_written: 0,
            rows_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// INSERT statements written so far, across all tables.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn append(&mut self, text: &str) -> Result<()> {
        let out = self.out.as_mut().ok_or_else(|| {
            BackupError::write_failure(
                display(&self.path),
                std::io::Error::new(std::io::ErrorKind::Other, "artifact already finalized"),
            )
        })?;
        out.write_all(text.as_bytes())
            .map_err(|e| BackupError::write_failure(display(&self.path), e))?;
        self.bytes_written += text.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            out.flush()
                .map_err(|e| BackupError::write_failure(display(&self.path), e))?;
        }
        Ok(())
    }

    /// `CREATE TABLE ...;` followed by a blank line.
    pub fn write_schema(&mut self, kind: DatabaseKind, table: &TableDescriptor) -> Result<()> {
        let stmt = create_table_statement(kind, table);
        self.append(&stmt)?;
        self.append("\n\n")
    }

    /// Append every statement on its own line, then the blank separator that ends
    /// the table's block.
    ///
    /// A failing source stops the table: statements already written stay, the
    /// block is closed and flushed, and the source error is returned. A failing
    /// write is returned immediately.
    pub async fn write_rows<S>(&mut self, table: &str, rows: S) -> Result<u64>
    where
        S: Stream<Item = Result<String>>,
    {
        futures::pin_mut!(rows);
        let mut count = 0u64;
        let mut source_error = None;
        while let Some(item) = rows.next().await {
            match item {
                Ok(stmt) => {
                    self.append(&stmt)?;
                    self.append("\n")?;
                    count += 1;
                    self.rows_written += 1;
                }
                Err(e) => {
                    source_error = Some(e);
                    break;
                }
            }
        }
        self.append("\n")?;
        self.flush()?;
        debug!(table, rows = count, "table block flushed");
        match source_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Flush and release the file. Calling it again is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .map_err(|e| BackupError::write_failure(display(&self.path), e))?;
            out.get_ref()
                .sync_all()
                .map_err(|e| BackupError::write_failure(display(&self.path), e))?;
            info!(path = %self.path.display(), bytes = self.bytes_written, "dump artifact finalized");
        }
        Ok(())
    }
}

/// Create `dir` and its parents with the platform's default permissions.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| BackupError::write_failure(display(dir), e))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ColumnDescriptor;
    use futures::stream;

    fn table(name: &str) -> TableDescriptor {
        TableDescriptor {
            namespace: None,
            name: name.into(),
            columns: vec![ColumnDescriptor::new("id", "INTEGER")],
        }
    }

    #[tokio::test]
    async fn writes_schema_rows_and_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/dump.sql");
        let mut writer = DumpWriter::create(&path).unwrap();
        writer.write_schema(DatabaseKind::Sqlite, &table("t")).unwrap();
        let rows = stream::iter(vec![
            Ok("INSERT INTO t VALUES (1);".to_string()),
            Ok("INSERT INTO t VALUES (2);".to_string()),
        ]);
        assert_eq!(writer.write_rows("t", rows).await.unwrap(), 2);
        writer.finish().unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "CREATE TABLE \"t\" (\"id\" INTEGER);\n\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n\n"
        );
        assert_eq!(writer.bytes_written(), text.len() as u64);
    }

    #[tokio::test]
    async fn source_error_keeps_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        let mut writer = DumpWriter::create(&path).unwrap();
        let rows = stream::iter(vec![
            Ok("INSERT INTO t VALUES (1);".to_string()),
            Err(BackupError::PageFetch {
                table: "t".into(),
                offset: 1,
                reason: "reset".into(),
            }),
            Ok("INSERT INTO t VALUES (3);".to_string()),
        ]);
        let err = writer.write_rows("t", rows).await.unwrap_err();
        assert!(matches!(err, BackupError::PageFetch { .. }));
        assert_eq!(writer.rows_written(), 1);

        // Flushed at the table boundary, before finish.
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "INSERT INTO t VALUES (1);\n\n");
        writer.finish().unwrap();
    }

    #[test]
    fn unwritable_destination_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let err = DumpWriter::create(&blocker.join("dump.sql")).err().unwrap();
        assert!(matches!(err, BackupError::WriteFailure { .. }));
    }

    #[test]
    fn writing_after_finish_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DumpWriter::create(&dir.path().join("dump.sql")).unwrap();
        writer.finish().unwrap();
        let err = writer.write_schema(DatabaseKind::Sqlite, &table("t")).unwrap_err();
        assert!(matches!(err, BackupError::WriteFailure { .. }));
    }
}
