use crate::config::Config;
use crate::db::descriptor::ConnectionDescriptor;
use crate::export::orchestrator::{run_backup, BackupOptions};
use anyhow::{Result, anyhow};
use chrono::Local;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Runs a backup for the values collected by the wizard, using the same
/// orchestrator as the `backup` command.
/// Returns Ok(msg) on success, or Err(error) with context on failure.
pub async fn tui_export_flow(state: &super::tui::TuiState, config: &Config) -> Result<String> {
    let source_url = state.source_url.trim();
    if source_url.is_empty() {
        return Err(anyhow!("You must provide a database URL"));
    }
    let descriptor = ConnectionDescriptor::parse(source_url)?;

    let destination = resolve_destination(state, config, &descriptor);

    let mut options = BackupOptions::from_config(config);
    if !state.schema.trim().is_empty() {
        options.namespace = Some(state.schema.trim().to_string());
    }

    let report = run_backup(descriptor.url(), &destination, options, CancellationToken::new()).await?;

    let mut msg = format!(
        "Backup completed: {} tables, {} rows written to {}",
        report.tables.len(),
        report.total_rows(),
        report.destination.display()
    );
    for skipped in &report.skipped {
        msg.push_str(&format!(
            "\nSkipped {} after {} rows: {}",
            skipped.name, skipped.rows_written, skipped.error
        ));
    }
    Ok(msg)
}

pub fn resolve_destination(state: &super::tui::TuiState, config: &Config, descriptor: &ConnectionDescriptor) -> PathBuf {
    let typed = state.destination.trim();
    if typed.is_empty() {
        config.default_destination(descriptor, Local::now())
    } else {
        PathBuf::from(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tui::TuiState;

    #[test]
    fn empty_destination_falls_back_to_backup_dir() {
        let config = Config {
            backup_dir: PathBuf::from("/srv/dumps"),
            ..Config::default()
        };
        let state = TuiState::default();
        let descriptor = ConnectionDescriptor::parse("postgres://localhost/shop").unwrap();
        let path = resolve_destination(&state, &config, &descriptor);
        assert!(path.starts_with("/srv/dumps"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("shop_"));
    }

    #[tokio::test]
    async fn empty_url_is_rejected() {
        let err = tui_export_flow(&TuiState::default(), &Config::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database URL"));
    }
}
