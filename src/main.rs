// src/main.rs
mod app;
mod config;
mod db;
mod error;
mod export;
mod logging;

use anyhow::{Context, Result};
use app::theme::Theme;
use app::tui::run_tui;
use chrono::Local;
use clap::{Parser, Subcommand};
use config::{Config, TableErrorPolicy};
use db::accessors::{self, ConnectOptions};
use db::descriptor::{ConnectionDescriptor, DatabaseKind};
use export::orchestrator::{run_backup, BackupOptions, BackupReport};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sauv", author, version, about = "Dump a database into a replayable SQL file", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Configuration file (defaults to ~/.sauv/config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up one database into a SQL file
    Backup {
        /// Source connection URL (postgres://, mysql://, sqlite://)
        #[arg(long)]
        source: String,
        /// Output file; defaults to <backup_dir>/<db>_<timestamp>.sql
        #[arg(long)]
        destination: Option<PathBuf>,
        /// Require the source URL to be of this kind
        #[arg(long, value_enum)]
        db_type: Option<DatabaseKind>,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        page_size: Option<u64>,
        #[arg(long, value_enum)]
        on_table_error: Option<TableErrorPolicy>,
        #[arg(long)]
        connect_retries: Option<u32>,
        /// Page through each table in primary-key order
        #[arg(long, default_value_t = false)]
        stable_order: bool,
        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the tables and columns a backup would export
    Tables {
        #[arg(long)]
        source: String,
        #[arg(long, value_enum)]
        db_type: Option<DatabaseKind>,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Interactive backup wizard
    Tui,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Tui => {
            // The wizard owns the terminal; log to the file only.
            logging::init(&cli.log_level, Some(&config.log_dir), false);
            let theme = if std::env::var_os("NO_COLOR").is_some() {
                Theme::plain()
            } else {
                Theme::default()
            };
            run_tui(&config, &theme).await?;
        }
        Command::Tables { source, db_type, schema } => {
            logging::init(&cli.log_level, Some(&config.log_dir), true);
            if let Err(e) = list_tables(&config, &source, db_type, schema.as_deref()).await {
                eprintln!("sauv: {}", e);
                std::process::exit(1);
            }
        }
        Command::Backup {
            source,
            destination,
            db_type,
            schema,
            page_size,
            on_table_error,
            connect_retries,
            stable_order,
            json,
        } => {
            if let Some(n) = page_size {
                config.page_size = n;
            }
            if let Some(policy) = on_table_error {
                config.on_table_error = policy;
            }
            if let Some(n) = connect_retries {
                config.connect_retries = n;
            }
            if schema.is_some() {
                config.namespace = schema;
            }
            config.stable_order |= stable_order;
            config.validate()?;

            let log_file = logging::init(&cli.log_level, Some(&config.log_dir), true);
            if let Some(path) = log_file {
                info!(path = %path.display(), "logging to file");
            }

            match backup(&config, &source, destination, db_type).await {
                Ok(report) => print_report(&report, json)?,
                Err(e) => {
                    eprintln!("sauv: backup failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn backup(
    config: &Config,
    source: &str,
    destination: Option<PathBuf>,
    db_type: Option<DatabaseKind>,
) -> error::Result<BackupReport> {
    let destination = match destination {
        Some(path) => path,
        None => {
            let descriptor = ConnectionDescriptor::parse(source)?;
            config.default_destination(&descriptor, Local::now())
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    let mut options = BackupOptions::from_config(config);
    options.kind = db_type;
    run_backup(source, &destination, options, cancel).await
}

async fn list_tables(
    config: &Config,
    source: &str,
    db_type: Option<DatabaseKind>,
    schema: Option<&str>,
) -> error::Result<()> {
    let descriptor = match db_type {
        Some(kind) => ConnectionDescriptor::parse_for(source, kind)?,
        None => ConnectionDescriptor::parse(source)?,
    };
    let options = ConnectOptions {
        max_connections: config.max_connections,
    };
    let db = accessors::connect(&descriptor, &options).await?;

    let result = async {
        let namespace = match schema.map(str::to_string).or_else(|| config.namespace.clone()) {
            Some(ns) => Some(ns),
            None => db.default_namespace().await?,
        };
        let tables = db.list_tables(namespace.as_deref()).await?;
        println!("{} tables in {}", tables.len(), namespace.as_deref().unwrap_or(descriptor.kind().as_str()));
        for name in tables {
            let table = db.describe_table(namespace.as_deref(), &name).await?;
            println!("{}", table.name);
            for column in &table.columns {
                let pk = if column.primary_key { " (pk)" } else { "" };
                println!("  {} {}{}", column.name, column.declared_type, pk);
            }
        }
        Ok::<(), error::BackupError>(())
    }
    .await;
    db.close().await;
    result
}

fn print_report(report: &BackupReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Backup written to {}", report.destination.display());
    for table in &report.tables {
        println!("  {:<32} {:>10} rows", table.name, table.rows);
    }
    for skipped in &report.skipped {
        println!(
            "  {:<32} skipped after {} rows: {}",
            skipped.name, skipped.rows_written, skipped.error
        );
    }
    println!(
        "{} tables, {} rows, {} bytes",
        report.tables.len(),
        report.total_rows(),
        report.bytes_written
    );
    Ok(())
}
