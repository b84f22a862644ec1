//! oxide-snapshot CLI
//!
//! Command-line tool for taking a database snapshot.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_snapshot::prelude::*;

/// Copy a database schema and sample data into a portable embedded snapshot.
#[derive(Parser)]
#[command(name = "oxide-snapshot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file. Flags override its values.
    #[arg(short, long, env = "SNAPSHOT_CONFIG")]
    config: Option<PathBuf>,

    /// Source database type (postgresql, sqlite).
    #[arg(long)]
    source_type: Option<String>,

    /// Source database host.
    #[arg(long)]
    source_host: Option<String>,

    /// Source database port.
    #[arg(long)]
    source_port: Option<u16>,

    /// Source database name.
    #[arg(long)]
    source_database: Option<String>,

    /// Source database user.
    #[arg(long)]
    source_username: Option<String>,

    /// Source database password.
    #[arg(long, env = "SNAPSHOT_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    /// Source connection URL, used instead of host/port/database.
    #[arg(long, env = "SNAPSHOT_SOURCE_URL", hide_env_values = true)]
    source_url: Option<String>,

    /// Target file (database file, or script file for the script target).
    #[arg(long)]
    target_file: Option<PathBuf>,

    /// Target type (sqlite, script).
    #[arg(long)]
    target_type: Option<String>,

    /// Tables to include, comma separated.
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Table patterns to exclude, comma separated (`*` and `?` wildcards).
    #[arg(long, value_delimiter = ',')]
    exclude_tables: Vec<String>,

    /// Rows per page.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum rows per table.
    #[arg(long)]
    max_rows: Option<u64>,

    /// Abort on the first table failure.
    #[arg(long)]
    exit_on_error: bool,

    /// Print the generated SQL script to stdout instead of writing the target.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Print the run result as JSON.
    #[arg(long)]
    output_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut MigrationConfig) {
        let source = &mut config.source;
        if let Some(kind) = &self.source_type {
            source.r#type.clone_from(kind);
        }
        if self.source_host.is_some() {
            source.host.clone_from(&self.source_host);
        }
        if self.source_port.is_some() {
            source.port = self.source_port;
        }
        if self.source_database.is_some() {
            source.database.clone_from(&self.source_database);
        }
        if self.source_username.is_some() {
            source.username.clone_from(&self.source_username);
        }
        if self.source_password.is_some() {
            source.password.clone_from(&self.source_password);
        }
        if self.source_url.is_some() {
            source.url.clone_from(&self.source_url);
        }

        let target = &mut config.target;
        if let Some(kind) = &self.target_type {
            target.r#type.clone_from(kind);
        }
        if target.r#type.is_empty() {
            target.r#type = "sqlite".to_string();
        }
        if self.target_file.is_some() {
            target.file.clone_from(&self.target_file);
        }

        let migration = &mut config.migration;
        if !self.tables.is_empty() {
            migration.tables.clone_from(&self.tables);
        }
        if !self.exclude_tables.is_empty() {
            migration.exclude_tables.clone_from(&self.exclude_tables);
        }
        if let Some(batch_size) = self.batch_size {
            migration.batch_size = batch_size;
        }
        if self.max_rows.is_some() {
            migration.data.max_rows = self.max_rows;
        }
        if self.exit_on_error {
            config.output.fail_fast = true;
        }

        if self.dry_run {
            let dialect = match config.target.kind().as_str() {
                "script" => config.target.dialect.clone(),
                other => Some(other.to_string()),
            };
            config.target = DatabaseConfig {
                dialect,
                ..DatabaseConfig::new("script")
            };
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => MigrationConfig::load(path),
        None => Ok(MigrationConfig::default()),
    };

    // Setup logging; stdout is reserved for scripts and JSON results
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        loaded
            .as_ref()
            .ok()
            .and_then(|c| Level::from_str(&c.output.log_level).ok())
            .unwrap_or(Level::INFO)
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = loaded?;
    cli.apply(&mut config);

    if cli.dry_run {
        info!("Dry run mode - SQL will be printed but not executed.");
    }

    let result = MigrationEngine::new(config).run().await;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else if result.success {
        eprintln!("✓ {}", result.message);
    } else {
        eprintln!("✗ {}", result.message);
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
