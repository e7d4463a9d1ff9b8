mod cli;
mod error;
mod sync;

use crate::cli::{Cli, Commands, Selection, file_id};
use crate::error::{ErrorKind, Result};
use crate::sync::{SyncEvent, SyncOptions, compare_all, sync};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use siphon_config::Config;
use siphon_storage::backend::ReadOnlyFileSource;
use siphon_storage::{ConnectionStatus, FileSourceFile, FileSourceHandle};
use std::process::ExitCode;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Commands::Check { source } => check(&open(&config, &source)?).await,
        Commands::Ls { source, selection } => list(&open(&config, &source)?, &selection).await,
        Commands::Stat { source, id } => stat(&open(&config, &source)?, &id).await,
        Commands::Compare { from, to, selection } => {
            let (from, to) = (open(&config, &from)?, open(&config, &to)?);
            compare(&from, &to, &selection, config.batch_size).await
        },
        Commands::Sync { from, to, selection, force, dry_run, archive } => {
            let (mut from, mut to) = (open(&config, &from)?, open(&config, &to)?);
            if dry_run {
                tracing::warn!("Dry run: nothing will be written or moved");
                (from, to) = (read_only(from), read_only(to));
            }
            let options = SyncOptions {
                query: selection.query()?,
                force,
                archive: archive.as_deref().map(file_id).transpose()?,
                batch_size: config.batch_size,
            };
            run_sync(&from, &to, &options).await
        },
        Commands::Mv { source, from, to } => move_file(&open(&config, &source)?, &from, &to).await,
    }
}

fn open(config: &Config, name: &str) -> Result<FileSourceHandle> {
    config.build_source(name).or_raise(|| ErrorKind::Config)
}

fn read_only(source: FileSourceHandle) -> FileSourceHandle {
    Arc::new(ReadOnlyFileSource::new(source))
}

async fn connect(source: &FileSourceHandle) -> Result<()> {
    match source.open_connection().await.or_raise(|| ErrorKind::Connection(source.name().to_string()))? {
        ConnectionStatus::Open => Ok(()),
        status => exn::bail!(ErrorKind::Connection(format!("{} ({status})", source.name()))),
    }
}

async fn disconnect(source: &FileSourceHandle) {
    if let Err(e) = source.close_connection().await {
        tracing::warn!(source = source.name(), error = ?e, "Could not close connection");
    }
}

fn describe(file: &FileSourceFile) -> String {
    let produced = file.producer_modified.format(&Rfc3339).unwrap_or_else(|_| file.producer_modified.to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}",
        file.id,
        file.size,
        produced,
        if file.owner.is_empty() { "-" } else { file.owner.as_str() },
        file.mime_type.as_deref().unwrap_or("-"),
    )
}

async fn check(source: &FileSourceHandle) -> Result<()> {
    let opened = source.open_connection().await.or_raise(|| ErrorKind::Connection(source.name().to_string()))?;
    let closed = source.close_connection().await.or_raise(|| ErrorKind::Connection(source.name().to_string()))?;
    println!("{}: {opened} (now {closed})", source.name());
    match opened {
        ConnectionStatus::Open => Ok(()),
        status => exn::bail!(ErrorKind::Connection(format!("{} ({status})", source.name()))),
    }
}

async fn list(source: &FileSourceHandle, selection: &Selection) -> Result<()> {
    let query = selection.query()?;
    connect(source).await?;
    let mut files = source.find_files_stream(&query);
    let mut result = Ok(());
    while let Some(file) = files.next().await {
        match file {
            Ok(file) => println!("{}", describe(&file)),
            Err(e) => {
                result = Err(e.raise(ErrorKind::Listing(source.name().to_string())));
                break;
            },
        }
    }
    drop(files);
    disconnect(source).await;
    result
}

async fn stat(source: &FileSourceHandle, raw: &str) -> Result<()> {
    let id = file_id(raw)?;
    connect(source).await?;
    let found = source.find_file(&id).await.or_raise(|| ErrorKind::Listing(source.name().to_string()));
    disconnect(source).await;
    match found? {
        Some(file) => println!("{}", describe(&file)),
        None => println!("{id}: not present in {}", source.name()),
    }
    Ok(())
}

async fn compare(from: &FileSourceHandle, to: &FileSourceHandle, selection: &Selection, batch_size: usize) -> Result<()> {
    let query = selection.query()?;
    connect(from).await?;
    connect(to).await?;
    let files = from.find_files(&query).await.or_raise(|| ErrorKind::Listing(from.name().to_string()));
    let mut failed = 0;
    if let Ok(files) = &files {
        for (id, comparison) in compare_all(to, files.clone(), batch_size).await {
            match comparison {
                Ok(comparison) => println!("{id}\t{}\t{}", comparison.status, comparison.action()),
                Err(e) => {
                    failed += 1;
                    tracing::error!(%id, error = ?e, "Comparison failed");
                },
            }
        }
    }
    disconnect(from).await;
    disconnect(to).await;
    files?;
    match failed {
        0 => Ok(()),
        n => exn::bail!(ErrorKind::Incomplete(n)),
    }
}

async fn run_sync(from: &FileSourceHandle, to: &FileSourceHandle, options: &SyncOptions) -> Result<()> {
    connect(from).await?;
    connect(to).await?;
    let mut failed = 0;
    let mut fatal = None;
    let mut events = std::pin::pin!(sync(from, to, options));
    while let Some(event) = events.next().await {
        match event {
            Ok(SyncEvent::Started) => tracing::info!(from = from.name(), to = to.name(), "Sync started"),
            Ok(SyncEvent::DiscoveryComplete(total)) => tracing::info!(total, "Discovered files"),
            Ok(SyncEvent::Synced(outcome)) => {
                let archived = outcome.archived.as_ref().map(|id| format!("\tarchived to {id}")).unwrap_or_default();
                let verb = if outcome.transferred { "transferred" } else { "kept" };
                println!("{}\t{}\t{}\t{verb}{archived}", outcome.id, outcome.status, outcome.action);
            },
            Ok(SyncEvent::Complete) => tracing::info!(failed, "Sync complete"),
            Err(e) if matches!(&*e, ErrorKind::Listing(_)) => fatal = Some(e),
            Err(e) => {
                failed += 1;
                tracing::error!(error = ?e, "File failed to sync");
            },
        }
    }
    disconnect(from).await;
    disconnect(to).await;
    if let Some(e) = fatal {
        return Err(e);
    }
    match failed {
        0 => Ok(()),
        n => exn::bail!(ErrorKind::Incomplete(n)),
    }
}

async fn move_file(source: &FileSourceHandle, from: &str, to: &str) -> Result<()> {
    let (from, to) = (file_id(from)?, file_id(to)?);
    connect(source).await?;
    let result = async {
        let file = source
            .find_file(&from)
            .await
            .or_raise(|| ErrorKind::Move(from.to_string()))?
            .ok_or_raise(|| ErrorKind::Move(format!("{from} (not present)")))?;
        source.move_file(&file, &to).await.or_raise(|| ErrorKind::Move(from.to_string()))
    }
    .await;
    disconnect(source).await;
    println!("{}", describe(&result?));
    Ok(())
}
