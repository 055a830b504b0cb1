use std::process::ExitCode;

use clap::Parser;

use namefix::cli::{Cli, Commands, ConfigCommands, DirCommands};
use namefix::config::{ConfigPatch, ConfigStore};
use namefix::events::{FileEventKind, ServiceEvent};
use namefix::service::NamefixService;
use namefix::{bridge, log_event, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("namefix: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { dry_run, dirs } => {
            logging::init("warn,namefix=info");
            let mut overrides = ConfigPatch::default();
            if dry_run {
                overrides.dry_run = Some(true);
            }
            if !dirs.is_empty() {
                overrides.watch_dirs = Some(dirs);
            }
            let service = NamefixService::init(Some(overrides)).await?;

            // Narrate pipeline outcomes to the terminal.
            let _subscription = service.on(|event| match event {
                ServiceEvent::File(file) => match &file.kind {
                    FileEventKind::Preview { target } => {
                        log_event!("file", "preview", "{} -> {target}", file.file);
                    }
                    FileEventKind::Applied { target } => {
                        log_event!("file", "applied", "{} -> {target}", file.file);
                    }
                    FileEventKind::Skipped { message } => {
                        log_event!("file", "skipped", "{} ({message})", file.file);
                    }
                    FileEventKind::Error { message } => {
                        tracing::error!("[file] {}: {message}", file.file);
                    }
                    FileEventKind::Converted { format } => {
                        log_event!("file", "converted", "{} -> {format}", file.file);
                    }
                    FileEventKind::ConvertError { message } => {
                        tracing::error!("[file] conversion of {} failed: {message}", file.file);
                    }
                    FileEventKind::Trashed => {
                        log_event!("file", "trashed", "{}", file.file);
                    }
                },
                ServiceEvent::Toast(toast) => {
                    tracing::warn!("[toast] {}", toast.message);
                }
                _ => {}
            });

            let status = service.start().await?;
            if status.directories.is_empty() {
                eprintln!("namefix: no directories configured; add one with `namefix dirs add <DIR>`");
            }
            tokio::signal::ctrl_c().await?;
            service.stop().await?;
        }
        Commands::Serve => {
            logging::init("warn");
            let service = NamefixService::init(None).await?;
            service.start().await?;
            bridge::serve(service).await?;
        }
        Commands::Undo => {
            logging::init("warn");
            let service = NamefixService::init(None).await?;
            let outcome = service.undo_last().await;
            if outcome.ok {
                println!("undone");
            } else {
                let reason = outcome.reason.unwrap_or_else(|| "unknown".into());
                println!("nothing undone: {reason}");
            }
        }
        Commands::Config { command } => {
            logging::init("warn");
            let store = ConfigStore::at_default_location();
            match command {
                ConfigCommands::Show => {
                    let config = store.get().await?;
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                ConfigCommands::Path => {
                    println!("{}", store.path().display());
                }
            }
        }
        Commands::Dirs { command } => {
            logging::init("warn");
            let service = NamefixService::init(None).await?;
            let dirs = match command {
                DirCommands::List => service.list_directories().await?,
                DirCommands::Add { directory } => service.add_watch_dir(&directory).await?,
                DirCommands::Remove { directory } => service.remove_watch_dir(&directory).await?,
            };
            for dir in dirs {
                println!("{dir}");
            }
        }
    }
    Ok(())
}
