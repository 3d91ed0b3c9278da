//! repodeck CLI.
//!
//! Runs one store operation against a repository and prints the result as
//! pretty JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;

use repodeck::core::diff::number_lines;
use repodeck::core::types::FileChange;
use repodeck::error::StoreError;
use repodeck::exit_codes;
use repodeck::io::config::{self, Config, DEFAULT_CONFIG_FILE};
use repodeck::io::repo;
use repodeck::logging;
use repodeck::store::{DEFAULT_BRANCH, DEFAULT_REMOTE, RepoStore};

#[derive(Debug, Parser)]
#[command(
    name = "repodeck",
    version,
    about = "Drive version-control executors and watchers for a repository"
)]
struct Cli {
    /// Config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Repository (or any path inside it).
    #[arg(short = 'C', long = "repo", global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh and print the working-tree status.
    Status,
    /// Print recent commits, newest first.
    Log {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print the diff hunks for one file.
    Diff {
        file: String,
        /// Include old/new line numbers for every line.
        #[arg(long)]
        numbered: bool,
    },
    Stage {
        file: String,
    },
    Unstage {
        file: String,
    },
    StageAll,
    UnstageAll,
    AddUntracked {
        file: String,
    },
    AddAllUntracked,
    Commit {
        #[arg(short, long)]
        message: String,
        /// Files to commit; all staged changes when empty.
        files: Vec<String>,
    },
    Push {
        #[arg(long, default_value = DEFAULT_REMOTE)]
        remote: String,
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,
    },
    Pull {
        #[arg(long, default_value = DEFAULT_REMOTE)]
        remote: String,
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,
    },
    /// Initialize a repository at the given path.
    Init,
    FileTree,
    /// Suggest a commit message for the staged changes (all changes if none staged).
    SuggestMessage,
    /// Stream watcher records and status updates until the watcher exits.
    Watch,
    /// Print the repository root containing the path.
    FindRoot,
    /// Print the effective config as TOML.
    Config {
        /// Also write it to the config path.
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::InvalidRepositoryPath(_)) => exit_codes::INVALID_REPOSITORY,
        _ => exit_codes::FAILURE,
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = config::load_config(&cli.config)?;
    if let Command::Log { limit: Some(limit) } = &cli.command {
        cfg.history_limit = *limit;
    }
    if let Command::Config { write } = &cli.command {
        return cmd_config(&cli.config, &cfg, *write);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(dispatch(cli.command, &cli.repo, &cfg))
}

async fn dispatch(command: Command, repo_path: &Path, cfg: &Config) -> Result<()> {
    let store = RepoStore::from_config(cfg);
    match command {
        Command::Status => print_json(&store.refresh_status(repo_path).await?),
        Command::Log { .. } => print_json(&store.refresh_history(repo_path).await?),
        Command::Diff { file, numbered } => {
            let hunks = store.diff(repo_path, &file).await?;
            if numbered {
                let lines: Vec<_> = hunks.iter().flat_map(number_lines).collect();
                print_json(&lines)
            } else {
                print_json(&hunks)
            }
        }
        Command::Stage { file } => print_json(&store.stage(repo_path, &file).await?),
        Command::Unstage { file } => print_json(&store.unstage(repo_path, &file).await?),
        Command::StageAll => print_json(&store.stage_all(repo_path).await?),
        Command::UnstageAll => print_json(&store.unstage_all(repo_path).await?),
        Command::AddUntracked { file } => {
            print_json(&store.add_untracked(repo_path, &file).await?)
        }
        Command::AddAllUntracked => print_json(&store.add_all_untracked(repo_path).await?),
        Command::Commit { message, files } => {
            print_json(&store.commit(repo_path, &message, &files).await?)
        }
        Command::Push { remote, branch } => {
            print_json(&store.push(repo_path, &remote, &branch).await?)
        }
        Command::Pull { remote, branch } => {
            print_json(&store.pull(repo_path, &remote, &branch).await?)
        }
        Command::Init => print_json(&store.init(repo_path).await?),
        Command::FileTree => print_json(&store.file_tree(repo_path).await?),
        Command::SuggestMessage => {
            let state = store.refresh_status(repo_path).await?;
            let changes: Vec<FileChange> = if state.staged.is_empty() {
                state.all_changes().cloned().collect()
            } else {
                state.staged.clone()
            };
            print_json(&store.generate_commit_message(repo_path, &changes).await?)
        }
        Command::Watch => cmd_watch(&store, repo_path).await,
        Command::FindRoot => {
            let root = repo::discover_root(repo_path)
                .ok_or_else(|| StoreError::InvalidRepositoryPath(repo_path.to_path_buf()))?;
            print_json(&root)
        }
        Command::Config { .. } => Ok(()),
    }
}

async fn cmd_watch(store: &RepoStore, repo_path: &Path) -> Result<()> {
    let mut events = store.subscribe();
    let mut records = store.watch(repo_path).await?;
    loop {
        tokio::select! {
            record = records.recv() => match record {
                Some(record) => print_json_line(&record)?,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => print_json_line(&event)?,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    store.shutdown().await;
    Ok(())
}

fn cmd_config(path: &Path, cfg: &Config, write: bool) -> Result<()> {
    if write {
        config::write_config(path, cfg)?;
    }
    let rendered = toml::to_string_pretty(cfg).context("serialize config toml")?;
    print!("{rendered}");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize json output")?;
    println!("{rendered}");
    Ok(())
}

fn print_json_line<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string(value).context("serialize json output")?;
    println!("{rendered}");
    Ok(())
}
