//! SHV Tree - Command line tools for SHV device trees
//!
//! Checks tree documents, estimates type sizes, browses the node tree and
//! calls methods on a dummy device built from it.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "shvtree")]
#[command(about = "Silicon Heaven device tree tools")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "shvtree.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report style issues of the types in tree files
    Check {
        /// List available checks instead of checking files
        #[arg(short = 'l', long)]
        list_checks: bool,

        /// Checks to skip (repeatable or joined by comma)
        #[arg(short = 'd', long = "disable-checks")]
        disable: Vec<String>,

        /// Tree files, standard input if none is given
        files: Vec<PathBuf>,
    },
    /// Print the maximal ChainPack size of every custom type
    Size {
        /// Print output in JSON format
        #[arg(short, long)]
        json: bool,

        /// Tree file, standard input if not given
        file: Option<PathBuf>,
    },
    /// List children of a node
    Ls {
        file: PathBuf,

        /// Node path, the root if not given
        #[arg(default_value = "")]
        path: String,
    },
    /// List methods of a node
    Dir {
        file: PathBuf,

        /// Node path, the root if not given
        #[arg(default_value = "")]
        path: String,

        /// Print output in JSON format
        #[arg(short, long)]
        json: bool,
    },
    /// Call a method of a dummy device built from the tree
    Call {
        file: PathBuf,
        path: String,
        method: String,

        /// Parameter as JSON
        #[arg(short, long)]
        param: Option<String>,

        /// Access level granted to the call, overrides the configuration
        #[arg(short, long)]
        access: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = config::load_config(&args.config)?;

    // Initialize logging
    let level_name = args.log_level.as_deref().unwrap_or(&config.log.level);
    let level = config::parse_level(level_name).unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    debug!(config = %args.config.display(), "shvtree v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Check {
            list_checks,
            disable,
            files,
        } => {
            if list_checks {
                print!("{}", commands::list_checks());
                return Ok(ExitCode::SUCCESS);
            }
            let disabled = match commands::parse_checks(&disable) {
                Ok(disabled) => disabled,
                Err(err) => {
                    eprintln!("Invalid check: {}", err);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let files: Vec<Option<PathBuf>> = if files.is_empty() {
                vec![None]
            } else {
                files.into_iter().map(Some).collect()
            };
            let mut valid = true;
            for file in files {
                let name = file
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |file| file.display().to_string());
                match commands::load_tree(file.as_deref()) {
                    Ok(tree) => {
                        if let Some(report) = commands::check_tree(&name, &tree, &disabled) {
                            print!("{}", report);
                            valid = false;
                        }
                    }
                    Err(err) => {
                        println!("{:#}", err);
                        valid = false;
                    }
                }
            }
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Size { json, file } => {
            let tree = commands::load_tree(file.as_deref())?;
            let sizes = commands::sizes(&tree);
            print!("{}", commands::render_sizes(&sizes, json)?);
            if json {
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ls { file, path } => {
            let tree = commands::load_tree(Some(file.as_path()))?;
            print!("{}", commands::render_ls(&tree, &path)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Dir { file, path, json } => {
            let tree = commands::load_tree(Some(file.as_path()))?;
            print!("{}", commands::render_dir(&tree, &path, json)?);
            if json {
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Call {
            file,
            path,
            method,
            param,
            access,
        } => {
            let tree = commands::load_tree(Some(file.as_path()))?;
            let result = commands::call(
                tree,
                &config,
                &path,
                &method,
                param.as_deref(),
                access.as_deref(),
            )
            .await?;
            println!("{}", result);
            Ok(ExitCode::SUCCESS)
        }
    }
}
