use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use splitstore::archive::TarBundler;
use splitstore::client::{self, ArchiveOutcome, Client};
use splitstore::protocol::FrontCommand;
use splitstore::{server, ClusterConfig, NodeId, Router};

#[derive(Parser, Debug)]
#[command(name = "splitstore", version, about = "Extension-partitioned file store")]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, global = true, env = "SPLITSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one node role until interrupted
    Serve {
        #[arg(value_enum)]
        role: NodeId,

        /// Listen address (overrides the configured one)
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Storage root of this role, e.g. ~/spdf
        #[arg(long)]
        root: Option<String>,

        /// Directory `~` expands to
        #[arg(long)]
        home: Option<PathBuf>,

        /// tar binary used for archives
        #[arg(long, default_value = "tar")]
        tar: PathBuf,
    },

    /// Send one command to the front-door
    Client {
        /// Front-door address (overrides the configured one)
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Where downloads and archives are written
        #[arg(long, default_value = ".")]
        out: PathBuf,

        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Upload a local file into a remote directory
    Ufile { local: PathBuf, dir: String },
    /// Download a remote file
    Dfile { path: String },
    /// Delete a remote file
    Rmfile { path: String },
    /// List the files of a remote directory across all nodes
    Display { dir: String },
    /// Archive every file with an extension (.c, .txt or .pdf)
    Dtar { extension: String },
}

impl Action {
    fn to_command(&self) -> Result<FrontCommand> {
        Ok(match self {
            Action::Ufile { local, dir } => FrontCommand::Upload {
                name: local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("{} has no file name", local.display()))?
                    .to_string(),
                dir: dir.clone(),
            },
            Action::Dfile { path } => FrontCommand::Download { path: path.clone() },
            Action::Rmfile { path } => FrontCommand::Remove { path: path.clone() },
            Action::Display { dir } => FrontCommand::Display { dir: dir.clone() },
            Action::Dtar { extension } => FrontCommand::Archive {
                extension: extension.clone(),
            },
        })
    }
}

fn init_logging(verbose: u8, default: &str) {
    let level = match verbose {
        0 => default,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("splitstore={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ClusterConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            role,
            addr,
            root,
            home,
            tar,
        } => {
            init_logging(cli.verbose, "info");
            if let Some(home) = home {
                config.home = Some(home);
            }
            if let Some(addr) = addr {
                config.node_mut(role).addr = addr;
            }
            if let Some(root) = root {
                config.node_mut(role).root = root;
            }
            config.validate()?;

            let addr = config.node(role).addr;
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            let bundler = Arc::new(TarBundler::with_program(tar));

            tokio::select! {
                res = server::run(&config, role, listener, bundler) => res?,
                _ = tokio::signal::ctrl_c() => tracing::info!("{} shutting down", role),
            }
            Ok(())
        }
        Command::Client { addr, out, action } => {
            init_logging(cli.verbose, "warn");
            if let Some(addr) = addr {
                config.main.addr = addr;
            }
            run_client(&config, &out, action).await
        }
    }
}

async fn run_client(config: &ClusterConfig, out: &std::path::Path, action: Action) -> Result<()> {
    let router = Router::from_config(config)?;
    client::validate(&action.to_command()?, &router, &config.main.root)?;
    if let Action::Ufile { local, .. } = &action {
        client::validate_local_file(local)?;
    }

    let mut conn = Client::connect(config.main.addr)
        .await
        .with_context(|| format!("Cannot reach front-door at {}", config.main.addr))?;

    match action {
        Action::Ufile { local, dir } => println!("{}", conn.upload(&local, &dir).await?),
        Action::Dfile { path } => {
            let saved = conn.download(&path, out).await?;
            println!("Downloaded {}", saved.display());
        }
        Action::Rmfile { path } => println!("{}", conn.remove(&path).await?),
        Action::Display { dir } => {
            for name in conn.display(&dir).await? {
                println!("{}", name);
            }
        }
        Action::Dtar { extension } => match conn.archive(&extension, out).await? {
            ArchiveOutcome::Saved(path) => println!("Archive saved to {}", path.display()),
            ArchiveOutcome::Kept(message) => println!("{}", message),
        },
    }
    Ok(())
}
