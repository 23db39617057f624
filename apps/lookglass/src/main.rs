mod config;
mod logging;
mod outline;
mod replay;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use lookglass_bridge::Transport;
use lookglass_replica::{ConnectionState, Store};
use logging::LogConfig;
use replay::{ReplayChannel, ReplayPlan};

#[derive(Parser, Debug)]
#[command(name = "lookglass", about = "Inspect recorded component-tree sessions")]
struct Cli {
    #[arg(long, global = true, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,

    #[arg(long, global = true, env = "LOOKGLASS_LOG", help = "Log filter used when RUST_LOG is unset")]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines envelope log into a replica and print the result
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Envelope log, one envelope per line
    log: PathBuf,

    /// Navigation keys applied after the replay, e.g. `down,right,up`
    #[arg(long, value_delimiter = ',')]
    keys: Vec<String>,

    /// Search text applied before the keys
    #[arg(long)]
    search: Option<String>,

    /// Print the visible tree
    #[arg(long)]
    tree: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&LogConfig {
        default_filter: cli.log_filter.clone(),
        file: cli.log_file.clone(),
    })?;
    let config = Config::from_env()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    match cli.command {
        Command::Replay(args) => runtime.block_on(replay_command(config, args)),
    }
}

async fn replay_command(config: Config, args: ReplayArgs) -> Result<()> {
    let file = File::open(&args.log).with_context(|| format!("failed to open {}", args.log.display()))?;
    let envelopes = replay::read_envelopes(BufReader::new(file))
        .with_context(|| format!("failed to read {}", args.log.display()))?;
    let plan = ReplayPlan {
        keys: replay::parse_keys(&args.keys)?,
        search: args.search,
    };

    let channel = Arc::new(ReplayChannel::new());
    let transport = Transport::new(channel.clone(), config.transport);
    let store = Store::new(transport, config.store);
    replay::run(&store, &channel, envelopes, &plan);

    match store.connection() {
        ConnectionState::Connected(capabilities) => {
            let enabled: Vec<_> = capabilities
                .iter()
                .filter(|(_, on)| **on)
                .map(|(name, _)| name.as_str())
                .collect();
            println!("connection: connected [{}]", enabled.join(", "));
        }
        ConnectionState::Connecting => println!("connection: no capability answer in log"),
        ConnectionState::Failed => println!("connection: failed"),
    }
    match store.selected() {
        Some(id) => {
            let crumbs = store.breadcrumb(&id).join(" > ");
            println!("selected: {id} ({crumbs})");
        }
        None => println!("selected: none"),
    }
    if let Some(results) = store.search_roots() {
        println!("matches: {}", results.len());
    }
    if args.tree {
        print!("{}", store.with_state(outline::render));
    }
    Ok(())
}
