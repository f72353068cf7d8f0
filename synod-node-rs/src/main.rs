//! Synod Node
//!
//! Replicated key-value node running per-instance Paxos over UDP.

mod node;

use clap::Parser;
use node::{Command, Node, NodeConfig};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use synod_core::{Action, Applied, ClusterConfig, ConfigError, Transport};
use tokio::time::interval;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Synod replicated key-value node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster config file (JSON: node_id and members)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the local node id from the config file
    #[arg(short, long)]
    name: Option<String>,

    /// Use tight timings for a local cluster
    #[arg(long)]
    fast: bool,

    /// Milliseconds an instance may stay undecided before it is revoked
    #[arg(long)]
    stall_timeout_ms: Option<u64>,

    /// Milliseconds between stall checks
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Instances above the decided prefix that gap filling and stall checks cover
    #[arg(long)]
    max_gap: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut cluster = ClusterConfig::load(&args.config)?;
    if let Some(name) = args.name {
        cluster.node_id = name;
        cluster.validate()?;
    }

    let mut config = if args.fast {
        NodeConfig::fast()
    } else {
        NodeConfig::default()
    };
    if let Some(ms) = args.stall_timeout_ms {
        config.stall_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.tick_ms {
        config.tick_interval = Duration::from_millis(ms);
    }
    if let Some(window) = args.max_gap {
        config.max_gap = window;
    }

    info!(
        "Synod node \"{}\" starting ({} members)",
        cluster.node_id,
        cluster.members.len()
    );

    let bind_addr = cluster
        .local_addr()
        .ok_or_else(|| ConfigError::UnknownNode(cluster.node_id.clone()))?;
    let mut transport = Transport::bind(bind_addr, &cluster).await?;
    info!("Listening on {}", transport.local_addr()?);
    transport.start_receive();

    let mut node = Node::new(&cluster, config.clone());

    // Spawn stdin handler for operator commands
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);

    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  put <key> <value>  - Replicate a write");
        println!("  get <key>          - Replicate a read");
        println!("  del <key>          - Replicate a delete");
        println!("  skip               - Give up this node's next instance");
        println!("  revoke <instance>  - Take over an instance with a new ballot");
        println!("  state              - Show log and store state");
        println!("  quit               - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            match Command::parse(&line) {
                Ok(Some(command)) => {
                    if command_tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }
    });

    let mut ticker = interval(config.tick_interval);

    // Main event loop
    loop {
        tokio::select! {
            // Handle incoming messages
            Some((envelope, _src)) = transport.recv() => {
                let applied = node.handle_envelope(&envelope);
                report(&applied);
            }

            // Handle operator commands from stdin
            Some(command) = command_rx.recv() => {
                let submitted = match command {
                    Command::Put { key, value } => Some(node.submit(Action::Put, &key, &value)),
                    Command::Get { key } => Some(node.submit(Action::Get, &key, "")),
                    Command::Delete { key } => Some(node.submit(Action::Delete, &key, "")),
                    Command::Skip => Some(node.skip()),
                    Command::Revoke(instance) => {
                        match node.revoke(instance) {
                            Some(ballot) => println!("revoking instance {} with ballot {}", instance, ballot),
                            None => println!("no ballot available for instance {}", instance),
                        }
                        None
                    }
                    Command::State => {
                        println!("{}", summary(&node));
                        None
                    }
                    Command::Quit => break,
                };

                match submitted {
                    Some(Ok(instance)) => println!("proposed in instance {}", instance),
                    Some(Err(e)) => println!("rejected: {}", e),
                    None => {}
                }
            }

            _ = ticker.tick() => {
                let revoked = node.tick(Instant::now());
                if !revoked.is_empty() {
                    info!("Revoked stalled instances {:?}", revoked);
                }
            }
        }

        if let Err(e) = transport.flush(node.take_outbound()).await {
            warn!("Send failed: {}", e);
        }
    }

    info!("Synod node \"{}\" stopping", cluster.node_id);
    Ok(())
}

fn summary(node: &Node) -> String {
    let replica = node.replica();
    let store = node.store();
    format!(
        "node {}: decided prefix {}, applied {}, pending {}, undecided {:?}, data {:?}",
        replica.node_id(),
        replica.decided_prefix(),
        store.applied_len(),
        store.pending_len(),
        replica.undecided(),
        store.data()
    )
}

fn report(applied: &[Applied]) {
    for entry in applied {
        println!("[{}] {} -> {:?}", entry.instance, entry.command, entry.reply);
    }
}
