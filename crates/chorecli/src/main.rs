mod store;

use anyhow::{Context, Result};
use chorecore::Host;
use choreruntime::{FlowRequest, FlowRuntime, RuntimeConfig};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::DirStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chore")]
#[command(about = "Control flow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Store directory holding controls/, templates/, auths/ and settings/
    #[arg(short, long)]
    store: PathBuf,

    /// Control name
    #[arg(short, long)]
    control: String,

    /// Endpoint name inside the control
    #[arg(short, long)]
    endpoint: String,

    /// HTTP method to match against the endpoint's methods
    #[arg(short, long)]
    method: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stored control and print its response
    Run {
        #[command(flatten)]
        target: Target,

        /// Initial payload
        #[arg(short, long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the initial payload from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Active tags, comma separated
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Give up waiting for a response after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Runtime configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse, build and prefetch a control without running it
    Validate {
        #[command(flatten)]
        target: Target,
    },

    /// List available node types
    Nodes,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr; stdout carries the response body.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            target,
            payload,
            payload_file,
            tags,
            timeout_secs,
            config,
        } => {
            let payload = match (payload, payload_file) {
                (Some(payload), _) => Some(payload.into_bytes()),
                (None, Some(path)) => Some(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("cannot read payload {}", path.display()))?,
                ),
                (None, None) => None,
            };
            let config = match config {
                Some(path) => RuntimeConfig::from_file(path)?,
                None => RuntimeConfig::default(),
            };

            run_control(target, payload, tags, timeout_secs.map(Duration::from_secs), config)
                .await?;
        }

        Commands::Validate { target } => {
            validate_control(target).await?;
        }

        Commands::Nodes => {
            list_nodes();
        }
    }

    Ok(())
}

async fn load_request(store: &DirStore, target: Target) -> Result<FlowRequest> {
    let content = store
        .lookup_control(&target.control)
        .await
        .with_context(|| format!("cannot load control {}", target.control))?;

    let mut request = FlowRequest::new(target.control, target.endpoint, content);
    if let Some(method) = target.method {
        request = request.with_method(method);
    }

    Ok(request)
}

async fn run_control(
    target: Target,
    payload: Option<Vec<u8>>,
    tags: Vec<String>,
    timeout: Option<Duration>,
    config: RuntimeConfig,
) -> Result<()> {
    let store = Arc::new(DirStore::new(&target.store));
    let cancel = CancellationToken::new();

    let mut request = load_request(&store, target)
        .await?
        .with_tags(tags)
        .with_cancel(cancel.clone());
    request.payload = payload;

    let runtime = FlowRuntime::with_config(
        Arc::new(chorenodes::standard_registry()),
        store,
        config,
    );

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, canceling run");
            interrupt.cancel();
        }
    });

    let mut handle = runtime.start_flow(request).await?;
    tracing::debug!(run_id = %handle.run_id(), "run started");

    let response = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, handle.response()).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("no response after {:?}, canceling run", timeout);
                handle.cancel();
                None
            }
        },
        None => handle.response().await,
    };

    match &response {
        Some(response) => {
            eprintln!("status: {}", response.status);
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&response.data)?;
            stdout.flush()?;
        }
        None => eprintln!("no response"),
    }

    for error in handle.wait().await {
        tracing::warn!("{}", error);
    }

    if response.is_some_and(|r| r.is_error) {
        anyhow::bail!("run finished with an error response");
    }

    Ok(())
}

async fn validate_control(target: Target) -> Result<()> {
    let store = Arc::new(DirStore::new(&target.store));
    tracing::debug!("using store {}", store.root().display());

    let request = load_request(&store, target).await?;
    let runtime = FlowRuntime::new(Arc::new(chorenodes::standard_registry()), store);
    let flow = runtime.prepare(&request, CancellationToken::new()).await?;

    let mut nodes = flow.nodes();
    nodes.sort_by(|a, b| a.0.cmp(&b.0));

    println!("control {} is valid for endpoint {}", flow.control(), flow.endpoint());
    println!("  entry nodes: {}", flow.starts().join(", "));
    println!("  responds synchronously: {}", flow.has_response());
    for (id, node) in nodes {
        let state = if node.is_disabled() {
            "disabled"
        } else if node.is_checked() {
            "reachable"
        } else {
            "unreachable"
        };
        println!("  {} ({}) {}", id, node.node_type(), state);
    }

    Ok(())
}

fn list_nodes() {
    println!("Available node types:");
    println!();

    let registry = chorenodes::standard_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for input in &metadata.inputs {
                println!("    in  {}: {}", input.name, input.description);
            }
            for output in &metadata.outputs {
                println!("    out {}: {}", output.name, output.description);
            }
        } else {
            println!("  {}", node_type);
        }
    }
}
