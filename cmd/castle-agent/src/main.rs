use clap::{Parser, Subcommand};
use pkg_cephmgr::mon::HttpMonClient;
use pkg_cephmgr::{Context, OsdAgent, OsdAgentConfig, get_applied_osds};
use pkg_constants::osd::{DEFAULT_CLUSTER_NAME, DEFAULT_RECONCILE_INTERVAL_SECS};
use pkg_constants::paths::{DEFAULT_AGENT_CONFIG, DEFAULT_AGENT_DATA_DIR};
use pkg_proc::{HostExecutor, ProcManager};
use pkg_state::SlateStore;
use pkg_types::config::{AgentConfigFile, load_config_file};
use pkg_types::disk::parse_device_list;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "castle-agent", about = "castle storage node agent (OSDs)")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, global = true, default_value = DEFAULT_AGENT_CONFIG)]
    config: String,

    /// Node id (defaults to the hostname)
    #[arg(long, global = true)]
    node_id: Option<String>,

    /// Directory for SlateDB state storage
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the node and keep its OSDs converged
    Run(RunArgs),
    /// Print the devices already applied on this node
    Applied,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Cluster name
    #[arg(long)]
    cluster_name: Option<String>,

    /// Comma-separated devices to use when none are desired in the store
    #[arg(long)]
    devices: Option<String>,

    /// Format devices even if already applied
    #[arg(long)]
    force_format: bool,

    /// CRUSH location of this node's OSDs
    #[arg(long)]
    location: Option<String>,

    /// Monitor API endpoint
    #[arg(long)]
    mon_endpoint: Option<String>,

    /// Bearer token for the monitor API
    #[arg(long)]
    token: Option<String>,

    /// Seconds between reconciliation passes
    #[arg(long)]
    reconcile_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: AgentConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let node_id = match cli.node_id.or(file_cfg.node_id.clone()) {
        Some(id) => id,
        None => nix::unistd::gethostname()?.to_string_lossy().to_string(),
    };
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir.clone())
        .unwrap_or_else(|| DEFAULT_AGENT_DATA_DIR.to_string());

    match cli.command {
        Commands::Run(args) => run(args, file_cfg, node_id, data_dir).await,
        Commands::Applied => {
            let store = SlateStore::open_reader(&data_dir).await?;
            let applied = get_applied_osds(&store, &node_id).await;
            store.close().await?;
            let applied: BTreeMap<String, String> = applied?.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&applied)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn agent_config(args: &RunArgs, file_cfg: AgentConfigFile) -> OsdAgentConfig {
    let mut config = OsdAgentConfig::new(
        &args
            .cluster_name
            .clone()
            .or(file_cfg.cluster_name)
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string()),
        "",
        args.force_format || file_cfg.force_format.unwrap_or(false),
        &args.location.clone().or(file_cfg.location).unwrap_or_default(),
    );
    if let Some(devices) = args.devices.clone().or(file_cfg.devices) {
        config.devices = parse_device_list(&devices);
    }
    if let Some(fs) = file_cfg.filesystem {
        config.filesystem = fs;
    }
    if let Some(root) = file_cfg.osd_root {
        config.osd_root = PathBuf::from(root);
    }
    if let Some(root) = file_cfg.config_root {
        config.config_root = PathBuf::from(root);
    }
    if let Some(binary) = file_cfg.daemon_binary {
        config.daemon_binary = binary;
    }
    if let Some(attempts) = file_cfg.mon_command_attempts {
        config.mon_command_attempts = attempts;
    }
    config.owner = file_cfg.owner;
    config.continue_on_error = file_cfg.continue_on_error.unwrap_or(false);
    config
}

async fn run(
    args: RunArgs,
    file_cfg: AgentConfigFile,
    node_id: String,
    data_dir: String,
) -> anyhow::Result<()> {
    let mon_endpoint = args
        .mon_endpoint
        .clone()
        .or(file_cfg.mon_endpoint.clone())
        .ok_or_else(|| anyhow::anyhow!("no monitor endpoint configured (--mon-endpoint)"))?;
    let token = args.token.clone().or(file_cfg.token.clone());
    let interval_secs = args
        .reconcile_interval
        .or(file_cfg.reconcile_interval_secs)
        .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS);
    let config = agent_config(&args, file_cfg);

    info!("Starting castle-agent");
    info!("  Node:      {}", node_id);
    info!("  Cluster:   {}", config.cluster_name);
    info!("  Data dir:  {}", data_dir);
    info!("  Monitors:  {}", mon_endpoint);
    info!("  Devices:   {}", config.devices.join(","));

    let slate = SlateStore::new(&data_dir).await?;
    let ctx = Context {
        store: Arc::new(slate.clone()),
        executor: Arc::new(HostExecutor::new()),
        proc_man: Arc::new(ProcManager::new()),
        mon: Arc::new(HttpMonClient::new(&mon_endpoint, token)?),
        node_id,
    };

    let mut agent = OsdAgent::new(config);
    agent.initialize(&ctx).await?;

    // Desired-state edits land in other processes' stores and never reach
    // this store's event log, so the interval alone drives passes.
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down, stopping OSDs");
                break;
            }
        }
        if let Err(e) = agent.configure_local_service(&ctx).await {
            warn!("OSD reconcile error: {:#}", e);
        }
    }

    let result = agent.destroy_local_service(&ctx).await;
    drop(ctx);
    slate.close().await?;
    result
}
