//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "binary"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Binary entrypoint for the flexo line console."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flexo_common::logging::init_tracing;
use flexo_common::{AppConfig, Mode, SimulationRoute};
use flexo_core::{ConsoleRuntime, RuntimeHandle, AUDIT_FILE};
use flexo_metrics::{new_registry, spawn_http_server, MetricsServer, SharedRegistry};
use flexo_msg::Order;
use flexo_persistence::{read_audit_log, StateStore};
use tokio::signal;
use tracing::{info, warn};

mod console;

#[derive(Debug, Parser)]
#[command(author, version, about = "Flexographic line operator console", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, env = "FLEXO_MODE", help = "Override telemetry backend")]
    mode: Option<CliMode>,

    #[arg(long, value_enum, env = "FLEXO_SIM_ROUTE", help = "Override simulation route")]
    route: Option<CliRoute>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliRoute {
    Local,
    Remote,
}

impl From<CliRoute> for SimulationRoute {
    fn from(value: CliRoute) -> Self {
        match value {
            CliRoute::Local => SimulationRoute::Local,
            CliRoute::Remote => SimulationRoute::Remote,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the operator console in the terminal")]
    Console,
    #[command(about = "Run headless and log the line state periodically")]
    Monitor {
        #[arg(long, default_value_t = 10, help = "Seconds between status lines")]
        every: u64,
    },
    #[command(about = "Append an order to the stored queue (console must not be running)")]
    Enqueue {
        order_no: String,
        box_no: String,
        target_qty: u64,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        product: Option<String>,
    },
    #[command(about = "Print archived production records, newest first")]
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, help = "Print raw JSON records")]
        json: bool,
    },
    #[command(about = "Print the most recent operator audit lines")]
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("flexo.toml"));
    candidates.push(PathBuf::from("configs/flexo.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(route) = cli.route {
        config.simulation.route = route.into();
    }

    let command = cli.command.unwrap_or(Commands::Console);
    if matches!(command, Commands::Console) {
        // the terminal UI owns stdout
        config.logging.stdout = false;
    }
    init_tracing("flexod", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found, using defaults"),
    }

    match command {
        Commands::Console => run_console(config).await,
        Commands::Monitor { every } => run_monitor(config, Duration::from_secs(every.max(1))).await,
        Commands::Enqueue {
            order_no,
            box_no,
            target_qty,
            customer,
            product,
        } => enqueue(&config, order_no, box_no, target_qty, customer, product),
        Commands::History { limit, json } => print_history(&config, limit, json),
        Commands::Audit { limit } => print_audit(&config, limit),
    }
}

async fn start_runtime(config: AppConfig) -> Result<(RuntimeHandle, Option<MetricsServer>)> {
    let mut registry: Option<SharedRegistry> = None;
    let metrics_server = if config.metrics.enabled {
        let shared = new_registry();
        let server = spawn_http_server(shared.clone(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        registry = Some(shared);
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let mut runtime = ConsoleRuntime::new(config);
    if let Some(registry) = registry {
        runtime = runtime.with_metrics(registry);
    }
    let handle = runtime.start().await?;
    Ok((handle, metrics_server))
}

async fn stop_runtime(handle: RuntimeHandle, metrics: Option<MetricsServer>) -> Result<()> {
    if handle.is_finished() {
        handle.wait().await?;
    } else {
        handle.shutdown().await?;
    }
    if let Some(server) = metrics {
        server.shutdown().await?;
    }
    Ok(())
}

async fn run_console(config: AppConfig) -> Result<()> {
    let title = format!("{} ({:?})", config.line.machine_id, config.mode);
    let (handle, metrics) = start_runtime(config).await?;
    let ui = console::ConsoleUi::new(title, handle.view(), handle.subscribe(), handle.inputs());
    let outcome = tokio::task::spawn_blocking(move || console::run(ui))
        .await
        .context("console thread failed")?;
    stop_runtime(handle, metrics).await?;
    outcome
}

async fn run_monitor(config: AppConfig, every: Duration) -> Result<()> {
    let (handle, metrics) = start_runtime(config).await?;
    let mut view = handle.view();
    let mut status = tokio::time::interval(every);
    info!("monitor running; waiting for termination signal");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    warn!("session loop ended");
                    break;
                }
            }
            _ = status.tick() => {
                let snapshot = handle.snapshot();
                info!(
                    connected = snapshot.connected,
                    speed = snapshot.line_speed,
                    quantity = snapshot.relative_quantity,
                    target = snapshot.target_qty,
                    order = snapshot.running_order().map(|order| order.order_no.as_str()).unwrap_or("-"),
                    job_run = snapshot.timers.job_run,
                    job_stop = snapshot.timers.job_stop,
                    awaiting_reason = snapshot.awaiting_reason_since.is_some(),
                    "line status"
                );
            }
        }
    }
    stop_runtime(handle, metrics).await
}

fn open_store(config: &AppConfig) -> Result<StateStore> {
    StateStore::open(&config.storage.directory, config.storage.history_cap).with_context(|| {
        format!(
            "failed to open state store {}",
            config.storage.directory.display()
        )
    })
}

fn enqueue(
    config: &AppConfig,
    order_no: String,
    box_no: String,
    target_qty: u64,
    customer: Option<String>,
    product: Option<String>,
) -> Result<()> {
    if target_qty == 0 {
        anyhow::bail!("target quantity must be greater than zero");
    }
    let store = open_store(config)?;
    let mut orders = store.load_orders()?;
    let mut order = Order::new(order_no, box_no, target_qty);
    order.customer = customer;
    order.product_name = product;
    order.seq_no = (orders.len() as u32 + 1) * 10;
    println!("queued {} ({}), target {}", order.order_no, order.id, order.target_qty);
    orders.push(order);
    store.save_orders(&orders)?;
    Ok(())
}

fn print_history(config: &AppConfig, limit: usize, json: bool) -> Result<()> {
    let records = open_store(config)?.load_history()?;
    for record in records.iter().take(limit) {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!(
                "{}  {:<12} {:<10} good {:>6}  defect {:>4}  run {:>6.1}m  stop {:>6.1}m  stops {:>2}  OEE {:>3}%  {}",
                record.finished_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
                record.order_no,
                record.box_no,
                record.good_qty,
                record.defect_qty,
                record.run_minutes,
                record.stop_minutes,
                record.stop_count,
                record.oee,
                record.operator,
            );
        }
    }
    if records.is_empty() {
        println!("no production records");
    }
    Ok(())
}

fn print_audit(config: &AppConfig, limit: usize) -> Result<()> {
    let path = config.storage.directory.join(AUDIT_FILE);
    if !path.exists() {
        println!("no audit log at {}", path.display());
        return Ok(());
    }
    for entry in read_audit_log(&path, limit)? {
        println!("{entry}");
    }
    Ok(())
}
