//! Command-line interface for the IrBridge gateway.

mod control;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use irbridge_commands::{
    AckCorrelator, CommandDispatcher, DispatchDirectories, DispatchRequest, DispatcherConfig,
};
use irbridge_core::config::{defaults, env_vars};
use irbridge_core::{CommandStatus, CommandStore, RealtimeHub, TelemetryStore};
use irbridge_mqtt::{InboundRouter, MqttConfig, MqttTransport, PipelineHandler, RouterConfig};
use irbridge_storage::{RedbStore, SeedFile};
use irbridge_telemetry::{IngestionService, TelemetryConfig};
use tracing::{debug, info, warn};

use crate::control::{ControlClient, ControlReply, ControlServer};

/// How long a standalone `send` waits for the broker session.
const CONNECT_WAIT: StdDuration = StdDuration::from_secs(3);

/// IrBridge - MQTT gateway for infrared appliance controllers.
#[derive(Parser, Debug)]
#[command(name = "irbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Database file (defaults to $IRBRIDGE_DB_PATH or data/irbridge.redb).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Broker overrides shared by the commands that talk MQTT.
#[derive(clap::Args, Debug)]
struct BrokerArgs {
    /// Broker host (defaults to $IRBRIDGE_MQTT_HOST).
    #[arg(long)]
    broker: Option<String>,
    /// Broker port (defaults to $IRBRIDGE_MQTT_PORT).
    #[arg(long)]
    port: Option<u16>,
}

impl BrokerArgs {
    fn into_config(self) -> MqttConfig {
        let mut config = MqttConfig::from_env();
        if let Some(broker) = self.broker {
            config.broker = broker;
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        config
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and run the gateway until Ctrl-C.
    Serve {
        #[command(flatten)]
        broker: BrokerArgs,
        /// Address accepting dispatch requests from `send` (defaults to
        /// $IRBRIDGE_CONTROL_ADDR or 127.0.0.1:7878).
        #[arg(long)]
        control: Option<String>,
    },
    /// Send one IR command and print the settled record.
    ///
    /// Goes through a running gateway when one listens on the control
    /// address, otherwise opens the database and broker connection itself.
    Send {
        /// Requesting user.
        #[arg(long)]
        user: String,
        #[arg(long)]
        controller: String,
        #[arg(long)]
        appliance: String,
        #[arg(long = "ir-code")]
        ir_code: String,
        /// Action name, e.g. PowerOn.
        #[arg(long)]
        action: String,
        #[arg(long)]
        room: Option<String>,
        /// JSON object passed through to the device.
        #[arg(long)]
        metadata: Option<String>,
        /// Control address of a running gateway.
        #[arg(long)]
        control: Option<String>,
        #[command(flatten)]
        broker: BrokerArgs,
    },
    /// List commands of a controller, newest first.
    History {
        controller: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Only queued and sent commands, oldest first.
        #[arg(long)]
        pending: bool,
    },
    /// Command counts by status.
    Status,
    /// Show telemetry of a controller.
    Telemetry {
        controller: String,
        /// Aggregate one metric instead of listing the latest values.
        #[arg(long)]
        metric: Option<String>,
        /// Window for --metric, in hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Load controllers, appliances and IR codes from a JSON file.
    Seed {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Delete finished commands and telemetry past their retention.
    Purge {
        #[arg(long, default_value_t = defaults::COMMAND_RETENTION_DAYS)]
        command_days: i64,
        #[arg(long, default_value_t = defaults::TELEMETRY_RETENTION_DAYS)]
        telemetry_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json, args.verbose);

    let db = args
        .db
        .unwrap_or_else(|| PathBuf::from(env_vars::db_path()));
    let store = || open_store(&db).map(Arc::new);

    match args.command {
        Command::Serve { broker, control } => {
            let control = control.unwrap_or_else(env_vars::control_addr);
            run_serve(store()?, broker.into_config(), &control).await
        }
        Command::Send {
            user,
            controller,
            appliance,
            ir_code,
            action,
            room,
            metadata,
            control,
            broker,
        } => {
            let mut request = DispatchRequest::new(user, controller, appliance, ir_code, action);
            if let Some(room) = room {
                request = request.with_room(room);
            }
            if let Some(raw) = metadata {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--metadata is not valid JSON")?;
                request = request.with_metadata(value);
            }
            let control = control.unwrap_or_else(env_vars::control_addr);
            match ControlClient::connect(&control).await {
                Ok(client) => run_send_via_gateway(client, &request).await,
                Err(e) => {
                    debug!(addr = %control, error = %e, "No gateway listening, dispatching directly");
                    run_send(store()?, request, broker.into_config()).await
                }
            }
        }
        Command::History {
            controller,
            limit,
            pending,
        } => run_history(store()?, &controller, limit, pending).await,
        Command::Status => run_status(store()?).await,
        Command::Telemetry {
            controller,
            metric,
            hours,
        } => run_telemetry(store()?, &controller, metric.as_deref(), hours).await,
        Command::Seed { file } => run_seed(store()?, file),
        Command::Purge {
            command_days,
            telemetry_days,
        } => run_purge(store()?, command_days, telemetry_days).await,
    }
}

fn init_logging(json: bool, verbose: bool) {
    let default_filter = if verbose { "irbridge=debug" } else { "irbridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // Logs go to stderr so command output stays pipeable.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_store(path: &Path) -> Result<RedbStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    RedbStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the gateway.
async fn run_serve(store: Arc<RedbStore>, mqtt: MqttConfig, control_addr: &str) -> Result<()> {
    let hub = Arc::new(RealtimeHub::new());
    let ingestion = Arc::new(IngestionService::new(
        store.clone(),
        store.clone(),
        hub.clone(),
        TelemetryConfig::from_env(),
    ));
    let acks = Arc::new(AckCorrelator::new(store.clone(), hub.clone()));
    let router = Arc::new(InboundRouter::start(
        Arc::new(PipelineHandler::new(ingestion.clone(), acks)),
        RouterConfig::from_env(),
    ));
    let transport = Arc::new(MqttTransport::connect(mqtt, Some(router.clone())).await?);
    let dispatcher = CommandDispatcher::new(
        DispatchDirectories::shared(store.clone()),
        store.clone(),
        transport.clone(),
    )
    .with_config(DispatcherConfig::from_env());
    let control = ControlServer::bind(control_addr, Arc::new(dispatcher)).await?;

    info!(
        broker = %transport.config().broker_addr(),
        lanes = router.lane_count(),
        control = %control.local_addr(),
        "Gateway running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    control.shutdown().await;
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    router.shutdown().await;
    ingestion.shutdown().await;

    let stats = ingestion.stats();
    info!(
        accepted = stats.buffer.accepted,
        rejected = stats.rejected,
        unknown_controllers = stats.unknown_controllers,
        persisted = stats.buffer.persisted,
        failed = stats.buffer.failed,
        "Telemetry flushed"
    );
    Ok(())
}

/// Dispatch a single command over a publish-only connection.
async fn run_send(
    store: Arc<RedbStore>,
    request: DispatchRequest,
    mqtt: MqttConfig,
) -> Result<()> {
    let transport = Arc::new(MqttTransport::connect(mqtt, None).await?);
    if !transport.wait_connected(CONNECT_WAIT).await {
        warn!(
            broker = %transport.config().broker_addr(),
            "Broker not reachable, the command will be recorded as failed"
        );
    }
    let dispatcher = CommandDispatcher::new(
        DispatchDirectories::shared(store.clone()),
        store.clone(),
        transport.clone(),
    )
    .with_config(DispatcherConfig::from_env());

    let result = dispatcher.dispatch(request).await;
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    print_json(&result?)
}

/// Hand the request to the gateway that owns the database.
async fn run_send_via_gateway(mut client: ControlClient, request: &DispatchRequest) -> Result<()> {
    match client.dispatch(request).await? {
        ControlReply::Dispatched { command } => print_json(&command),
        ControlReply::Rejected { error } => anyhow::bail!(error),
    }
}

async fn run_history(
    store: Arc<RedbStore>,
    controller: &str,
    limit: usize,
    pending: bool,
) -> Result<()> {
    let records = if pending {
        store.list_pending(Some(controller)).await?
    } else {
        store.list_by_controller(controller, limit).await?
    };
    print_json(&records)
}

async fn run_status(store: Arc<RedbStore>) -> Result<()> {
    let counts = store.status_counts().await?;
    let summary: BTreeMap<&str, usize> = CommandStatus::all()
        .iter()
        .map(|s| (s.as_str(), counts.get(s).copied().unwrap_or(0)))
        .collect();
    print_json(&summary)
}

async fn run_telemetry(
    store: Arc<RedbStore>,
    controller: &str,
    metric: Option<&str>,
    hours: i64,
) -> Result<()> {
    match metric {
        Some(metric) => {
            let to = Utc::now();
            let from = to - Duration::hours(hours.max(1));
            let stats = store.stats(controller, metric, from, to).await?;
            print_json(&serde_json::json!({
                "controller_id": controller,
                "metric": metric,
                "from": from,
                "to": to,
                "stats": stats,
            }))
        }
        None => print_json(&store.latest_by_metric(controller).await?),
    }
}

fn run_seed(store: Arc<RedbStore>, file: PathBuf) -> Result<()> {
    let seed = SeedFile::load(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let report = seed.apply(store.as_ref())?;
    info!(
        controllers = report.controllers,
        appliances = report.appliances,
        ir_codes = report.ir_codes,
        "Directory seeded"
    );
    print_json(&report)
}

async fn run_purge(store: Arc<RedbStore>, command_days: i64, telemetry_days: i64) -> Result<()> {
    let now = Utc::now();
    let commands = store
        .purge_terminal_before(now - Duration::days(command_days.max(0)))
        .await?;
    let samples = store
        .purge_before(now - Duration::days(telemetry_days.max(0)))
        .await?;
    info!(commands, samples, "Retention purge finished");
    print_json(&serde_json::json!({
        "commands": commands,
        "samples": samples,
    }))
}
