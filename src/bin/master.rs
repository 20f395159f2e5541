use clap::{App, Arg, ArgMatches};
use simops::config::SimConfig;
use simops::control::{ControlRequest, ControlResponse};
use simops::scenario::FsScenarioRepository;
use simops::storage::FsBlobStore;
use simops::supervisor::SimulationSupervisor;
use simops::telemetry::{BroadcastSink, TelemetryMessage};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TELEMETRY_BUFFER_SIZE: usize = 1024;

type Shared = Arc<Mutex<SimulationSupervisor>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    let sink = BroadcastSink::new(TELEMETRY_BUFFER_SIZE);
    let supervisor = SimulationSupervisor::new(
        config.clone(),
        Arc::new(FsScenarioRepository::new(config.scenario_dir())),
        Arc::new(FsBlobStore::new(config.store_dir())),
        Arc::new(sink.clone()),
    );
    let supervisor: Shared = Arc::new(Mutex::new(supervisor));

    let control = TcpListener::bind(&config.control_addr).await?;
    let telemetry = TcpListener::bind(&config.telemetry_addr).await?;
    info!(
        "Master up: control on {}, telemetry on {}, scenarios in {}",
        config.control_addr,
        config.telemetry_addr,
        config.scenario_dir().display()
    );

    let control_server = tokio::spawn(serve_control(control, Arc::clone(&supervisor)));
    let telemetry_server = tokio::spawn(serve_telemetry(telemetry, sink));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    control_server.abort();
    telemetry_server.abort();
    if let Err(e) = supervisor.lock().await.stop().await {
        error!("Final stop failed: {}", e);
    }
    Ok(())
}

fn cli() -> App<'static, 'static> {
    App::new("simops-master")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Ground segment operations simulator: runs scenarios and serves control and telemetry")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("control")
                .long("control")
                .value_name("ADDR")
                .help("Control listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("telemetry")
                .long("telemetry")
                .value_name("ADDR")
                .help("Telemetry listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("data")
                .short("d")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding scenarios/ and store/")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("speed")
                .short("s")
                .long("speed")
                .value_name("FACTOR")
                .help("Simulated seconds per wall-clock second")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("N")
                .help("Fixed random seed")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("archive")
                .long("archive-frames")
                .help("Store every downlinked frame"),
        )
}

fn load_config(matches: &ArgMatches) -> Result<SimConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => SimConfig::load(Path::new(path))?,
        None => SimConfig::default(),
    };
    if let Some(addr) = matches.value_of("control") {
        config.control_addr = addr.to_string();
    }
    if let Some(addr) = matches.value_of("telemetry") {
        config.telemetry_addr = addr.to_string();
    }
    if let Some(dir) = matches.value_of("data") {
        config.data_dir = dir.into();
    }
    if let Some(speed) = matches.value_of("speed") {
        config.speed = speed.parse()?;
    }
    if let Some(seed) = matches.value_of("seed") {
        config.rng_seed = Some(seed.parse()?);
    }
    if matches.is_present("archive") {
        config.archive_frames = true;
    }
    config.validate()?;
    Ok(config)
}

async fn serve_control(listener: TcpListener, supervisor: Shared) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Control client {} connected", addr);
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move {
                    if let Err(e) = handle_control(stream, supervisor).await {
                        warn!("Control client {} error: {}", addr, e);
                    }
                    info!("Control client {} disconnected", addr);
                });
            }
            Err(e) => error!("Failed to accept control connection: {}", e),
        }
    }
}

async fn handle_control(
    stream: TcpStream,
    supervisor: Shared,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(trimmed) {
            Ok(request) => {
                info!("Control: {:?} {} = {}", request.system, request.control, request.value);
                supervisor.lock().await.handle(request).await
            }
            Err(e) => {
                warn!("Malformed control request: {}", e);
                ControlResponse::fail(format!("invalid request: {e}"))
            }
        };
        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
    }
    Ok(())
}

async fn serve_telemetry(listener: TcpListener, sink: BroadcastSink) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Telemetry client {} connected", addr);
                let rx = sink.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = stream_telemetry(stream, rx).await {
                        warn!("Telemetry client {} error: {}", addr, e);
                    }
                    info!("Telemetry client {} disconnected", addr);
                });
            }
            Err(e) => error!("Failed to accept telemetry connection: {}", e),
        }
    }
}

async fn stream_telemetry(
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<TelemetryMessage>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let message = match rx.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Telemetry client lagging, dropped {} messages", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        };
        let mut json = serde_json::to_string(&message)?;
        json.push('\n');
        stream.write_all(json.as_bytes()).await?;
    }
}
