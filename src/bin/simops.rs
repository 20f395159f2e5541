use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use serde_json::Value;
use simops::control::{ControlRequest, ControlResponse, System};
use simops::telemetry::TelemetryMessage;
use simops::verifier::TcOutcome;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_CONTROL_PORT: &str = "8080";
const DEFAULT_TELEMETRY_PORT: &str = "8081";
const REQUEST_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let control_args = || {
        [
            Arg::with_name("control").help("Control name").required(true),
            Arg::with_name("value").help("Value, parsed as JSON when possible"),
        ]
    };

    let matches = App::new("simops")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Operator console for the ground segment simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Control port")
                .takes_value(true)
                .default_value(DEFAULT_CONTROL_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("start")
                .about("Start a scenario")
                .arg(Arg::with_name("scenario").required(true)),
        )
        .subcommand(SubCommand::with_name("stop").about("Stop the running scenario"))
        .subcommand(SubCommand::with_name("status").about("Scenarios, run state and overrides"))
        .subcommand(SubCommand::with_name("history").about("Command logs of past runs"))
        .subcommand(
            SubCommand::with_name("gs")
                .about("Ground station control")
                .args(&control_args()),
        )
        .subcommand(
            SubCommand::with_name("sc")
                .about("Spacecraft telecommand")
                .args(&control_args())
                .arg(
                    Arg::with_name("label")
                        .short("l")
                        .long("label")
                        .takes_value(true)
                        .help("Text recorded in the onboard TC history"),
                )
                .arg(
                    Arg::with_name("admin")
                        .long("admin")
                        .help("Apply directly, bypassing uplink verification"),
                ),
        )
        .subcommand(
            SubCommand::with_name("override")
                .about("Set or clear an instructor override")
                .args(&control_args()),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Stream telemetry")
                .arg(
                    Arg::with_name("telemetry-port")
                        .long("telemetry-port")
                        .takes_value(true)
                        .default_value(DEFAULT_TELEMETRY_PORT),
                )
                .arg(
                    Arg::with_name("topic")
                        .short("t")
                        .long("topic")
                        .takes_value(true)
                        .possible_values(&["ground_station", "spacecraft", "frames"]),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_CONTROL_PORT).parse()?;
    let json = matches.value_of("format") == Some("json");

    let request = match matches.subcommand() {
        ("start", Some(sub)) => ControlRequest::new(
            System::Admin,
            "start",
            sub.value_of("scenario").unwrap_or_default(),
        ),
        ("stop", _) => ControlRequest::new(System::Admin, "stop", Value::Null),
        ("status", _) => ControlRequest::new(System::Admin, "status", Value::Null),
        ("history", _) => ControlRequest::new(System::Admin, "history", Value::Null),
        ("gs", Some(sub)) => control_request(System::GroundStation, sub),
        ("override", Some(sub)) => control_request(System::Override, sub),
        ("sc", Some(sub)) => {
            let mut request = control_request(System::Spacecraft, sub);
            if let Some(label) = sub.value_of("label") {
                request = request.labelled(label);
            }
            if sub.is_present("admin") {
                request = request.as_admin();
            }
            request
        }
        ("monitor", Some(sub)) => {
            let telemetry_port: u16 =
                sub.value_of("telemetry-port").unwrap_or(DEFAULT_TELEMETRY_PORT).parse()?;
            return monitor(host, telemetry_port, sub.value_of("topic"), json).await;
        }
        _ => return Ok(()),
    };

    let response = send_request(host, port, &request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&request, &response);
    }
    if !succeeded(&response) {
        std::process::exit(1);
    }
    Ok(())
}

fn control_request(system: System, matches: &ArgMatches<'_>) -> ControlRequest {
    let control = matches.value_of("control").unwrap_or_default();
    let value = matches.value_of("value").map_or(Value::Null, parse_value);
    ControlRequest::new(system, control, value)
}

/// `true`, `42` and `[1,2]` become JSON; anything else is a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn send_request(
    host: &str,
    port: u16,
    request: &ControlRequest,
) -> Result<ControlResponse, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} cannot reach the master at {}", "error:".red().bold(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("  start it with {}", "simops-master".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let timeout = std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, exchange(stream, request)).await {
        Ok(result) => result,
        Err(_) => Err(format!("no reply within {} s", REQUEST_TIMEOUT_SECS).into()),
    }
}

async fn exchange(
    stream: TcpStream,
    request: &ControlRequest,
) -> Result<ControlResponse, Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    let mut reply = String::new();
    BufReader::new(reader).read_line(&mut reply).await?;
    if reply.trim().is_empty() {
        return Err("master closed the connection".into());
    }
    Ok(serde_json::from_str(reply.trim())?)
}

/// Telecommands answer with their verification string instead of `OK`.
fn succeeded(response: &ControlResponse) -> bool {
    response.is_ok() || response.outcome == Some(TcOutcome::Executed)
}

fn print_response(request: &ControlRequest, response: &ControlResponse) {
    let verdict = if succeeded(response) {
        response.status.bright_green().bold()
    } else {
        response.status.bright_red().bold()
    };
    let target = if request.value.is_null() {
        request.control.bright_white().to_string()
    } else {
        format!("{} = {}", request.control.bright_white(), request.value.to_string().bright_cyan())
    };
    match response.outcome {
        Some(outcome) => println!("{} {} ({:?})", verdict, target, outcome),
        None => println!("{} {}", verdict, target),
    }
    if let Some(message) = &response.message {
        println!("  {}", message.yellow());
    }

    if let Some(scenarios) = &response.scenarios {
        println!("\n{}", "Scenarios".bright_blue().bold());
        for uid in scenarios {
            let name = response
                .data
                .as_ref()
                .and_then(|data| data.get(uid))
                .and_then(|raw| raw["name"].as_str())
                .unwrap_or("");
            println!("  {:<20} {}", uid.bright_cyan(), name);
        }
    }
    if let Some(running) = response.running {
        let state = if running { "running".bright_green() } else { "idle".dimmed() };
        match &response.name {
            Some(name) => println!("\n{} {} ({})", "Simulation".bright_blue().bold(), state, name),
            None => println!("\n{} {}", "Simulation".bright_blue().bold(), state),
        }
    }
    if let Some(overrides) = &response.overrides {
        println!("\n{}", "Overrides".bright_blue().bold());
        for (name, value) in overrides {
            let shown = if value.is_null() { "-".dimmed() } else { value.to_string().bright_yellow() };
            println!("  {:<16} {}", name, shown);
        }
    }
    if let Some(history) = &response.history {
        for log in history {
            println!("\n{}", log.run.bright_blue().bold());
            for entry in &log.entries {
                let status = if entry.status == "OK" {
                    entry.status.green()
                } else {
                    entry.status.red()
                };
                println!(
                    "  {:>12.0}  {:<14} {:<20} {:<12} {}",
                    entry.ts,
                    format!("{:?}", entry.system),
                    entry.control,
                    entry.value.to_string(),
                    status
                );
            }
        }
    }
}

async fn monitor(
    host: &str,
    port: u16,
    topic: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect((host, port)).await?;
    eprintln!("{}", "Streaming telemetry (Ctrl+C to stop)".bright_blue().bold());
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<TelemetryMessage>(&line) else {
            continue;
        };
        if topic.is_some_and(|t| t != message.topic) {
            continue;
        }
        if json {
            println!("{}", line);
        } else {
            print_summary(&message);
        }
    }
    Ok(())
}

fn print_summary(message: &TelemetryMessage) {
    let p = &message.payload;
    match message.topic.as_str() {
        "ground_station" => println!(
            "{} {:>12.0} el {:>6.1} ul {} dl {} {}",
            "GS".bright_cyan(),
            p["ts"].as_f64().unwrap_or_default(),
            p["elevation"].as_f64().unwrap_or_default(),
            p["carrier_ul"].as_str().unwrap_or("?"),
            p["status_dl"].as_str().unwrap_or("?"),
            p["frame_quality"].as_str().unwrap_or("?"),
        ),
        "spacecraft" => println!(
            "{} {:>12.0} {} ul {} dl {} dod {:>5.1} mem {:>5.1}",
            "SC".bright_magenta(),
            p["ts"].as_f64().unwrap_or_default(),
            p["dhs"]["obsw_mode"].as_str().unwrap_or("?"),
            p["ttc"]["state_ul"].as_str().unwrap_or("?"),
            p["ttc"]["state_dl"].as_str().unwrap_or("?"),
            p["eps"]["battery_dod"].as_f64().unwrap_or_default(),
            p["dhs"]["memory"].as_f64().unwrap_or_default(),
        ),
        other => println!("{} {}", other.bright_yellow(), p),
    }
}
