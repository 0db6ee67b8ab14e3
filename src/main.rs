//! Binary entrypoint for the colorlink CLI.
//!
//! Commands:
//! - `start [--port <path>] [--baud <rate>] [--listen-port <n>]` - run the HTTP bridge
//! - `init` - create a starter `config.toml`
//! - `send <r,g,b> [--port <path>]` - send one color and print the outcome as JSON
//! - `console [--port <path>]` - type colors interactively and see what the device answers
//!
//! See the library crate docs for module-level details: `colorlink::`.
use std::io::Write as _;
use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use colorlink::color::{parse, RawInput};
use colorlink::config::Config;
use colorlink::device::{SerialConnector, Session};
use colorlink::dispatch::{start_dispatcher, Dispatcher};

#[derive(Parser)]
#[command(name = "colorlink")]
#[command(about = "Forward RGB colors from HTTP clients to a serial-attached microcontroller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP bridge
    Start {
        /// Serial device port (e.g., /dev/ttyACM0 or COM5)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
        /// HTTP listen port
        #[arg(short, long)]
        listen_port: Option<u16>,
    },
    /// Write a default configuration file
    Init,
    /// Send a single color and print the outcome
    Send {
        /// Color as r,g,b or a JSON object such as {"red":255,"green":0,"blue":0}
        color: String,
        /// Serial device port
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },
    /// Interactive console: one color per line, device replies are echoed
    Console {
        /// Serial device port
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };

    match cli.command {
        Commands::Start {
            port,
            baud,
            listen_port,
        } => {
            let mut config = config_or_default(pre_config, &cli.config);
            apply_overrides(&mut config, port, baud);
            if let Some(listen_port) = listen_port {
                config.http.port = listen_port;
            }
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting colorlink v{}", env!("CARGO_PKG_VERSION"));
            run_bridge(config).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                warn!("{} already exists; leaving it untouched", cli.config);
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Send { color, port, baud } => {
            let mut config = config_or_default(pre_config, &cli.config);
            apply_overrides(&mut config, port, baud);
            init_logging(&Some(config.clone()), cli.verbose);

            let cmd = parse(&RawInput::from_body(color.as_bytes()), config.color.range_policy)
                .map_err(|e| anyhow!("Invalid color {:?}: {}", color, e))?;
            let mut dispatcher =
                Dispatcher::new(Session::new(config.session_config(), SerialConnector));
            let result = dispatcher.dispatch(cmd).await;
            dispatcher.close();

            let payload = serde_json::json!({
                "command": cmd,
                "outcome": result.outcome,
                "responses": result.responses,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            std::process::exit(if result.is_success() { 0 } else { 1 });
        }
        Commands::Console { port, baud } => {
            let mut config = config_or_default(pre_config, &cli.config);
            apply_overrides(&mut config, port, baud);
            init_logging(&Some(config.clone()), cli.verbose);
            run_console(config).await?;
        }
    }

    Ok(())
}

fn config_or_default(pre_config: Option<Config>, path: &str) -> Config {
    pre_config.unwrap_or_else(|| {
        eprintln!("No usable config at {}; using defaults", path);
        Config::default()
    })
}

fn apply_overrides(config: &mut Config, port: Option<String>, baud: Option<u32>) {
    if let Some(port) = port {
        config.device.port = port;
    }
    if let Some(baud) = baud {
        config.device.baud_rate = baud;
    }
}

async fn run_bridge(config: Config) -> Result<()> {
    let bind: IpAddr = config
        .http
        .bind
        .parse()
        .map_err(|e| anyhow!("Invalid bind address {}: {}", config.http.bind, e))?;
    let addr = SocketAddr::new(bind, config.http.port);

    let mut dispatcher = Dispatcher::new(Session::new(config.session_config(), SerialConnector));
    if let Err(e) = dispatcher.connect_at_startup().await {
        if config.device.require_device_at_startup {
            return Err(anyhow!(
                "Device on {} is required at startup: {}",
                config.device.port,
                e
            ));
        }
        warn!(
            "Failed to connect to device on {}: {} (bridge continuing; will retry on first request)",
            config.device.port, e
        );
    }
    let handle = start_dispatcher(dispatcher);

    info!("Device on {} at {} baud", config.device.port, config.device.baud_rate);
    info!("Color control examples:");
    info!("  GET:  http://localhost:{}/?red=255&green=0&blue=0", config.http.port);
    info!("  POST JSON:   {{\"red\": 255, \"green\": 128, \"blue\": 64}}");
    info!("  POST String: \"255,128,64\"");
    info!("Press Ctrl+C to stop the server.");

    let served = colorlink::web::serve(addr, handle.clone(), config.color.range_policy, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
    })
    .await;

    // Close the port whether or not the server came up
    handle.shutdown().await;
    served.map_err(|e| anyhow!("HTTP adapter on {} failed: {}", addr, e))?;
    info!("colorlink shutdown complete");
    Ok(())
}

async fn run_console(config: Config) -> Result<()> {
    let port = config.device.port.clone();
    let mut dispatcher = Dispatcher::new(Session::new(config.session_config(), SerialConnector));
    if let Err(e) = dispatcher.connect_at_startup().await {
        eprintln!("Error opening serial port: {}", e);
        eprintln!("Make sure:");
        eprintln!("1. The device is connected to {}", port);
        eprintln!("2. No other program is using {}", port);
        eprintln!("3. Any serial monitor is closed");
        return Err(anyhow!("could not open {}", port));
    }

    println!("Connected to device. Enter RGB values as: red,green,blue (e.g., 255,128,64)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Enter a new color (or 'quit' to exit): ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }

        let cmd = match parse(&RawInput::from_body(line.as_bytes()), config.color.range_policy) {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("Not sent: {}", e);
                continue;
            }
        };
        println!("Sending: {}", cmd);
        let result = dispatcher.dispatch(cmd).await;
        for response in &result.responses {
            println!("Device says: {}", response);
        }
        match result.outcome {
            colorlink::dispatch::Outcome::Failed(reason) => println!("Send failed: {}", reason),
            _ => println!("Data sent successfully"),
        }
    }

    dispatcher.close();
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|cfg| cfg.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    match log_file.map(|file| std::fs::OpenOptions::new().create(true).append(true).open(file)) {
        Some(Ok(f)) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Echo to the console only in foreground use
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        other => {
            if let Some(Err(e)) = other {
                eprintln!("Could not open log file: {}", e);
            }
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
