//! Device Collector - location and battery sampler with batched HTTP flushes
//!
//! Samples the (simulated) device location every second and a simulated
//! battery level every two seconds. Readings are buffered and POSTed as
//! `{"data": "r1+r2+r3+r4"}` whenever more than three are waiting.
//!
//! ## Commands
//!
//! Read line by line from stdin:
//!
//! - `start`: start both samplers
//! - `stop`: stop both samplers
//! - `status`: print run state, permission and buffer size
//! - `quit`: stop and exit (Ctrl+C works too)
//!
//! ## Configuration
//!
//! - `DEVICE_COLLECTOR_ENDPOINT_URL`: flush destination (default: https://kovalsky.pl)
//! - `DEVICE_COLLECTOR_AUTOSTART`: start sampling at boot (default: false)
//! - `DEVICE_COLLECTOR_LOCATION_PERMISSION`: simulated permission answer (default: granted)
//! - `DEVICE_COLLECTOR_ORIGIN_LAT` / `DEVICE_COLLECTOR_ORIGIN_LON`: simulated origin
//! - `DEVICE_COLLECTOR_LOCATION_LATENCY_MS`: simulated fix latency (default: 200)
//! - `DEVICE_COLLECTOR_LOCATION_FAILURE_RATE`: probability a fix fails (default: 0.0)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use device_collector::client::{Flusher, HttpTransport};
use device_collector::config::Config;
use device_collector::controller::Controller;
use device_collector::location::SimulatedLocationProvider;

/// A console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!(
                "unknown command '{}' (expected start, stop, status or quit)",
                other
            )),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Device Collector...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                endpoint_url = %config.endpoint_url,
                permission = %config.location_permission,
                origin = %config.origin,
                autostart = config.autostart,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let transport = match HttpTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let flusher = Arc::new(Flusher::from_config(transport, &config));
    let provider = Arc::new(SimulatedLocationProvider::new(&config));

    let mut controller = Controller::launch(config.sampling.clone(), provider, flusher).await;

    if let Some(message) = controller.status_message() {
        println!("{}", message);
    }

    if config.autostart {
        controller.start();
    }

    info!("Device Collector ready. Commands: start, stop, status, quit.");
    run_console(&mut controller).await;

    info!("Initiating shutdown...");
    controller.stop();

    let stats = controller.flush_stats();
    info!(
        batches_sent = stats.batches_sent,
        batches_failed = stats.batches_failed,
        readings_sent = stats.readings_sent,
        unsent = controller.buffer().len(),
        "Device Collector stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Dispatch stdin commands until `quit` or Ctrl+C.
///
/// On stdin EOF the samplers keep running until Ctrl+C.
async fn run_console(controller: &mut Controller) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<Command>() {
                        Ok(Command::Quit) => break,
                        Ok(command) => execute(controller, command),
                        Err(e) => println!("{}", e),
                    },
                    Ok(None) => {
                        info!("Stdin closed, press Ctrl+C to stop");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read command");
                        stdin_open = false;
                    }
                }
            }

            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break;
            }
        }
    }
}

fn execute(controller: &mut Controller, command: Command) {
    match command {
        Command::Start => {
            controller.start();
        }
        Command::Stop => {
            controller.stop();
        }
        Command::Status => {
            println!(
                "state={} permission={} buffered={} location={}",
                controller.run_state(),
                controller.permission(),
                controller.buffer().len(),
                controller
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            );
            if let Some(message) = controller.status_message() {
                println!("{}", message);
            }
        }
        Command::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse::<Command>(), Ok(Command::Start));
        assert_eq!(" STOP \n".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("status".parse::<Command>(), Ok(Command::Status));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = "launch".parse::<Command>().unwrap_err();
        assert!(err.contains("launch"));
    }
}
