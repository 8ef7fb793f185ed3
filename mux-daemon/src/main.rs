mod cli;
mod config;
mod device;
mod dispatcher;
mod settime;
mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::Options;
use config::{DeviceIoConfig, DeviceKind};
use device::{Codec, Device, DeviceSpec};
use dispatcher::{EnqueueHandle, Queue};
use mux_codec::transport::{file, serial, stdio, tcp, Transport};
use settime::SetTimeDevice;
use supervisor::{open_watchdog, should_arm, Supervisor, WatchdogOpenError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_FATAL: i32 = 2;
const EXIT_PERMISSION_DENIED: i32 = 3;

/// How long after startup a device task dying counts as a config
/// smoke-test failure (exit 2) rather than an ordinary runtime fault
/// that the supervisor handles by withholding the watchdog pet.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

/// Every NMEA device re-transmits under this talker ID; `devices.json`
/// has no per-device talker field, so the multiplexer speaks for itself
/// the way a physical multiplexer box does.
const MUX_TALKER: &str = "II";

/// stderr at INFO by default (`RUST_LOG` overrides), plus one rolling
/// `main_log.log` file appender when `Logger.dir` is configured.
fn init_logging(
    logger: &config::LoggerConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = &logger.dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    };

    let appender = tracing_appender::rolling::never(dir, "main_log.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

fn build_transport(io: &DeviceIoConfig) -> Box<dyn Transport> {
    match io {
        DeviceIoConfig::TCPServer { port } => Box::new(tcp::TCPServer::new(*port)),
        DeviceIoConfig::TCPClient { host, port } => {
            Box::new(tcp::TCPClient::new(host.clone(), *port))
        }
        DeviceIoConfig::File { path } => Box::new(file::File::new(path.clone())),
        DeviceIoConfig::FileRewriter { path } => Box::new(file::FileRewriter::new(path.clone())),
        DeviceIoConfig::Serial { port, baud } => Box::new(serial::Serial::new(
            serial::SerialConfig::nmea(port.clone(), baud.unwrap_or(4800)),
        )),
        DeviceIoConfig::SeatalkSerial { port } => Box::new(serial::seatalk_serial(port.clone())),
        DeviceIoConfig::StdOutPrinter => Box::new(stdio::StdOutPrinter::new()),
        DeviceIoConfig::IO => unreachable!("SetTimeDevice never builds a transport"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let options = Options::parse();

    let app_config = match config::load_app_config(&options.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    let _log_guard = init_logging(&app_config.logger);

    let devices_config = match config::load_devices(&options.devices) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to load device graph");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let watchdog_handle = match open_watchdog(app_config.watchdog.enable) {
        Ok(handle) => handle,
        Err(WatchdogOpenError::PermissionDenied) => {
            error!("permission denied opening /dev/watchdog");
            std::process::exit(EXIT_PERMISSION_DENIED);
        }
        Err(WatchdogOpenError::Other(message)) => {
            tracing::warn!(%message, "watchdog device unavailable; running unarmed");
            None
        }
    };

    let mut app_config = app_config;
    if app_config.watchdog.enable {
        let (armed, new_count) = should_arm(
            app_config.watchdog.previous_resets,
            app_config.watchdog.max_resets,
        );
        app_config.watchdog.previous_resets = new_count;
        if let Err(e) = config::persist_app_config(&options.config, &app_config) {
            error!(error = %e, "failed to persist watchdog reset counter");
        }
        if !armed {
            // Bootloop guard tripped: keep running, but without arming
            // the hardware watchdog (supervisor::open_watchdog already
            // opened it above; drop it unpet so it never bites).
        }
    }

    // Build one dispatcher queue per device before constructing any
    // device, so observer names resolve regardless of declaration order.
    let mut queues: HashMap<String, Queue> = HashMap::new();
    let mut handles: HashMap<String, EnqueueHandle> = HashMap::new();
    let mut heartbeats: HashMap<String, Arc<std::sync::atomic::AtomicU64>> = HashMap::new();
    for (name, device_config) in &devices_config {
        let queue = Queue::new(
            dispatcher::DEFAULT_CAPACITY,
            Duration::from_secs(device_config.max_item_age as u64),
        );
        handles.insert(name.clone(), queue.handle());
        heartbeats.insert(name.clone(), supervisor::new_heartbeat());
        queues.insert(name.clone(), queue);
    }

    let mut join_set: tokio::task::JoinSet<()> = tokio::task::JoinSet::new();
    let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();
    let mut raw_log_guards = Vec::new();
    let device_count = devices_config.len();
    for (name, device_config) in devices_config {
        let queue = queues.remove(&name).expect("queue built above");
        let heartbeat = heartbeats[&name].clone();
        let observers: Vec<EnqueueHandle> = device_config
            .observers
            .iter()
            .map(|o| handles[o].clone())
            .collect();

        let abort_handle = match device_config.kind {
            DeviceKind::SetTimeDevice => {
                join_set.spawn(device::run_settime(queue, SetTimeDevice::new(), heartbeat))
            }
            DeviceKind::NMEADevice | DeviceKind::SeatalkDevice => {
                let transport = build_transport(&device_config.device_io);
                let codec = match device_config.kind {
                    DeviceKind::NMEADevice => Codec::Nmea {
                        talker: MUX_TALKER.to_string(),
                    },
                    DeviceKind::SeatalkDevice => Codec::Seatalk,
                    DeviceKind::SetTimeDevice => unreachable!(),
                };
                let raw_log = app_config.logger.dir.as_ref().map(|dir| {
                    let appender =
                        tracing_appender::rolling::never(dir, format!("{name}_raw.log"));
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    raw_log_guards.push(guard);
                    non_blocking
                });
                let spec = DeviceSpec {
                    name: name.clone(),
                    transport,
                    codec,
                    auto_flush: device_config.auto_flush,
                };
                let device = Device::new(spec, queue, observers, heartbeat, raw_log);
                join_set.spawn(device.run())
            }
        };
        task_names.insert(abort_handle.id(), name);
    }

    let timeout = Duration::from_secs(app_config.watchdog.timeout.unwrap_or(16));
    let (names, heartbeat_list): (Vec<String>, Vec<_>) = heartbeats.into_iter().unzip();
    let supervisor = Supervisor::new(names, heartbeat_list, timeout, watchdog_handle);
    let supervisor_handle = join_set.spawn(supervisor.run());
    task_names.insert(supervisor_handle.id(), "supervisor".to_string());

    info!(devices = device_count, "mux-daemon started");

    let start = std::time::Instant::now();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    // Device and supervisor tasks never return under normal operation
    // (their loops only end if every handle into their queue is
    // dropped, which only happens at shutdown). A task that exits on
    // its own before then either panicked or hit an unrecoverable
    // error; within `STARTUP_GRACE` of startup that's treated as a
    // config smoke-test failure (exit 2), per spec.md §7.
    let exit_code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT");
                break EXIT_OK;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break EXIT_OK;
            }
            joined = join_set.join_next_with_id() => {
                let Some(joined) = joined else {
                    // every task has already exited; nothing left to supervise
                    break EXIT_OK;
                };
                let (id, outcome) = match joined {
                    Ok((id, ())) => (id, Ok(())),
                    Err(e) => (e.id(), Err(e)),
                };
                let name = task_names.get(&id).cloned().unwrap_or_default();
                match outcome {
                    Ok(()) => error!(task = %name, "task exited unexpectedly"),
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => error!(task = %name, error = %e, "task panicked"),
                }
                if start.elapsed() < STARTUP_GRACE {
                    error!(task = %name, "device task died within the startup grace period");
                    break EXIT_RUNTIME_FATAL;
                }
                // Past the grace period this is the supervisor's problem:
                // it will stop petting the watchdog until the system
                // resets, per spec.md §4.6.
            }
        }
    };

    join_set.shutdown().await;
    std::process::exit(exit_code);
}
