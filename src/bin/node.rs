//! FieldLink node binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin node` (USB modem auto-detected, WLAN simulated)
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//!
//! The connectivity worker runs on a blocking thread; telemetry is produced
//! by an async task and handed over through the publish channel.
//!
//! ## Console Commands
//!
//! Connect via serial monitor (or use the terminal on host) and type:
//! - `set <field> <value>` - Store a credential
//! - `status` - Show connectivity status
//! - `help` - Show help
//!
//! ## Endpoints
//!
//! - Status: http://localhost:8080/status (when `status_port` is set)

use fieldlink_esp32::at::AtTransport;
use fieldlink_esp32::config::Settings;
use fieldlink_esp32::provisioning::console;
use fieldlink_esp32::session::LineSession;
use fieldlink_esp32::worker::{PublishRequest, PUBLISH_QUEUE_DEPTH};
use fieldlink_esp32::{
    publish_channel, ByteStream, ConnectivityWorker, CredentialAdapter, LinkStats, Links, Pacer,
    SerialPort, StateHandle, StatusServer, TcpClient, WifiLink,
};
use log::{debug, error, info, warn};
use std::io::{BufRead, Write};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[allow(clippy::too_many_arguments)]
fn build_worker<W: WifiLink, S: SerialPort>(
    settings: &Settings,
    state: StateHandle,
    credentials: CredentialAdapter,
    wifi: W,
    port: S,
    requests: Receiver<PublishRequest>,
    stats: Arc<LinkStats>,
    pacer: Pacer,
) -> ConnectivityWorker<W, S> {
    let cellular = credentials.load_cellular().unwrap_or_else(|e| {
        warn!("Could not load cellular credentials, using defaults: {}", e);
        Default::default()
    });
    let modem = AtTransport::new(port, pacer.clone(), settings.at.clone(), cellular);
    let wifi_stream: Box<dyn ByteStream> = Box::new(TcpClient::new(pacer.clone()));
    ConnectivityWorker::new(
        settings,
        state,
        credentials,
        Links {
            wifi,
            wifi_stream,
            modem,
        },
        Box::new(LineSession::new().with_pacer(pacer.clone())),
        requests,
        stats,
        pacer,
    )
}

/// Read console lines on a detached thread; it ends with the process.
fn spawn_console(credentials: CredentialAdapter, state: StateHandle) {
    let result = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                println!("{}", console::handle_line(&line, &credentials, &state));
                print!("> ");
                let _ = std::io::stdout().flush();
            }
        });
    if let Err(e) = result {
        warn!("Console unavailable: {}", e);
    }
}

/// Queue an uptime report every publish interval until cancelled.
async fn telemetry(
    requests: SyncSender<PublishRequest>,
    state: StateHandle,
    stats: Arc<LinkStats>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                let snapshot = state.snapshot();
                let payload = format!(
                    r#"{{"uptime_secs":{},"transport":"{}","signal_bars":{}}}"#,
                    stats.uptime_secs(),
                    snapshot.active_transport,
                    snapshot.signal_bars()
                );
                match requests.try_send(PublishRequest::telemetry(payload)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("Publish queue full ({} requests), skipping", PUBLISH_QUEUE_DEPTH)
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
}

fn start_status_server(
    settings: &Settings,
    state: &StateHandle,
    stats: &Arc<LinkStats>,
) -> Option<StatusServer> {
    let port = settings.status_port?;
    match StatusServer::start(None, port, state.clone(), stats.clone()) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("Failed to start status server: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "esp32"))]
async fn run() -> Result<(), BoxError> {
    use fieldlink_esp32::at::{find_modem_port, HostSerial, Unplugged, DEFAULT_BAUD};
    use fieldlink_esp32::config::file::load_settings;
    use fieldlink_esp32::store::{JsonFileStore, MemoryStore};
    use fieldlink_esp32::wifi::HostWifi;

    info!("Platform: Host");

    let (settings, host) = load_settings()?;
    settings.validate()?;

    let credentials = match JsonFileStore::open_default() {
        Ok(store) => {
            info!("Credentials file: {}", store.path().display());
            CredentialAdapter::new(store)
        }
        Err(e) => {
            warn!("No credentials file ({}), using memory store", e);
            CredentialAdapter::new(MemoryStore::new())
        }
    };

    let port: Box<dyn SerialPort> = match host.modem_port.clone().or_else(find_modem_port) {
        Some(path) => match HostSerial::open(&path, host.modem_baud.unwrap_or(DEFAULT_BAUD)) {
            Ok(serial) => Box::new(serial),
            Err(e) => {
                warn!("Cannot open modem port {}: {}", path, e);
                Box::new(Unplugged)
            }
        },
        None => {
            info!("No modem found, cellular disabled");
            Box::new(Unplugged)
        }
    };

    let state = StateHandle::new();
    let stats = Arc::new(LinkStats::new());
    let _status_server = start_status_server(&settings, &state, &stats);
    spawn_console(credentials.clone(), state.clone());

    let (tx, rx) = publish_channel();
    let worker = build_worker(
        &settings,
        state.clone(),
        credentials,
        HostWifi::new(host.wifi_rssi),
        port,
        rx,
        stats.clone(),
        Pacer::system(),
    );

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let mut worker_task = tokio::task::spawn_blocking(move || worker.run(worker_cancel));
    let telemetry_task = tokio::spawn(telemetry(
        tx,
        state,
        stats,
        settings.connectivity.publish_interval,
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            cancel.cancel();
            if let Err(e) = (&mut worker_task).await {
                error!("Worker task error: {}", e);
            }
        }
        result = &mut worker_task => {
            if let Err(e) = result {
                error!("Worker task error: {}", e);
            }
            cancel.cancel();
        }
    }
    let _ = telemetry_task.await;
    Ok(())
}

#[cfg(feature = "esp32")]
async fn run() -> Result<(), BoxError> {
    use esp32_nimble::BLEDevice;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use fieldlink_esp32::at::UartSerial;
    use fieldlink_esp32::provisioning::ProvisioningService;
    use fieldlink_esp32::store::NvsStore;
    use fieldlink_esp32::timing::{SystemClock, TaskWatchdog};
    use fieldlink_esp32::wifi::EspWifiLink;

    info!("Platform: ESP32");

    let settings = Settings::default();
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let credentials = CredentialAdapter::new(NvsStore::new(nvs.clone()));
    let wifi = EspWifiLink::new(peripherals.modem, sysloop, Some(nvs))?;
    let port = UartSerial::new(
        peripherals.uart2,
        peripherals.pins.gpio17,
        peripherals.pins.gpio16,
    )?;

    let ble = BLEDevice::take();
    let _provisioning = ProvisioningService::new(ble.get_server(), credentials.clone());
    if let Err(e) = ProvisioningService::start_advertising() {
        warn!("BLE advertising failed: {:?}", e);
    }

    let state = StateHandle::new();
    let stats = Arc::new(LinkStats::new());
    let _status_server = start_status_server(&settings, &state, &stats);
    spawn_console(credentials.clone(), state.clone());

    let (tx, rx) = publish_channel();
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let worker_settings = settings.clone();
    let worker_state = state.clone();
    let worker_stats = stats.clone();
    let worker_task = tokio::task::spawn_blocking(move || {
        // the watchdog must be subscribed from the thread that feeds it
        let pacer = match TaskWatchdog::subscribe_current() {
            Ok(watchdog) => Pacer::new(Arc::new(SystemClock), Arc::new(watchdog)),
            Err(e) => {
                warn!("Task watchdog unavailable: {:?}", e);
                Pacer::system()
            }
        };
        build_worker(
            &worker_settings,
            worker_state,
            credentials,
            wifi,
            port,
            rx,
            worker_stats,
            pacer,
        )
        .run(worker_cancel)
    });
    let telemetry_task = tokio::spawn(telemetry(
        tx,
        state,
        stats,
        settings.connectivity.publish_interval,
        cancel.clone(),
    ));

    if let Err(e) = worker_task.await {
        error!("Worker task error: {}", e);
    }
    cancel.cancel();
    let _ = telemetry_task.await;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== FieldLink node starting ===");

    if let Err(e) = run().await {
        error!("Node failed: {}", e);
        std::process::exit(1);
    }

    info!("Shutdown complete");
}
