//! The connectivity worker.
//!
//! A single thread owns the radios, both byte streams and the session, and
//! runs orchestrator, session and publisher one after another each cycle.
//! Other contexts talk to it through the publish channel and observe it
//! through [`StateHandle`] snapshots and [`LinkStats`].

use crate::at::{AtTransport, SerialPort};
use crate::config::Settings;
use crate::orchestrator::{CycleOutcome, Orchestrator};
use crate::probe::WifiLink;
use crate::session::{PublishOutcome, SessionLayer, SessionManager, SessionPublisher, SessionTick, Streams};
use crate::state::StateHandle;
use crate::status_server::LinkStats;
use crate::store::CredentialAdapter;
use crate::stream::ByteStream;
use crate::timing::Pacer;
use log::{debug, info};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Publish requests buffered before producers see `Full`.
pub const PUBLISH_QUEUE_DEPTH: usize = 8;

/// Payload to publish once the session allows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// `None` publishes to the configured telemetry topic.
    pub topic: Option<String>,
    pub payload: Vec<u8>,
}

impl PublishRequest {
    pub fn telemetry(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: None,
            payload: payload.into(),
        }
    }
}

/// Bounded channel feeding the worker.
pub fn publish_channel() -> (SyncSender<PublishRequest>, Receiver<PublishRequest>) {
    mpsc::sync_channel(PUBLISH_QUEUE_DEPTH)
}

/// What one worker cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub orchestrator: CycleOutcome,
    pub session: SessionTick,
    pub publish: Option<PublishOutcome>,
}

/// Physical links handed to the worker.
pub struct Links<W, S> {
    pub wifi: W,
    /// Stream used while WLAN is active.
    pub wifi_stream: Box<dyn ByteStream>,
    pub modem: AtTransport<S>,
}

pub struct ConnectivityWorker<W, S> {
    orchestrator: Orchestrator,
    links: Links<W, S>,
    session: SessionManager,
    publisher: SessionPublisher,
    telemetry_topic: String,
    requests: Receiver<PublishRequest>,
    pending: Option<PublishRequest>,
    stats: Arc<LinkStats>,
    pacer: Pacer,
    cycle_delay: Duration,
}

impl<W: WifiLink, S: SerialPort> ConnectivityWorker<W, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        state: StateHandle,
        credentials: CredentialAdapter,
        links: Links<W, S>,
        session: Box<dyn SessionLayer>,
        requests: Receiver<PublishRequest>,
        stats: Arc<LinkStats>,
        pacer: Pacer,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            settings.connectivity.clone(),
            state.clone(),
            credentials,
            pacer.clone(),
        );
        Self {
            orchestrator,
            links,
            session: SessionManager::new(settings.broker.clone(), state, session),
            publisher: SessionPublisher::new(settings.connectivity.publish_interval),
            telemetry_topic: settings.broker.publish_topic.clone(),
            requests,
            pending: None,
            stats,
            pacer,
            cycle_delay: settings.connectivity.cycle_delay,
        }
    }

    pub fn state(&self) -> &StateHandle {
        self.orchestrator.state()
    }

    /// Most recent message received on the subscribed topic.
    pub fn last_message(&self) -> Option<&str> {
        self.session.last_message()
    }

    /// Keep only the newest request; telemetry is a latest-value feed.
    fn collect_requests(&mut self) {
        loop {
            match self.requests.try_recv() {
                Ok(request) => {
                    if self.pending.replace(request).is_some() {
                        debug!("Superseded an unsent publish request");
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn publish_pending(&mut self) -> Option<PublishOutcome> {
        let request = self.pending.as_ref()?;
        let topic = request.topic.as_deref().unwrap_or(&self.telemetry_topic);
        let mut streams = Streams {
            wifi: &mut *self.links.wifi_stream,
            cellular: &mut self.links.modem,
        };
        let outcome = self.publisher.publish(
            self.pacer.now(),
            &mut self.session,
            &mut streams,
            topic,
            &request.payload,
        );
        match outcome {
            PublishOutcome::Published | PublishOutcome::Failed => {
                self.stats
                    .record_publish(outcome == PublishOutcome::Published);
                self.pending = None;
            }
            PublishOutcome::Throttled | PublishOutcome::NotConnected => {}
        }
        Some(outcome)
    }

    /// One full cycle: orchestrate, service the session, publish if allowed.
    pub fn run_once(&mut self) -> CycleReport {
        let orchestrator = self
            .orchestrator
            .run_cycle(&mut self.links.wifi, &mut self.links.modem);

        let session = self.session.tick(&mut Streams {
            wifi: &mut *self.links.wifi_stream,
            cellular: &mut self.links.modem,
        });
        if session == SessionTick::Opened {
            self.stats.record_session_open();
        }

        self.collect_requests();
        let publish = self.publish_pending();

        self.stats
            .rx_dropped
            .store(self.links.modem.rx_dropped(), Ordering::Relaxed);
        self.pacer.feed();

        CycleReport {
            orchestrator,
            session,
            publish,
        }
    }

    /// Cycle until `cancel` fires. Checked once per cycle.
    pub fn run(mut self, cancel: CancellationToken) {
        info!("Connectivity worker started");
        while !cancel.is_cancelled() {
            self.run_once();
            self.pacer.pause(self.cycle_delay);
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        info!("Connectivity worker stopping");
        self.links.wifi_stream.stop();
        self.links.modem.stop();
        self.links.wifi.disconnect();
        self.orchestrator.state().set_session_connected(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AtTimeouts, CellularCredentials, WifiField};
    use crate::session::LineSession;
    use crate::state::ActiveTransport;
    use crate::store::MemoryStore;
    use crate::testing::{manual_pacer, FakeWifi, MemoryStream, ScriptedSerial};

    fn worker(wifi: FakeWifi) -> (ConnectivityWorker<FakeWifi, ScriptedSerial>, SyncSender<PublishRequest>, Arc<LinkStats>) {
        let (pacer, _, _) = manual_pacer();
        let credentials = CredentialAdapter::new(MemoryStore::new());
        credentials.set_wifi_credential(WifiField::Ssid, "FieldNet").unwrap();
        credentials
            .set_wifi_credential(WifiField::Password, "hunter22")
            .unwrap();
        credentials.take_wifi_changed();

        let settings = Settings {
            at: AtTimeouts {
                registration_attempts: 2,
                ..AtTimeouts::default()
            },
            ..Settings::default()
        };
        // silent modem: every cellular probe times out
        let modem = AtTransport::new(
            ScriptedSerial::new(),
            pacer.clone(),
            settings.at.clone(),
            CellularCredentials::default(),
        );
        let links = Links {
            wifi,
            wifi_stream: Box::new(MemoryStream::default()),
            modem,
        };
        let (tx, rx) = publish_channel();
        let stats = Arc::new(LinkStats::new());
        let worker = ConnectivityWorker::new(
            &settings,
            StateHandle::new(),
            credentials,
            links,
            Box::new(LineSession::new()),
            rx,
            stats.clone(),
            pacer,
        );
        (worker, tx, stats)
    }

    #[test]
    fn test_cycle_selects_wifi_and_publishes() {
        let (mut worker, tx, stats) = worker(FakeWifi::in_range(-60));
        tx.send(PublishRequest::telemetry(r#"{"uptime":1}"#)).unwrap();

        let report = worker.run_once();
        assert!(matches!(
            report.orchestrator,
            CycleOutcome::Probed { changed: true, .. }
        ));
        assert_eq!(report.session, SessionTick::Opened);
        assert_eq!(report.publish, Some(PublishOutcome::Published));

        let state = worker.state().snapshot();
        assert_eq!(state.active_transport, ActiveTransport::Wifi);
        assert!(state.session_connected);
        assert_eq!(stats.publishes_ok.load(Ordering::Relaxed), 1);
        assert_eq!(stats.session_opens.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_second_request_waits_for_window() {
        let (mut worker, tx, stats) = worker(FakeWifi::in_range(-60));
        tx.send(PublishRequest::telemetry("a")).unwrap();
        worker.run_once();

        tx.send(PublishRequest::telemetry("b")).unwrap();
        let report = worker.run_once();
        assert_eq!(report.session, SessionTick::Serviced);
        assert_eq!(report.publish, Some(PublishOutcome::Throttled));
        assert_eq!(stats.publishes_ok.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_no_transport_keeps_request_pending() {
        let (mut worker, tx, stats) = worker(FakeWifi::out_of_range());
        tx.send(PublishRequest::telemetry("a")).unwrap();

        let report = worker.run_once();
        assert_eq!(
            report.orchestrator,
            CycleOutcome::Probed {
                selection: crate::orchestrator::Selection {
                    transport: ActiveTransport::None,
                    rule: crate::orchestrator::SelectionRule::NoneAvailable,
                },
                changed: false,
            }
        );
        assert_eq!(report.session, SessionTick::Unbound);
        assert_eq!(report.publish, Some(PublishOutcome::NotConnected));
        assert!(worker.pending.is_some());
        assert_eq!(stats.publishes_ok.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_newest_request_wins() {
        let (mut worker, tx, _) = worker(FakeWifi::out_of_range());
        tx.send(PublishRequest::telemetry("old")).unwrap();
        tx.send(PublishRequest::telemetry("new")).unwrap();

        worker.run_once();
        assert_eq!(
            worker.pending,
            Some(PublishRequest::telemetry("new"))
        );
    }

    #[test]
    fn test_cancelled_run_leaves_session_down() {
        let (worker, _tx, _) = worker(FakeWifi::in_range(-60));
        let state = worker.state().clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        worker.run(cancel);
        assert!(!state.snapshot().session_connected);
    }
}
