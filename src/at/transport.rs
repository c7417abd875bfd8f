//! Virtual TCP socket on top of a SIM800-class modem.
//!
//! The transport speaks the modem's TCP/IP command set in manual-receive mode:
//! inbound data stays in the modem until fetched with `AT+CIPRXGET=2,<n>` and
//! lands in a local [`RingBuffer`]. Outbound data goes out through
//! `AT+CIPSEND=<n>` after the `>` prompt.
//!
//! Only one socket exists at a time. Every step of every operation has its own
//! timeout, `connect` additionally runs under an overall budget, and failures
//! are reported rather than retried.

use super::channel::{AtChannel, AtError};
use super::response::{parse_csq, parse_ip, Registration};
use super::ring::{RingBuffer, DEFAULT_RX_CAPACITY};
use super::serial::SerialPort;
use crate::config::{AtTimeouts, CellularCredentials};
use crate::probe::{CellularLink, SignalResult};
use crate::stream::ByteStream;
use crate::timing::Pacer;
use log::{debug, info, warn};
use std::fmt;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Largest payload handed to a single `AT+CIPSEND`.
pub const MAX_SEND_CHUNK: usize = 1024;

/// Largest amount requested by a single `AT+CIPRXGET=2`.
pub const MAX_RX_FETCH: usize = 256;

/// Lifecycle of the modem connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Nothing attempted yet, or the modem was just restarted.
    Idle,
    /// Talking to the modem, checking SIM and registration.
    Handshaking,
    /// GPRS attach, APN and bring-up.
    Attaching,
    /// TCP socket established.
    SocketOpen,
    /// Socket gone (stopped, failed, or closed by the peer).
    Closed,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Attaching => "attaching",
            Self::SocketOpen => "socket-open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Byte-stream client over AT commands.
pub struct AtTransport<S> {
    channel: AtChannel<S>,
    timeouts: AtTimeouts,
    credentials: CellularCredentials,
    phase: LinkPhase,
    /// A PDP context may be up and needs `AT+CIPSHUT` before the next bring-up.
    context_active: bool,
    rx: RingBuffer,
    local_ip: Option<String>,
}

impl<S: SerialPort> AtTransport<S> {
    pub fn new(
        port: S,
        pacer: Pacer,
        timeouts: AtTimeouts,
        credentials: CellularCredentials,
    ) -> Self {
        Self {
            channel: AtChannel::new(port, pacer),
            timeouts,
            credentials,
            phase: LinkPhase::Idle,
            context_active: false,
            rx: RingBuffer::new(DEFAULT_RX_CAPACITY),
            local_ip: None,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Address assigned by the network during the last bring-up.
    pub fn local_ip(&self) -> Option<&str> {
        self.local_ip.as_deref()
    }

    /// Bytes dropped because the receive ring was full.
    pub fn rx_dropped(&self) -> u64 {
        self.rx.dropped()
    }

    /// Replace the APN credentials used by the next `connect`.
    pub fn update_credentials(&mut self, credentials: CellularCredentials) {
        self.credentials = credentials;
    }

    /// Pick up a peer close reported since the last command.
    fn sync_peer_state(&mut self) {
        if self.channel.take_peer_closed() && self.phase == LinkPhase::SocketOpen {
            info!("Cellular socket closed by peer");
            self.phase = LinkPhase::Closed;
        }
    }

    /// Timeout for one step: its own limit, capped by the overall deadline.
    fn step(&self, limit: Duration, deadline: Instant) -> Result<Duration, AtError> {
        let left = self.channel.pacer().remaining(deadline);
        if left.is_zero() {
            return Err(AtError::Timeout {
                command: "connect budget".to_string(),
            });
        }
        Ok(limit.min(left))
    }

    /// Liveness check with echo disabled.
    fn handshake(&mut self, deadline: Instant) -> Result<(), AtError> {
        let t = self.step(self.timeouts.command, deadline)?;
        self.channel.command("AT", t)?;
        let t = self.step(self.timeouts.command, deadline)?;
        self.channel.command("ATE0", t)?;
        Ok(())
    }

    /// Poll `AT+CREG?` until home or roaming, within the attempt limit.
    fn wait_registered(&mut self, deadline: Instant) -> Result<Registration, AtError> {
        let attempts = self.timeouts.registration_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            let t = self.step(self.timeouts.command, deadline)?;
            let text = self.channel.command("AT+CREG?", t)?;
            let status = Registration::parse_creg(&text);
            if let Some(reg) = status.filter(|r| r.is_registered()) {
                debug!("Registered ({:?}) after {} attempt(s)", reg, attempt);
                return Ok(reg);
            }
            last = status;
            if attempt < attempts {
                let pause = self.step(self.timeouts.registration_interval, deadline)?;
                self.channel.pacer().pause(pause);
            }
        }
        debug!("Not registered after {} attempts: {:?}", attempts, last);
        Err(AtError::NotRegistered)
    }

    /// Full bring-up and TCP open.
    pub fn try_connect(&mut self, host: &str, port: u16) -> Result<(), AtError> {
        if self.phase == LinkPhase::SocketOpen {
            debug!("Replacing open cellular socket");
            self.stop();
        }
        self.rx.clear();
        self.local_ip = None;

        let deadline = self.channel.pacer().deadline(self.timeouts.connect_budget);
        match self.run_connect(host, port, deadline) {
            Ok(()) => {
                self.phase = LinkPhase::SocketOpen;
                info!(
                    "Cellular socket open to {}:{} (local IP {})",
                    host,
                    port,
                    self.local_ip.as_deref().unwrap_or("?")
                );
                Ok(())
            }
            Err(e) => {
                self.phase = LinkPhase::Closed;
                warn!("Cellular connect to {}:{} failed: {}", host, port, e);
                Err(e)
            }
        }
    }

    fn run_connect(&mut self, host: &str, port: u16, deadline: Instant) -> Result<(), AtError> {
        self.phase = LinkPhase::Handshaking;
        self.handshake(deadline)?;

        let t = self.step(self.timeouts.command, deadline)?;
        let sim = self.channel.command("AT+CPIN?", t)?;
        if !sim.contains("+CPIN: READY") {
            return Err(AtError::Rejected {
                command: "AT+CPIN?".to_string(),
                response: sim,
            });
        }

        self.wait_registered(deadline)?;

        self.phase = LinkPhase::Attaching;
        if self.context_active {
            // CSTT is only accepted from the initial IP state
            let t = self.step(self.timeouts.shut, deadline)?;
            self.channel
                .exchange("AT+CIPSHUT", &["SHUT OK"], &["ERROR"], t)?;
            self.context_active = false;
        }

        let t = self.step(self.timeouts.attach, deadline)?;
        self.channel.command("AT+CGATT=1", t)?;

        let apn = Zeroizing::new(format!(
            "AT+CSTT=\"{}\",\"{}\",\"{}\"",
            self.credentials.apn, self.credentials.user, self.credentials.password
        ));
        let t = self.step(self.timeouts.command, deadline)?;
        self.context_active = true;
        self.channel.command(&apn, t)?;

        let t = self.step(self.timeouts.bring_up, deadline)?;
        self.channel.command("AT+CIICR", t)?;

        let t = self.step(self.timeouts.command, deadline)?;
        self.channel.drain()?;
        self.channel.send("AT+CIFSR")?;
        let ip = self.channel.expect_parsed(parse_ip, &["ERROR"], t)?;
        self.local_ip = Some(ip);

        let t = self.step(self.timeouts.command, deadline)?;
        self.channel.command("AT+CIPRXGET=1", t)?;

        let t = self.step(self.timeouts.tcp_open, deadline)?;
        self.channel.drain()?;
        // a CLOSED left over from an earlier socket must not close this one
        self.channel.take_peer_closed();
        self.channel
            .send(&format!("AT+CIPSTART=\"TCP\",\"{}\",{}", host, port))?;
        self.channel.expect(
            &["CONNECT OK", "ALREADY CONNECT"],
            &["CONNECT FAIL", "ERROR"],
            t,
        )?;
        Ok(())
    }

    /// Send `buf`, returning the byte count once every chunk is acknowledged.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, AtError> {
        self.sync_peer_state();
        if self.phase != LinkPhase::SocketOpen {
            return Err(AtError::NotConnected);
        }
        for chunk in buf.chunks(MAX_SEND_CHUNK) {
            let result = self.send_chunk(chunk);
            self.sync_peer_state();
            result?;
        }
        Ok(buf.len())
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), AtError> {
        self.channel.exchange(
            &format!("AT+CIPSEND={}", chunk.len()),
            &[">"],
            &["ERROR"],
            self.timeouts.send_prompt,
        )?;
        self.channel.write_raw(chunk)?;
        self.channel
            .expect(&["SEND OK"], &["SEND FAIL", "ERROR"], self.timeouts.send_ack)?;
        Ok(())
    }

    /// One bounded fetch from the modem's receive buffer into the ring.
    fn fill(&mut self) -> Result<usize, AtError> {
        let want = self.rx.free().min(MAX_RX_FETCH);
        if want == 0 {
            return Ok(0);
        }
        self.channel.drain()?;
        self.channel.send(&format!("AT+CIPRXGET=2,{}", want))?;
        let payload = self.channel.receive_payload(want, self.timeouts.rx_fetch)?;
        Ok(self.rx.push(&payload))
    }

    /// Buffered byte count, fetching once from the modem when the ring is empty.
    pub fn buffered(&mut self) -> usize {
        if self.rx.is_empty() && self.phase == LinkPhase::SocketOpen {
            if let Err(e) = self.fill() {
                debug!("Cellular receive fetch failed: {}", e);
            }
            self.sync_peer_state();
        }
        self.rx.len()
    }

    /// Copy buffered bytes out. Never talks to the modem.
    pub fn read_buffered(&mut self, buf: &mut [u8]) -> usize {
        self.rx.pop_into(buf)
    }

    /// Close the socket and the PDP context, best effort.
    ///
    /// Local state is cleared whatever the modem says; calling it again is a
    /// no-op.
    pub fn stop(&mut self) {
        if self.phase == LinkPhase::SocketOpen {
            if let Err(e) = self.channel.exchange(
                "AT+CIPCLOSE",
                &["CLOSE OK"],
                &["ERROR"],
                self.timeouts.close,
            ) {
                debug!("CIPCLOSE: {}", e);
            }
        }
        if self.context_active {
            if let Err(e) =
                self.channel
                    .exchange("AT+CIPSHUT", &["SHUT OK"], &["ERROR"], self.timeouts.shut)
            {
                debug!("CIPSHUT: {}", e);
            }
        }
        if self.phase != LinkPhase::Idle {
            self.phase = LinkPhase::Closed;
        }
        self.context_active = false;
        self.rx.clear();
        self.local_ip = None;
        self.channel.take_peer_closed();
    }

    /// Full functionality reset (`AT+CFUN=1,1`), then wait for the modem to answer.
    pub fn try_restart(&mut self) -> Result<(), AtError> {
        info!("Restarting modem");
        self.phase = LinkPhase::Idle;
        self.context_active = false;
        self.rx.clear();
        self.local_ip = None;

        // the modem may reset before its OK makes it out
        if let Err(e) = self.channel.command("AT+CFUN=1,1", self.timeouts.command) {
            debug!("CFUN reset: {}", e);
        }
        self.channel.pacer().pause(self.timeouts.restart_settle);
        self.channel.take_peer_closed();
        self.channel.command("AT", self.timeouts.command)?;
        Ok(())
    }

    /// Liveness, registration, then `AT+CSQ`.
    pub fn signal_quality(&mut self) -> Result<u8, AtError> {
        let t = &self.timeouts;
        let budget = t.command * (t.registration_attempts + 2)
            + t.registration_interval * t.registration_attempts;
        let deadline = self.channel.pacer().deadline(budget);

        let step = self.step(t.command, deadline)?;
        self.channel.command("AT", step)?;
        self.wait_registered(deadline)?;
        let step = self.step(self.timeouts.command, deadline)?;
        let text = self.channel.command("AT+CSQ", step)?;
        parse_csq(&text).ok_or_else(|| AtError::Desync(format!("bad CSQ reply {:?}", text.trim())))
    }
}

impl<S: SerialPort> ByteStream for AtTransport<S> {
    fn connect(&mut self, host: &str, port: u16) -> bool {
        self.try_connect(host, port).is_ok()
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        match self.try_write(buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("Cellular write of {} bytes failed: {}", buf.len(), e);
                0
            }
        }
    }

    fn available(&mut self) -> usize {
        self.buffered()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.read_buffered(buf)
    }

    fn stop(&mut self) {
        AtTransport::stop(self)
    }

    fn connected(&self) -> bool {
        self.phase == LinkPhase::SocketOpen
    }
}

impl<S: SerialPort> CellularLink for AtTransport<S> {
    fn probe_cellular(&mut self) -> SignalResult {
        match self.signal_quality() {
            Ok(csq) if (1..=31).contains(&csq) => SignalResult::Measured(i32::from(csq)),
            Ok(csq) => {
                debug!("CSQ {} is not a usable signal", csq);
                SignalResult::Unavailable
            }
            Err(e) => {
                debug!("Cellular probe failed: {}", e);
                SignalResult::Unavailable
            }
        }
    }

    fn set_credentials(&mut self, credentials: CellularCredentials) {
        self.update_credentials(credentials);
    }

    fn restart(&mut self) -> Result<(), AtError> {
        self.try_restart()
    }
}
