//! Per-device session: identifier resolution, availability and verbs.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use log::{debug, warn};
use serde::Serialize;
use serde_json::{Value, json};
use strum_macros::Display;

use crate::command::{Command, PING_FRAME, Target, validate_identifier};
use crate::config::ClientConfig;
use crate::errors::Error;
use crate::history::{MessageHistory, MessageType};
use crate::response::{DeviceDescriptor, Response, decode, decode_ping};
use crate::runtime::Mutex;
use crate::state::LightState;
use crate::transport::{Datagram, Transport};
use crate::types::{Color, ColorTemperature};

type Result<T> = std::result::Result<T, Error>;

/// Where a session stands in resolving its device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No identifier known; the next verb pings the device first.
    Unresolved,
    /// A ping is in flight; verbs fail fast until it settles.
    Resolving,
    /// The identifier is known and verbs go straight to the device.
    Connected,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    sid: Option<String>,
    /// Identifier supplied by configuration rather than discovered.
    configured: bool,
    connected: bool,
    failures: u32,
    last_state: Option<LightState>,
    last_lit: Option<LightState>,
}

impl SessionState {
    fn remember(&mut self, state: LightState) {
        self.last_state = Some(state);
        if state.enabled() {
            self.last_lit = Some(state);
        }
    }
}

/// Resets an abandoned resolution back to [`Phase::Unresolved`].
struct ResolveGuard<'a> {
    state: &'a StdMutex<SessionState>,
    armed: bool,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.phase == Phase::Resolving {
                state.phase = Phase::Unresolved;
            }
        }
    }
}

/// One physical DoHome device.
///
/// A session owns the device's identifier (`sid`) and availability, and turns
/// the verbs below into single request/reply exchanges on a shared
/// [`Transport`]. Sessions live as long as the caller keeps them; failures
/// only mark them unavailable.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use dohome_rs::{ClientConfig, Color, DeviceSession, UdpTransport};
///
/// let transport = Arc::new(UdpTransport::bind_any().await?);
/// let config = ClientConfig::default();
/// let light = DeviceSession::new(config.device_address("192.168.1.40".parse()?), transport, config);
///
/// light.set_rgb(Color::rgb(255, 0, 0), 255).await?;
/// let state = light.get_state().await?;
/// ```
pub struct DeviceSession<T: Transport> {
    address: SocketAddr,
    transport: Arc<T>,
    config: ClientConfig,
    state: StdMutex<SessionState>,
    history: Mutex<MessageHistory>,
}

impl<T: Transport> DeviceSession<T> {
    /// A session whose identifier is discovered by pinging the device.
    pub fn new(address: SocketAddr, transport: Arc<T>, config: ClientConfig) -> Self {
        let history = MessageHistory::with_max_entries(config.history_size);
        DeviceSession {
            address,
            transport,
            config,
            state: StdMutex::new(SessionState {
                phase: Phase::Unresolved,
                sid: None,
                configured: false,
                connected: false,
                failures: 0,
                last_state: None,
                last_lit: None,
            }),
            history: Mutex::new(history),
        }
    }

    /// A session for a device whose identifier is already known.
    pub fn with_identifier(
        address: SocketAddr,
        sid: &str,
        transport: Arc<T>,
        config: ClientConfig,
    ) -> Result<Self> {
        let session = Self::new(address, transport, config);
        session.assign_identifier(sid)?;
        Ok(session)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn identifier(&self) -> Option<String> {
        self.lock_state().sid.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    /// Whether the identifier is resolved and the last exchange succeeded.
    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    /// The state last read from, or successfully applied to, the device.
    pub fn last_state(&self) -> Option<LightState> {
        self.lock_state().last_state
    }

    /// Fix the identifier, e.g. from configuration or LAN discovery.
    ///
    /// An assigned identifier is never dropped after failures.
    pub fn assign_identifier(&self, sid: &str) -> Result<()> {
        validate_identifier(sid)?;
        let mut state = self.lock_state();
        state.sid = Some(sid.to_string());
        state.configured = true;
        state.phase = Phase::Connected;
        state.connected = true;
        state.failures = 0;
        Ok(())
    }

    /// Resolve the identifier if needed and return it.
    ///
    /// Pings the device when unresolved. Fails fast with [`Error::Resolving`]
    /// while another resolution for this session is in flight.
    pub async fn connect(&self) -> Result<String> {
        {
            let mut state = self.lock_state();
            if let (Phase::Connected, Some(sid)) = (state.phase, state.sid.as_ref()) {
                return Ok(sid.clone());
            }
            if state.phase == Phase::Resolving {
                return Err(Error::Resolving(self.address));
            }
            state.phase = Phase::Resolving;
        }

        let mut guard = ResolveGuard {
            state: &self.state,
            armed: true,
        };
        let result = self.ping().await;
        guard.armed = false;

        match result {
            Ok(descriptor) => {
                debug!(
                    "resolved {} as {} ({})",
                    self.address, descriptor.sid, descriptor.name
                );
                let mut state = self.lock_state();
                state.sid = Some(descriptor.sid.clone());
                state.phase = Phase::Connected;
                state.connected = true;
                state.failures = 0;
                Ok(descriptor.sid)
            }
            Err(e) => {
                debug!("resolving {} failed: {}", self.address, e);
                {
                    let mut state = self.lock_state();
                    state.phase = Phase::Unresolved;
                    state.connected = false;
                }
                self.history.lock().await.record_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Reads the current output from the device (command 25).
    pub async fn get_state(&self) -> Result<LightState> {
        let response = self.execute(&Command::get_state()).await?;
        let channels = match response.channels() {
            Ok(channels) => channels,
            Err(e) => {
                self.mark_failure(&e).await;
                return Err(e);
            }
        };
        let state = LightState::from_channels(&channels);
        self.lock_state().remember(state);
        Ok(state)
    }

    /// Shows `color` scaled by `brightness / 255`.
    pub async fn set_rgb(&self, color: Color, brightness: u8) -> Result<LightState> {
        self.apply(&LightState::rgb(color, brightness)).await
    }

    /// Shows white light at `temperature` scaled by `brightness / 255`.
    pub async fn set_white(
        &self,
        temperature: ColorTemperature,
        brightness: u8,
    ) -> Result<LightState> {
        self.apply(&LightState::white(temperature, brightness)).await
    }

    /// Sets every channel to zero.
    pub async fn turn_off(&self) -> Result<LightState> {
        self.apply(&LightState::off()).await
    }

    /// Restores the last lit state, or neutral white at full brightness.
    pub async fn turn_on(&self) -> Result<LightState> {
        let state = self
            .lock_state()
            .last_lit
            .unwrap_or_else(|| LightState::white(ColorTemperature::NEUTRAL, u8::MAX));
        self.apply(&state).await
    }

    /// Sends the channels that realize `state` (command 6).
    pub async fn apply(&self, state: &LightState) -> Result<LightState> {
        self.execute(&Command::set_state(state.to_channels())?)
            .await?;
        self.lock_state().remember(*state);
        Ok(*state)
    }

    /// Sends `command` to this device and waits for the reply that echoes it.
    ///
    /// Replies from other hosts, undecodable replies and replies to other
    /// commands are skipped while the window is open.
    pub async fn execute(&self, command: &Command) -> Result<Response> {
        let sid = self.connect().await?;
        let frame = command.encode(&Target::device(&sid)?)?;

        debug!("command to {}: {}", self.address, frame);
        self.history
            .lock()
            .await
            .record(MessageType::Send, Some(command.code()), &frame);

        let mut accepted = None;
        let mut rejected: Option<Error> = None;
        let mut received = Vec::new();

        let exchanged = self
            .transport
            .exchange(
                self.address,
                &frame,
                self.config.command_timeout,
                |datagram: Datagram| {
                    if datagram.source.ip() != self.address.ip() {
                        debug!("ignoring reply from {}", datagram.source);
                        return ControlFlow::Continue(());
                    }
                    let text = String::from_utf8_lossy(&datagram.bytes).into_owned();
                    match decode(&datagram.bytes).and_then(|r| r.ensure_answers(command)) {
                        Ok(response) => {
                            received.push((Some(response.code()), text));
                            accepted = Some(response);
                            ControlFlow::Break(())
                        }
                        Err(e) => {
                            debug!("discarding reply from {}: {}", self.address, e);
                            received.push((None, text));
                            if rejected.is_none() || matches!(e, Error::MalformedReply(_)) {
                                rejected = Some(e);
                            }
                            ControlFlow::Continue(())
                        }
                    }
                },
            )
            .await;

        {
            let mut history = self.history.lock().await;
            for (code, text) in &received {
                history.record(MessageType::Receive, *code, text);
            }
        }

        let outcome = exchanged.and_then(|_| {
            accepted.ok_or_else(|| {
                rejected.unwrap_or_else(|| {
                    Error::timeout(self.address, self.config.command_timeout)
                })
            })
        });

        match outcome {
            Ok(response) => {
                debug!("result from {}: {:?}", self.address, response.payload());
                self.mark_success();
                Ok(response)
            }
            Err(e) => {
                self.mark_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Diagnostics including identity, availability, state and history.
    pub async fn diagnostics(&self) -> Value {
        let (sid, phase, connected, failures, last_state) = {
            let state = self.lock_state();
            (
                state.sid.clone(),
                state.phase,
                state.connected,
                state.failures,
                state.last_state,
            )
        };
        let history = self.history.lock().await;
        json!({
            "address": self.address.to_string(),
            "sid": sid,
            "phase": phase.to_string(),
            "connected": connected,
            "consecutive_failures": failures,
            "last_state": last_state,
            "history": serde_json::to_value(history.summary()).unwrap_or(Value::Null),
        })
    }

    pub async fn history(&self) -> MessageHistory {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Record a state observed through a group exchange.
    pub(crate) fn observe(&self, state: LightState) {
        self.mark_success();
        self.lock_state().remember(state);
    }

    pub(crate) async fn mark_failure(&self, error: &Error) {
        self.history.lock().await.record_error(&error.to_string());

        let mut state = self.lock_state();
        if state.connected {
            warn!("{} became unavailable: {}", self.address, error);
        }
        state.connected = false;
        state.failures = state.failures.saturating_add(1);

        if !state.configured && state.sid.is_some() && state.failures >= self.config.max_failures
        {
            warn!(
                "dropping identifier of {} after {} failures",
                self.address, state.failures
            );
            state.sid = None;
            state.phase = Phase::Unresolved;
        }
    }

    fn mark_success(&self) {
        let mut state = self.lock_state();
        if !state.connected {
            debug!("{} is available", self.address);
        }
        state.connected = state.sid.is_some();
        state.failures = 0;
    }

    async fn ping(&self) -> Result<DeviceDescriptor> {
        self.history
            .lock()
            .await
            .record(MessageType::Send, None, PING_FRAME);

        let mut found = None;
        let mut rejected = None;
        self.transport
            .exchange(
                self.address,
                PING_FRAME,
                self.config.discovery_timeout,
                |datagram: Datagram| {
                    if datagram.source.ip() != self.address.ip() {
                        return ControlFlow::Continue(());
                    }
                    match decode_ping(&datagram.bytes) {
                        Ok(descriptor) => {
                            found = Some(descriptor);
                            ControlFlow::Break(())
                        }
                        Err(e) => {
                            debug!("discarding ping reply from {}: {}", self.address, e);
                            rejected = Some(e);
                            ControlFlow::Continue(())
                        }
                    }
                },
            )
            .await?;

        if let Some(descriptor) = &found {
            self.history
                .lock()
                .await
                .record(MessageType::Receive, None, &descriptor.name);
        }

        found.ok_or_else(|| {
            rejected.unwrap_or_else(|| Error::timeout(self.address, self.config.discovery_timeout))
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::UdpTransport;
    use crate::transport::testing::{Script, ScriptedTransport};
    use crate::types::LightMode;
    use std::time::Duration;

    fn device() -> SocketAddr {
        "10.0.0.7:6091".parse().unwrap()
    }

    fn session(transport: &Arc<ScriptedTransport>) -> DeviceSession<ScriptedTransport> {
        DeviceSession::new(device(), Arc::clone(transport), ClientConfig::default())
    }

    fn configured(transport: &Arc<ScriptedTransport>) -> DeviceSession<ScriptedTransport> {
        DeviceSession::with_identifier(
            device(),
            "1234",
            Arc::clone(transport),
            ClientConfig::default(),
        )
        .unwrap()
    }

    fn state_reply(r: u32, g: u32, b: u32, w: u32, m: u32) -> String {
        format!(r#"cmd=ctrl&op={{"cmd":25,"r":{r},"g":{g},"b":{b},"w":{w},"m":{m}}}"#)
    }

    fn op_of(frame: &str) -> Value {
        let (_, op) = frame.split_once("&op=").unwrap();
        serde_json::from_str(op).unwrap()
    }

    #[tokio::test]
    async fn test_first_verb_resolves_identifier() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), ["cmd=pong&device_name=DOHOME_1234"]);
        transport.push_replies(device(), [state_reply(0, 0, 0, 0, 0)]);

        let light = session(&transport);
        assert_eq!(light.phase(), Phase::Unresolved);
        assert!(!light.is_connected());

        let state = light.get_state().await.unwrap();
        assert!(!state.enabled());
        assert_eq!(light.identifier().as_deref(), Some("1234"));
        assert_eq!(light.phase(), Phase::Connected);
        assert!(light.is_connected());

        let frames = transport.sent_frames();
        assert_eq!(frames[0], PING_FRAME);
        assert_eq!(frames[1], r#"cmd=ctrl&devices={[1234]}&op={"cmd":25}"#);
    }

    #[tokio::test]
    async fn test_failed_resolution_reports_unavailable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_silence();

        let light = session(&transport);
        let err = light.turn_off().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_unavailable());
        assert_eq!(light.phase(), Phase::Unresolved);
        assert!(light.identifier().is_none());
        assert_eq!(transport.sent_frames(), vec![PING_FRAME.to_string()]);
    }

    #[tokio::test]
    async fn test_verbs_fail_fast_while_resolving() {
        let transport = Arc::new(ScriptedTransport::new());
        let light = session(&transport);
        light.lock_state().phase = Phase::Resolving;

        let err = light.get_state().await.unwrap_err();
        assert_eq!(err, Error::Resolving(device()));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_resolution_returns_to_unresolved() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Arc::new(UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let config = ClientConfig::default().with_discovery_timeout(Duration::from_secs(5));
        let light = DeviceSession::new(silent.local_addr().unwrap(), transport, config);

        let abandoned = tokio::time::timeout(Duration::from_millis(50), light.connect()).await;
        assert!(abandoned.is_err());
        assert_eq!(light.phase(), Phase::Unresolved);
        assert!(light.identifier().is_none());
    }

    #[tokio::test]
    async fn test_rgb_reply_gives_rgb_mode() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [state_reply(5000, 0, 0, 0, 0)]);

        let state = configured(&transport).get_state().await.unwrap();
        assert!(state.enabled());
        assert_eq!(state.mode(), LightMode::Rgb);
        assert_eq!(state.color(), Color::rgb(255, 0, 0));
    }

    #[tokio::test]
    async fn test_white_reply_gives_white_mode() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [state_reply(0, 0, 0, 1000, 3000)]);

        let state = configured(&transport).get_state().await.unwrap();
        assert_eq!(state.mode(), LightMode::White);
        assert_eq!(state.brightness(), 204);
        assert_eq!(state.color_temperature().value(), 191);
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(
            device(),
            [
                r#"cmd=ctrl&op={"cmd":6,"res":0}"#.to_string(),
                state_reply(0, 5000, 0, 0, 0),
            ],
        );

        let state = configured(&transport).get_state().await.unwrap();
        assert_eq!(state.color(), Color::rgb(0, 255, 0));
    }

    #[tokio::test]
    async fn test_only_mismatched_replies_fail() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [r#"cmd=ctrl&op={"cmd":6,"res":0}"#]);

        let light = configured(&transport);
        let err = light.get_state().await.unwrap_err();
        assert_eq!(
            err,
            Error::CodeMismatch {
                expected: 25,
                received: 6
            }
        );
        assert!(!light.is_connected());
        assert!(light.last_state().is_none());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_reported() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), ["cmd=ctrl&res=0", r#"op={"cmd":6"#]);

        let err = configured(&transport).turn_off().await.unwrap_err();
        assert!(matches!(err, Error::MalformedReply(_)));
    }

    #[tokio::test]
    async fn test_reply_from_other_host_is_ignored() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(
            "10.0.0.99:6091".parse().unwrap(),
            [state_reply(5000, 5000, 5000, 0, 0)],
        );

        let err = configured(&transport).get_state().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_turn_off_after_rgb_sends_all_zero() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [r#"op={"cmd":6,"res":0}"#]);
        transport.push_replies(device(), [r#"op={"cmd":6,"res":0}"#]);

        let light = configured(&transport);
        light.set_rgb(Color::rgb(255, 0, 0), 255).await.unwrap();
        light.turn_off().await.unwrap();

        let frames = transport.sent_frames();
        assert_eq!(
            op_of(&frames[0]),
            json!({"cmd": 6, "r": 5000, "g": 0, "b": 0, "w": 0, "m": 0})
        );
        assert_eq!(
            op_of(&frames[1]),
            json!({"cmd": 6, "r": 0, "g": 0, "b": 0, "w": 0, "m": 0})
        );
        assert_eq!(light.last_state(), Some(LightState::off()));
    }

    #[tokio::test]
    async fn test_set_white_splits_channels() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [r#"op={"cmd":6}"#]);

        let light = configured(&transport);
        light
            .set_white(ColorTemperature::WARMEST, 255)
            .await
            .unwrap();

        let op = op_of(&transport.sent_frames()[0]);
        assert_eq!(op, json!({"cmd": 6, "r": 0, "g": 0, "b": 0, "w": 0, "m": 5000}));
    }

    #[tokio::test]
    async fn test_turn_on_restores_last_lit_state() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push_replies(device(), [r#"op={"cmd":6}"#]);
        }

        let light = configured(&transport);
        light.set_rgb(Color::rgb(0, 0, 255), 255).await.unwrap();
        light.turn_off().await.unwrap();
        let state = light.turn_on().await.unwrap();

        assert_eq!(state, LightState::rgb(Color::rgb(0, 0, 255), 255));
        let op = op_of(&transport.sent_frames()[2]);
        assert_eq!(op["b"], 5000);
    }

    #[tokio::test]
    async fn test_turn_on_defaults_to_white() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [r#"op={"cmd":6}"#]);

        let state = configured(&transport).turn_on().await.unwrap();
        assert_eq!(state.mode(), LightMode::White);
        let op = op_of(&transport.sent_frames()[0]);
        assert_eq!(op["w"], 2490);
        assert_eq!(op["m"], 2510);
    }

    #[tokio::test]
    async fn test_discovered_identifier_dropped_after_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), ["device_name=DOHOME_abcd"]);
        for _ in 0..3 {
            transport.push_silence();
        }

        let light = session(&transport);
        light.connect().await.unwrap();
        for _ in 0..2 {
            assert!(light.get_state().await.is_err());
            assert_eq!(light.identifier().as_deref(), Some("abcd"));
            assert!(!light.is_connected());
        }
        assert!(light.get_state().await.is_err());
        assert!(light.identifier().is_none());
        assert_eq!(light.phase(), Phase::Unresolved);
    }

    #[tokio::test]
    async fn test_configured_identifier_survives_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..5 {
            transport.push(Script::Fail(std::io::ErrorKind::NetworkUnreachable));
        }
        transport.push_replies(device(), [state_reply(0, 0, 0, 0, 0)]);

        let light = configured(&transport);
        for _ in 0..5 {
            let err = light.get_state().await.unwrap_err();
            assert!(matches!(err, Error::Socket { .. }));
        }
        assert_eq!(light.identifier().as_deref(), Some("1234"));

        light.get_state().await.unwrap();
        assert!(light.is_connected());
    }

    #[tokio::test]
    async fn test_diagnostics_and_history() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_replies(device(), [state_reply(0, 0, 0, 0, 0)]);
        transport.push_silence();

        let light = configured(&transport);
        light.get_state().await.unwrap();
        light.get_state().await.unwrap_err();

        let history = light.history().await;
        let summary = history.summary();
        assert_eq!(summary.send_count, 2);
        assert_eq!(summary.receive_count, 1);
        assert_eq!(summary.failure_count, 1);

        let diag = light.diagnostics().await;
        assert_eq!(diag["sid"], "1234");
        assert_eq!(diag["phase"], "connected");
        assert_eq!(diag["connected"], false);
        assert_eq!(diag["last_state"]["enabled"], false);

        light.clear_history().await;
        assert!(light.history().await.is_empty());
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let result = DeviceSession::with_identifier(
            device(),
            "12,4",
            transport,
            ClientConfig::default(),
        );
        assert!(matches!(result, Err(Error::InvalidIdentifier(_))));
    }
}
