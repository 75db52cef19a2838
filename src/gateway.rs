//! Device registry and group control.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{Command, Target, validate_identifier};
use crate::config::ClientConfig;
use crate::discovery::discover_devices;
use crate::errors::Error;
use crate::response::{Response, decode};
use crate::runtime::Mutex;
use crate::session::DeviceSession;
use crate::state::LightState;
use crate::transport::{Datagram, Transport, UdpTransport};
use crate::types::{Color, ColorTemperature};

type Result<T> = std::result::Result<T, Error>;

/// Devices addressed together by a single frame.
///
/// A group command succeeds only when at least `quorum` distinct devices
/// send a matching reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    id: Uuid,
    identifiers: BTreeSet<String>,
    quorum: usize,
}

impl Group {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.identifiers.contains(sid)
    }
}

/// Registry of device sessions sharing one transport.
///
/// All sessions created here exchange frames over the same [`Transport`], so
/// their requests are serialized in order on one socket.
///
/// # Example
///
/// ```ignore
/// use dohome_rs::{ClientConfig, Color, Gateway};
///
/// let gateway = Gateway::bind(ClientConfig::default()).await?;
/// let group = gateway.add_group(["1a2b", "3c4d"]).await?;
/// gateway.set_rgb(&group, Color::rgb(0, 0, 255), 200).await?;
/// let state = gateway.get_aggregate_state(&group).await?;
/// ```
pub struct Gateway<T: Transport = UdpTransport> {
    transport: Arc<T>,
    config: ClientConfig,
    sessions: Mutex<HashMap<SocketAddr, Arc<DeviceSession<T>>>>,
    groups: Mutex<HashMap<Uuid, Group>>,
}

impl Gateway<UdpTransport> {
    /// Create a gateway over a UDP socket on an ephemeral port.
    pub async fn bind(config: ClientConfig) -> Result<Self> {
        let transport = UdpTransport::bind_any().await?;
        Ok(Gateway::new(transport, config))
    }
}

impl<T: Transport> Gateway<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Gateway {
            transport: Arc::new(transport),
            config,
            sessions: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The session for `address`, created on first reference.
    ///
    /// New sessions discover their identifier on first use.
    pub async fn device(&self, address: SocketAddr) -> Arc<DeviceSession<T>> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(address).or_insert_with(|| {
            debug!("registering device {}", address);
            Arc::new(DeviceSession::new(
                address,
                Arc::clone(&self.transport),
                self.config.clone(),
            ))
        });
        Arc::clone(session)
    }

    /// The session for `address` with its identifier fixed to `sid`.
    pub async fn device_with_identifier(
        &self,
        address: SocketAddr,
        sid: &str,
    ) -> Result<Arc<DeviceSession<T>>> {
        validate_identifier(sid)?;
        let session = self.device(address).await;
        session.assign_identifier(sid)?;
        Ok(session)
    }

    /// Every registered session, ordered by address.
    pub async fn sessions(&self) -> Vec<Arc<DeviceSession<T>>> {
        let mut sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by_key(|session| session.address());
        sessions
    }

    /// Poll every registered device once.
    ///
    /// Requests queue on the shared transport; one device failing does not
    /// affect the others.
    pub async fn refresh_all(&self) -> Vec<(SocketAddr, Result<LightState>)> {
        let sessions = self.sessions().await;
        let results = join_all(sessions.iter().map(|session| session.get_state())).await;
        sessions
            .iter()
            .map(|session| session.address())
            .zip(results)
            .collect()
    }

    /// Ping the broadcast address and register every device that answers.
    pub async fn discover(&self) -> Result<Vec<Arc<DeviceSession<T>>>> {
        let found = discover_devices(self.transport.as_ref(), &self.config).await?;
        let mut sessions = Vec::with_capacity(found.len());
        for device in found {
            let address = self.config.device_address(device.address.ip());
            sessions.push(self.device_with_identifier(address, &device.sid).await?);
        }
        Ok(sessions)
    }

    /// Register a group that needs a reply from every member.
    pub async fn add_group<I, S>(&self, identifiers: I) -> Result<Group>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers = collect_identifiers(identifiers)?;
        let quorum = identifiers.len();
        self.register_group(identifiers, quorum).await
    }

    /// Register a group that succeeds once `quorum` members reply.
    pub async fn add_group_with_quorum<I, S>(&self, identifiers: I, quorum: usize) -> Result<Group>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers = collect_identifiers(identifiers)?;
        self.register_group(identifiers, quorum).await
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.groups.lock().await.values().cloned().collect()
    }

    pub async fn group(&self, id: &Uuid) -> Option<Group> {
        self.groups.lock().await.get(id).cloned()
    }

    pub async fn remove_group(&self, id: &Uuid) -> Result<Group> {
        self.groups
            .lock()
            .await
            .remove(id)
            .ok_or(Error::GroupNotFound(*id))
    }

    /// Read every member's state and fold them with [`LightState::aggregate`].
    ///
    /// Fails with [`Error::NotEnoughResponses`] rather than returning a state
    /// built from fewer than `quorum` members.
    pub async fn get_aggregate_state(&self, group: &Group) -> Result<LightState> {
        let states = self
            .exchange(group, &Command::get_state(), |response| {
                let channels = response.channels()?;
                Ok(LightState::from_channels(&channels))
            })
            .await?;
        self.settle(group, &states).await;
        require_quorum(group, states.len())?;
        Ok(LightState::aggregate(states.values()))
    }

    pub async fn set_rgb(&self, group: &Group, color: Color, brightness: u8) -> Result<LightState> {
        self.apply(group, &LightState::rgb(color, brightness)).await
    }

    pub async fn set_white(
        &self,
        group: &Group,
        temperature: ColorTemperature,
        brightness: u8,
    ) -> Result<LightState> {
        self.apply(group, &LightState::white(temperature, brightness))
            .await
    }

    pub async fn turn_off(&self, group: &Group) -> Result<LightState> {
        self.apply(group, &LightState::off()).await
    }

    /// Set every member to `state` with one frame.
    pub async fn apply(&self, group: &Group, state: &LightState) -> Result<LightState> {
        let command = Command::set_state(state.to_channels())?;
        let replies = self.exchange(group, &command, |_| Ok(*state)).await?;
        self.settle(group, &replies).await;
        require_quorum(group, replies.len())?;
        Ok(*state)
    }

    /// Broadcast `command` to the group and keep the first valid reply from
    /// each source until every member answered or the window closed.
    async fn exchange<V, F>(
        &self,
        group: &Group,
        command: &Command,
        accept: F,
    ) -> Result<BTreeMap<SocketAddr, V>>
    where
        V: Send,
        F: Fn(Response) -> Result<V> + Send + Sync,
    {
        let target = Target::devices(group.identifiers())?;
        let frame = command.encode(&target)?;
        let address = self.config.broadcast_address;
        debug!("group command to {}: {}", address, frame);

        let expected = group.len();
        let mut replies = BTreeMap::new();
        let exchanged = self
            .transport
            .exchange(
                address,
                &frame,
                self.config.command_timeout,
                |datagram: Datagram| {
                    if replies.contains_key(&datagram.source) {
                        debug!("duplicate reply from {}", datagram.source);
                        return ControlFlow::Continue(());
                    }
                    let accepted = decode(&datagram.bytes)
                        .and_then(|response| response.ensure_answers(command))
                        .and_then(&accept);
                    match accepted {
                        Ok(value) => {
                            replies.insert(datagram.source, value);
                        }
                        Err(e) => debug!("discarding reply from {}: {}", datagram.source, e),
                    }
                    if replies.len() >= expected {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .await;

        if let Err(e) = exchanged {
            warn!("group {} unavailable: {}", group.id(), e);
            for session in self.members(group).await {
                session.mark_failure(&e).await;
            }
            return Err(e);
        }

        debug!("{} of {} members replied", replies.len(), expected);
        Ok(replies)
    }

    /// Update registered members from the replies of a group exchange.
    async fn settle(&self, group: &Group, replies: &BTreeMap<SocketAddr, LightState>) {
        for session in self.sessions().await {
            let reply = replies
                .iter()
                .find(|(source, _)| source.ip() == session.address().ip())
                .map(|(_, state)| *state);
            match reply {
                Some(state) => session.observe(state),
                None if is_member(group, &session) => {
                    let error = Error::timeout(session.address(), self.config.command_timeout);
                    session.mark_failure(&error).await;
                }
                None => {}
            }
        }
    }

    /// Registered sessions whose identifier belongs to `group`.
    async fn members(&self, group: &Group) -> Vec<Arc<DeviceSession<T>>> {
        self.sessions()
            .await
            .into_iter()
            .filter(|session| is_member(group, session))
            .collect()
    }

    async fn register_group(&self, identifiers: BTreeSet<String>, quorum: usize) -> Result<Group> {
        if quorum == 0 || quorum > identifiers.len() {
            return Err(Error::InvalidQuorum {
                quorum,
                members: identifiers.len(),
            });
        }
        let group = Group {
            id: Uuid::new_v4(),
            identifiers,
            quorum,
        };
        self.groups.lock().await.insert(group.id, group.clone());
        Ok(group)
    }
}

fn collect_identifiers<I, S>(identifiers: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let identifiers = identifiers
        .into_iter()
        .map(|sid| {
            validate_identifier(sid.as_ref())?;
            Ok(sid.as_ref().to_string())
        })
        .collect::<Result<BTreeSet<_>>>()?;
    if identifiers.is_empty() {
        return Err(Error::EmptyGroup);
    }
    Ok(identifiers)
}

fn is_member<T: Transport>(group: &Group, session: &DeviceSession<T>) -> bool {
    session
        .identifier()
        .is_some_and(|sid| group.contains(&sid))
}

fn require_quorum(group: &Group, received: usize) -> Result<()> {
    if received < group.quorum() {
        warn!(
            "group {} unavailable: {} of {} required replies",
            group.id(),
            received,
            group.quorum()
        );
        return Err(Error::NotEnoughResponses {
            received,
            quorum: group.quorum(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Script, ScriptedTransport};
    use crate::types::LightMode;
    use serde_json::Value;
    use std::io;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 6091))
    }

    fn datagram(last: u8, text: &str) -> Datagram {
        Datagram::new(addr(last), text)
    }

    fn state_reply(r: u32, w: u32, m: u32) -> String {
        format!(r#"cmd=ctrl&op={{"cmd":25,"r":{r},"g":0,"b":0,"w":{w},"m":{m}}}"#)
    }

    const SET_OK: &str = r#"cmd=ctrl&op={"cmd":6,"res":0}"#;

    fn gateway() -> Gateway<ScriptedTransport> {
        Gateway::new(ScriptedTransport::new(), ClientConfig::default())
    }

    #[tokio::test]
    async fn test_group_frame_is_sent_once_to_broadcast() {
        let gateway = gateway();
        let group = gateway.add_group(["3333", "1111", "2222"]).await.unwrap();
        gateway.transport().push(Script::Replies(vec![
            datagram(1, SET_OK),
            datagram(2, SET_OK),
            datagram(3, SET_OK),
        ]));

        gateway.turn_off(&group).await.unwrap();

        let sent = gateway.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, gateway.config().broadcast_address);
        assert!(sent[0].1.starts_with("cmd=ctrl&devices={[1111,2222,3333]}&op="));
        let (_, op) = sent[0].1.split_once("&op=").unwrap();
        let op: Value = serde_json::from_str(op).unwrap();
        assert_eq!(op["r"], 0);
        assert_eq!(op["m"], 0);
    }

    #[tokio::test]
    async fn test_set_white_fails_without_quorum() {
        let gateway = gateway();
        let group = gateway.add_group(["aaaa", "bbbb", "cccc"]).await.unwrap();
        gateway.transport().push(Script::Replies(vec![
            datagram(1, SET_OK),
            datagram(2, SET_OK),
            datagram(2, SET_OK),
        ]));

        let err = gateway
            .set_white(&group, ColorTemperature::NEUTRAL, 255)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotEnoughResponses {
                received: 2,
                quorum: 3
            }
        );
    }

    #[tokio::test]
    async fn test_lower_quorum_accepts_partial_replies() {
        let gateway = gateway();
        let group = gateway
            .add_group_with_quorum(["aaaa", "bbbb", "cccc"], 2)
            .await
            .unwrap();
        gateway.transport().push(Script::Replies(vec![
            datagram(1, SET_OK),
            datagram(2, SET_OK),
        ]));

        let state = gateway
            .set_rgb(&group, Color::rgb(0, 255, 0), 255)
            .await
            .unwrap();
        assert_eq!(state.color(), Color::rgb(0, 255, 0));
    }

    #[tokio::test]
    async fn test_cross_talk_does_not_count() {
        let gateway = gateway();
        let group = gateway.add_group(["aaaa", "bbbb"]).await.unwrap();
        gateway.transport().push(Script::Replies(vec![
            datagram(1, &state_reply(5000, 0, 0)),
            datagram(2, "garbage"),
            datagram(2, SET_OK),
        ]));

        let err = gateway.turn_off(&group).await.unwrap_err();
        assert_eq!(
            err,
            Error::NotEnoughResponses {
                received: 1,
                quorum: 2
            }
        );
    }

    #[tokio::test]
    async fn test_aggregate_state_from_all_members() {
        let gateway = gateway();
        let group = gateway.add_group(["aaaa", "bbbb"]).await.unwrap();
        gateway.transport().push(Script::Replies(vec![
            datagram(2, &state_reply(0, 1000, 1000)),
            datagram(1, &state_reply(0, 0, 0)),
        ]));

        let state = gateway.get_aggregate_state(&group).await.unwrap();
        assert!(state.enabled());
        assert_eq!(state.mode(), LightMode::White);
        assert_eq!(state.brightness(), 102);
    }

    #[tokio::test]
    async fn test_aggregate_state_needs_quorum() {
        let gateway = gateway();
        let group = gateway.add_group(["aaaa", "bbbb"]).await.unwrap();
        gateway.transport().push(Script::Replies(vec![datagram(
            1,
            &state_reply(5000, 0, 0),
        )]));

        let err = gateway.get_aggregate_state(&group).await.unwrap_err();
        assert!(matches!(err, Error::NotEnoughResponses { .. }));
    }

    #[tokio::test]
    async fn test_group_replies_update_member_sessions() {
        let gateway = gateway();
        let replied = gateway.device_with_identifier(addr(1), "aaaa").await.unwrap();
        let silent = gateway.device_with_identifier(addr(2), "bbbb").await.unwrap();
        let group = gateway.add_group_with_quorum(["aaaa", "bbbb"], 1).await.unwrap();
        gateway
            .transport()
            .push(Script::Replies(vec![datagram(1, &state_reply(5000, 0, 0))]));

        gateway.get_aggregate_state(&group).await.unwrap();

        assert!(replied.is_connected());
        assert_eq!(replied.last_state().unwrap().color(), Color::rgb(255, 0, 0));
        assert!(!silent.is_connected());
    }

    #[tokio::test]
    async fn test_transport_failure_marks_members_unavailable() {
        let gateway = gateway();
        let member = gateway.device_with_identifier(addr(1), "aaaa").await.unwrap();
        let outsider = gateway.device_with_identifier(addr(2), "zzzz").await.unwrap();
        let group = gateway.add_group(["aaaa", "bbbb"]).await.unwrap();
        gateway
            .transport()
            .push(Script::Fail(io::ErrorKind::NetworkUnreachable));

        let err = gateway.turn_off(&group).await.unwrap_err();
        assert!(matches!(err, Error::Socket { .. }));
        assert!(err.is_unavailable());

        assert!(!member.is_connected());
        assert!(member.history().await.last_error().is_some());
        assert!(outsider.is_connected());
    }

    #[tokio::test]
    async fn test_device_is_created_once() {
        let gateway = gateway();
        let first = gateway.device(addr(9)).await;
        let second = gateway.device(addr(9)).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gateway.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_device() {
        let gateway = gateway();
        gateway.device_with_identifier(addr(1), "aaaa").await.unwrap();
        gateway.device_with_identifier(addr(2), "bbbb").await.unwrap();
        gateway
            .transport()
            .push(Script::Replies(vec![datagram(1, &state_reply(5000, 0, 0))]));
        gateway.transport().push_silence();

        let results = gateway.refresh_all().await;
        assert_eq!(results.len(), 2);
        let ok = results.iter().filter(|(_, result)| result.is_ok()).count();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_group_registry() {
        let gateway = gateway();
        assert_eq!(
            gateway.add_group(Vec::<&str>::new()).await.unwrap_err(),
            Error::EmptyGroup
        );
        assert!(matches!(
            gateway.add_group_with_quorum(["aaaa"], 2).await.unwrap_err(),
            Error::InvalidQuorum { .. }
        ));
        assert!(matches!(
            gateway.add_group_with_quorum(["aaaa"], 0).await.unwrap_err(),
            Error::InvalidQuorum { .. }
        ));

        let group = gateway.add_group(["aaaa", "aaaa", "bbbb"]).await.unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.quorum(), 2);
        assert_eq!(gateway.group(&group.id()).await, Some(group.clone()));
        assert_eq!(gateway.groups().await.len(), 1);

        gateway.remove_group(&group.id()).await.unwrap();
        assert_eq!(
            gateway.remove_group(&group.id()).await.unwrap_err(),
            Error::GroupNotFound(group.id())
        );
    }

    #[tokio::test]
    async fn test_discover_registers_devices() {
        let gateway = gateway();
        gateway.transport().push(Script::Replies(vec![
            Datagram::new(SocketAddr::from(([10, 0, 0, 4], 50000)), "cmd=pong&device_name=DoHome_0a0b"),
            datagram(5, "cmd=pong&device_name=DoHome_0c0d"),
        ]));

        let sessions = gateway.discover().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].address(), addr(4));
        assert_eq!(sessions[0].identifier().as_deref(), Some("0a0b"));
        assert_eq!(gateway.sessions().await.len(), 2);
    }
}
