/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

mod events;
mod internal;

pub use events::*;

use crate::*;
use crate::client::internal::*;
use crate::client::internal::tokio_impl::*;
use crate::validate::*;

use rand::Rng;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime;
use tokio::sync::oneshot;

pub const DEFAULT_KEEP_ALIVE_SECONDS : u16 = 120;
pub const DEFAULT_NETWORK_TIMEOUT : Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY : Duration = Duration::from_secs(10);
pub const DEFAULT_BUFFER_SIZE : usize = 1024;
pub const DEFAULT_OUTBOX_EXPIRY : Duration = Duration::from_secs(30);
pub const DEFAULT_OUTBOX_MAXIMUM_ENTRIES : usize = 32;
pub const DEFAULT_OUTBOX_CAPACITY : usize = 64;

const CLIENT_ID_PREFIX : &str = "mqtt3_";

impl From<oneshot::error::RecvError> for MqttError {
    fn from(_: oneshot::error::RecvError) -> Self {
        MqttError::OperationChannelReceiveError
    }
}

/// Lifecycle state of a client's session.
///
/// `Unknown` until `start`, and again after `stop`.  `Error` means the session task gave up on
/// its own because the connection failed while reconnecting was disabled.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Unknown,
    Init,
    Connected,
    WaitTimeout,
    Stopped,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unknown => { write!(f, "Unknown") }
            SessionState::Init => { write!(f, "Init") }
            SessionState::Connected => { write!(f, "Connected") }
            SessionState::WaitTimeout => { write!(f, "WaitTimeout") }
            SessionState::Stopped => { write!(f, "Stopped") }
            SessionState::Error => { write!(f, "Error") }
        }
    }
}

/// Immutable client configuration, produced by `ClientConfigBuilder`
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub(crate) host: String,

    /// 0 selects the transport's default port
    pub(crate) port: u16,

    pub(crate) client_id: String,

    pub(crate) username: Option<String>,

    pub(crate) password: Option<Vec<u8>>,

    pub(crate) will: Option<LastWill>,

    pub(crate) keep_alive_interval_seconds: u16,

    pub(crate) clean_session: bool,

    pub(crate) auto_reconnect: bool,

    /// Bound on connection establishment, the CONNACK wait and every write
    pub(crate) network_timeout: Duration,

    pub(crate) reconnect_delay: Duration,

    /// Largest outbound packet and largest inbound packet body decoded as a whole
    pub(crate) buffer_size: usize,

    pub(crate) outbox_expiry: Duration,

    /// Cleanup threshold: the oldest outstanding operations beyond this count are forgotten
    pub(crate) outbox_maximum_entries: usize,

    /// Hard bound: operations that would grow the outbox past this are rejected
    pub(crate) outbox_capacity: usize,
}

impl ClientConfig {
    pub fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    pub fn keep_alive_interval_seconds(&self) -> u16 {
        self.keep_alive_interval_seconds
    }

    pub(crate) fn to_connect_packet(&self) -> ConnectPacket {
        ConnectPacket {
            client_id: self.client_id.clone(),
            keep_alive_interval_seconds: self.keep_alive_interval_seconds,
            clean_session: self.clean_session,
            username: self.username.clone(),
            password: self.password.clone(),
            will: self.will.clone(),
        }
    }
}

fn generate_client_id() -> String {
    let suffix = rand::thread_rng().gen::<u64>() & 0xFFFF_FFFF_FFFF;
    format!("{}{:012x}", CLIENT_ID_PREFIX, suffix)
}

pub struct ClientConfigBuilder {
    config: ClientConfig,
    client_id: Option<String>,
}

impl ClientConfigBuilder {
    pub fn new(host: &str) -> Self {
        ClientConfigBuilder {
            config: ClientConfig {
                host: host.to_string(),
                port: 0,
                client_id: String::new(),
                username: None,
                password: None,
                will: None,
                keep_alive_interval_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
                clean_session: true,
                auto_reconnect: true,
                network_timeout: DEFAULT_NETWORK_TIMEOUT,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                buffer_size: DEFAULT_BUFFER_SIZE,
                outbox_expiry: DEFAULT_OUTBOX_EXPIRY,
                outbox_maximum_entries: DEFAULT_OUTBOX_MAXIMUM_ENTRIES,
                outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            },
            client_id: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn set_client_id(&mut self, client_id: &str) {
        self.client_id = Some(client_id.to_string());
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.config.username = Some(username.to_string());
        self
    }

    pub fn set_username(&mut self, username: &str) {
        self.config.username = Some(username.to_string());
    }

    pub fn with_password(mut self, password: &[u8]) -> Self {
        self.config.password = Some(password.to_vec());
        self
    }

    pub fn set_password(&mut self, password: &[u8]) {
        self.config.password = Some(password.to_vec());
    }

    pub fn with_will(mut self, will: LastWill) -> Self {
        self.config.will = Some(will);
        self
    }

    pub fn set_will(&mut self, will: LastWill) {
        self.config.will = Some(will);
    }

    /// 0 selects the default of 120 seconds
    pub fn with_keep_alive_interval_seconds(mut self, keep_alive: u16) -> Self {
        self.config.keep_alive_interval_seconds = keep_alive;
        self
    }

    pub fn set_keep_alive_interval_seconds(&mut self, keep_alive: u16) {
        self.config.keep_alive_interval_seconds = keep_alive;
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.config.clean_session = clean_session;
        self
    }

    pub fn set_clean_session(&mut self, clean_session: bool) {
        self.config.clean_session = clean_session;
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.config.auto_reconnect = auto_reconnect;
        self
    }

    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.config.auto_reconnect = auto_reconnect;
    }

    pub fn with_network_timeout(mut self, network_timeout: Duration) -> Self {
        self.config.network_timeout = network_timeout;
        self
    }

    pub fn set_network_timeout(&mut self, network_timeout: Duration) {
        self.config.network_timeout = network_timeout;
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.config.reconnect_delay = reconnect_delay;
        self
    }

    pub fn set_reconnect_delay(&mut self, reconnect_delay: Duration) {
        self.config.reconnect_delay = reconnect_delay;
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.config.buffer_size = buffer_size;
    }

    pub fn with_outbox_expiry(mut self, outbox_expiry: Duration) -> Self {
        self.config.outbox_expiry = outbox_expiry;
        self
    }

    pub fn set_outbox_expiry(&mut self, outbox_expiry: Duration) {
        self.config.outbox_expiry = outbox_expiry;
    }

    pub fn with_outbox_maximum_entries(mut self, outbox_maximum_entries: usize) -> Self {
        self.config.outbox_maximum_entries = outbox_maximum_entries;
        self
    }

    pub fn set_outbox_maximum_entries(&mut self, outbox_maximum_entries: usize) {
        self.config.outbox_maximum_entries = outbox_maximum_entries;
    }

    pub fn with_outbox_capacity(mut self, outbox_capacity: usize) -> Self {
        self.config.outbox_capacity = outbox_capacity;
        self
    }

    pub fn set_outbox_capacity(&mut self, outbox_capacity: usize) {
        self.config.outbox_capacity = outbox_capacity;
    }

    /// Produces the final configuration.  A missing client id is replaced by a random
    /// `mqtt3_`-prefixed one, and a zero keep alive by the default.
    pub fn build(&self) -> ClientConfig {
        let mut config = self.config.clone();

        config.client_id = match &self.client_id {
            Some(client_id) => { client_id.clone() }
            None => { generate_client_id() }
        };

        if config.keep_alive_interval_seconds == 0 {
            config.keep_alive_interval_seconds = DEFAULT_KEEP_ALIVE_SECONDS;
        }

        config
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An MQTT 3.1.1 client.
///
/// All network I/O happens on a single task spawned onto the supplied runtime by `start`.
/// Operations complete once their packet has been written; acknowledgements are reported
/// afterwards through client events.
pub struct Mqtt3Client {
    config: Arc<ClientConfig>,

    shared: Arc<SharedClientState>,

    runtime_handle: runtime::Handle,

    /* the transport lives here while no session task owns it */
    idle_transport: Mutex<Option<Box<dyn Transport>>>,

    user_state: Mutex<Option<UserRuntimeState>>,

    listener_id_allocator: Mutex<u64>,
}

impl Mqtt3Client {
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>, default_listener: Option<ClientEventListener>, runtime_handle: &runtime::Handle) -> MqttResult<Mqtt3Client> {
        validate_client_id(&config.client_id)?;
        validate_credentials(config.username.as_deref(), config.password.as_deref())?;
        if let Some(will) = &config.will {
            validate_last_will(will)?;
        }

        let shared = SharedClientState::new(&config, default_listener);

        Ok(Mqtt3Client {
            config: Arc::new(config),
            shared: Arc::new(shared),
            runtime_handle: runtime_handle.clone(),
            idle_transport: Mutex::new(Some(transport)),
            user_state: Mutex::new(None),
            listener_id_allocator: Mutex::new(1),
        })
    }

    pub fn client_id(&self) -> &str {
        self.config.client_id()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_session().state
    }

    /// Launches the session task, which connects and then stays connected (reconnecting as
    /// configured) until `stop`.  Fails with `AlreadyStarted` unless the client is idle.
    pub fn start(&self) -> MqttResult<()> {
        let mut user_state = lock_or_recover(&self.user_state);
        if user_state.is_some() || self.state() != SessionState::Unknown {
            return Err(MqttError::AlreadyStarted);
        }

        let transport = lock_or_recover(&self.idle_transport).take().ok_or(MqttError::InternalStateError)?;

        self.shared.lock_session().state = SessionState::Init;
        *user_state = Some(spawn_session(self.config.clone(), self.shared.clone(), transport, &self.runtime_handle));

        Ok(())
    }

    /// Ends the session task, disconnecting if connected, and returns the client to the idle
    /// state so it can be started again.  Does nothing if the client is not started.
    pub async fn stop(&self) -> MqttResult<()> {
        let user_state = lock_or_recover(&self.user_state).take();
        let user_state = match user_state {
            Some(user_state) => { user_state }
            None => { return Ok(()); }
        };

        let stop_result = user_state.stop().await;
        self.shared.lock_session().state = SessionState::Unknown;

        let transport = stop_result?;
        *lock_or_recover(&self.idle_transport) = Some(transport);

        Ok(())
    }

    /// Stops the client and releases it
    pub async fn destroy(self) -> MqttResult<()> {
        self.stop().await
    }

    /// Subscribes to a single topic filter, returning the SUBSCRIBE's packet id once it is written
    pub async fn subscribe(&self, topic_filter: &str, qos: QualityOfService) -> MqttResult<u16> {
        validate_topic_filter(topic_filter)?;

        let (packet, packet_id) = self.shared.lock_session().begin_subscribe(topic_filter, qos)?;
        self.submit(packet, PacketType::Subscribe, packet_id).await?;

        Ok(packet_id)
    }

    pub async fn unsubscribe(&self, topic_filter: &str) -> MqttResult<u16> {
        validate_topic_filter(topic_filter)?;

        let (packet, packet_id) = self.shared.lock_session().begin_unsubscribe(topic_filter)?;
        self.submit(packet, PacketType::Unsubscribe, packet_id).await?;

        Ok(packet_id)
    }

    /// Publishes a message, returning its packet id (0 for QoS 0) once the PUBLISH is written.
    /// Completion of a QoS 1 or 2 exchange is signalled by a `Published` event.
    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfService, retain: bool) -> MqttResult<u16> {
        validate_topic(topic)?;

        let (packet, packet_id) = self.shared.lock_session().begin_publish(topic, payload, qos, retain)?;
        self.submit(packet, PacketType::Publish, packet_id).await?;

        Ok(packet_id)
    }

    /* the session task also abandons the record for any request it fails to write; doing it twice is harmless */
    async fn submit(&self, packet: Vec<u8>, packet_type: PacketType, packet_id: u16) -> MqttResult<()> {
        let sender = lock_or_recover(&self.user_state).as_ref().map(|state| state.operation_sender());

        let result =
            match sender {
                Some(sender) => { submit_operation(&sender, packet, packet_type, packet_id).await }
                None => { Err(MqttError::NotConnected) }
            };

        if result.is_err() && packet_id != 0 {
            self.shared.lock_session().abandon(packet_type, packet_id);
        }

        result
    }

    pub fn add_event_listener(&self, listener: ClientEventListener) -> u64 {
        let listener_id = {
            let mut current_id = lock_or_recover(&self.listener_id_allocator);
            let listener_id = *current_id;
            *current_id += 1;
            listener_id
        };

        self.shared.dispatcher.add_listener(listener_id, listener);

        listener_id
    }

    pub fn remove_event_listener(&self, listener_id: u64) {
        self.shared.dispatcher.remove_listener(listener_id);
    }
}

impl Drop for Mqtt3Client {
    fn drop(&mut self) {
        if let Some(user_state) = lock_or_recover(&self.user_state).as_ref() {
            user_state.signal_stop();
        }
    }
}
