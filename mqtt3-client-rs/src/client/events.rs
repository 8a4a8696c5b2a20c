/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::*;

use log::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedEvent {

    /// Whether the broker resumed a prior session for this client id
    pub session_present: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DisconnectedEvent {

    /// What ended the connection (or the connection attempt)
    pub error: MqttError,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubscribedEvent {
    pub packet_id: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnsubscribedEvent {
    pub packet_id: u16,
}

/// A QoS 1 or QoS 2 publish finished its acknowledgement exchange
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PublishedEvent {
    pub packet_id: u16,
}

/// Payload data received on a subscribed topic.
///
/// A publish larger than the receive buffer arrives as several of these, each carrying the next
/// contiguous slice of the payload.  `payload_offset` is where `payload` starts within the whole
/// message and `payload_total_length` is the size of the whole message; a publish delivered in
/// one piece has offset 0 and a total length equal to `payload.len()`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DataEvent {

    /// Zero for QoS 0 publishes
    pub packet_id: u16,

    pub topic: String,

    pub qos: QualityOfService,

    pub retain: bool,

    pub duplicate: bool,

    pub payload: Vec<u8>,

    pub payload_offset: usize,

    pub payload_total_length: usize,
}

/// A protocol-level failure (refused connection, malformed or unexpected packet).  Always followed
/// by a `Disconnected` event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorEvent {
    pub error: MqttError,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClientEvent {
    Connected(ConnectedEvent),
    Disconnected(DisconnectedEvent),
    Subscribed(SubscribedEvent),
    Unsubscribed(UnsubscribedEvent),
    Published(PublishedEvent),
    Data(DataEvent),
    Error(ErrorEvent),
}

/// Receiver of client events.
///
/// Callbacks run synchronously on the client's I/O task, so a slow callback delays keep alive
/// and further reads.  A channel listener decouples the consumer from the I/O task entirely.
pub enum ClientEventListener {
    Channel(std::sync::mpsc::Sender<Arc<ClientEvent>>),
    Callback(Box<dyn Fn(Arc<ClientEvent>) + Send + Sync>)
}

pub(crate) struct EventDispatcher {
    listeners: Mutex<BTreeMap<u64, Arc<ClientEventListener>>>,
}

impl EventDispatcher {
    pub(crate) fn new(default_listener: Option<ClientEventListener>) -> Self {
        let mut listeners = BTreeMap::new();
        if let Some(listener) = default_listener {
            listeners.insert(0, Arc::new(listener));
        }

        EventDispatcher {
            listeners: Mutex::new(listeners),
        }
    }

    pub(crate) fn add_listener(&self, id: u64, listener: ClientEventListener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.insert(id, Arc::new(listener));
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.remove(&id);
    }

    pub(crate) fn broadcast_event(&self, event: ClientEvent) {
        /* listeners may add or remove listeners from within a callback */
        let snapshot : Vec<Arc<ClientEventListener>> = {
            let listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.values().cloned().collect()
        };

        let event = Arc::new(event);
        for listener in snapshot {
            match &*listener {
                ClientEventListener::Channel(channel) => {
                    if channel.send(event.clone()).is_err() {
                        debug!("EventDispatcher - channel listener has hung up");
                    }
                }
                ClientEventListener::Callback(callback) => {
                    callback(event.clone());
                }
            }
        }
    }
}
