/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub(crate) mod tokio_impl;

#[cfg(test)]
mod testing;

use crate::*;
use crate::client::events::*;
use crate::encode::Encoder;
use crate::outbox::*;

use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

/// The single most recent operation still waiting on an acknowledgement.  Issuing another
/// tracked operation moves this one into the outbox.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    pub(crate) packet_id: u16,
    pub(crate) packet_type: PacketType,
    pub(crate) qos: QualityOfService,
    pub(crate) packet: Vec<u8>,
    pub(crate) issued_at: Instant,
}

/* a QoS 2 PUBLISH record is never completed directly; PUBREC turns it into a PUBREL record */
fn awaits_pubrec(packet_type: PacketType, qos: QualityOfService) -> bool {
    packet_type == PacketType::Publish && qos == QualityOfService::ExactlyOnce
}

/// Everything shared between the façade and the session task.  Only ever held briefly and never
/// across an await.
pub(crate) struct SessionBookkeeping {
    pub(crate) state: SessionState,
    pending: Option<PendingOperation>,
    outbox: Outbox,
    encoder: Encoder,
    outbox_expiry: Duration,
    outbox_maximum_entries: usize,
}

impl SessionBookkeeping {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        SessionBookkeeping {
            state: SessionState::Unknown,
            pending: None,
            outbox: Outbox::new(config.outbox_capacity),
            encoder: Encoder::new(config.buffer_size),
            outbox_expiry: config.outbox_expiry,
            outbox_maximum_entries: config.outbox_maximum_entries,
        }
    }

    fn check_connected(&self) -> MqttResult<()> {
        if self.state != SessionState::Connected {
            return Err(MqttError::NotConnected);
        }

        Ok(())
    }

    /* must be checked before an id is allocated so a rejected operation leaves no trace */
    fn check_room_for_preemption(&self) -> MqttResult<()> {
        if self.pending.is_some() && self.outbox.is_full() {
            return Err(MqttError::OutboxFull);
        }

        Ok(())
    }

    fn preempt_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            let entry = OutboxEntry {
                packet_id: pending.packet_id,
                packet_type: pending.packet_type,
                qos: pending.qos,
                packet: pending.packet,
                enqueued_at: pending.issued_at,
            };

            if let Err(error) = self.outbox.enqueue(entry) {
                warn!("SessionBookkeeping - dropping preempted {} ({}): {}", pending.packet_type, pending.packet_id, error);
            }
        }
    }

    fn track(&mut self, packet_type: PacketType, packet_id: u16, qos: QualityOfService, packet: &[u8]) {
        self.preempt_pending();

        self.pending = Some(PendingOperation {
            packet_id,
            packet_type,
            qos,
            packet: packet.to_vec(),
            issued_at: Instant::now(),
        });
    }

    pub(crate) fn begin_publish(&mut self, topic: &str, payload: &[u8], qos: QualityOfService, retain: bool) -> MqttResult<(Vec<u8>, u16)> {
        self.check_connected()?;

        if qos == QualityOfService::AtMostOnce {
            return self.encoder.encode_publish(topic, payload, qos, retain, false);
        }

        self.check_room_for_preemption()?;
        let (packet, packet_id) = self.encoder.encode_publish(topic, payload, qos, retain, false)?;
        self.track(PacketType::Publish, packet_id, qos, &packet);

        Ok((packet, packet_id))
    }

    pub(crate) fn begin_subscribe(&mut self, topic_filter: &str, qos: QualityOfService) -> MqttResult<(Vec<u8>, u16)> {
        self.check_connected()?;
        self.check_room_for_preemption()?;

        let (packet, packet_id) = self.encoder.encode_subscribe(topic_filter, qos)?;
        self.track(PacketType::Subscribe, packet_id, qos, &packet);

        Ok((packet, packet_id))
    }

    pub(crate) fn begin_unsubscribe(&mut self, topic_filter: &str) -> MqttResult<(Vec<u8>, u16)> {
        self.check_connected()?;
        self.check_room_for_preemption()?;

        let (packet, packet_id) = self.encoder.encode_unsubscribe(topic_filter)?;
        self.track(PacketType::Unsubscribe, packet_id, QualityOfService::AtLeastOnce, &packet);

        Ok((packet, packet_id))
    }

    /// Forgets an operation whose packet never made it onto the wire
    pub(crate) fn abandon(&mut self, packet_type: PacketType, packet_id: u16) {
        if self.pending_matches(packet_type, packet_id) {
            self.pending = None;
        } else {
            self.outbox.try_take(packet_id, packet_type);
        }
    }

    fn pending_matches(&self, packet_type: PacketType, packet_id: u16) -> bool {
        if let Some(pending) = &self.pending {
            return pending.packet_type == packet_type && pending.packet_id == packet_id;
        }

        false
    }

    fn pending_qos(&self) -> Option<QualityOfService> {
        self.pending.as_ref().map(|pending| pending.qos)
    }

    /// Applies an inbound acknowledgement.  Returns true when it completed a tracked operation;
    /// acknowledgements for unknown or already completed operations change nothing, and neither
    /// does a PUBACK aimed at a QoS 2 publish.
    pub(crate) fn resolve(&mut self, packet_type: PacketType, packet_id: u16) -> bool {
        if let Some(entry) = self.outbox.peek(packet_id, packet_type) {
            if awaits_pubrec(entry.packet_type, entry.qos) {
                return false;
            }

            return self.outbox.try_take(packet_id, packet_type).is_some();
        }

        if self.pending_matches(packet_type, packet_id) {
            if let Some(qos) = self.pending_qos() {
                if awaits_pubrec(packet_type, qos) {
                    return false;
                }
            }

            self.pending = None;
            return true;
        }

        false
    }

    /// PUBREC received: the tracked QoS 2 PUBLISH becomes a tracked PUBREL that PUBCOMP will resolve
    pub(crate) fn advance_to_pubrel(&mut self, packet_id: u16, pubrel: &[u8]) -> bool {
        let in_outbox = self.outbox.peek(packet_id, PacketType::Publish)
            .map(|entry| awaits_pubrec(entry.packet_type, entry.qos))
            .unwrap_or(false);

        if in_outbox {
            if let Some(entry) = self.outbox.try_take(packet_id, PacketType::Publish) {
                let pubrel_entry = OutboxEntry {
                    packet_id,
                    packet_type: PacketType::Pubrel,
                    qos: entry.qos,
                    packet: pubrel.to_vec(),
                    enqueued_at: entry.enqueued_at,
                };

                if let Err(error) = self.outbox.enqueue(pubrel_entry) {
                    warn!("SessionBookkeeping - unable to track PUBREL ({}): {}", packet_id, error);
                }
            }

            return true;
        }

        if self.pending_matches(PacketType::Publish, packet_id) && self.pending_qos() == Some(QualityOfService::ExactlyOnce) {
            if let Some(pending) = self.pending.as_mut() {
                pending.packet_type = PacketType::Pubrel;
                pending.packet = pubrel.to_vec();
                return true;
            }
        }

        false
    }

    pub(crate) fn evict_stale(&mut self, now: Instant) {
        self.outbox.evict_expired(now, self.outbox_expiry);
        self.outbox.evict_oldest_until(self.outbox_maximum_entries);
    }

    /// The broker kept no session, so nothing outstanding can ever be acknowledged
    pub(crate) fn clear_tracked_operations(&mut self) {
        if self.pending.is_some() || !self.outbox.is_empty() {
            info!("SessionBookkeeping - discarding {} outstanding operation(s)", self.outbox.len() + self.pending.iter().count());
        }

        self.pending = None;
        self.outbox.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_operation(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

pub(crate) struct SharedClientState {
    session: Mutex<SessionBookkeeping>,
    pub(crate) dispatcher: EventDispatcher,
}

impl SharedClientState {
    pub(crate) fn new(config: &ClientConfig, default_listener: Option<ClientEventListener>) -> Self {
        SharedClientState {
            session: Mutex::new(SessionBookkeeping::new(config)),
            dispatcher: EventDispatcher::new(default_listener),
        }
    }

    pub(crate) fn lock_session(&self) -> MutexGuard<'_, SessionBookkeeping> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Encoded packet handed to the session task for writing.  If the packet never makes it onto
/// the wire, the session task forgets its tracking record whether or not anyone still awaits the
/// response.
pub(crate) struct OperationRequest {
    pub(crate) packet: Vec<u8>,
    pub(crate) packet_type: PacketType,

    /// 0 for an untracked QoS 0 publish
    pub(crate) packet_id: u16,

    pub(crate) response_sender: oneshot::Sender<MqttResult<()>>,
}

pub(crate) struct StopSignal {
    requested: AtomicBool,
    pub(crate) notify: Notify,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        StopSignal {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
