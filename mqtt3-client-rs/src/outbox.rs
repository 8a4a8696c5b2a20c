/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Bounded, time-ordered store of outbound packets that are still waiting on an acknowledgement.

use crate::*;

use lru::LruCache;
use log::*;
use std::time::{Duration, Instant};

/// An unacknowledged outbound packet
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutboxEntry {
    pub packet_id: u16,

    /// The type of the tracked packet; only the acknowledgement for this exact type may resolve it
    pub packet_type: PacketType,

    /// Delivery level of the originating operation; a QoS 2 PUBLISH only leaves via PUBREC
    pub qos: QualityOfService,

    /// Encoded packet bytes
    pub packet: Vec<u8>,

    pub enqueued_at: Instant,
}

/// Entries are keyed by (packet type, packet id) and kept in insertion order, oldest first.
///
/// `capacity` is a hard bound: an enqueue that would exceed it is rejected and existing entries
/// are left alone.  `evict_expired` and `evict_oldest_until` silently drop entries to bound
/// memory; nothing is ever retransmitted from here.
pub struct Outbox {
    entries: LruCache<(PacketType, u16), OutboxEntry>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Outbox {
            entries: LruCache::unbounded(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, packet_id: u16, packet_type: PacketType) -> bool {
        self.entries.contains(&(packet_type, packet_id))
    }

    pub fn enqueue(&mut self, entry: OutboxEntry) -> MqttResult<()> {
        let key = (entry.packet_type, entry.packet_id);
        if !self.entries.contains(&key) && self.is_full() {
            warn!("Outbox - rejecting {} ({}): store holds {} entries", entry.packet_type, entry.packet_id, self.entries.len());
            return Err(MqttError::OutboxFull);
        }

        debug!("Outbox - enqueueing {} ({})", entry.packet_type, entry.packet_id);
        self.entries.put(key, entry);

        Ok(())
    }

    pub fn peek(&self, packet_id: u16, packet_type: PacketType) -> Option<&OutboxEntry> {
        self.entries.peek(&(packet_type, packet_id))
    }

    /// Removes and returns the entry matching both the packet id and the packet type
    pub fn try_take(&mut self, packet_id: u16, packet_type: PacketType) -> Option<OutboxEntry> {
        self.entries.pop(&(packet_type, packet_id))
    }

    /// Drops every entry older than `max_age` as of `now`, returning how many were dropped
    pub fn evict_expired(&mut self, now: Instant, max_age: Duration) -> usize {
        let expired : Vec<(PacketType, u16)> = self.entries.iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.enqueued_at) > max_age)
            .map(|(key, _)| *key)
            .collect();

        for key in expired.iter() {
            if let Some(entry) = self.entries.pop(key) {
                info!("Outbox - expiring {} ({})", entry.packet_type, entry.packet_id);
            }
        }

        expired.len()
    }

    /// Drops the oldest entries until no more than `max_count` remain, returning how many were dropped
    pub fn evict_oldest_until(&mut self, max_count: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_count {
            if let Some((_, entry)) = self.entries.pop_lru() {
                info!("Outbox - evicting {} ({}) to stay within {} entries", entry.packet_type, entry.packet_id, max_count);
                evicted += 1;
            } else {
                break;
            }
        }

        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
