/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub(crate) mod utils;

use crate::*;

use crate::spec::ack::*;
use crate::spec::connack::*;
use crate::spec::connect::*;
use crate::spec::ping::*;
use crate::spec::publish::*;
use crate::spec::subscribe::*;
use crate::spec::unsubscribe::*;

macro_rules! encode_packet_by_type {
    ($encode_function: ident, $packet: ident, $dest: ident) => {
        $encode_function($packet, $dest)
    };
}

/// Appends the complete wire encoding of `packet` to `dest`
pub fn encode_packet(packet: &MqttPacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    match packet {
        MqttPacket::Connect(connect) => { encode_packet_by_type!(write_connect_packet, connect, dest) }
        MqttPacket::Connack(connack) => { encode_packet_by_type!(write_connack_packet, connack, dest) }
        MqttPacket::Publish(publish) => { encode_packet_by_type!(write_publish_packet, publish, dest) }
        MqttPacket::Puback(puback) => { encode_packet_by_type!(write_puback_packet, puback, dest) }
        MqttPacket::Pubrec(pubrec) => { encode_packet_by_type!(write_pubrec_packet, pubrec, dest) }
        MqttPacket::Pubrel(pubrel) => { encode_packet_by_type!(write_pubrel_packet, pubrel, dest) }
        MqttPacket::Pubcomp(pubcomp) => { encode_packet_by_type!(write_pubcomp_packet, pubcomp, dest) }
        MqttPacket::Subscribe(subscribe) => { encode_packet_by_type!(write_subscribe_packet, subscribe, dest) }
        MqttPacket::Suback(suback) => { encode_packet_by_type!(write_suback_packet, suback, dest) }
        MqttPacket::Unsubscribe(unsubscribe) => { encode_packet_by_type!(write_unsubscribe_packet, unsubscribe, dest) }
        MqttPacket::Unsuback(unsuback) => { encode_packet_by_type!(write_unsuback_packet, unsuback, dest) }
        MqttPacket::Pingreq(pingreq) => { encode_packet_by_type!(write_pingreq_packet, pingreq, dest) }
        MqttPacket::Pingresp(pingresp) => { encode_packet_by_type!(write_pingresp_packet, pingresp, dest) }
        MqttPacket::Disconnect(disconnect) => { encode_packet_by_type!(write_disconnect_packet, disconnect, dest) }
    }
}

/// Hands out packet ids for QoS 1+ publishes, subscribes and unsubscribes.
///
/// Ids increase monotonically, wrap from 65535 back to 1 and are never zero.
#[derive(Debug)]
pub struct PacketIdAllocator {
    last_id: u16,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        PacketIdAllocator {
            last_id: 0
        }
    }

    /// The id the next call to `next_id` will return
    pub fn peek_next_id(&self) -> u16 {
        match self.last_id.wrapping_add(1) {
            0 => { 1 }
            id => { id }
        }
    }

    pub fn next_id(&mut self) -> u16 {
        self.last_id = self.peek_next_id();
        self.last_id
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds outbound packets, assigning packet ids and enforcing the configured buffer size
pub struct Encoder {
    packet_id_allocator: PacketIdAllocator,

    /// Largest complete packet, in bytes, this encoder will produce
    buffer_size: usize,
}

impl Encoder {
    pub fn new(buffer_size: usize) -> Self {
        Encoder {
            packet_id_allocator: PacketIdAllocator::new(),
            buffer_size,
        }
    }

    fn encode_bounded(&self, packet: &MqttPacket) -> MqttResult<Vec<u8>> {
        let mut dest = Vec::with_capacity(usize::min(self.buffer_size, 4096));
        encode_packet(packet, &mut dest)?;

        if dest.len() > self.buffer_size {
            return Err(MqttError::EncodeBufferTooSmall);
        }

        Ok(dest)
    }

    pub fn encode_connect(&self, connect: &ConnectPacket) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Connect(connect.clone()))
    }

    /// Encodes a publish, returning the bytes and the assigned packet id (0 for QoS 0)
    pub fn encode_publish(&mut self, topic: &str, payload: &[u8], qos: QualityOfService, retain: bool, duplicate: bool) -> MqttResult<(Vec<u8>, u16)> {
        let packet_id =
            if qos == QualityOfService::AtMostOnce {
                0
            } else {
                self.packet_id_allocator.peek_next_id()
            };

        let publish = PublishPacket {
            packet_id,
            topic: topic.to_string(),
            qos,
            duplicate,
            retain,
            payload: payload.to_vec(),
        };

        let bytes = self.encode_bounded(&MqttPacket::Publish(publish))?;
        if qos != QualityOfService::AtMostOnce {
            self.packet_id_allocator.next_id();
        }

        Ok((bytes, packet_id))
    }

    pub fn encode_subscribe(&mut self, topic_filter: &str, qos: QualityOfService) -> MqttResult<(Vec<u8>, u16)> {
        let packet_id = self.packet_id_allocator.peek_next_id();
        let subscribe = SubscribePacket {
            packet_id,
            subscriptions: vec!(Subscription::new(topic_filter, qos)),
        };

        let bytes = self.encode_bounded(&MqttPacket::Subscribe(subscribe))?;
        self.packet_id_allocator.next_id();

        Ok((bytes, packet_id))
    }

    pub fn encode_unsubscribe(&mut self, topic_filter: &str) -> MqttResult<(Vec<u8>, u16)> {
        let packet_id = self.packet_id_allocator.peek_next_id();
        let unsubscribe = UnsubscribePacket {
            packet_id,
            topic_filters: vec!(topic_filter.to_string()),
        };

        let bytes = self.encode_bounded(&MqttPacket::Unsubscribe(unsubscribe))?;
        self.packet_id_allocator.next_id();

        Ok((bytes, packet_id))
    }

    pub fn encode_puback(&self, packet_id: u16) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Puback(PubackPacket { packet_id }))
    }

    pub fn encode_pubrec(&self, packet_id: u16) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Pubrec(PubrecPacket { packet_id }))
    }

    pub fn encode_pubrel(&self, packet_id: u16) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Pubrel(PubrelPacket { packet_id }))
    }

    pub fn encode_pubcomp(&self, packet_id: u16) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Pubcomp(PubcompPacket { packet_id }))
    }

    pub fn encode_pingreq(&self) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Pingreq(PingreqPacket {}))
    }

    pub fn encode_pingresp(&self) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Pingresp(PingrespPacket {}))
    }

    pub fn encode_disconnect(&self) -> MqttResult<Vec<u8>> {
        self.encode_bounded(&MqttPacket::Disconnect(DisconnectPacket {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::*;
    use proptest::prelude::*;

    #[test]
    fn packet_id_allocator_starts_at_one() {
        let mut allocator = PacketIdAllocator::new();
        assert_eq!(1, allocator.next_id());
        assert_eq!(2, allocator.next_id());
    }

    #[test]
    fn packet_id_allocator_wraps_past_zero() {
        let mut allocator = PacketIdAllocator::new();
        for _ in 0..65534 {
            allocator.next_id();
        }

        assert_eq!(65535, allocator.next_id());
        assert_eq!(1, allocator.next_id());
        assert_eq!(2, allocator.next_id());
    }

    proptest! {
        #[test]
        fn packet_id_allocator_never_yields_zero(count in 1usize..200_000) {
            let mut allocator = PacketIdAllocator::new();
            let mut previous = 0u16;
            for _ in 0..count {
                let id = allocator.next_id();
                prop_assert_ne!(0, id);
                if previous == 65535 {
                    prop_assert_eq!(1, id);
                } else {
                    prop_assert_eq!(previous + 1, id);
                }
                previous = id;
            }
        }
    }

    #[test]
    fn encode_publish_qos0_has_no_packet_id() {
        let mut encoder = Encoder::new(1024);
        let (bytes, packet_id) = encoder.encode_publish("topic/a", "hello".as_bytes(), QualityOfService::AtMostOnce, false, false).unwrap();
        assert_eq!(0, packet_id);

        let header = decode_header(&bytes).unwrap().unwrap();
        assert_eq!(None, header.packet_id);
        assert_eq!(2 + 7 + 5, header.remaining_length);
    }

    #[test]
    fn encode_publish_qos1_assigns_fresh_ids() {
        let mut encoder = Encoder::new(1024);
        let (bytes, first_id) = encoder.encode_publish("topic/a", "hello".as_bytes(), QualityOfService::AtLeastOnce, false, false).unwrap();
        let (_, second_id) = encoder.encode_publish("topic/a", "hello".as_bytes(), QualityOfService::AtLeastOnce, false, false).unwrap();

        assert_ne!(0, first_id);
        assert_ne!(first_id, second_id);

        let header = decode_header(&bytes).unwrap().unwrap();
        assert_eq!(Some(first_id), header.packet_id);
        assert_eq!(QualityOfService::AtLeastOnce, header.qos);
    }

    #[test]
    fn encode_subscribe_and_unsubscribe_share_id_space() {
        let mut encoder = Encoder::new(1024);
        let (subscribe_bytes, subscribe_id) = encoder.encode_subscribe("a/+", QualityOfService::ExactlyOnce).unwrap();
        let (unsubscribe_bytes, unsubscribe_id) = encoder.encode_unsubscribe("a/+").unwrap();
        assert_eq!(subscribe_id + 1, unsubscribe_id);

        let subscribe = decode_packet(subscribe_bytes[0], &subscribe_bytes[2..]).unwrap();
        assert_eq!(MqttPacket::Subscribe(SubscribePacket {
            packet_id: subscribe_id,
            subscriptions: vec!(Subscription::new("a/+", QualityOfService::ExactlyOnce)),
        }), subscribe);

        let unsubscribe = decode_packet(unsubscribe_bytes[0], &unsubscribe_bytes[2..]).unwrap();
        assert_eq!(MqttPacket::Unsubscribe(UnsubscribePacket {
            packet_id: unsubscribe_id,
            topic_filters: vec!("a/+".to_string()),
        }), unsubscribe);
    }

    #[test]
    fn encode_rejects_packets_larger_than_buffer() {
        let mut encoder = Encoder::new(32);
        let payload = vec!(0u8; 64);
        assert_eq!(Err(MqttError::EncodeBufferTooSmall), encoder.encode_publish("t", &payload, QualityOfService::AtMostOnce, false, false));

        let (bytes, _) = encoder.encode_publish("t", &payload[..20], QualityOfService::AtMostOnce, false, false).unwrap();
        assert!(bytes.len() <= 32);
    }

    #[test]
    fn rejected_encode_does_not_consume_packet_id() {
        let mut encoder = Encoder::new(32);
        let (_, first_id) = encoder.encode_subscribe("a", QualityOfService::AtLeastOnce).unwrap();

        let payload = vec!(0u8; 64);
        let long_filter = "f".repeat(64);
        assert_eq!(Err(MqttError::EncodeBufferTooSmall), encoder.encode_publish("t", &payload, QualityOfService::AtLeastOnce, false, false));
        assert_eq!(Err(MqttError::EncodeBufferTooSmall), encoder.encode_subscribe(&long_filter, QualityOfService::AtMostOnce));
        assert_eq!(Err(MqttError::EncodeBufferTooSmall), encoder.encode_unsubscribe(&long_filter));

        let (_, next_id) = encoder.encode_unsubscribe("a").unwrap();
        assert_eq!(first_id + 1, next_id);
    }

    #[test]
    fn peek_matches_next_id_across_wrap() {
        let mut allocator = PacketIdAllocator { last_id: 65534 };
        assert_eq!(65535, allocator.peek_next_id());
        assert_eq!(65535, allocator.next_id());
        assert_eq!(1, allocator.peek_next_id());
        assert_eq!(1, allocator.next_id());
    }

    #[test]
    fn encode_acks() {
        let encoder = Encoder::new(1024);
        assert_eq!(vec!(0x40, 2, 0, 5), encoder.encode_puback(5).unwrap());
        assert_eq!(vec!(0x50, 2, 0, 5), encoder.encode_pubrec(5).unwrap());
        assert_eq!(vec!(0x62, 2, 0, 5), encoder.encode_pubrel(5).unwrap());
        assert_eq!(vec!(0x70, 2, 0, 5), encoder.encode_pubcomp(5).unwrap());
        assert_eq!(vec!(0xC0, 0), encoder.encode_pingreq().unwrap());
        assert_eq!(vec!(0xD0, 0), encoder.encode_pingresp().unwrap());
        assert_eq!(vec!(0xE0, 0), encoder.encode_disconnect().unwrap());
    }
}
