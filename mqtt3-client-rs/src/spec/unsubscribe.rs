/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::*;
use crate::decode::utils::*;
use crate::encode::utils::*;
use crate::logging::*;
use crate::spec::*;

use std::fmt;

/// Data model of an [MQTT UNSUBSCRIBE](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718072) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topic_filters: Vec<String>,
}

pub(crate) fn write_unsubscribe_packet(packet: &UnsubscribePacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    let remaining_length = 2 + packet.topic_filters.iter().map(|filter| 2 + filter.len()).sum::<usize>();
    encode_fixed_header((PACKET_TYPE_UNSUBSCRIBE << 4) | RESERVED_FIXED_HEADER_FLAGS, remaining_length, dest)?;

    encode_u16(packet.packet_id, dest);
    for topic_filter in &packet.topic_filters {
        encode_length_prefixed_string(topic_filter, dest)?;
    }

    Ok(())
}

pub(crate) fn decode_unsubscribe_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<UnsubscribePacket> {
    if first_byte != ((PACKET_TYPE_UNSUBSCRIBE << 4) | RESERVED_FIXED_HEADER_FLAGS) {
        return Err(MqttError::MalformedPacket);
    }

    let mut packet = UnsubscribePacket { ..Default::default() };
    let mut mutable_body = decode_u16(packet_body, &mut packet.packet_id)?;

    if mutable_body.is_empty() {
        return Err(MqttError::MalformedPacket);
    }

    while !mutable_body.is_empty() {
        let mut topic_filter = String::new();
        mutable_body = decode_length_prefixed_string(mutable_body, &mut topic_filter)?;
        packet.topic_filters.push(topic_filter);
    }

    Ok(packet)
}

impl fmt::Display for UnsubscribePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "UnsubscribePacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        for (i, topic_filter) in self.topic_filters.iter().enumerate() {
            log_string!(topic_filter, f, format!("topic_filter {}", i));
        }
        write!(f, "}}")
    }
}
