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

/// Data model of an [MQTT PUBLISH](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718037) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishPacket {

    /// Packet id of the publish.  Only meaningful (and only encoded) when qos is greater than zero.
    pub packet_id: u16,

    pub topic: String,

    pub qos: QualityOfService,

    /// Set when this is a re-delivery attempt of an earlier publish.
    pub duplicate: bool,

    /// Asks the broker to store the message as the last known good value for its topic.
    pub retain: bool,

    pub payload: Vec<u8>,
}

pub(crate) fn compute_publish_first_byte(qos: QualityOfService, duplicate: bool, retain: bool) -> u8 {
    let mut first_byte: u8 = PACKET_TYPE_PUBLISH << 4;
    if duplicate {
        first_byte |= PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG;
    }

    first_byte |= (qos as u8) << 1;

    if retain {
        first_byte |= PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG;
    }

    first_byte
}

fn compute_publish_packet_remaining_length(packet: &PublishPacket) -> usize {
    let mut length = 2 + packet.topic.len();
    if packet.qos != QualityOfService::AtMostOnce {
        length += 2;
    }

    length + packet.payload.len()
}

pub(crate) fn write_publish_packet(packet: &PublishPacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    let first_byte = compute_publish_first_byte(packet.qos, packet.duplicate, packet.retain);
    encode_fixed_header(first_byte, compute_publish_packet_remaining_length(packet), dest)?;

    encode_length_prefixed_string(&packet.topic, dest)?;
    if packet.qos != QualityOfService::AtMostOnce {
        encode_u16(packet.packet_id, dest);
    }

    dest.extend_from_slice(&packet.payload);

    Ok(())
}

/// Decodes the fixed header flags and the variable header (topic and packet id) of a publish.
///
/// Returns the payload-less packet plus the number of body bytes the variable header used, or None
/// if `bytes` does not yet hold the complete variable header.
pub(crate) fn decode_publish_variable_header(first_byte: u8, bytes: &[u8]) -> MqttResult<Option<(PublishPacket, usize)>> {
    if (first_byte >> 4) != PACKET_TYPE_PUBLISH {
        return Err(MqttError::MalformedPacket);
    }

    let qos = convert_u8_to_quality_of_service((first_byte >> 1) & QOS_MASK).map_err(|_| MqttError::MalformedPacket)?;
    let duplicate = (first_byte & PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG) != 0;
    if qos == QualityOfService::AtMostOnce && duplicate {
        return Err(MqttError::MalformedPacket);
    }

    if bytes.len() < 2 {
        return Ok(None);
    }

    let topic_length = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let mut header_length = 2 + topic_length;
    if qos != QualityOfService::AtMostOnce {
        header_length += 2;
    }

    if bytes.len() < header_length {
        return Ok(None);
    }

    let mut packet = PublishPacket {
        qos,
        duplicate,
        retain: (first_byte & PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG) != 0,
        ..Default::default()
    };

    let mutable_body = decode_length_prefixed_string(bytes, &mut packet.topic)?;
    if qos != QualityOfService::AtMostOnce {
        decode_u16(mutable_body, &mut packet.packet_id)?;
        if packet.packet_id == 0 {
            return Err(MqttError::MalformedPacket);
        }
    }

    Ok(Some((packet, header_length)))
}

pub(crate) fn decode_publish_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<PublishPacket> {
    match decode_publish_variable_header(first_byte, packet_body)? {
        Some((mut packet, header_length)) => {
            packet.payload = packet_body[header_length..].to_vec();
            Ok(packet)
        }
        None => {
            Err(MqttError::MalformedPacket)
        }
    }
}

impl fmt::Display for PublishPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PublishPacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        log_string!(self.topic, f, "topic");
        log_enum!(self.qos, f, "qos", quality_of_service_to_str);
        log_primitive_value!(self.duplicate, f, "duplicate");
        log_primitive_value!(self.retain, f, "retain");
        log_binary_data!(self.payload, f, "payload");
        write!(f, "}}")
    }
}
