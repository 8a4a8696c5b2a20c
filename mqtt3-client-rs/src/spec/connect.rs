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

/// Message the broker publishes on the client's behalf if the connection drops unexpectedly.
///
/// See [MQTT Will Flag](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718031)
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QualityOfService,
    pub retain: bool,
}

/// Data model of an [MQTT CONNECT](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718028) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {

    /// Unique string identifying the client to the broker.
    pub client_id: String,

    /// Maximum time interval, in seconds, permitted between two consecutive client transmissions.
    pub keep_alive_interval_seconds: u16,

    /// Whether the broker should discard any prior session state for this client id.
    pub clean_session: bool,

    pub username: Option<String>,

    pub password: Option<Vec<u8>>,

    pub will: Option<LastWill>,
}

fn compute_connect_packet_remaining_length(packet: &ConnectPacket) -> usize {
    /* protocol name, level, flags, keep alive */
    let mut length = 2 + CONNECT_PACKET_PROTOCOL_NAME.len() + 1 + 1 + 2;

    length += 2 + packet.client_id.len();

    if let Some(will) = &packet.will {
        length += 2 + will.topic.len();
        length += 2 + will.payload.len();
    }

    if let Some(username) = &packet.username {
        length += 2 + username.len();
    }

    if let Some(password) = &packet.password {
        length += 2 + password.len();
    }

    length
}

fn compute_connect_flags(packet: &ConnectPacket) -> u8 {
    let mut flags: u8 = 0;
    if packet.clean_session {
        flags |= CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK;
    }

    if let Some(will) = &packet.will {
        flags |= CONNECT_PACKET_HAS_WILL_FLAG_MASK;
        flags |= (will.qos as u8) << CONNECT_PACKET_WILL_QOS_FLAG_SHIFT;
        if will.retain {
            flags |= CONNECT_PACKET_WILL_RETAIN_FLAG_MASK;
        }
    }

    if packet.password.is_some() {
        flags |= CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK;
    }

    if packet.username.is_some() {
        flags |= CONNECT_PACKET_HAS_USERNAME_FLAG_MASK;
    }

    flags
}

pub(crate) fn write_connect_packet(packet: &ConnectPacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    let remaining_length = compute_connect_packet_remaining_length(packet);
    encode_fixed_header(PACKET_TYPE_CONNECT << 4, remaining_length, dest)?;

    encode_length_prefixed_string(CONNECT_PACKET_PROTOCOL_NAME, dest)?;
    dest.push(CONNECT_PACKET_PROTOCOL_LEVEL);
    dest.push(compute_connect_flags(packet));
    encode_u16(packet.keep_alive_interval_seconds, dest);

    encode_length_prefixed_string(&packet.client_id, dest)?;

    if let Some(will) = &packet.will {
        encode_length_prefixed_string(&will.topic, dest)?;
        encode_length_prefixed_bytes(&will.payload, dest)?;
    }

    if let Some(username) = &packet.username {
        encode_length_prefixed_string(username, dest)?;
    }

    if let Some(password) = &packet.password {
        encode_length_prefixed_bytes(password, dest)?;
    }

    Ok(())
}

pub(crate) fn decode_connect_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<ConnectPacket> {
    if first_byte != (PACKET_TYPE_CONNECT << 4) {
        return Err(MqttError::MalformedPacket);
    }

    let mut packet = ConnectPacket { ..Default::default() };

    let mut protocol_name = String::new();
    let mut mutable_body = decode_length_prefixed_string(packet_body, &mut protocol_name)?;
    if protocol_name != CONNECT_PACKET_PROTOCOL_NAME {
        return Err(MqttError::MalformedPacket);
    }

    let mut protocol_level : u8 = 0;
    mutable_body = decode_u8(mutable_body, &mut protocol_level)?;
    if protocol_level != CONNECT_PACKET_PROTOCOL_LEVEL {
        return Err(MqttError::MalformedPacket);
    }

    let mut flags : u8 = 0;
    mutable_body = decode_u8(mutable_body, &mut flags)?;

    /* the reserved bit must be zero */
    if (flags & 0x01) != 0 {
        return Err(MqttError::MalformedPacket);
    }

    packet.clean_session = (flags & CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK) != 0;

    mutable_body = decode_u16(mutable_body, &mut packet.keep_alive_interval_seconds)?;
    mutable_body = decode_length_prefixed_string(mutable_body, &mut packet.client_id)?;

    if (flags & CONNECT_PACKET_HAS_WILL_FLAG_MASK) != 0 {
        let mut will = LastWill {
            qos: convert_u8_to_quality_of_service((flags >> CONNECT_PACKET_WILL_QOS_FLAG_SHIFT) & QOS_MASK).map_err(|_| MqttError::MalformedPacket)?,
            retain: (flags & CONNECT_PACKET_WILL_RETAIN_FLAG_MASK) != 0,
            ..Default::default()
        };

        mutable_body = decode_length_prefixed_string(mutable_body, &mut will.topic)?;
        mutable_body = decode_length_prefixed_bytes(mutable_body, &mut will.payload)?;
        packet.will = Some(will);
    } else if (flags & (CONNECT_PACKET_WILL_RETAIN_FLAG_MASK | (QOS_MASK << CONNECT_PACKET_WILL_QOS_FLAG_SHIFT))) != 0 {
        return Err(MqttError::MalformedPacket);
    }

    if (flags & CONNECT_PACKET_HAS_USERNAME_FLAG_MASK) != 0 {
        let mut username = String::new();
        mutable_body = decode_length_prefixed_string(mutable_body, &mut username)?;
        packet.username = Some(username);
    }

    if (flags & CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK) != 0 {
        let mut password = Vec::new();
        mutable_body = decode_length_prefixed_bytes(mutable_body, &mut password)?;
        packet.password = Some(password);
    }

    check_fully_consumed(mutable_body)?;

    Ok(packet)
}

impl fmt::Display for ConnectPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ConnectPacket {{")?;
        log_string!(self.client_id, f, "client_id");
        log_primitive_value!(self.keep_alive_interval_seconds, f, "keep_alive_interval_seconds");
        log_primitive_value!(self.clean_session, f, "clean_session");
        log_optional_string!(self.username, f, "username", value);
        log_optional_binary_data_sensitive!(self.password, f, "password");
        if let Some(will) = &self.will {
            log_string!(will.topic, f, "will_topic");
            log_binary_data!(will.payload, f, "will_payload");
            log_enum!(will.qos, f, "will_qos", quality_of_service_to_str);
            log_primitive_value!(will.retain, f, "will_retain");
        }
        write!(f, "}}")
    }
}
