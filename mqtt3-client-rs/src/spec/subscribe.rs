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

/// Specifies a single subscription within a Subscribe operation
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subscription {

    /// Topic filter to subscribe to
    pub topic_filter: String,

    /// Maximum QoS on which the subscriber will accept publish messages
    pub qos: QualityOfService,
}

impl Subscription {
    pub fn new(topic_filter: &str, qos: QualityOfService) -> Self {
        Subscription {
            topic_filter: topic_filter.to_string(),
            qos,
        }
    }
}

/// Data model of an [MQTT SUBSCRIBE](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718063) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub subscriptions: Vec<Subscription>,
}

/// Per-subscription result carried by a SUBACK.
///
/// See [MQTT SUBACK Payload](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718071)
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum SubscribeReturnCode {
    #[default]
    GrantedQos0,
    GrantedQos1,
    GrantedQos2,
    Failure,
}

const SUBACK_RETURN_CODE_FAILURE : u8 = 0x80;

pub(crate) fn convert_u8_to_subscribe_return_code(value: u8) -> MqttResult<SubscribeReturnCode> {
    match value {
        0 => { Ok(SubscribeReturnCode::GrantedQos0) }
        1 => { Ok(SubscribeReturnCode::GrantedQos1) }
        2 => { Ok(SubscribeReturnCode::GrantedQos2) }
        SUBACK_RETURN_CODE_FAILURE => { Ok(SubscribeReturnCode::Failure) }
        _ => { Err(MqttError::MalformedPacket) }
    }
}

fn convert_subscribe_return_code_to_u8(code: SubscribeReturnCode) -> u8 {
    match code {
        SubscribeReturnCode::GrantedQos0 => { 0 }
        SubscribeReturnCode::GrantedQos1 => { 1 }
        SubscribeReturnCode::GrantedQos2 => { 2 }
        SubscribeReturnCode::Failure => { SUBACK_RETURN_CODE_FAILURE }
    }
}

/// Data model of an [MQTT SUBACK](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718068) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubackPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

pub(crate) fn write_subscribe_packet(packet: &SubscribePacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    let remaining_length = 2 + packet.subscriptions.iter().map(|subscription| 2 + subscription.topic_filter.len() + 1).sum::<usize>();
    encode_fixed_header((PACKET_TYPE_SUBSCRIBE << 4) | RESERVED_FIXED_HEADER_FLAGS, remaining_length, dest)?;

    encode_u16(packet.packet_id, dest);
    for subscription in &packet.subscriptions {
        encode_length_prefixed_string(&subscription.topic_filter, dest)?;
        dest.push(subscription.qos as u8);
    }

    Ok(())
}

pub(crate) fn decode_subscribe_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<SubscribePacket> {
    if first_byte != ((PACKET_TYPE_SUBSCRIBE << 4) | RESERVED_FIXED_HEADER_FLAGS) {
        return Err(MqttError::MalformedPacket);
    }

    let mut packet = SubscribePacket { ..Default::default() };
    let mut mutable_body = decode_u16(packet_body, &mut packet.packet_id)?;

    /* a subscribe must carry at least one subscription */
    if mutable_body.is_empty() {
        return Err(MqttError::MalformedPacket);
    }

    while !mutable_body.is_empty() {
        let mut subscription = Subscription { ..Default::default() };
        mutable_body = decode_length_prefixed_string(mutable_body, &mut subscription.topic_filter)?;

        let mut qos : u8 = 0;
        mutable_body = decode_u8(mutable_body, &mut qos)?;
        subscription.qos = convert_u8_to_quality_of_service(qos).map_err(|_| MqttError::MalformedPacket)?;

        packet.subscriptions.push(subscription);
    }

    Ok(packet)
}

pub(crate) fn write_suback_packet(packet: &SubackPacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    encode_fixed_header(PACKET_TYPE_SUBACK << 4, 2 + packet.return_codes.len(), dest)?;

    encode_u16(packet.packet_id, dest);
    for return_code in &packet.return_codes {
        dest.push(convert_subscribe_return_code_to_u8(*return_code));
    }

    Ok(())
}

pub(crate) fn decode_suback_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<SubackPacket> {
    if first_byte != (PACKET_TYPE_SUBACK << 4) {
        return Err(MqttError::MalformedPacket);
    }

    let mut packet = SubackPacket { ..Default::default() };
    let mutable_body = decode_u16(packet_body, &mut packet.packet_id)?;

    for return_code in mutable_body {
        packet.return_codes.push(convert_u8_to_subscribe_return_code(*return_code)?);
    }

    Ok(packet)
}

impl fmt::Display for SubscribePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SubscribePacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        for (i, subscription) in self.subscriptions.iter().enumerate() {
            write!(f, "  subscription {}: ({}, {})\n", i, subscription.topic_filter, quality_of_service_to_str(subscription.qos))?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for SubackPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SubackPacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        write!(f, "  return_codes: {:?}\n", self.return_codes)?;
        write!(f, "}}")
    }
}
