/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Data model of the MQTT 3.1.1 control packets along with their wire encoding and decoding.

pub mod ack;
pub mod connack;
pub mod connect;
pub mod ping;
pub mod publish;
pub mod subscribe;
pub mod unsubscribe;

use crate::*;

use std::fmt;

pub(crate) const PACKET_TYPE_CONNECT: u8 = 1;
pub(crate) const PACKET_TYPE_CONNACK: u8 = 2;
pub(crate) const PACKET_TYPE_PUBLISH: u8 = 3;
pub(crate) const PACKET_TYPE_PUBACK: u8 = 4;
pub(crate) const PACKET_TYPE_PUBREC: u8 = 5;
pub(crate) const PACKET_TYPE_PUBREL: u8 = 6;
pub(crate) const PACKET_TYPE_PUBCOMP: u8 = 7;
pub(crate) const PACKET_TYPE_SUBSCRIBE: u8 = 8;
pub(crate) const PACKET_TYPE_SUBACK: u8 = 9;
pub(crate) const PACKET_TYPE_UNSUBSCRIBE: u8 = 10;
pub(crate) const PACKET_TYPE_UNSUBACK: u8 = 11;
pub(crate) const PACKET_TYPE_PINGREQ: u8 = 12;
pub(crate) const PACKET_TYPE_PINGRESP: u8 = 13;
pub(crate) const PACKET_TYPE_DISCONNECT: u8 = 14;

/// Largest value representable by the remaining length field
pub(crate) const MAXIMUM_VARIABLE_LENGTH_INTEGER: usize = 268_435_455;

pub(crate) const PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG : u8 = 8;
pub(crate) const PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG : u8 = 1;
pub(crate) const QOS_MASK : u8 = 3;

pub(crate) const CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK : u8 = 1 << 1;
pub(crate) const CONNECT_PACKET_HAS_WILL_FLAG_MASK : u8 = 1 << 2;
pub(crate) const CONNECT_PACKET_WILL_QOS_FLAG_SHIFT : u8 = 3;
pub(crate) const CONNECT_PACKET_WILL_RETAIN_FLAG_MASK : u8 = 1 << 5;
pub(crate) const CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK : u8 = 1 << 6;
pub(crate) const CONNECT_PACKET_HAS_USERNAME_FLAG_MASK : u8 = 1 << 7;

pub(crate) const CONNECT_PACKET_PROTOCOL_NAME : &str = "MQTT";
pub(crate) const CONNECT_PACKET_PROTOCOL_LEVEL : u8 = 4;

/// Fixed header flags that PUBREL, SUBSCRIBE and UNSUBSCRIBE are required to carry
pub(crate) const RESERVED_FIXED_HEADER_FLAGS : u8 = 0x02;

/// MQTT message delivery quality of service.
///
/// See [MQTT QoS](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718099)
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityOfService {

    /// Fire-and-forget.  No acknowledgement is sent or expected.
    #[default]
    AtMostOnce = 0,

    /// At-least-once delivery, acknowledged by a PUBACK.
    AtLeastOnce = 1,

    /// Exactly-once delivery through the PUBREC/PUBREL/PUBCOMP exchange.
    ExactlyOnce = 2,
}

pub fn convert_u8_to_quality_of_service(value: u8) -> MqttResult<QualityOfService> {
    match value {
        0 => { Ok(QualityOfService::AtMostOnce) }
        1 => { Ok(QualityOfService::AtLeastOnce) }
        2 => { Ok(QualityOfService::ExactlyOnce) }
        _ => { Err(MqttError::InvalidQos) }
    }
}

pub(crate) fn quality_of_service_to_str(qos: QualityOfService) -> &'static str {
    match qos {
        QualityOfService::AtMostOnce => { "AtMostOnce (0)" }
        QualityOfService::AtLeastOnce => { "AtLeastOnce (1)" }
        QualityOfService::ExactlyOnce => { "ExactlyOnce (2)" }
    }
}

/// Control packet type as carried in the high nibble of the first fixed header byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
}

pub(crate) fn convert_u8_to_packet_type(value: u8) -> MqttResult<PacketType> {
    match value {
        PACKET_TYPE_CONNECT => { Ok(PacketType::Connect) }
        PACKET_TYPE_CONNACK => { Ok(PacketType::Connack) }
        PACKET_TYPE_PUBLISH => { Ok(PacketType::Publish) }
        PACKET_TYPE_PUBACK => { Ok(PacketType::Puback) }
        PACKET_TYPE_PUBREC => { Ok(PacketType::Pubrec) }
        PACKET_TYPE_PUBREL => { Ok(PacketType::Pubrel) }
        PACKET_TYPE_PUBCOMP => { Ok(PacketType::Pubcomp) }
        PACKET_TYPE_SUBSCRIBE => { Ok(PacketType::Subscribe) }
        PACKET_TYPE_SUBACK => { Ok(PacketType::Suback) }
        PACKET_TYPE_UNSUBSCRIBE => { Ok(PacketType::Unsubscribe) }
        PACKET_TYPE_UNSUBACK => { Ok(PacketType::Unsuback) }
        PACKET_TYPE_PINGREQ => { Ok(PacketType::Pingreq) }
        PACKET_TYPE_PINGRESP => { Ok(PacketType::Pingresp) }
        PACKET_TYPE_DISCONNECT => { Ok(PacketType::Disconnect) }
        _ => { Err(MqttError::MalformedPacket) }
    }
}

pub(crate) fn packet_type_to_str(packet_type: PacketType) -> &'static str {
    match packet_type {
        PacketType::Connect => { "CONNECT" }
        PacketType::Connack => { "CONNACK" }
        PacketType::Publish => { "PUBLISH" }
        PacketType::Puback => { "PUBACK" }
        PacketType::Pubrec => { "PUBREC" }
        PacketType::Pubrel => { "PUBREL" }
        PacketType::Pubcomp => { "PUBCOMP" }
        PacketType::Subscribe => { "SUBSCRIBE" }
        PacketType::Suback => { "SUBACK" }
        PacketType::Unsubscribe => { "UNSUBSCRIBE" }
        PacketType::Unsuback => { "UNSUBACK" }
        PacketType::Pingreq => { "PINGREQ" }
        PacketType::Pingresp => { "PINGRESP" }
        PacketType::Disconnect => { "DISCONNECT" }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", packet_type_to_str(*self))
    }
}

/// Algebraic union of all MQTT 3.1.1 packets
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    Connack(ConnackPacket),
    Publish(PublishPacket),
    Puback(PubackPacket),
    Pubrec(PubrecPacket),
    Pubrel(PubrelPacket),
    Pubcomp(PubcompPacket),
    Subscribe(SubscribePacket),
    Suback(SubackPacket),
    Unsubscribe(UnsubscribePacket),
    Unsuback(UnsubackPacket),
    Pingreq(PingreqPacket),
    Pingresp(PingrespPacket),
    Disconnect(DisconnectPacket),
}

impl MqttPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            MqttPacket::Connect(_) => { PacketType::Connect }
            MqttPacket::Connack(_) => { PacketType::Connack }
            MqttPacket::Publish(_) => { PacketType::Publish }
            MqttPacket::Puback(_) => { PacketType::Puback }
            MqttPacket::Pubrec(_) => { PacketType::Pubrec }
            MqttPacket::Pubrel(_) => { PacketType::Pubrel }
            MqttPacket::Pubcomp(_) => { PacketType::Pubcomp }
            MqttPacket::Subscribe(_) => { PacketType::Subscribe }
            MqttPacket::Suback(_) => { PacketType::Suback }
            MqttPacket::Unsubscribe(_) => { PacketType::Unsubscribe }
            MqttPacket::Unsuback(_) => { PacketType::Unsuback }
            MqttPacket::Pingreq(_) => { PacketType::Pingreq }
            MqttPacket::Pingresp(_) => { PacketType::Pingresp }
            MqttPacket::Disconnect(_) => { PacketType::Disconnect }
        }
    }
}

impl fmt::Display for MqttPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttPacket::Connect(packet) => { write!(f, "{}", packet) }
            MqttPacket::Connack(packet) => { write!(f, "{}", packet) }
            MqttPacket::Publish(packet) => { write!(f, "{}", packet) }
            MqttPacket::Puback(packet) => { write!(f, "{}", packet) }
            MqttPacket::Pubrec(packet) => { write!(f, "{}", packet) }
            MqttPacket::Pubrel(packet) => { write!(f, "{}", packet) }
            MqttPacket::Pubcomp(packet) => { write!(f, "{}", packet) }
            MqttPacket::Subscribe(packet) => { write!(f, "{}", packet) }
            MqttPacket::Suback(packet) => { write!(f, "{}", packet) }
            MqttPacket::Unsubscribe(packet) => { write!(f, "{}", packet) }
            MqttPacket::Unsuback(packet) => { write!(f, "{}", packet) }
            MqttPacket::Pingreq(packet) => { write!(f, "{}", packet) }
            MqttPacket::Pingresp(packet) => { write!(f, "{}", packet) }
            MqttPacket::Disconnect(packet) => { write!(f, "{}", packet) }
        }
    }
}
