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

/// Server response to a connection attempt.
///
/// See [MQTT CONNACK Return Code](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718035)
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ConnectReturnCode {
    #[default]
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

pub(crate) fn convert_u8_to_connect_return_code(value: u8) -> MqttResult<ConnectReturnCode> {
    match value {
        0 => { Ok(ConnectReturnCode::Accepted) }
        1 => { Ok(ConnectReturnCode::UnacceptableProtocolVersion) }
        2 => { Ok(ConnectReturnCode::IdentifierRejected) }
        3 => { Ok(ConnectReturnCode::ServerUnavailable) }
        4 => { Ok(ConnectReturnCode::BadUsernameOrPassword) }
        5 => { Ok(ConnectReturnCode::NotAuthorized) }
        _ => { Err(MqttError::MalformedPacket) }
    }
}

pub(crate) fn connect_return_code_to_str(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Accepted => { "Accepted" }
        ConnectReturnCode::UnacceptableProtocolVersion => { "UnacceptableProtocolVersion" }
        ConnectReturnCode::IdentifierRejected => { "IdentifierRejected" }
        ConnectReturnCode::ServerUnavailable => { "ServerUnavailable" }
        ConnectReturnCode::BadUsernameOrPassword => { "BadUsernameOrPassword" }
        ConnectReturnCode::NotAuthorized => { "NotAuthorized" }
    }
}

/// Data model of an [MQTT CONNACK](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718033) packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnackPacket {

    /// True if the broker resumed a prior session for this client id
    pub session_present: bool,

    pub return_code: ConnectReturnCode,
}

pub(crate) fn write_connack_packet(packet: &ConnackPacket, dest: &mut Vec<u8>) -> MqttResult<()> {
    encode_fixed_header(PACKET_TYPE_CONNACK << 4, 2, dest)?;
    dest.push(if packet.session_present { 1 } else { 0 });
    dest.push(packet.return_code as u8);

    Ok(())
}

pub(crate) fn decode_connack_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<ConnackPacket> {
    if first_byte != (PACKET_TYPE_CONNACK << 4) {
        return Err(MqttError::MalformedPacket);
    }

    let mut flags : u8 = 0;
    let mut mutable_body = decode_u8(packet_body, &mut flags)?;

    /* only the session present bit may be set */
    if (flags & !0x01) != 0 {
        return Err(MqttError::MalformedPacket);
    }

    let mut return_code : u8 = 0;
    mutable_body = decode_u8(mutable_body, &mut return_code)?;
    check_fully_consumed(mutable_body)?;

    Ok(ConnackPacket {
        session_present: flags != 0,
        return_code: convert_u8_to_connect_return_code(return_code)?,
    })
}

impl fmt::Display for ConnackPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ConnackPacket {{")?;
        log_primitive_value!(self.session_present, f, "session_present");
        log_enum!(self.return_code, f, "return_code", connect_return_code_to_str);
        write!(f, "}}")
    }
}
