/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Packets that consist of nothing but a fixed header.

use crate::*;
use crate::encode::utils::*;

use std::fmt;

macro_rules! define_empty_packet {
    ($packet_type: ident, $write_function: ident, $decode_function: ident, $first_byte: expr) => {
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        pub struct $packet_type {}

        pub(crate) fn $write_function(_: &$packet_type, dest: &mut Vec<u8>) -> MqttResult<()> {
            encode_fixed_header($first_byte, 0, dest)
        }

        pub(crate) fn $decode_function(first_byte: u8, packet_body: &[u8]) -> MqttResult<$packet_type> {
            if first_byte != $first_byte || !packet_body.is_empty() {
                return Err(MqttError::MalformedPacket);
            }

            Ok($packet_type {})
        }

        impl fmt::Display for $packet_type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {{}}", stringify!($packet_type))
            }
        }
    };
}

define_empty_packet!(PingreqPacket, write_pingreq_packet, decode_pingreq_packet, spec::PACKET_TYPE_PINGREQ << 4);
define_empty_packet!(PingrespPacket, write_pingresp_packet, decode_pingresp_packet, spec::PACKET_TYPE_PINGRESP << 4);
define_empty_packet!(DisconnectPacket, write_disconnect_packet, decode_disconnect_packet, spec::PACKET_TYPE_DISCONNECT << 4);
