/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! The acknowledgement packets whose only content is a packet id.

use crate::*;
use crate::decode::utils::*;
use crate::encode::utils::*;
use crate::logging::*;
use crate::spec::*;

use std::fmt;

macro_rules! define_ack_packet {
    ($packet_type: ident, $packet_name: expr, $doc_link: expr) => {
        #[doc = concat!("Data model of an [MQTT ", $packet_name, "](", $doc_link, ") packet")]
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        pub struct $packet_type {
            pub packet_id: u16,
        }

        impl fmt::Display for $packet_type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                writeln!(f, "{} {{", stringify!($packet_type))?;
                log_primitive_value!(self.packet_id, f, "packet_id");
                write!(f, "}}")
            }
        }
    };
}

macro_rules! define_ack_packet_encoding_function {
    ($function_name: ident, $packet_type: ident, $first_byte: expr) => {
        pub(crate) fn $function_name(packet: &$packet_type, dest: &mut Vec<u8>) -> MqttResult<()> {
            encode_fixed_header($first_byte, 2, dest)?;
            encode_u16(packet.packet_id, dest);

            Ok(())
        }
    };
}

macro_rules! define_ack_packet_decode_function {
    ($function_name: ident, $packet_type: ident, $first_byte: expr) => {
        pub(crate) fn $function_name(first_byte: u8, packet_body: &[u8]) -> MqttResult<$packet_type> {
            if first_byte != $first_byte {
                return Err(MqttError::MalformedPacket);
            }

            let mut packet = $packet_type { ..Default::default() };
            let mutable_body = decode_u16(packet_body, &mut packet.packet_id)?;
            check_fully_consumed(mutable_body)?;

            Ok(packet)
        }
    };
}

define_ack_packet!(PubackPacket, "PUBACK", "https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718043");
define_ack_packet!(PubrecPacket, "PUBREC", "https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718048");
define_ack_packet!(PubrelPacket, "PUBREL", "https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718053");
define_ack_packet!(PubcompPacket, "PUBCOMP", "https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718058");
define_ack_packet!(UnsubackPacket, "UNSUBACK", "https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718077");

define_ack_packet_encoding_function!(write_puback_packet, PubackPacket, PACKET_TYPE_PUBACK << 4);
define_ack_packet_encoding_function!(write_pubrec_packet, PubrecPacket, PACKET_TYPE_PUBREC << 4);
define_ack_packet_encoding_function!(write_pubrel_packet, PubrelPacket, (PACKET_TYPE_PUBREL << 4) | RESERVED_FIXED_HEADER_FLAGS);
define_ack_packet_encoding_function!(write_pubcomp_packet, PubcompPacket, PACKET_TYPE_PUBCOMP << 4);
define_ack_packet_encoding_function!(write_unsuback_packet, UnsubackPacket, PACKET_TYPE_UNSUBACK << 4);

define_ack_packet_decode_function!(decode_puback_packet, PubackPacket, PACKET_TYPE_PUBACK << 4);
define_ack_packet_decode_function!(decode_pubrec_packet, PubrecPacket, PACKET_TYPE_PUBREC << 4);
define_ack_packet_decode_function!(decode_pubrel_packet, PubrelPacket, (PACKET_TYPE_PUBREL << 4) | RESERVED_FIXED_HEADER_FLAGS);
define_ack_packet_decode_function!(decode_pubcomp_packet, PubcompPacket, PACKET_TYPE_PUBCOMP << 4);
define_ack_packet_decode_function!(decode_unsuback_packet, UnsubackPacket, PACKET_TYPE_UNSUBACK << 4);
