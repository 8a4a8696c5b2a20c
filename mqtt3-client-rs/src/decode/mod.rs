/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub(crate) mod utils;

use crate::*;
use crate::decode::utils::*;
use crate::spec::*;

use crate::spec::ack::*;
use crate::spec::connack::*;
use crate::spec::connect::*;
use crate::spec::ping::*;
use crate::spec::publish::*;
use crate::spec::subscribe::*;
use crate::spec::unsubscribe::*;

use std::collections::VecDeque;

const DECODE_BUFFER_DEFAULT_SIZE : usize = 4 * 1024;

/// Everything the fixed header (plus, when present in the supplied bytes, the packet id) reveals
/// about a packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedHeader {
    pub packet_type: PacketType,

    /// Low nibble of the first byte
    pub flags: u8,

    /// Only meaningful for PUBLISH
    pub qos: QualityOfService,

    pub duplicate: bool,

    pub retain: bool,

    /// Packet id if the packet type carries one and enough bytes were supplied to read it
    pub packet_id: Option<u16>,

    /// Number of bytes following the fixed header
    pub remaining_length: usize,

    /// Size of the fixed header itself (first byte plus the encoded remaining length)
    pub header_length: usize,
}

impl FixedHeader {
    pub fn total_length(&self) -> usize {
        self.header_length + self.remaining_length
    }
}

fn validate_fixed_header_flags(packet_type: PacketType, flags: u8) -> MqttResult<()> {
    let valid = match packet_type {
        PacketType::Publish => { ((flags >> 1) & QOS_MASK) != QOS_MASK }
        PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => { flags == RESERVED_FIXED_HEADER_FLAGS }
        _ => { flags == 0 }
    };

    if valid {
        Ok(())
    } else {
        Err(MqttError::MalformedPacket)
    }
}

fn peek_packet_id(header: &FixedHeader, body: &[u8]) -> Option<u16> {
    let available = usize::min(body.len(), header.remaining_length);
    let body = &body[..available];

    match header.packet_type {
        PacketType::Publish => {
            if header.qos == QualityOfService::AtMostOnce || body.len() < 2 {
                return None;
            }

            let topic_length = u16::from_be_bytes([body[0], body[1]]) as usize;
            if body.len() < topic_length + 4 {
                return None;
            }

            Some(u16::from_be_bytes([body[topic_length + 2], body[topic_length + 3]]))
        }
        PacketType::Puback | PacketType::Pubrec | PacketType::Pubrel | PacketType::Pubcomp |
        PacketType::Subscribe | PacketType::Suback | PacketType::Unsubscribe | PacketType::Unsuback => {
            if body.len() < 2 {
                return None;
            }

            Some(u16::from_be_bytes([body[0], body[1]]))
        }
        _ => { None }
    }
}

/// Decodes the fixed header at the start of `bytes`.
///
/// Returns Ok(None) when more bytes are needed to finish the fixed header.  Never looks past the
/// declared remaining length.
pub fn decode_header(bytes: &[u8]) -> MqttResult<Option<FixedHeader>> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let first_byte = bytes[0];
    let packet_type = convert_u8_to_packet_type(first_byte >> 4)?;
    let flags = first_byte & 0x0F;
    validate_fixed_header_flags(packet_type, flags)?;

    match decode_vli(&bytes[1..])? {
        DecodeVliResult::InsufficientData => { Ok(None) }
        DecodeVliResult::Value(remaining_length, body) => {
            let mut header = FixedHeader {
                packet_type,
                flags,
                qos: QualityOfService::AtMostOnce,
                duplicate: false,
                retain: false,
                packet_id: None,
                remaining_length,
                header_length: bytes.len() - body.len(),
            };

            if packet_type == PacketType::Publish {
                header.qos = convert_u8_to_quality_of_service((flags >> 1) & QOS_MASK).map_err(|_| MqttError::MalformedPacket)?;
                header.duplicate = (flags & PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG) != 0;
                header.retain = (flags & PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG) != 0;
            }

            header.packet_id = peek_packet_id(&header, body);

            Ok(Some(header))
        }
    }
}

macro_rules! decode_packet_by_type {
    ($decode_function: ident, $packet_type: ident, $first_byte: ident, $packet_body: ident) => {
        match $decode_function($first_byte, $packet_body) {
            Ok(packet) => { return Ok(MqttPacket::$packet_type(packet)); }
            Err(err) => { return Err(err); }
        }
    };
}

/// Decodes a complete packet given its first byte and exactly `remaining_length` body bytes
pub fn decode_packet(first_byte: u8, packet_body: &[u8]) -> MqttResult<MqttPacket> {
    let packet_type = first_byte >> 4;

    match packet_type {
        PACKET_TYPE_CONNECT => { decode_packet_by_type!(decode_connect_packet, Connect, first_byte, packet_body) }
        PACKET_TYPE_CONNACK => { decode_packet_by_type!(decode_connack_packet, Connack, first_byte, packet_body) }
        PACKET_TYPE_PUBLISH => { decode_packet_by_type!(decode_publish_packet, Publish, first_byte, packet_body) }
        PACKET_TYPE_PUBACK => { decode_packet_by_type!(decode_puback_packet, Puback, first_byte, packet_body) }
        PACKET_TYPE_PUBREC => { decode_packet_by_type!(decode_pubrec_packet, Pubrec, first_byte, packet_body) }
        PACKET_TYPE_PUBREL => { decode_packet_by_type!(decode_pubrel_packet, Pubrel, first_byte, packet_body) }
        PACKET_TYPE_PUBCOMP => { decode_packet_by_type!(decode_pubcomp_packet, Pubcomp, first_byte, packet_body) }
        PACKET_TYPE_SUBSCRIBE => { decode_packet_by_type!(decode_subscribe_packet, Subscribe, first_byte, packet_body) }
        PACKET_TYPE_SUBACK => { decode_packet_by_type!(decode_suback_packet, Suback, first_byte, packet_body) }
        PACKET_TYPE_UNSUBSCRIBE => { decode_packet_by_type!(decode_unsubscribe_packet, Unsubscribe, first_byte, packet_body) }
        PACKET_TYPE_UNSUBACK => { decode_packet_by_type!(decode_unsuback_packet, Unsuback, first_byte, packet_body) }
        PACKET_TYPE_PINGREQ => { decode_packet_by_type!(decode_pingreq_packet, Pingreq, first_byte, packet_body) }
        PACKET_TYPE_PINGRESP => { decode_packet_by_type!(decode_pingresp_packet, Pingresp, first_byte, packet_body) }
        PACKET_TYPE_DISCONNECT => { decode_packet_by_type!(decode_disconnect_packet, Disconnect, first_byte, packet_body) }
        _ => {
            Err(MqttError::MalformedPacket)
        }
    }
}

/// One contiguous piece of an inbound PUBLISH too large to be buffered whole
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PublishChunk {

    /// Topic, qos, flags and packet id of the publish; the payload field is always empty
    pub publish: PublishPacket,

    pub data: Vec<u8>,

    pub payload_offset: usize,

    pub payload_total_length: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum DecodedItem {
    Packet(MqttPacket),
    PublishChunk(PublishChunk),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum DecoderState {
    ReadPacketType,
    ReadTotalRemainingLength,
    ReadPacketBody,
    ReadPublishVariableHeader,
    StreamPublishPayload,
    TerminalError
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum DecoderDirective {
    OutOfData,
    Continue,
    TerminalError
}

struct PublishStream {
    publish: PublishPacket,
    payload_total_length: usize,
    payload_delivered: usize,
}

/// Incremental decoder for the inbound byte stream of a connection.
///
/// Packets whose body fits within `maximum_buffered_body_size` are buffered and decoded whole.
/// Larger PUBLISH packets are surfaced as a sequence of payload chunks as bytes arrive, so the
/// decoder never holds more than one read's worth of such a payload.
pub(crate) struct Decoder {
    maximum_buffered_body_size: usize,

    state: DecoderState,

    scratch: Vec<u8>,

    first_byte: Option<u8>,

    remaining_length : Option<usize>,

    publish_stream: Option<PublishStream>,
}

impl Decoder {
    pub(crate) fn new(maximum_buffered_body_size: usize) -> Decoder {
        Decoder {
            maximum_buffered_body_size,
            state: DecoderState::ReadPacketType,
            scratch : Vec::<u8>::with_capacity(usize::min(DECODE_BUFFER_DEFAULT_SIZE, maximum_buffered_body_size)),
            first_byte : None,
            remaining_length : None,
            publish_stream: None,
        }
    }

    pub(crate) fn reset_for_new_connection(&mut self) {
        self.reset();
    }

    fn process_read_packet_type<'a>(&mut self, bytes: &'a [u8]) -> (DecoderDirective, &'a[u8]) {
        if bytes.is_empty() {
            return (DecoderDirective::OutOfData, bytes);
        }

        self.first_byte = Some(bytes[0]);
        self.state = DecoderState::ReadTotalRemainingLength;

        (DecoderDirective::Continue, &bytes[1..])
    }

    fn process_read_total_remaining_length<'a>(&mut self, bytes: &'a[u8]) -> (DecoderDirective, &'a[u8]) {
        if bytes.is_empty() {
            return (DecoderDirective::OutOfData, bytes);
        }

        self.scratch.push(bytes[0]);
        let remaining_bytes = &bytes[1..];

        let decode_vli_result = decode_vli(&self.scratch);
        if let Ok(DecodeVliResult::Value(remaining_length, _)) = decode_vli_result {
            self.remaining_length = Some(remaining_length);
            self.scratch.clear();

            let first_byte = self.first_byte.unwrap_or(0);
            if remaining_length <= self.maximum_buffered_body_size {
                self.state = DecoderState::ReadPacketBody;
            } else if (first_byte >> 4) == PACKET_TYPE_PUBLISH {
                self.state = DecoderState::ReadPublishVariableHeader;
            } else {
                /* only PUBLISH payloads may outgrow the buffer */
                return (DecoderDirective::TerminalError, remaining_bytes);
            }

            (DecoderDirective::Continue, remaining_bytes)
        } else if self.scratch.len() >= 4 {
            (DecoderDirective::TerminalError, remaining_bytes)
        } else if !remaining_bytes.is_empty() {
            (DecoderDirective::Continue, remaining_bytes)
        } else {
            (DecoderDirective::OutOfData, remaining_bytes)
        }
    }

    fn process_read_packet_body<'a>(&mut self, bytes: &'a[u8], items: &mut VecDeque<DecodedItem>) -> (DecoderDirective, &'a[u8]) {
        let (Some(first_byte), Some(remaining_length)) = (self.first_byte, self.remaining_length) else {
            return (DecoderDirective::TerminalError, &[]);
        };

        let read_so_far = self.scratch.len();
        let bytes_needed = remaining_length - read_so_far;
        if bytes_needed > bytes.len() {
            self.scratch.extend_from_slice(bytes);
            return (DecoderDirective::OutOfData, &[]);
        }

        let decode_result =
            if !self.scratch.is_empty() {
                self.scratch.extend_from_slice(&bytes[..bytes_needed]);
                decode_packet(first_byte, &self.scratch)
            } else {
                decode_packet(first_byte, &bytes[..bytes_needed])
            };

        match decode_result {
            Ok(packet) => {
                items.push_back(DecodedItem::Packet(packet));
                self.reset();
                (DecoderDirective::Continue, &bytes[bytes_needed..])
            }
            Err(_) => {
                (DecoderDirective::TerminalError, &[])
            }
        }
    }

    fn process_read_publish_variable_header<'a>(&mut self, bytes: &'a[u8], items: &mut VecDeque<DecodedItem>) -> (DecoderDirective, &'a[u8]) {
        let (Some(first_byte), Some(remaining_length)) = (self.first_byte, self.remaining_length) else {
            return (DecoderDirective::TerminalError, &[]);
        };

        if bytes.is_empty() {
            return (DecoderDirective::OutOfData, bytes);
        }

        /* the variable header is at most 65539 bytes, so it is fine to buffer */
        let bytes_wanted = usize::min(bytes.len(), remaining_length - self.scratch.len());
        self.scratch.extend_from_slice(&bytes[..bytes_wanted]);
        let remaining_bytes = &bytes[bytes_wanted..];

        match decode_publish_variable_header(first_byte, &self.scratch) {
            Ok(Some((publish, header_length))) => {
                if header_length > remaining_length {
                    return (DecoderDirective::TerminalError, &[]);
                }

                if header_length == remaining_length {
                    items.push_back(DecodedItem::Packet(MqttPacket::Publish(publish)));
                    self.reset();
                    return (DecoderDirective::Continue, remaining_bytes);
                }

                /* bytes past the variable header are the start of the payload */
                let payload_start = self.scratch.split_off(header_length);
                self.scratch.clear();
                self.publish_stream = Some(PublishStream {
                    publish,
                    payload_total_length: remaining_length - header_length,
                    payload_delivered: 0,
                });
                self.scratch = payload_start;
                self.state = DecoderState::StreamPublishPayload;

                (DecoderDirective::Continue, remaining_bytes)
            }
            Ok(None) => {
                if self.scratch.len() >= remaining_length {
                    (DecoderDirective::TerminalError, &[])
                } else {
                    (DecoderDirective::OutOfData, remaining_bytes)
                }
            }
            Err(_) => {
                (DecoderDirective::TerminalError, &[])
            }
        }
    }

    fn process_stream_publish_payload<'a>(&mut self, bytes: &'a[u8], items: &mut VecDeque<DecodedItem>) -> (DecoderDirective, &'a[u8]) {
        let Some(stream) = self.publish_stream.as_mut() else {
            return (DecoderDirective::TerminalError, &[]);
        };

        let payload_left = stream.payload_total_length - stream.payload_delivered;

        /* leftover bytes from the variable header read go out first */
        let mut data = std::mem::take(&mut self.scratch);
        let from_input = usize::min(bytes.len(), payload_left - data.len());
        data.extend_from_slice(&bytes[..from_input]);
        let remaining_bytes = &bytes[from_input..];

        if data.is_empty() {
            return (DecoderDirective::OutOfData, remaining_bytes);
        }

        let chunk_length = data.len();
        items.push_back(DecodedItem::PublishChunk(PublishChunk {
            publish: stream.publish.clone(),
            data,
            payload_offset: stream.payload_delivered,
            payload_total_length: stream.payload_total_length,
        }));

        stream.payload_delivered += chunk_length;
        if stream.payload_delivered == stream.payload_total_length {
            self.reset();
            return (DecoderDirective::Continue, remaining_bytes);
        }

        (DecoderDirective::OutOfData, remaining_bytes)
    }

    /// Feeds newly read bytes through the decoder, appending everything completed to `items`
    pub(crate) fn decode_bytes(&mut self, bytes: &[u8], items: &mut VecDeque<DecodedItem>) -> MqttResult<()> {
        let mut current_slice = bytes;

        let mut decode_result = DecoderDirective::Continue;
        while decode_result == DecoderDirective::Continue {
            match self.state {
                DecoderState::ReadPacketType => {
                    (decode_result, current_slice) = self.process_read_packet_type(current_slice);
                }

                DecoderState::ReadTotalRemainingLength => {
                    (decode_result, current_slice) = self.process_read_total_remaining_length(current_slice);
                }

                DecoderState::ReadPacketBody => {
                    (decode_result, current_slice) = self.process_read_packet_body(current_slice, items);
                }

                DecoderState::ReadPublishVariableHeader => {
                    (decode_result, current_slice) = self.process_read_publish_variable_header(current_slice, items);
                }

                DecoderState::StreamPublishPayload => {
                    (decode_result, current_slice) = self.process_stream_publish_payload(current_slice, items);
                }

                DecoderState::TerminalError => {
                    decode_result = DecoderDirective::TerminalError;
                }
            }
        }

        if decode_result == DecoderDirective::TerminalError {
            self.state = DecoderState::TerminalError;
            return Err(MqttError::MalformedPacket);
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.state = DecoderState::ReadPacketType;
        self.scratch.clear();
        self.first_byte = None;
        self.remaining_length = None;
        self.publish_stream = None;
    }
}
