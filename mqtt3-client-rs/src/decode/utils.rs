/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::*;

#[derive(Eq, PartialEq, Debug)]
pub(crate) enum DecodeVliResult<'a> {
    InsufficientData,
    Value(usize, &'a[u8]), /* (decoded value, remaining bytes) */
}

pub(crate) fn decode_vli(buffer: &[u8]) -> MqttResult<DecodeVliResult> {
    let mut value: usize = 0;
    let mut shift: u32 = 0;
    let data_len = buffer.len();

    for i in 0..4 {
        if i >= data_len {
            return Ok(DecodeVliResult::InsufficientData);
        }

        let byte = buffer[i];
        value |= ((byte & 0x7F) as usize) << shift;
        shift += 7;

        let needs_data = (byte & 0x80) != 0;
        if !needs_data {
            return Ok(DecodeVliResult::Value(value, &buffer[(i + 1)..]));
        }
    }

    Err(MqttError::DecoderInvalidVli)
}

pub(crate) fn decode_u8<'a>(bytes: &'a[u8], value: &mut u8) -> MqttResult<&'a[u8]> {
    if bytes.is_empty() {
        return Err(MqttError::MalformedPacket);
    }

    *value = bytes[0];

    Ok(&bytes[1..])
}

pub(crate) fn decode_u16<'a>(bytes: &'a[u8], value: &mut u16) -> MqttResult<&'a[u8]> {
    if bytes.len() < 2 {
        return Err(MqttError::MalformedPacket);
    }

    *value = u16::from_be_bytes([bytes[0], bytes[1]]);

    Ok(&bytes[2..])
}

pub(crate) fn decode_length_prefixed_bytes<'a>(bytes: &'a[u8], value: &mut Vec<u8>) -> MqttResult<&'a[u8]> {
    let mut value_length : u16 = 0;
    let mutable_bytes = decode_u16(bytes, &mut value_length)?;
    let value_length = value_length as usize;
    if value_length > mutable_bytes.len() {
        return Err(MqttError::MalformedPacket);
    }

    *value = mutable_bytes[..value_length].to_vec();

    Ok(&mutable_bytes[value_length..])
}

pub(crate) fn decode_length_prefixed_string<'a>(bytes: &'a[u8], value: &mut String) -> MqttResult<&'a[u8]> {
    let mut value_length : u16 = 0;
    let mutable_bytes = decode_u16(bytes, &mut value_length)?;
    let value_length = value_length as usize;
    if value_length > mutable_bytes.len() {
        return Err(MqttError::MalformedPacket);
    }

    match std::str::from_utf8(&mutable_bytes[..value_length]) {
        Ok(string_value) => {
            *value = string_value.to_string();
            Ok(&mutable_bytes[value_length..])
        }
        Err(_) => { Err(MqttError::MalformedPacket) }
    }
}

/// Packet bodies must be consumed exactly; trailing bytes mean the declared length lied
pub(crate) fn check_fully_consumed(bytes: &[u8]) -> MqttResult<()> {
    if bytes.is_empty() {
        Ok(())
    } else {
        Err(MqttError::MalformedPacket)
    }
}
