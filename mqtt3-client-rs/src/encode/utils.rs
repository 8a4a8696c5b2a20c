/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

///
/// Internal utilities to encode MQTT 3.1.1 packet fields

use crate::*;
use crate::spec::*;

pub(crate) fn compute_variable_length_integer_encode_size(value: usize) -> MqttResult<usize> {
    if value < 1usize << 7 {
        Ok(1)
    } else if value < 1usize << 14 {
        Ok(2)
    } else if value < 1usize << 21 {
        Ok(3)
    } else if value <= MAXIMUM_VARIABLE_LENGTH_INTEGER {
        Ok(4)
    } else {
        Err(MqttError::VariableLengthIntegerMaximumExceeded)
    }
}

pub(crate) fn encode_vli(value: usize, dest: &mut Vec<u8>) -> MqttResult<()> {
    if value > MAXIMUM_VARIABLE_LENGTH_INTEGER {
        return Err(MqttError::VariableLengthIntegerMaximumExceeded);
    }

    let mut done = false;
    let mut val = value;
    while !done {
        let mut byte: u8 = (val & 0x7F) as u8;
        val /= 128;

        if val != 0 {
            byte |= 128;
        }

        dest.push(byte);

        done = val == 0;
    }

    Ok(())
}

pub(crate) fn encode_u16(value: u16, dest: &mut Vec<u8>) {
    dest.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn encode_length_prefixed_bytes(value: &[u8], dest: &mut Vec<u8>) -> MqttResult<()> {
    if value.len() > u16::MAX as usize {
        return Err(MqttError::PayloadTooLarge);
    }

    encode_u16(value.len() as u16, dest);
    dest.extend_from_slice(value);

    Ok(())
}

pub(crate) fn encode_length_prefixed_string(value: &str, dest: &mut Vec<u8>) -> MqttResult<()> {
    encode_length_prefixed_bytes(value.as_bytes(), dest)
}

/// Writes the first byte and the remaining length of a fixed header
pub(crate) fn encode_fixed_header(first_byte: u8, remaining_length: usize, dest: &mut Vec<u8>) -> MqttResult<()> {
    dest.push(first_byte);
    encode_vli(remaining_length, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vli_encode_boundaries() {
        let mut dest = Vec::new();

        encode_vli(0, &mut dest).unwrap();
        assert_eq!(vec!(0x00), dest);

        dest.clear();
        encode_vli(127, &mut dest).unwrap();
        assert_eq!(vec!(0x7F), dest);

        dest.clear();
        encode_vli(128, &mut dest).unwrap();
        assert_eq!(vec!(0x80, 0x01), dest);

        dest.clear();
        encode_vli(16383, &mut dest).unwrap();
        assert_eq!(vec!(0xFF, 0x7F), dest);

        dest.clear();
        encode_vli(16384, &mut dest).unwrap();
        assert_eq!(vec!(0x80, 0x80, 0x01), dest);

        dest.clear();
        encode_vli(MAXIMUM_VARIABLE_LENGTH_INTEGER, &mut dest).unwrap();
        assert_eq!(vec!(0xFF, 0xFF, 0xFF, 0x7F), dest);
    }

    #[test]
    fn vli_encode_too_large() {
        let mut dest = Vec::new();
        assert_eq!(Err(MqttError::VariableLengthIntegerMaximumExceeded), encode_vli(MAXIMUM_VARIABLE_LENGTH_INTEGER + 1, &mut dest));
        assert_eq!(Err(MqttError::VariableLengthIntegerMaximumExceeded), compute_variable_length_integer_encode_size(MAXIMUM_VARIABLE_LENGTH_INTEGER + 1));
    }

    #[test]
    fn vli_encode_size_matches_encoding() {
        for value in [0usize, 1, 127, 128, 16383, 16384, 2097151, 2097152, MAXIMUM_VARIABLE_LENGTH_INTEGER] {
            let mut dest = Vec::new();
            encode_vli(value, &mut dest).unwrap();
            assert_eq!(dest.len(), compute_variable_length_integer_encode_size(value).unwrap());
        }
    }

    #[test]
    fn length_prefixed_string_is_big_endian() {
        let mut dest = Vec::new();
        encode_length_prefixed_string("MQTT", &mut dest).unwrap();
        assert_eq!(vec!(0, 4, b'M', b'Q', b'T', b'T'), dest);
    }
}
