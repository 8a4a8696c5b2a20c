/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Checks applied to caller-supplied values before anything is encoded or any state is touched.

use crate::*;

pub(crate) const MAXIMUM_STRING_LENGTH : usize = 65535;

macro_rules! validate_string_length {
    ($string_expr: expr, $error: ident) => {
        if $string_expr.len() > MAXIMUM_STRING_LENGTH {
            return Err(MqttError::$error);
        }
    };
}

pub(crate) fn validate_topic(topic: &str) -> MqttResult<()> {
    validate_string_length!(topic, InvalidTopic);

    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(MqttError::InvalidTopic);
    }

    Ok(())
}

pub(crate) fn validate_topic_filter(topic_filter: &str) -> MqttResult<()> {
    validate_string_length!(topic_filter, InvalidTopicFilter);

    if topic_filter.is_empty() || topic_filter.contains('\0') {
        return Err(MqttError::InvalidTopicFilter);
    }

    let segments : Vec<&str> = topic_filter.split('/').collect();
    let last_index = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        /* wildcards must occupy an entire level; '#' only the last one */
        if segment.contains('+') && *segment != "+" {
            return Err(MqttError::InvalidTopicFilter);
        }

        if segment.contains('#') && (*segment != "#" || index != last_index) {
            return Err(MqttError::InvalidTopicFilter);
        }
    }

    Ok(())
}

pub(crate) fn validate_client_id(client_id: &str) -> MqttResult<()> {
    validate_string_length!(client_id, InvalidClientId);

    Ok(())
}

/// A password may only be sent alongside a username
pub(crate) fn validate_credentials(username: Option<&str>, password: Option<&[u8]>) -> MqttResult<()> {
    if let Some(username) = username {
        validate_string_length!(username, InvalidCredentials);
    }

    if let Some(password) = password {
        if username.is_none() || password.len() > MAXIMUM_STRING_LENGTH {
            return Err(MqttError::InvalidCredentials);
        }
    }

    Ok(())
}

pub(crate) fn validate_last_will(will: &LastWill) -> MqttResult<()> {
    validate_topic(&will.topic)?;
    if will.payload.len() > MAXIMUM_STRING_LENGTH {
        return Err(MqttError::PayloadTooLarge);
    }

    Ok(())
}
