/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

pub mod client;
pub mod decode;
pub mod encode;
mod logging;
pub mod outbox;
pub mod spec;
pub mod transport;
mod validate;

use std::fmt;

/* Re-export the commonly used types at the root level */

pub use spec::QualityOfService;
pub use spec::PacketType;
pub use spec::MqttPacket;
pub use spec::convert_u8_to_quality_of_service;

pub use spec::connack::ConnackPacket;
pub use spec::connack::ConnectReturnCode;
pub use spec::connect::ConnectPacket;
pub use spec::connect::LastWill;
pub use spec::ack::PubackPacket;
pub use spec::ack::PubcompPacket;
pub use spec::ack::PubrecPacket;
pub use spec::ack::PubrelPacket;
pub use spec::ack::UnsubackPacket;
pub use spec::ping::DisconnectPacket;
pub use spec::ping::PingreqPacket;
pub use spec::ping::PingrespPacket;
pub use spec::publish::PublishPacket;
pub use spec::subscribe::SubackPacket;
pub use spec::subscribe::SubscribePacket;
pub use spec::subscribe::SubscribeReturnCode;
pub use spec::subscribe::Subscription;
pub use spec::unsubscribe::UnsubscribePacket;

pub use client::*;
pub use transport::{Transport, TcpTransport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MqttError {
    /* transport */
    ConnectionEstablishmentFailure,
    ConnectionClosed,
    ConnectionTimeout,
    StreamReadFailure,
    StreamWriteFailure,

    /* protocol */
    MalformedPacket,
    DecoderInvalidVli,
    ProtocolError,
    UnexpectedPacket,
    ConnectionRefused(ConnectReturnCode),

    /* caller misuse */
    NotConnected,
    AlreadyStarted,
    InvalidTopic,
    InvalidTopicFilter,
    InvalidClientId,
    InvalidCredentials,
    PayloadTooLarge,
    InvalidQos,

    /* resource exhaustion */
    OutboxFull,
    EncodeBufferTooSmall,
    VariableLengthIntegerMaximumExceeded,

    /* plumbing */
    OperationChannelSendError,
    OperationChannelReceiveError,
    InternalStateError,
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::ConnectionEstablishmentFailure => write!(f, "failed to establish a transport connection"),
            MqttError::ConnectionClosed => write!(f, "connection closed by the remote endpoint"),
            MqttError::ConnectionTimeout => write!(f, "timed out waiting for the connection handshake"),
            MqttError::StreamReadFailure => write!(f, "transport read failed"),
            MqttError::StreamWriteFailure => write!(f, "transport write failed"),
            MqttError::MalformedPacket => write!(f, "malformed packet"),
            MqttError::DecoderInvalidVli => write!(f, "invalid variable length integer"),
            MqttError::ProtocolError => write!(f, "protocol error"),
            MqttError::UnexpectedPacket => write!(f, "unexpected packet type"),
            MqttError::ConnectionRefused(code) => write!(f, "connection refused: {}", spec::connack::connect_return_code_to_str(*code)),
            MqttError::NotConnected => write!(f, "client is not connected"),
            MqttError::AlreadyStarted => write!(f, "client has already been started"),
            MqttError::InvalidTopic => write!(f, "invalid topic"),
            MqttError::InvalidTopicFilter => write!(f, "invalid topic filter"),
            MqttError::InvalidClientId => write!(f, "invalid client id"),
            MqttError::InvalidCredentials => write!(f, "a password requires a username"),
            MqttError::PayloadTooLarge => write!(f, "payload too large"),
            MqttError::InvalidQos => write!(f, "invalid quality of service value"),
            MqttError::OutboxFull => write!(f, "outbox is full"),
            MqttError::EncodeBufferTooSmall => write!(f, "packet does not fit in the configured buffer size"),
            MqttError::VariableLengthIntegerMaximumExceeded => write!(f, "value exceeds the variable length integer maximum"),
            MqttError::OperationChannelSendError => write!(f, "failed to submit operation to the client task"),
            MqttError::OperationChannelReceiveError => write!(f, "client task dropped the operation result"),
            MqttError::InternalStateError => write!(f, "internal state error"),
        }
    }
}

impl std::error::Error for MqttError {}

pub type MqttResult<T> = Result<T, MqttError>;
