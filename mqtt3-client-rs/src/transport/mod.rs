/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Byte-stream capability the session loop runs on top of.

use crate::*;

use async_trait::async_trait;
use log::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const DEFAULT_MQTT_PORT : u16 = 1883;

/// A connection-oriented byte stream (plain TCP, TLS, ...) selected once when the client is built.
///
/// `read` must be cancellation safe: the session loop races it against outbound operations and
/// the stop signal, dropping the in-flight read when another branch wins.
#[async_trait]
pub trait Transport: Send {

    /// Opens the connection.  Any previously open connection is replaced.
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> MqttResult<()>;

    /// Reads up to `buffer.len()` bytes.  Ok(0) means the timeout elapsed with nothing to read;
    /// a closed connection is reported as `MqttError::ConnectionClosed`.
    async fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> MqttResult<usize>;

    /// Writes all of `buffer`, returning the number of bytes written.
    async fn write(&mut self, buffer: &[u8], timeout: Duration) -> MqttResult<usize>;

    async fn close(&mut self);

    /// Port used when the configuration does not name one
    fn default_port(&self) -> u16;
}

/// Maps a timed stream read onto the `Transport::read` contract
pub fn map_read_result(result: Result<std::io::Result<usize>, tokio::time::error::Elapsed>) -> MqttResult<usize> {
    match result {
        Err(_) => { Ok(0) }
        Ok(Ok(0)) => { Err(MqttError::ConnectionClosed) }
        Ok(Ok(bytes_read)) => { Ok(bytes_read) }
        Ok(Err(error)) => {
            debug!("Transport - read failed: {}", error);
            Err(MqttError::StreamReadFailure)
        }
    }
}

/// Maps a timed `write_all` onto the `Transport::write` contract
pub fn map_write_result(result: Result<std::io::Result<()>, tokio::time::error::Elapsed>, length: usize) -> MqttResult<usize> {
    match result {
        Err(_) => { Err(MqttError::ConnectionTimeout) }
        Ok(Ok(())) => { Ok(length) }
        Ok(Err(error)) => {
            debug!("Transport - write failed: {}", error);
            Err(MqttError::StreamWriteFailure)
        }
    }
}

/// Plain TCP transport
#[derive(Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new() -> Self {
        TcpTransport {
            stream: None
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16, connect_timeout: Duration) -> MqttResult<()> {
        self.stream = None;

        let endpoint = format!("{}:{}", host, port);
        match timeout(connect_timeout, TcpStream::connect(endpoint.as_str())).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(error)) => {
                info!("TcpTransport - failed to connect to {}: {}", endpoint, error);
                Err(MqttError::ConnectionEstablishmentFailure)
            }
            Err(_) => {
                info!("TcpTransport - connection to {} timed out", endpoint);
                Err(MqttError::ConnectionTimeout)
            }
        }
    }

    async fn read(&mut self, buffer: &mut [u8], read_timeout: Duration) -> MqttResult<usize> {
        let stream = self.stream.as_mut().ok_or(MqttError::ConnectionClosed)?;
        map_read_result(timeout(read_timeout, stream.read(buffer)).await)
    }

    async fn write(&mut self, buffer: &[u8], write_timeout: Duration) -> MqttResult<usize> {
        let stream = self.stream.as_mut().ok_or(MqttError::ConnectionClosed)?;
        map_write_result(timeout(write_timeout, stream.write_all(buffer)).await, buffer.len())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }
    }

    fn default_port(&self) -> u16 {
        DEFAULT_MQTT_PORT
    }
}
