/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use async_trait::async_trait;
use log::*;
use mqtt3_client_rs::transport::{map_read_result, map_write_result};
use mqtt3_client_rs::*;
use pki_types::ServerName;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub const DEFAULT_MQTTS_PORT : u16 = 8883;

fn load_root_certificates(ca_file: Option<&Path>) -> Result<RootCertStore, Box<dyn std::error::Error>> {
    let mut roots = RootCertStore::empty();

    match ca_file {
        Some(path) => {
            let mut reader = BufReader::new(File::open(path)?);
            for certificate in rustls_pemfile::certs(&mut reader) {
                roots.add(certificate?)?;
            }
        }
        None => {
            for certificate in rustls_native_certs::load_native_certs()? {
                if let Err(error) = roots.add(certificate) {
                    debug!("TlsTransport - skipping native certificate: {}", error);
                }
            }
        }
    }

    if roots.is_empty() {
        return Err("no usable CA certificates".into());
    }

    Ok(roots)
}

/// TLS over TCP, trusting either the platform's native roots or the certificates in a PEM file
pub struct TlsTransport {
    connector: TlsConnector,
    stream: Option<TlsStream<TcpStream>>,
}

impl TlsTransport {
    pub fn new(ca_file: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let roots = load_root_certificates(ca_file)?;
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(TlsTransport {
            connector: TlsConnector::from(Arc::new(config)),
            stream: None,
        })
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self, host: &str, port: u16, connect_timeout: Duration) -> MqttResult<()> {
        self.stream = None;

        let server_name = ServerName::try_from(host.to_string()).map_err(|_| MqttError::ConnectionEstablishmentFailure)?;
        let endpoint = format!("{}:{}", host, port);

        let connection = async {
            let tcp_stream = TcpStream::connect(endpoint.as_str()).await?;
            let _ = tcp_stream.set_nodelay(true);
            self.connector.connect(server_name, tcp_stream).await
        };

        match timeout(connect_timeout, connection).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(error)) => {
                info!("TlsTransport - failed to connect to {}: {}", endpoint, error);
                Err(MqttError::ConnectionEstablishmentFailure)
            }
            Err(_) => {
                info!("TlsTransport - connection to {} timed out", endpoint);
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
        map_write_result(timeout(write_timeout, async {
            stream.write_all(buffer).await?;
            stream.flush().await
        }).await, buffer.len())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn default_port(&self) -> u16 {
        DEFAULT_MQTTS_PORT
    }
}
