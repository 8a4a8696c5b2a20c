/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

extern crate tokio;

use crate::*;
use crate::client::events::*;
use crate::client::internal::*;
use crate::decode::{DecodedItem, Decoder, PublishChunk};
use crate::encode::Encoder;

use log::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const OPERATION_CHANNEL_SIZE : usize = 100;

/* upper bound on a single read while connected so the keep alive and stop checks stay responsive */
const CONNECTED_READ_TIMEOUT : Duration = Duration::from_secs(1);

const MINIMUM_READ_TIMEOUT : Duration = Duration::from_millis(1);

pub(crate) struct UserRuntimeState {
    operation_sender: mpsc::Sender<OperationRequest>,
    stop_signal: Arc<StopSignal>,
    task: JoinHandle<Box<dyn Transport>>,
}

impl UserRuntimeState {
    pub(crate) fn operation_sender(&self) -> mpsc::Sender<OperationRequest> {
        self.operation_sender.clone()
    }

    pub(crate) fn signal_stop(&self) {
        self.stop_signal.request();
    }

    /// Signals the session task and waits for it to hand the transport back
    pub(crate) async fn stop(self) -> MqttResult<Box<dyn Transport>> {
        self.stop_signal.request();
        self.task.await.map_err(|_| MqttError::InternalStateError)
    }
}

/// Queues an encoded packet for the session task and waits until it has been written
pub(crate) async fn submit_operation(sender: &mpsc::Sender<OperationRequest>, packet: Vec<u8>, packet_type: PacketType, packet_id: u16) -> MqttResult<()> {
    let (response_sender, response_receiver) = oneshot::channel();
    let request = OperationRequest {
        packet,
        packet_type,
        packet_id,
        response_sender,
    };

    if sender.try_send(request).is_err() {
        return Err(MqttError::OperationChannelSendError);
    }

    response_receiver.await?
}

enum LoopEvent {
    Stop,
    Operation(Option<OperationRequest>),
    Read(MqttResult<usize>),
}

pub(crate) struct ClientRuntimeState {
    config: Arc<ClientConfig>,
    shared: Arc<SharedClientState>,
    transport: Box<dyn Transport>,
    operation_receiver: mpsc::Receiver<OperationRequest>,
    stop_signal: Arc<StopSignal>,

    encoder: Encoder,
    decoder: Decoder,
    read_buffer: Vec<u8>,
    decoded_items: VecDeque<DecodedItem>,

    last_ping: Instant,
    session_present: bool,
    last_error: Option<MqttError>,
}

impl ClientRuntimeState {

    async fn next_event(&mut self, read_timeout: Duration) -> LoopEvent {
        tokio::select! {
            _ = self.stop_signal.notify.notified() => { LoopEvent::Stop }
            operation = self.operation_receiver.recv() => { LoopEvent::Operation(operation) }
            read_result = self.transport.read(self.read_buffer.as_mut_slice(), read_timeout) => { LoopEvent::Read(read_result) }
        }
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> MqttResult<()> {
        self.transport.write(bytes, self.config.network_timeout).await?;
        Ok(())
    }

    fn decode_read(&mut self, bytes_read: usize) -> MqttResult<()> {
        self.decoder.decode_bytes(&self.read_buffer[..bytes_read], &mut self.decoded_items)
    }

    fn broadcast(&self, event: ClientEvent) {
        self.shared.dispatcher.broadcast_event(event);
    }

    async fn fail_connection(&mut self, error: MqttError) -> SessionState {
        info!("[{}] connection lost: {}", self.config.client_id, error);
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }

        self.transport.close().await;
        SessionState::WaitTimeout
    }

    async fn process_init(&mut self) -> SessionState {
        if self.stop_signal.is_requested() {
            return SessionState::Stopped;
        }

        self.last_error = None;
        self.session_present = false;
        self.decoder.reset_for_new_connection();
        self.decoded_items.clear();

        let port = if self.config.port == 0 { self.transport.default_port() } else { self.config.port };
        info!("[{}] connecting to {}:{}", self.config.client_id, self.config.host, port);

        let connect_result = tokio::select! {
            _ = self.stop_signal.notify.notified() => { return SessionState::Stopped; }
            result = self.transport.connect(&self.config.host, port, self.config.network_timeout) => { result }
        };

        if let Err(error) = connect_result {
            return self.fail_connection(error).await;
        }

        match self.perform_handshake().await {
            Ok(Some(session_present)) => {
                self.session_present = session_present;
                SessionState::Connected
            }
            Ok(None) => {
                SessionState::Stopped
            }
            Err(error) => {
                self.fail_connection(error).await
            }
        }
    }

    /// Sends CONNECT and waits for the CONNACK.  Ok(None) means a stop was requested meanwhile.
    async fn perform_handshake(&mut self) -> MqttResult<Option<bool>> {
        let connect = self.config.to_connect_packet();
        debug!("[{}] sending {}", self.config.client_id, connect);

        let connect_bytes = self.encoder.encode_connect(&connect)?;
        self.write_bytes(&connect_bytes).await?;

        let deadline = Instant::now() + self.config.network_timeout;
        loop {
            if let Some(item) = self.decoded_items.pop_front() {
                return match item {
                    DecodedItem::Packet(MqttPacket::Connack(connack)) => {
                        debug!("[{}] received {}", self.config.client_id, connack);
                        if connack.return_code != ConnectReturnCode::Accepted {
                            Err(MqttError::ConnectionRefused(connack.return_code))
                        } else {
                            Ok(Some(connack.session_present))
                        }
                    }
                    _ => {
                        Err(MqttError::ProtocolError)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MqttError::ConnectionTimeout);
            }

            match self.next_event(deadline - now).await {
                LoopEvent::Stop | LoopEvent::Operation(None) => {
                    return Ok(None);
                }
                LoopEvent::Operation(Some(operation)) => {
                    self.reject_operation(operation, MqttError::NotConnected);
                }
                LoopEvent::Read(Ok(0)) => {}
                LoopEvent::Read(Ok(bytes_read)) => {
                    self.decode_read(bytes_read)?;
                }
                LoopEvent::Read(Err(error)) => {
                    return Err(error);
                }
            }
        }
    }

    async fn process_connected(&mut self) -> SessionState {
        let ping_interval = Duration::from_secs(self.config.keep_alive_interval_seconds as u64) / 2;
        self.last_ping = Instant::now();

        loop {
            if self.stop_signal.is_requested() {
                self.disconnect().await;
                return SessionState::Stopped;
            }

            if let Err(error) = self.process_decoded_items().await {
                return self.fail_connection(error).await;
            }

            let now = Instant::now();
            self.shared.lock_session().evict_stale(now);

            let since_ping = now.saturating_duration_since(self.last_ping);
            if since_ping > ping_interval {
                if let Err(error) = self.send_ping().await {
                    return self.fail_connection(error).await;
                }
                continue;
            }

            let read_timeout = (ping_interval - since_ping).clamp(MINIMUM_READ_TIMEOUT, CONNECTED_READ_TIMEOUT);
            match self.next_event(read_timeout).await {
                LoopEvent::Stop => {}
                LoopEvent::Operation(Some(operation)) => {
                    if let Err(error) = self.write_bytes(&operation.packet).await {
                        self.reject_operation(operation, error);
                        return self.fail_connection(error).await;
                    }

                    let _ = operation.response_sender.send(Ok(()));
                }
                LoopEvent::Operation(None) => {
                    /* every handle to the client is gone */
                    self.disconnect().await;
                    return SessionState::Stopped;
                }
                LoopEvent::Read(Ok(0)) => {}
                LoopEvent::Read(Ok(bytes_read)) => {
                    if let Err(error) = self.decode_read(bytes_read) {
                        return self.fail_connection(error).await;
                    }
                }
                LoopEvent::Read(Err(error)) => {
                    return self.fail_connection(error).await;
                }
            }
        }
    }

    /* the packet was never written, so nothing will ever acknowledge it */
    fn reject_operation(&self, operation: OperationRequest, error: MqttError) {
        if operation.packet_id != 0 {
            self.shared.lock_session().abandon(operation.packet_type, operation.packet_id);
        }

        let _ = operation.response_sender.send(Err(error));
    }

    async fn send_ping(&mut self) -> MqttResult<()> {
        debug!("[{}] sending PINGREQ", self.config.client_id);
        let pingreq = self.encoder.encode_pingreq()?;
        self.write_bytes(&pingreq).await?;
        self.last_ping = Instant::now();

        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Ok(disconnect) = self.encoder.encode_disconnect() {
            if let Err(error) = self.write_bytes(&disconnect).await {
                debug!("[{}] unable to send DISCONNECT: {}", self.config.client_id, error);
            }
        }

        self.transport.close().await;
    }

    async fn process_decoded_items(&mut self) -> MqttResult<()> {
        while let Some(item) = self.decoded_items.pop_front() {
            match item {
                DecodedItem::Packet(packet) => { self.handle_packet(packet).await?; }
                DecodedItem::PublishChunk(chunk) => { self.handle_publish_chunk(chunk).await?; }
            }
        }

        Ok(())
    }

    async fn acknowledge_publish(&mut self, qos: QualityOfService, packet_id: u16) -> MqttResult<()> {
        match qos {
            QualityOfService::AtMostOnce => { Ok(()) }
            QualityOfService::AtLeastOnce => {
                let puback = self.encoder.encode_puback(packet_id)?;
                self.write_bytes(&puback).await
            }
            QualityOfService::ExactlyOnce => {
                let pubrec = self.encoder.encode_pubrec(packet_id)?;
                self.write_bytes(&pubrec).await
            }
        }
    }

    async fn handle_packet(&mut self, packet: MqttPacket) -> MqttResult<()> {
        debug!("[{}] received {}", self.config.client_id, packet);

        match packet {
            MqttPacket::Publish(publish) => {
                self.acknowledge_publish(publish.qos, publish.packet_id).await?;

                let payload_total_length = publish.payload.len();
                self.broadcast(ClientEvent::Data(DataEvent {
                    packet_id: publish.packet_id,
                    topic: publish.topic,
                    qos: publish.qos,
                    retain: publish.retain,
                    duplicate: publish.duplicate,
                    payload: publish.payload,
                    payload_offset: 0,
                    payload_total_length,
                }));
            }
            MqttPacket::Puback(puback) => {
                let resolved = self.shared.lock_session().resolve(PacketType::Publish, puback.packet_id);
                if resolved {
                    self.broadcast(ClientEvent::Published(PublishedEvent { packet_id: puback.packet_id }));
                }
            }
            MqttPacket::Pubrec(pubrec) => {
                let pubrel = self.encoder.encode_pubrel(pubrec.packet_id)?;
                let advanced = self.shared.lock_session().advance_to_pubrel(pubrec.packet_id, &pubrel);
                if !advanced {
                    debug!("[{}] PUBREC ({}) for an untracked publish", self.config.client_id, pubrec.packet_id);
                }

                self.write_bytes(&pubrel).await?;
            }
            MqttPacket::Pubrel(pubrel) => {
                let pubcomp = self.encoder.encode_pubcomp(pubrel.packet_id)?;
                self.write_bytes(&pubcomp).await?;
            }
            MqttPacket::Pubcomp(pubcomp) => {
                let resolved = self.shared.lock_session().resolve(PacketType::Pubrel, pubcomp.packet_id);
                if resolved {
                    self.broadcast(ClientEvent::Published(PublishedEvent { packet_id: pubcomp.packet_id }));
                }
            }
            MqttPacket::Suback(suback) => {
                let resolved = self.shared.lock_session().resolve(PacketType::Subscribe, suback.packet_id);
                if resolved {
                    self.broadcast(ClientEvent::Subscribed(SubscribedEvent {
                        packet_id: suback.packet_id,
                        return_codes: suback.return_codes,
                    }));
                }
            }
            MqttPacket::Unsuback(unsuback) => {
                let resolved = self.shared.lock_session().resolve(PacketType::Unsubscribe, unsuback.packet_id);
                if resolved {
                    self.broadcast(ClientEvent::Unsubscribed(UnsubscribedEvent { packet_id: unsuback.packet_id }));
                }
            }
            MqttPacket::Pingreq(_) => {
                let pingresp = self.encoder.encode_pingresp()?;
                self.write_bytes(&pingresp).await?;
            }
            MqttPacket::Pingresp(_) => {}
            other => {
                warn!("[{}] unexpected {} while connected", self.config.client_id, other);
                return Err(MqttError::UnexpectedPacket);
            }
        }

        Ok(())
    }

    async fn handle_publish_chunk(&mut self, chunk: PublishChunk) -> MqttResult<()> {
        let publish = chunk.publish;
        if chunk.payload_offset == 0 {
            self.acknowledge_publish(publish.qos, publish.packet_id).await?;
        }

        self.broadcast(ClientEvent::Data(DataEvent {
            packet_id: publish.packet_id,
            topic: publish.topic,
            qos: publish.qos,
            retain: publish.retain,
            duplicate: publish.duplicate,
            payload: chunk.data,
            payload_offset: chunk.payload_offset,
            payload_total_length: chunk.payload_total_length,
        }));

        Ok(())
    }

    async fn process_wait_timeout(&mut self) -> SessionState {
        if !self.config.auto_reconnect {
            info!("[{}] reconnect disabled, session task exiting", self.config.client_id);
            return SessionState::Error;
        }

        let deadline = Instant::now() + self.config.reconnect_delay;
        loop {
            if self.stop_signal.is_requested() {
                return SessionState::Stopped;
            }

            let now = Instant::now();
            if now >= deadline {
                return SessionState::Init;
            }

            tokio::select! {
                _ = self.stop_signal.notify.notified() => {
                    return SessionState::Stopped;
                }
                operation = self.operation_receiver.recv() => {
                    match operation {
                        Some(operation) => {
                            self.reject_operation(operation, MqttError::NotConnected);
                        }
                        None => {
                            return SessionState::Stopped;
                        }
                    }
                }
                () = sleep(deadline - now) => {
                    return SessionState::Init;
                }
            }
        }
    }

    fn transition_to_state(&mut self, old_state: SessionState, new_state: SessionState) {
        info!("[{}] transitioning from {} to {}", self.config.client_id, old_state, new_state);

        {
            let mut session = self.shared.lock_session();
            session.state = new_state;
            if new_state == SessionState::Connected && !self.session_present {
                session.clear_tracked_operations();
            }
        }

        match new_state {
            SessionState::Connected => {
                self.broadcast(ClientEvent::Connected(ConnectedEvent {
                    session_present: self.session_present,
                }));
            }
            SessionState::WaitTimeout => {
                let error = self.last_error.unwrap_or(MqttError::ConnectionClosed);
                if is_protocol_failure(error) {
                    self.broadcast(ClientEvent::Error(ErrorEvent { error }));
                }

                self.broadcast(ClientEvent::Disconnected(DisconnectedEvent { error }));
            }
            _ => {}
        }
    }

    async fn session_loop(&mut self) {
        let mut current_state = SessionState::Init;
        loop {
            let next_state =
                match current_state {
                    SessionState::Init => { self.process_init().await }
                    SessionState::Connected => { self.process_connected().await }
                    SessionState::WaitTimeout => { self.process_wait_timeout().await }
                    _ => { break; }
                };

            self.transition_to_state(current_state, next_state);
            current_state = next_state;
        }

        self.transport.close().await;
    }
}

fn is_protocol_failure(error: MqttError) -> bool {
    matches!(error,
        MqttError::ConnectionRefused(_) |
        MqttError::MalformedPacket |
        MqttError::DecoderInvalidVli |
        MqttError::ProtocolError |
        MqttError::UnexpectedPacket)
}

pub(crate) fn spawn_session(
    config: Arc<ClientConfig>,
    shared: Arc<SharedClientState>,
    transport: Box<dyn Transport>,
    runtime_handle: &runtime::Handle,
) -> UserRuntimeState {
    let (sender, receiver) = mpsc::channel(OPERATION_CHANNEL_SIZE);
    let stop_signal = Arc::new(StopSignal::new());

    let mut runtime_state = ClientRuntimeState {
        encoder: Encoder::new(config.buffer_size),
        decoder: Decoder::new(config.buffer_size),
        read_buffer: vec![0; config.buffer_size],
        decoded_items: VecDeque::new(),
        config,
        shared,
        transport,
        operation_receiver: receiver,
        stop_signal: stop_signal.clone(),
        last_ping: Instant::now(),
        session_present: false,
        last_error: None,
    };

    let task = runtime_handle.spawn(async move {
        runtime_state.session_loop().await;
        runtime_state.transport
    });

    UserRuntimeState {
        operation_sender: sender,
        stop_signal,
        task,
    }
}
