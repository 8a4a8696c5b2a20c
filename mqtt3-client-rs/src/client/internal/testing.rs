/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::*;
use crate::decode::{DecodedItem, Decoder};
use crate::encode::encode_packet;
use crate::transport::DEFAULT_MQTT_PORT;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

enum MockInbound {
    Bytes(Vec<u8>),
    Error(MqttError),
}

struct MockBrokerState {
    connect_count: usize,
    connack_return_code: ConnectReturnCode,
    fail_next_write: bool,
    written: Vec<MqttPacket>,
    decoder: Decoder,
}

/// Test-side handle for scripting what a `MockTransport` reads and inspecting what it was sent
#[derive(Clone)]
pub(crate) struct MockBroker {
    state: Arc<Mutex<MockBrokerState>>,
    inbound_sender: mpsc::UnboundedSender<MockInbound>,
}

/// In-memory transport that answers every CONNECT with a CONNACK and records every write
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockBrokerState>>,
    inbound_sender: mpsc::UnboundedSender<MockInbound>,
    inbound_receiver: mpsc::UnboundedReceiver<MockInbound>,
    leftover: Vec<u8>,
    connected: bool,
}

fn encode_to_vec(packet: &MqttPacket) -> Vec<u8> {
    let mut bytes = Vec::new();
    encode_packet(packet, &mut bytes).unwrap();
    bytes
}

impl MockBroker {
    pub(crate) fn new() -> (MockBroker, MockTransport) {
        let state = Arc::new(Mutex::new(MockBrokerState {
            connect_count: 0,
            connack_return_code: ConnectReturnCode::Accepted,
            fail_next_write: false,
            written: Vec::new(),
            decoder: Decoder::new(1 << 20),
        }));

        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        let broker = MockBroker {
            state: state.clone(),
            inbound_sender: inbound_sender.clone(),
        };

        let transport = MockTransport {
            state,
            inbound_sender,
            inbound_receiver,
            leftover: Vec::new(),
            connected: false,
        };

        (broker, transport)
    }

    pub(crate) fn set_connack_return_code(&self, return_code: ConnectReturnCode) {
        self.state.lock().unwrap().connack_return_code = return_code;
    }

    pub(crate) fn push_packet(&self, packet: &MqttPacket) {
        self.push_bytes(encode_to_vec(packet));
    }

    pub(crate) fn push_bytes(&self, bytes: Vec<u8>) {
        self.inbound_sender.send(MockInbound::Bytes(bytes)).unwrap();
    }

    pub(crate) fn push_error(&self, error: MqttError) {
        self.inbound_sender.send(MockInbound::Error(error)).unwrap();
    }

    pub(crate) fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    pub(crate) fn written_packets(&self) -> Vec<MqttPacket> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) async fn wait_for_written<F>(&self, predicate: F) -> MqttPacket where F: Fn(&MqttPacket) -> bool {
        for _ in 0..500 {
            if let Some(packet) = self.written_packets().into_iter().find(|packet| predicate(packet)) {
                return packet;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("expected packet was never written");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _host: &str, _port: u16, _timeout: Duration) -> MqttResult<()> {
        let return_code = {
            let mut state = self.state.lock().unwrap();
            state.connect_count += 1;
            state.decoder.reset_for_new_connection();
            state.connack_return_code
        };

        self.connected = true;
        self.leftover.clear();

        let connack = MqttPacket::Connack(ConnackPacket {
            session_present: false,
            return_code,
        });
        let _ = self.inbound_sender.send(MockInbound::Bytes(encode_to_vec(&connack)));

        Ok(())
    }

    async fn read(&mut self, buffer: &mut [u8], read_timeout: Duration) -> MqttResult<usize> {
        if !self.connected {
            return Err(MqttError::ConnectionClosed);
        }

        if self.leftover.is_empty() {
            match timeout(read_timeout, self.inbound_receiver.recv()).await {
                Err(_) => { return Ok(0); }
                Ok(None) => { return Err(MqttError::ConnectionClosed); }
                Ok(Some(MockInbound::Error(error))) => {
                    self.connected = false;
                    return Err(error);
                }
                Ok(Some(MockInbound::Bytes(bytes))) => {
                    self.leftover = bytes;
                }
            }
        }

        let bytes_read = usize::min(buffer.len(), self.leftover.len());
        buffer[..bytes_read].copy_from_slice(&self.leftover[..bytes_read]);
        self.leftover.drain(..bytes_read);

        Ok(bytes_read)
    }

    async fn write(&mut self, buffer: &[u8], _timeout: Duration) -> MqttResult<usize> {
        if !self.connected {
            return Err(MqttError::ConnectionClosed);
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(MqttError::StreamWriteFailure);
        }

        let mut items = VecDeque::new();
        state.decoder.decode_bytes(buffer, &mut items)?;
        for item in items {
            if let DecodedItem::Packet(packet) = item {
                state.written.push(packet);
            }
        }

        Ok(buffer.len())
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    fn default_port(&self) -> u16 {
        DEFAULT_MQTT_PORT
    }
}

mod tests {
    use super::*;
    use crate::client::internal::OperationRequest;
    use tokio::runtime;
    use tokio::sync::oneshot;

    type EventReceiver = mpsc::UnboundedReceiver<Arc<ClientEvent>>;

    fn test_config_builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new("localhost")
            .with_client_id("test-client")
            .with_keep_alive_interval_seconds(60)
            .with_network_timeout(Duration::from_secs(2))
            .with_reconnect_delay(Duration::from_millis(300))
    }

    fn create_client(config: ClientConfig) -> (Mqtt3Client, MockBroker, EventReceiver) {
        let (broker, transport) = MockBroker::new();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let listener = ClientEventListener::Callback(Box::new(move |event| {
            let _ = event_sender.send(event);
        }));

        let client = Mqtt3Client::new(config, Box::new(transport), Some(listener), &runtime::Handle::current()).unwrap();

        (client, broker, event_receiver)
    }

    async fn wait_for_event<F>(events: &mut EventReceiver, predicate: F) -> Arc<ClientEvent> where F: Fn(&ClientEvent) -> bool {
        loop {
            let event = timeout(Duration::from_secs(5), events.recv()).await
                .expect("timed out waiting for event")
                .expect("event channel closed");

            if predicate(&event) {
                return event;
            }
        }
    }

    async fn wait_for_connected(events: &mut EventReceiver) {
        wait_for_event(events, |event| matches!(event, ClientEvent::Connected(_))).await;
    }

    /* a PINGREQ round trip proves every packet pushed before it has been processed */
    async fn sync_with_session(broker: &MockBroker) {
        let pingresp_count = |broker: &MockBroker| broker.written_packets().iter().filter(|packet| matches!(packet, MqttPacket::Pingresp(_))).count();
        let before = pingresp_count(broker);

        broker.push_packet(&MqttPacket::Pingreq(PingreqPacket {}));
        for _ in 0..500 {
            if pingresp_count(broker) > before {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("session never answered PINGREQ");
    }

    fn count_events<F>(events: &mut EventReceiver, predicate: F) -> usize where F: Fn(&ClientEvent) -> bool {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if predicate(&event) {
                count += 1;
            }
        }

        count
    }

    #[tokio::test]
    async fn connect_sends_configured_connect_packet() {
        let (client, broker, mut events) = create_client(test_config_builder().with_username("user").build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        assert_eq!(SessionState::Connected, client.state());
        let connect = broker.written_packets().into_iter().next().unwrap();
        if let MqttPacket::Connect(connect) = connect {
            assert_eq!("test-client", connect.client_id);
            assert_eq!(60, connect.keep_alive_interval_seconds);
            assert!(connect.clean_session);
            assert_eq!(Some("user".to_string()), connect.username);
        } else {
            panic!("first packet was not CONNECT");
        }

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_resolved_by_suback() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let packet_id = client.subscribe("a/b", QualityOfService::AtLeastOnce).await.unwrap();
        assert_ne!(0, packet_id);

        let subscribe = broker.wait_for_written(|packet| matches!(packet, MqttPacket::Subscribe(_))).await;
        assert_eq!(MqttPacket::Subscribe(SubscribePacket {
            packet_id,
            subscriptions: vec!(Subscription::new("a/b", QualityOfService::AtLeastOnce)),
        }), subscribe);

        broker.push_packet(&MqttPacket::Suback(SubackPacket {
            packet_id,
            return_codes: vec!(SubscribeReturnCode::GrantedQos1),
        }));

        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Subscribed(_))).await;
        assert_eq!(ClientEvent::Subscribed(SubscribedEvent {
            packet_id,
            return_codes: vec!(SubscribeReturnCode::GrantedQos1),
        }), *event);

        assert!(client.shared.lock_session().pending_operation().is_none());
        assert!(client.shared.lock_session().outbox().is_empty());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn preempted_publish_resolved_from_outbox() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let first_id = client.publish("t", "one".as_bytes(), QualityOfService::AtLeastOnce, false).await.unwrap();
        let second_id = client.publish("t", "two".as_bytes(), QualityOfService::AtLeastOnce, false).await.unwrap();
        assert_ne!(first_id, second_id);

        {
            let session = client.shared.lock_session();
            assert!(session.outbox().contains(first_id, PacketType::Publish));
            assert_eq!(second_id, session.pending_operation().unwrap().packet_id);
        }
        assert_eq!(0, count_events(&mut events, |event| matches!(event, ClientEvent::Published(_))));

        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id: first_id }));
        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert_eq!(ClientEvent::Published(PublishedEvent { packet_id: first_id }), *event);
        assert!(client.shared.lock_session().outbox().is_empty());

        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id: second_id }));
        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert_eq!(ClientEvent::Published(PublishedEvent { packet_id: second_id }), *event);
        assert!(client.shared.lock_session().pending_operation().is_none());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_abandons_operation_nobody_awaits() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let (packet, packet_id) = client.shared.lock_session().begin_publish("t", &[1], QualityOfService::AtLeastOnce, false).unwrap();
        assert!(client.shared.lock_session().pending_operation().is_some());

        /* the caller has already gone away when the write fails */
        let (response_sender, response_receiver) = oneshot::channel();
        drop(response_receiver);

        let sender = client.user_state.lock().unwrap().as_ref().unwrap().operation_sender();
        broker.fail_next_write();
        sender.try_send(OperationRequest {
            packet,
            packet_type: PacketType::Publish,
            packet_id,
            response_sender,
        }).map_err(|_| ()).unwrap();

        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Disconnected(_))).await;
        assert_eq!(ClientEvent::Disconnected(DisconnectedEvent { error: MqttError::StreamWriteFailure }), *event);

        {
            let session = client.shared.lock_session();
            assert!(session.pending_operation().is_none());
            assert!(session.outbox().is_empty());
        }

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_reported_to_caller() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        broker.fail_next_write();
        assert_eq!(Err(MqttError::StreamWriteFailure), client.subscribe("a/b", QualityOfService::AtLeastOnce).await);
        assert!(client.shared.lock_session().pending_operation().is_none());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_triggers_reconnect() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;
        assert_eq!(1, broker.connect_count());

        broker.push_error(MqttError::StreamReadFailure);

        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Disconnected(_))).await;
        assert_eq!(ClientEvent::Disconnected(DisconnectedEvent { error: MqttError::StreamReadFailure }), *event);
        assert_eq!(SessionState::WaitTimeout, client.state());

        assert_eq!(Err(MqttError::NotConnected), client.publish("t", &[1], QualityOfService::AtLeastOnce, false).await);

        wait_for_connected(&mut events).await;
        assert_eq!(2, broker.connect_count());
        assert_eq!(SessionState::Connected, client.state());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_ack_type_is_ignored() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let packet_id = client.subscribe("a/+", QualityOfService::AtMostOnce).await.unwrap();

        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id }));
        sync_with_session(&broker).await;

        {
            let session = client.shared.lock_session();
            let pending = session.pending_operation().unwrap();
            assert_eq!(PacketType::Subscribe, pending.packet_type);
            assert_eq!(packet_id, pending.packet_id);
        }
        assert_eq!(0, count_events(&mut events, |event| matches!(event, ClientEvent::Published(_))));

        broker.push_packet(&MqttPacket::Suback(SubackPacket {
            packet_id,
            return_codes: vec!(SubscribeReturnCode::GrantedQos0),
        }));
        wait_for_event(&mut events, |event| matches!(event, ClientEvent::Subscribed(_))).await;

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_puback_reports_once() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let packet_id = client.publish("t", &[1], QualityOfService::AtLeastOnce, false).await.unwrap();
        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id }));
        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id }));
        sync_with_session(&broker).await;

        assert_eq!(1, count_events(&mut events, |event| matches!(event, ClientEvent::Published(_))));

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn qos0_publish_is_untracked() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let packet_id = client.publish("t", "fire and forget".as_bytes(), QualityOfService::AtMostOnce, true).await.unwrap();
        assert_eq!(0, packet_id);

        let publish = broker.wait_for_written(|packet| matches!(packet, MqttPacket::Publish(_))).await;
        assert_eq!(MqttPacket::Publish(PublishPacket {
            packet_id: 0,
            topic: "t".to_string(),
            qos: QualityOfService::AtMostOnce,
            duplicate: false,
            retain: true,
            payload: "fire and forget".as_bytes().to_vec(),
        }), publish);

        let session = client.shared.lock_session();
        assert!(session.pending_operation().is_none());
        assert!(session.outbox().is_empty());
        drop(session);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn qos2_publish_full_exchange() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let packet_id = client.publish("t", &[7], QualityOfService::ExactlyOnce, false).await.unwrap();

        broker.push_packet(&MqttPacket::Pubrec(PubrecPacket { packet_id }));
        let pubrel = broker.wait_for_written(|packet| matches!(packet, MqttPacket::Pubrel(_))).await;
        assert_eq!(MqttPacket::Pubrel(PubrelPacket { packet_id }), pubrel);
        assert_eq!(PacketType::Pubrel, client.shared.lock_session().pending_operation().unwrap().packet_type);
        assert_eq!(0, count_events(&mut events, |event| matches!(event, ClientEvent::Published(_))));

        broker.push_packet(&MqttPacket::Pubcomp(PubcompPacket { packet_id }));
        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert_eq!(ClientEvent::Published(PublishedEvent { packet_id }), *event);
        assert!(client.shared.lock_session().pending_operation().is_none());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn puback_does_not_complete_qos2_publish() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let qos2_id = client.publish("t", &[2], QualityOfService::ExactlyOnce, false).await.unwrap();
        let qos1_id = client.publish("t", &[1], QualityOfService::AtLeastOnce, false).await.unwrap();
        assert!(client.shared.lock_session().outbox().contains(qos2_id, PacketType::Publish));

        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id: qos2_id }));
        sync_with_session(&broker).await;
        assert_eq!(0, count_events(&mut events, |event| matches!(event, ClientEvent::Published(_))));
        assert!(client.shared.lock_session().outbox().contains(qos2_id, PacketType::Publish));

        broker.push_packet(&MqttPacket::Pubrec(PubrecPacket { packet_id: qos2_id }));
        broker.wait_for_written(|packet| matches!(packet, MqttPacket::Pubrel(_))).await;
        broker.push_packet(&MqttPacket::Pubcomp(PubcompPacket { packet_id: qos2_id }));
        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert_eq!(ClientEvent::Published(PublishedEvent { packet_id: qos2_id }), *event);

        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id: qos1_id }));
        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert_eq!(ClientEvent::Published(PublishedEvent { packet_id: qos1_id }), *event);

        {
            let session = client.shared.lock_session();
            assert!(session.outbox().is_empty());
            assert!(session.pending_operation().is_none());
        }

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn inbound_publishes_are_acknowledged_and_delivered() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        broker.push_packet(&MqttPacket::Publish(PublishPacket {
            packet_id: 11,
            topic: "sensors/temp".to_string(),
            qos: QualityOfService::AtLeastOnce,
            duplicate: false,
            retain: false,
            payload: "21.5".as_bytes().to_vec(),
        }));

        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Data(_))).await;
        assert_eq!(ClientEvent::Data(DataEvent {
            packet_id: 11,
            topic: "sensors/temp".to_string(),
            qos: QualityOfService::AtLeastOnce,
            retain: false,
            duplicate: false,
            payload: "21.5".as_bytes().to_vec(),
            payload_offset: 0,
            payload_total_length: 4,
        }), *event);
        broker.wait_for_written(|packet| *packet == MqttPacket::Puback(PubackPacket { packet_id: 11 })).await;

        broker.push_packet(&MqttPacket::Publish(PublishPacket {
            packet_id: 12,
            topic: "sensors/temp".to_string(),
            qos: QualityOfService::ExactlyOnce,
            payload: "22.0".as_bytes().to_vec(),
            ..Default::default()
        }));
        broker.wait_for_written(|packet| *packet == MqttPacket::Pubrec(PubrecPacket { packet_id: 12 })).await;

        broker.push_packet(&MqttPacket::Pubrel(PubrelPacket { packet_id: 12 }));
        broker.wait_for_written(|packet| *packet == MqttPacket::Pubcomp(PubcompPacket { packet_id: 12 })).await;

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_inbound_publish_arrives_in_chunks() {
        let (client, broker, mut events) = create_client(test_config_builder().with_buffer_size(64).build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        let payload : Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        broker.push_packet(&MqttPacket::Publish(PublishPacket {
            packet_id: 0,
            topic: "bulk".to_string(),
            qos: QualityOfService::AtMostOnce,
            payload: payload.clone(),
            ..Default::default()
        }));

        let mut reassembled = Vec::new();
        let mut chunk_count = 0;
        while reassembled.len() < payload.len() {
            let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Data(_))).await;
            if let ClientEvent::Data(data) = &*event {
                assert_eq!("bulk", data.topic);
                assert_eq!(payload.len(), data.payload_total_length);
                assert_eq!(reassembled.len(), data.payload_offset);
                reassembled.extend_from_slice(&data.payload);
                chunk_count += 1;
            }
        }

        assert!(chunk_count > 1);
        assert_eq!(payload, reassembled);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn keep_alive_sends_pingreq() {
        let (client, broker, mut events) = create_client(test_config_builder().with_keep_alive_interval_seconds(1).build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        broker.wait_for_written(|packet| matches!(packet, MqttPacket::Pingreq(_))).await;
        assert_eq!(SessionState::Connected, client.state());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_without_reconnect() {
        let (client, broker, mut events) = create_client(test_config_builder().with_auto_reconnect(false).build());
        broker.set_connack_return_code(ConnectReturnCode::NotAuthorized);
        client.start().unwrap();

        let error = MqttError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        let event = wait_for_event(&mut events, |_| true).await;
        assert_eq!(ClientEvent::Error(ErrorEvent { error }), *event);
        let event = wait_for_event(&mut events, |_| true).await;
        assert_eq!(ClientEvent::Disconnected(DisconnectedEvent { error }), *event);

        for _ in 0..100 {
            if client.state() == SessionState::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(SessionState::Error, client.state());
        assert_eq!(1, broker.connect_count());
        assert_eq!(Err(MqttError::AlreadyStarted), client.start());

        client.stop().await.unwrap();
        assert_eq!(SessionState::Unknown, client.state());
    }

    #[tokio::test]
    async fn unexpected_packet_drops_connection() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        broker.push_packet(&MqttPacket::Connack(ConnackPacket::default()));

        let event = wait_for_event(&mut events, |event| matches!(event, ClientEvent::Error(_))).await;
        assert_eq!(ClientEvent::Error(ErrorEvent { error: MqttError::UnexpectedPacket }), *event);
        let event = wait_for_event(&mut events, |_| true).await;
        assert_eq!(ClientEvent::Disconnected(DisconnectedEvent { error: MqttError::UnexpectedPacket }), *event);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let (client, _broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        assert_eq!(Err(MqttError::AlreadyStarted), client.start());

        wait_for_connected(&mut events).await;
        assert_eq!(Err(MqttError::AlreadyStarted), client.start());

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_disconnects_and_allows_restart() {
        let (client, broker, mut events) = create_client(test_config_builder().build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        client.stop().await.unwrap();
        assert_eq!(SessionState::Unknown, client.state());
        assert!(matches!(broker.written_packets().last(), Some(MqttPacket::Disconnect(_))));

        assert_eq!(Err(MqttError::NotConnected), client.subscribe("a", QualityOfService::AtMostOnce).await);

        /* stopping an idle client is harmless */
        client.stop().await.unwrap();

        client.start().unwrap();
        wait_for_connected(&mut events).await;
        assert_eq!(2, broker.connect_count());

        client.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn full_outbox_rejects_operation() {
        let (client, _broker, mut events) = create_client(test_config_builder().with_outbox_capacity(1).build());
        client.start().unwrap();
        wait_for_connected(&mut events).await;

        client.publish("t", &[1], QualityOfService::AtLeastOnce, false).await.unwrap();
        client.publish("t", &[2], QualityOfService::AtLeastOnce, false).await.unwrap();
        assert_eq!(Err(MqttError::OutboxFull), client.subscribe("t", QualityOfService::AtLeastOnce).await);

        /* QoS 0 never needs the outbox */
        assert_eq!(Ok(0), client.publish("t", &[3], QualityOfService::AtMostOnce, false).await);

        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn listeners_can_be_added_and_removed() {
        let (client, broker, mut events) = create_client(test_config_builder().build());

        let (sender, receiver) = std::sync::mpsc::channel();
        let listener_id = client.add_event_listener(ClientEventListener::Channel(sender));
        assert_ne!(0, listener_id);

        client.start().unwrap();
        wait_for_connected(&mut events).await;
        assert!(matches!(*receiver.try_recv().unwrap(), ClientEvent::Connected(_)));

        client.remove_event_listener(listener_id);
        let packet_id = client.publish("t", &[1], QualityOfService::AtLeastOnce, false).await.unwrap();
        broker.push_packet(&MqttPacket::Puback(PubackPacket { packet_id }));
        wait_for_event(&mut events, |event| matches!(event, ClientEvent::Published(_))).await;
        assert!(receiver.try_recv().is_err());

        client.stop().await.unwrap();
    }
}
