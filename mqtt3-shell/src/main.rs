/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

mod tls;

use argh::FromArgs;
use mqtt3_client_rs::*;
use simplelog::*;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use url::Url;

use crate::tls::TlsTransport;

#[derive(FromArgs)]
/// Interactive MQTT 3.1.1 client shell
struct CommandLineArgs {

    /// broker uri: mqtt://[user[:password]@]host[:port] or mqtts://...
    #[argh(option)]
    uri: String,

    /// PEM file of CA certificates to trust for mqtts (defaults to the native roots)
    #[argh(option)]
    ca_file: Option<PathBuf>,

    /// client id (generated if absent)
    #[argh(option)]
    client_id: Option<String>,

    /// keep alive interval in seconds
    #[argh(option, default = "60")]
    keepalive: u16,

    /// ask the broker to resume a previous session
    #[argh(switch)]
    no_clean_session: bool,

    /// stay disconnected after the connection drops
    #[argh(switch)]
    no_reconnect: bool,

    /// topic of the last will message
    #[argh(option)]
    will_topic: Option<String>,

    /// payload of the last will message
    #[argh(option)]
    will_message: Option<String>,

    /// log to this file instead of the terminal
    #[argh(option)]
    log_file: Option<PathBuf>,

    /// log level: off, error, warn, info, debug or trace
    #[argh(option, default = "LevelFilter::Warn")]
    log_level: LevelFilter,
}

fn client_event_callback(event: Arc<ClientEvent>) {
    match &*event {
        ClientEvent::Connected(event) => {
            println!("Connected: session present = {}", event.session_present);
        }
        ClientEvent::Disconnected(event) => {
            println!("Disconnected: {}", event.error);
        }
        ClientEvent::Subscribed(event) => {
            println!("Subscribed ({}): {:?}", event.packet_id, event.return_codes);
        }
        ClientEvent::Unsubscribed(event) => {
            println!("Unsubscribed ({})", event.packet_id);
        }
        ClientEvent::Published(event) => {
            println!("Published ({})", event.packet_id);
        }
        ClientEvent::Data(event) => {
            println!("Data on '{}' [{}..{} of {}]: {}", event.topic, event.payload_offset,
                event.payload_offset + event.payload.len(), event.payload_total_length, String::from_utf8_lossy(&event.payload));
        }
        ClientEvent::Error(event) => {
            println!("Error: {}", event.error);
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  start");
    println!("  stop");
    println!("  publish <topic> <qos> [payload]");
    println!("  subscribe <topic filter> [qos]");
    println!("  unsubscribe <topic filter>");
    println!("  quit");
}

fn parse_qos(value: &str) -> Option<QualityOfService> {
    value.parse::<u8>().ok().and_then(|qos_u8| convert_u8_to_quality_of_service(qos_u8).ok())
}

fn handle_start(client: &Mqtt3Client) {
    if let Err(error) = client.start() {
        println!("Start failed: {}", error);
    }
}

async fn handle_stop(client: &Mqtt3Client) {
    if let Err(error) = client.stop().await {
        println!("Stop failed: {}", error);
    }
}

async fn handle_publish(client: &Mqtt3Client, args: &[&str]) {
    if args.len() < 2 || args.len() > 3 {
        print_help();
        return;
    }

    let qos = match parse_qos(args[1]) {
        Some(qos) => { qos }
        None => {
            println!("Invalid qos: {}", args[1]);
            return;
        }
    };

    let payload : &[u8] = if args.len() == 3 { args[2].as_bytes() } else { &[] };

    let publish_result = client.publish(args[0], payload, qos, false).await;

    println!("Publish Result: {:?}", publish_result);
}

async fn handle_subscribe(client: &Mqtt3Client, args: &[&str]) {
    if args.is_empty() || args.len() > 2 {
        print_help();
        return;
    }

    let mut subscribe_qos = QualityOfService::AtMostOnce;
    if args.len() == 2 {
        if let Some(qos) = parse_qos(args[1]) {
            subscribe_qos = qos;
        }
    }

    let subscribe_result = client.subscribe(args[0], subscribe_qos).await;

    println!("Subscribe Result: {:?}", subscribe_result);
}

async fn handle_unsubscribe(client: &Mqtt3Client, args: &[&str]) {
    if args.len() != 1 {
        print_help();
        return;
    }

    let unsubscribe_result = client.unsubscribe(args[0]).await;

    println!("Unsubscribe Result: {:?}", unsubscribe_result);
}

async fn handle_input(value: String, client: &Mqtt3Client) -> bool {
    let fields : Vec<&str> = value.split_whitespace().collect();

    if fields.is_empty() {
        return false;
    }

    let command = fields[0].to_string();
    match command.to_lowercase().as_str() {
        "start" => {
            handle_start(client);
        }
        "stop" => {
            handle_stop(client).await;
        }
        "quit" => {
            return true;
        }
        "publish" => {
            handle_publish(client, &fields[1..]).await;
        }
        "subscribe" => {
            handle_subscribe(client, &fields[1..]).await;
        }
        "unsubscribe" => {
            handle_unsubscribe(client, &fields[1..]).await;
        }
        _ => {
            print_help();
        }
    }

    false
}

fn init_logging(args: &CommandLineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let log_config = ConfigBuilder::new().build();

    match &args.log_file {
        Some(path) => {
            WriteLogger::init(args.log_level, log_config, File::create(path)?)?;
        }
        None => {
            TermLogger::init(args.log_level, log_config, TerminalMode::Stderr, ColorChoice::Auto)?;
        }
    }

    Ok(())
}

fn build_config(args: &CommandLineArgs, uri: &Url) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let host = uri.host_str().ok_or("uri has no host")?;

    let mut builder = ClientConfigBuilder::new(host)
        .with_port(uri.port().unwrap_or(0))
        .with_keep_alive_interval_seconds(args.keepalive)
        .with_clean_session(!args.no_clean_session)
        .with_auto_reconnect(!args.no_reconnect);

    if !uri.username().is_empty() {
        builder.set_username(uri.username());
    }

    if let Some(password) = uri.password() {
        builder.set_password(password.as_bytes());
    }

    if let Some(client_id) = &args.client_id {
        builder.set_client_id(client_id);
    }

    if let Some(will_topic) = &args.will_topic {
        builder.set_will(LastWill {
            topic: will_topic.clone(),
            payload: args.will_message.clone().unwrap_or_default().into_bytes(),
            qos: QualityOfService::AtMostOnce,
            retain: false,
        });
    }

    Ok(builder.build())
}

fn build_transport(args: &CommandLineArgs, uri: &Url) -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    match uri.scheme() {
        "mqtt" | "tcp" => { Ok(Box::new(TcpTransport::new())) }
        "mqtts" | "ssl" => { Ok(Box::new(TlsTransport::new(args.ca_file.as_deref())?)) }
        scheme => { Err(format!("unsupported uri scheme '{}'", scheme).into()) }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: CommandLineArgs = argh::from_env();

    init_logging(&args)?;

    let uri = Url::parse(&args.uri)?;
    let config = build_config(&args, &uri)?;
    let transport = build_transport(&args, &uri)?;

    println!("Client id: {}", config.client_id());

    let callback = ClientEventListener::Callback(Box::new(client_event_callback));
    let client = Mqtt3Client::new(config, transport, Some(callback), &Handle::current())?;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    print_help();
    while let Some(line) = lines.next_line().await? {
        if handle_input(line, &client).await {
            break;
        }
    }

    client.destroy().await?;

    println!("Done");

    Ok(())
}
