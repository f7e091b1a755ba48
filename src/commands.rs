//! Subcommand implementations.

use crate::config::LiveCaptureConfig;
use anyhow::{bail, Context, Result};
use bytemuck::{Pod, Zeroable};
use livecapture_discovery::{
    net_util, DiscoveryClient, DiscoveryEvent, DiscoveryInfo, DiscoveryServer, ServerData,
};
use livecapture_net::schema::{StructLayout, StructSchema};
use livecapture_net::{
    BinarySender, BoolSender, ChannelType, DataOptions, EventReceiver, JsonSender,
    MessageRegistry, Protocol, Schema, StringSender, TextureCodec, TextureCompression,
    TextureSender, TypeSchema, Version,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Listen for servers until interrupted, printing every found/lost event.
pub async fn discover(config: &LiveCaptureConfig, json: bool) -> Result<()> {
    let section = &config.discovery;
    let mut client = DiscoveryClient::new(section.options());
    let mut events = client.subscribe();
    client
        .start(&section.product_name, section.discover_local)
        .with_context(|| format!("failed to start discovery on port {}", section.port))?;
    info!(
        port = section.port,
        product = %section.product_name,
        "Listening for servers"
    );

    let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => client.update(),
            event = events.recv() => match event {
                Some(event) => print_event(&event, json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.stop();
    // Lost events raised by stop are already queued.
    while let Ok(event) = events.try_recv() {
        print_event(&event, json)?;
    }
    Ok(())
}

fn print_event(event: &DiscoveryEvent, json: bool) -> Result<()> {
    let (kind, info) = match event {
        DiscoveryEvent::ServerFound(info) => ("found", info),
        DiscoveryEvent::ServerLost(info) => ("lost", info),
    };
    if json {
        println!("{}", serde_json::to_string(&EventLine { event: kind, info })?);
    } else {
        println!("{kind}: {info}");
        if let Some((local, remote)) = net_util::closest_local_address(&info.end_points) {
            println!("  connect to {remote} via {local}");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'static str,
    info: &'a DiscoveryInfo,
}

/// Announce this machine until interrupted.
pub async fn advertise(config: &LiveCaptureConfig, end_points: &[SocketAddrV4]) -> Result<()> {
    let section = &config.discovery;
    let end_points = if end_points.is_empty() {
        section.end_points.as_slice()
    } else {
        end_points
    };
    if end_points.is_empty() {
        bail!(
            "no endpoints to advertise; pass --end-point or --connect-port, \
             or set discovery.end_points"
        );
    }

    let server_data = ServerData::new(
        section.product_name.as_str(),
        section.instance_name.as_str(),
        section.server_id.unwrap_or_else(Uuid::new_v4),
        package_version(),
    )?;
    println!("Advertising {server_data}");

    let mut server = DiscoveryServer::new(section.options());
    server
        .start(server_data, end_points)
        .with_context(|| format!("failed to start discovery on port {}", section.port))?;
    for end_point in server.end_points() {
        println!("  endpoint {end_point}");
    }

    let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => server.update(),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.stop();
    Ok(())
}

fn package_version() -> Version {
    env!("CARGO_PKG_VERSION").parse().unwrap_or_default()
}

/// Timecode sent with every captured frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Timecode {
    /// Frame number within the take.
    pub frame: i32,
    /// Position between frames, in `[0, 1)`.
    pub subframe: f32,
    /// Frames per second numerator.
    pub rate_numerator: i32,
    /// Frames per second denominator.
    pub rate_denominator: i32,
}

impl Schema for Timecode {
    fn schema() -> TypeSchema {
        StructSchema::new("Timecode")
            .layout(StructLayout::sequential::<Timecode>(4))
            .field::<i32>("frame")
            .field::<f32>("subframe")
            .field::<i32>("rate_numerator")
            .field::<i32>("rate_denominator")
            .into()
    }
}

/// Slate text shown on the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slate {
    /// Scene name.
    pub scene: String,
    /// Take number.
    pub take: i32,
}

impl Schema for Slate {
    fn schema() -> TypeSchema {
        StructSchema::new("Slate")
            .field::<String>("scene")
            .field::<i32>("take")
            .into()
    }
}

/// Protocol a capture server offers to connecting clients.
pub fn capture_protocol() -> Result<Protocol> {
    let mut protocol = Protocol::new("LiveCapture", package_version())?;
    protocol.add(Arc::new(BoolSender::new("recording")?))?;
    protocol.add(Arc::new(StringSender::new("take-name")?))?;
    protocol.add(Arc::new(EventReceiver::new("start-recording")?))?;
    protocol.add(Arc::new(EventReceiver::new("stop-recording")?))?;
    protocol.add(Arc::new(BinarySender::<Timecode>::with_options(
        "timecode",
        ChannelType::UnreliableUnordered,
        DataOptions::empty(),
    )?))?;
    protocol.add(Arc::new(JsonSender::<Slate>::new("slate")?))?;
    protocol.add(Arc::new(TextureSender::with_codec(
        "preview",
        ChannelType::UnreliableUnordered,
        DataOptions::empty(),
        TextureCodec::new(TextureCompression::Jpeg),
    )?))?;
    Ok(protocol)
}

/// Print the capture protocol, its handshake blob, and what a client rebuilds from it.
pub fn protocol(show_bytes: bool) -> Result<()> {
    let protocol = capture_protocol()?;
    let blob = protocol.serialize();
    println!("{protocol}");
    println!("handshake: {} bytes", blob.len());
    if show_bytes {
        for line in blob.chunks(32) {
            let hex: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", hex.join(" "));
        }
    }

    let mut registry = MessageRegistry::new();
    registry.register_binary::<Timecode>().register_json::<Slate>();
    let remote = Protocol::deserialize(&blob, &registry).context("handshake did not decode")?;
    println!();
    println!("client view:");
    println!("{}", remote.create_inverse()?);
    Ok(())
}

/// Endpoints to advertise when none are configured: every non-loopback address on `port`.
pub fn local_end_points(port: u16) -> Vec<SocketAddrV4> {
    net_util::local_ipv4_addresses(false)
        .into_iter()
        .map(|addr| SocketAddrV4::new(addr, port))
        .collect()
}
