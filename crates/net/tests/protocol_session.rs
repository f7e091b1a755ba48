//! Two protocol endpoints talking through an in-memory transport.
//!
//! The "server" builds the protocol, the "client" rebuilds it from the handshake blob
//! and answers with the inverse, then values flow through the loopback network.

use bytemuck::{Pod, Zeroable};
use livecapture_net::schema::{StructLayout, StructSchema};
use livecapture_net::{
    BinaryReceiver, BinarySender, BoolReceiver, BoolSender, ChannelType, DataOptions,
    EventReceiver, EventSender, InboundMessage, JsonReceiver, JsonSender, Message,
    MessageRegistry, Network, OutboundMessage, Protocol, ProtocolError, Remote, Schema,
    StringReceiver, StringSender, TextureCodec, TextureCompression, TextureData,
    TextureFormat, TextureReceiver, TextureSender, TransportError, TypeSchema, Version,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct LoopbackNetwork {
    disconnected: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl LoopbackNetwork {
    fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Network for LoopbackNetwork {
    fn is_connected(&self, _remote: &Remote) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn send_message(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

struct FailingNetwork;

impl Network for FailingNetwork {
    fn is_connected(&self, _remote: &Remote) -> bool {
        true
    }

    fn send_message(&self, _message: OutboundMessage) -> Result<(), TransportError> {
        Err(TransportError("socket closed".into()))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct FrameTiming {
    frame: u32,
    subframe: f32,
}

impl Schema for FrameTiming {
    fn schema() -> TypeSchema {
        StructSchema::new("FrameTiming")
            .layout(StructLayout::sequential::<FrameTiming>(4))
            .field::<u32>("frame")
            .field::<f32>("subframe")
            .into()
    }
}

/// Same name as [`FrameTiming`], different shape, as an older build would have it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct LegacyFrameTiming {
    frame: u32,
}

impl Schema for LegacyFrameTiming {
    fn schema() -> TypeSchema {
        StructSchema::new("FrameTiming")
            .layout(StructLayout::sequential::<LegacyFrameTiming>(4))
            .field::<u32>("frame")
            .into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SlateInfo {
    scene: String,
    take: u32,
}

impl Schema for SlateInfo {
    fn schema() -> TypeSchema {
        StructSchema::new("SlateInfo")
            .field::<String>("scene")
            .field::<u32>("take")
            .into()
    }
}

fn remote() -> Remote {
    Remote::new(Uuid::from_u128(0x1234))
}

fn server_protocol() -> Protocol {
    let mut protocol = Protocol::new("capture", Version::new(1, 0)).unwrap();
    protocol
        .add(Arc::new(BoolSender::new("recording").unwrap()))
        .unwrap();
    protocol
        .add(Arc::new(StringSender::new("take-name").unwrap()))
        .unwrap();
    protocol
        .add(Arc::new(EventSender::new("start").unwrap()))
        .unwrap();
    protocol
        .add(Arc::new(
            BinarySender::<FrameTiming>::with_options(
                "timing",
                ChannelType::UnreliableUnordered,
                DataOptions::empty(),
            )
            .unwrap(),
        ))
        .unwrap();
    protocol
        .add(Arc::new(JsonSender::<SlateInfo>::new("slate").unwrap()))
        .unwrap();
    protocol
        .add(Arc::new(
            TextureSender::with_codec(
                "preview",
                ChannelType::ReliableOrdered,
                DataOptions::empty(),
                TextureCodec::new(TextureCompression::Png),
            )
            .unwrap(),
        ))
        .unwrap();
    protocol
}

fn registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry
        .register_binary::<FrameTiming>()
        .register_json::<SlateInfo>();
    registry
}

/// Deliver everything the network captured into `protocol`.
fn deliver(network: &LoopbackNetwork, protocol: &Protocol) -> usize {
    let messages = network.take();
    let count = messages.len();
    for message in messages {
        protocol
            .receive_message(InboundMessage::from(message))
            .expect("receive");
    }
    count
}

#[test]
fn handshake_round_trip_keeps_every_message() {
    let server = server_protocol();
    let remote_view = Protocol::deserialize(&server.serialize(), &registry()).unwrap();

    assert_eq!(remote_view.len(), server.len());
    for (original, decoded) in server.messages().zip(remote_view.messages()) {
        assert_eq!(original.header().id(), decoded.header().id());
        assert_eq!(original.header().code(), decoded.header().code());
        assert_eq!(original.header().channel(), decoded.header().channel());
        assert_eq!(original.display_name(), decoded.display_name());
    }

    let texture = TextureSender::get(&remote_view, "preview").unwrap();
    assert_eq!(texture.codec().compression(), TextureCompression::Png);
    assert_eq!(texture.options(), DataOptions::empty());
}

#[test]
fn schema_mismatch_skips_only_that_message() {
    let server = server_protocol();
    let mut registry = MessageRegistry::new();
    registry
        .register_binary::<LegacyFrameTiming>()
        .register_json::<SlateInfo>();

    let remote_view = Protocol::deserialize(&server.serialize(), &registry).unwrap();
    assert_eq!(remote_view.len(), server.len() - 1);
    assert!(remote_view.find("timing").is_none());
    assert!(remote_view.find("slate").is_some());
}

#[test]
fn values_flow_from_sender_to_inverse_receiver() {
    let server = server_protocol();
    let client = server.create_inverse().unwrap();
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());

    let recording = Arc::new(Mutex::new(Vec::new()));
    let sink = recording.clone();
    BoolReceiver::get(&client, "recording")
        .unwrap()
        .add_handler(Arc::new(move |value| sink.lock().unwrap().push(*value)));

    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = names.clone();
    StringReceiver::get(&client, "take-name")
        .unwrap()
        .add_handler(Arc::new(move |value: &String| {
            sink.lock().unwrap().push(value.clone())
        }));

    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    EventReceiver::get(&client, "start")
        .unwrap()
        .add_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let timings = Arc::new(Mutex::new(Vec::new()));
    let sink = timings.clone();
    BinaryReceiver::<FrameTiming>::get(&client, "timing")
        .unwrap()
        .add_handler(Arc::new(move |value| sink.lock().unwrap().push(*value)));

    let slates = Arc::new(Mutex::new(Vec::new()));
    let sink = slates.clone();
    JsonReceiver::<SlateInfo>::get(&client, "slate")
        .unwrap()
        .add_handler(Arc::new(move |value: &SlateInfo| {
            sink.lock().unwrap().push(value.clone())
        }));

    let previews = Arc::new(Mutex::new(Vec::new()));
    let sink = previews.clone();
    TextureReceiver::get(&client, "preview")
        .unwrap()
        .add_handler(Arc::new(move |value: &TextureData| {
            sink.lock().unwrap().push(value.clone())
        }));

    BoolSender::get(&server, "recording").unwrap().send(&true);
    StringSender::get(&server, "take-name")
        .unwrap()
        .send(&"scene_4".to_string());
    server.event_sender("start").unwrap().send();
    let timing = FrameTiming {
        frame: 1001,
        subframe: 0.5,
    };
    BinarySender::<FrameTiming>::get(&server, "timing")
        .unwrap()
        .send(&timing);
    let slate = SlateInfo {
        scene: "4A".into(),
        take: 2,
    };
    JsonSender::<SlateInfo>::get(&server, "slate")
        .unwrap()
        .send(&slate);
    let preview = TextureData {
        texture: Some(livecapture_net::Texture::new(
            "thumb",
            2,
            2,
            TextureFormat::Rgb8,
            (0..12).collect(),
        )),
        metadata: "cam1".into(),
    };
    TextureSender::get(&server, "preview")
        .unwrap()
        .send(&preview);

    assert_eq!(deliver(&network, &client), 6);
    assert_eq!(*recording.lock().unwrap(), [true]);
    assert_eq!(*names.lock().unwrap(), ["scene_4"]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(*timings.lock().unwrap(), [timing]);
    assert_eq!(*slates.lock().unwrap(), [slate]);
    assert_eq!(*previews.lock().unwrap(), [preview]);
}

#[test]
fn outbound_frames_carry_code_and_channel() {
    let server = server_protocol();
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());

    BinarySender::<FrameTiming>::get(&server, "timing")
        .unwrap()
        .send(&FrameTiming {
            frame: 7,
            subframe: 0.0,
        });

    let sent = network.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].remote, remote());
    assert_eq!(sent[0].channel, ChannelType::UnreliableUnordered);
    assert_eq!(&sent[0].data[..2], &3u16.to_le_bytes());
    assert_eq!(sent[0].data.len(), 2 + 8);
}

#[test]
fn identical_values_are_sent_once() {
    let server = server_protocol();
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());
    let sender = BoolSender::get(&server, "recording").unwrap();

    sender.send(&true);
    sender.send(&true);
    assert_eq!(network.take().len(), 1);

    sender.send(&false);
    sender.send(&true);
    assert_eq!(network.take().len(), 2);
}

#[test]
fn reset_forces_the_next_send() {
    let server = server_protocol();
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());
    let sender = StringSender::get(&server, "take-name").unwrap();

    sender.send(&"a".to_string());
    server.reset();
    sender.send(&"a".to_string());
    assert_eq!(network.take().len(), 2);
}

#[test]
fn change_suppression_can_be_disabled() {
    let mut protocol = Protocol::new("p", Version::default()).unwrap();
    let sender = protocol
        .add(Arc::new(
            BoolSender::with_options("flag", ChannelType::ReliableOrdered, DataOptions::empty())
                .unwrap(),
        ))
        .unwrap();
    let network = Arc::new(LoopbackNetwork::default());
    protocol.set_network(network.clone(), remote());

    sender.send(&true);
    sender.send(&true);
    assert_eq!(network.take().len(), 2);
}

#[test]
fn sends_while_disconnected_are_dropped() {
    let server = server_protocol();
    let network = Arc::new(LoopbackNetwork::default());
    network.disconnected.store(true, Ordering::SeqCst);
    server.set_network(network.clone(), remote());

    server.event_sender("start").unwrap().send();
    BoolSender::get(&server, "recording").unwrap().send(&true);
    assert!(network.take().is_empty());

    server.clear_network();
    network.disconnected.store(false, Ordering::SeqCst);
    server.event_sender("start").unwrap().send();
    assert!(network.take().is_empty());
}

#[test]
fn transport_failure_resets_the_sender() {
    let server = server_protocol();
    server.set_network(Arc::new(FailingNetwork), remote());
    let sender = BoolSender::get(&server, "recording").unwrap();
    sender.send(&true);

    // After the failure the cache is empty, so the same value goes out again.
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());
    sender.send(&true);
    assert_eq!(network.take().len(), 1);
}

#[test]
fn inverse_of_inverse_matches_original() {
    let server = server_protocol();
    let twice = server.create_inverse().unwrap().create_inverse().unwrap();

    for (a, b) in server.messages().zip(twice.messages()) {
        assert_eq!(a.type_name(), b.type_name());
        assert_eq!(a.header().id(), b.header().id());
        assert_eq!(a.header().channel(), b.header().channel());
        assert_eq!(a.header().code(), b.header().code());
    }
    let texture = TextureSender::get(&twice, "preview").unwrap();
    assert_eq!(texture.codec().compression(), TextureCompression::Png);
    assert_eq!(texture.options(), DataOptions::empty());
}

#[test]
fn inverse_messages_belong_to_the_inverse() {
    let server = server_protocol();
    let client = server.create_inverse().unwrap();
    let mut third = Protocol::new("third", Version::default()).unwrap();

    // Messages of the inverse already belong to it.
    let receiver = BoolReceiver::get(&client, "recording").unwrap();
    assert!(matches!(
        third.add(receiver).err().unwrap(),
        ProtocolError::AlreadyAssigned { .. }
    ));
}

#[test]
fn handlers_can_be_removed() {
    let server = server_protocol();
    let client = server.create_inverse().unwrap();
    let network = Arc::new(LoopbackNetwork::default());
    server.set_network(network.clone(), remote());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let receiver = EventReceiver::get(&client, "start").unwrap();
    receiver.add_handler(handler.clone());
    receiver.add_handler(handler.clone());
    assert_eq!(receiver.handler_count(), 1);

    server.event_sender("start").unwrap().send();
    deliver(&network, &client);
    assert!(receiver.remove_handler(&handler));
    server.event_sender("start").unwrap().send();
    deliver(&network, &client);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
