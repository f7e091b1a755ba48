//! Discovery over real sockets on the loopback interface.
//!
//! Datagrams are sent straight to `127.0.0.1:port`, which reaches the receive socket
//! bound to every interface without needing a broadcast-capable network.

use livecapture_core::Version;
use livecapture_discovery::{
    DiscoveryClient, DiscoveryEvent, DiscoveryInfo, DiscoveryOptions, DiscoveryServer, Packet,
    ServerData,
};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn free_port() -> u16 {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .expect("bind")
        .local_addr()
        .expect("local addr")
        .port()
}

fn options(port: u16) -> DiscoveryOptions {
    DiscoveryOptions {
        port,
        ..DiscoveryOptions::default()
    }
}

fn announcement(id: Uuid) -> DiscoveryInfo {
    let data = ServerData::new("App", "Stage", id, Version::new(1, 0)).expect("server data");
    DiscoveryInfo::new(
        data,
        vec![SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 9000)],
    )
}

/// Pump the client until an event arrives or a second passes.
async fn next_event(
    client: &mut DiscoveryClient,
    events: &mut mpsc::UnboundedReceiver<DiscoveryEvent>,
) -> Option<DiscoveryEvent> {
    for _ in 0..100 {
        client.update();
        if let Ok(event) = events.try_recv() {
            return Some(event);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn client_tracks_announcement_and_shutdown() {
    let port = free_port();
    let mut client = DiscoveryClient::new(options(port));
    let mut events = client.subscribe();
    client.start("App", false).expect("start client");

    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind peer");
    let target = (Ipv4Addr::LOCALHOST, port);
    let id = Uuid::new_v4();
    let info = announcement(id);

    // Wrong product first; it must not produce an event.
    let other = DiscoveryInfo::new(
        ServerData::new("Other", "Stage", Uuid::new_v4(), Version::new(1, 0)).unwrap(),
        info.end_points.clone(),
    );
    peer.send_to(&Packet::Discovery(other).encode(), target).unwrap();
    peer.send_to(&Packet::Discovery(info.clone()).encode(), target).unwrap();

    assert_eq!(
        next_event(&mut client, &mut events).await,
        Some(DiscoveryEvent::ServerFound(info.clone()))
    );
    assert_eq!(client.servers(), [info.clone()]);

    peer.send_to(&Packet::Shutdown { id }.encode(), target).unwrap();
    assert_eq!(
        next_event(&mut client, &mut events).await,
        Some(DiscoveryEvent::ServerLost(info))
    );
    assert!(client.servers().is_empty());

    client.stop();
    assert!(!client.is_running());
}

#[tokio::test]
async fn server_answers_matching_requests() {
    let port = free_port();
    let mut server = DiscoveryServer::new(options(port));
    let data = ServerData::new("App", "Stage", Uuid::new_v4(), Version::new(2, 0)).unwrap();
    server.start(data, &[]).expect("start server");
    let started = server.last_broadcast().expect("announced on start");

    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind peer");
    let target = (Ipv4Addr::LOCALHOST, port);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let other = Packet::Request {
        product_name: "Other".into(),
    };
    peer.send_to(&other.encode(), target).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.last_broadcast(), Some(started));

    let request = Packet::Request {
        product_name: "App".into(),
    };
    peer.send_to(&request.encode(), target).unwrap();
    let mut answered = false;
    for _ in 0..100 {
        if server.last_broadcast().is_some_and(|last| last > started) {
            answered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(answered, "server did not answer the request");
}

#[tokio::test]
async fn client_and_server_share_a_port() {
    let port = free_port();
    let mut server = DiscoveryServer::new(options(port));
    let mut client = DiscoveryClient::new(options(port));

    let data = ServerData::new("App", "Stage", Uuid::new_v4(), Version::new(1, 0)).unwrap();
    server.start(data, &[]).expect("start server");
    client.start("App", true).expect("start client");
    assert!(server.is_running() && client.is_running());
}

/// Full broadcast path: needs an interface that loops broadcasts back to this host.
#[tokio::test]
#[ignore = "needs a broadcast-capable network interface"]
async fn server_is_found_and_lost_over_broadcast() {
    let local = livecapture_discovery::net_util::local_ipv4_addresses(false);
    let Some(&address) = local.first() else {
        return;
    };

    let port = free_port();
    let id = Uuid::new_v4();
    let end_point = SocketAddrV4::new(address, 9000);
    let mut server = DiscoveryServer::new(options(port));
    let mut client = DiscoveryClient::new(options(port));
    let mut events = client.subscribe();

    client.start("App", true).expect("start client");
    server
        .start(
            ServerData::new("App", "Stage", id, Version::new(1, 0)).unwrap(),
            &[end_point],
        )
        .expect("start server");

    match next_event(&mut client, &mut events).await {
        Some(DiscoveryEvent::ServerFound(info)) => {
            assert_eq!(info.server_info.id(), id);
            assert_eq!(info.end_points, [end_point]);
        }
        other => panic!("expected ServerFound, got {other:?}"),
    }

    server.stop();
    match next_event(&mut client, &mut events).await {
        Some(DiscoveryEvent::ServerLost(info)) => assert_eq!(info.server_info.id(), id),
        other => panic!("expected ServerLost, got {other:?}"),
    }
}
