mod common;

use common::init_test_tracing;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use webrtc_rooms::client;
use webrtc_rooms::config::{ClientConfig, ServerConfig};
use webrtc_rooms::server::{SharedHub, SignalingServer};
use webrtc_rooms::signaling::{
    ServerMessage, SessionDescription, SignalingClient, SignalingMessage,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (String, SharedHub) {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let server = SignalingServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let hub = server.hub();
    tokio::spawn(server.run());
    (format!("ws://{}", addr), hub)
}

async fn wait_for_members(hub: &SharedHub, room: &str, count: usize) {
    let reached = timeout(WAIT, async {
        loop {
            if hub.lock().room_members(room).len() == count {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "room {} never reached {} members", room, count);
}

async fn send(ws: &mut Ws, msg: &SignalingMessage) {
    let json = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

async fn next_message(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_offer_answer_over_websocket() {
    init_test_tracing();
    let (url, hub) = start_server().await;

    let (mut p1, _) = connect_async(url.as_str()).await.unwrap();
    send(
        &mut p1,
        &SignalingMessage::JoinRoom {
            room_id: "R1".to_string(),
            peer_id: "p1".to_string(),
            display_name: "Ada".to_string(),
        },
    )
    .await;
    wait_for_members(&hub, "R1", 1).await;

    let mut p2 = SignalingClient::connect(&url).await.unwrap();
    p2.send(SignalingMessage::JoinRoom {
        room_id: "R1".to_string(),
        peer_id: "p2".to_string(),
        display_name: "Grace".to_string(),
    })
    .unwrap();
    p2.send(SignalingMessage::Offer {
        sdp: SessionDescription::offer("v=0\r\n"),
        from_peer: "p2".to_string(),
        to_peer: "p1".to_string(),
    })
    .unwrap();

    assert_eq!(
        next_message(&mut p1).await,
        ServerMessage::NewParticipant {
            peer_id: "p2".to_string(),
            display_name: "Grace".to_string(),
        }
    );
    assert_eq!(
        next_message(&mut p1).await,
        ServerMessage::Offer {
            sdp: SessionDescription::offer("v=0\r\n"),
            from_peer: "p2".to_string(),
        }
    );

    // Garbage is skipped without dropping the connection.
    p1.send(Message::Text("not an envelope".to_string()))
        .await
        .unwrap();
    send(
        &mut p1,
        &SignalingMessage::Answer {
            sdp: SessionDescription::answer("v=0\r\n"),
            from_peer: "p1".to_string(),
            to_peer: "p2".to_string(),
        },
    )
    .await;

    let reply = timeout(WAIT, p2.receive()).await.unwrap();
    assert_eq!(
        reply,
        Some(ServerMessage::Answer {
            sdp: SessionDescription::answer("v=0\r\n"),
            from_peer: "p1".to_string(),
        })
    );

    p2.close().await;
    assert_eq!(
        next_message(&mut p1).await,
        ServerMessage::ParticipantLeft {
            peer_id: "p2".to_string()
        }
    );
    wait_for_members(&hub, "R1", 1).await;
    assert_eq!(hub.lock().connection_count(), 1);
}

#[tokio::test]
async fn test_dropped_socket_counts_as_disconnect() {
    init_test_tracing();
    let (url, hub) = start_server().await;

    let (mut p1, _) = connect_async(url.as_str()).await.unwrap();
    let (mut p2, _) = connect_async(url.as_str()).await.unwrap();
    send(
        &mut p1,
        &SignalingMessage::JoinRoom {
            room_id: "R1".to_string(),
            peer_id: "p1".to_string(),
            display_name: "Ada".to_string(),
        },
    )
    .await;
    wait_for_members(&hub, "R1", 1).await;
    send(
        &mut p2,
        &SignalingMessage::JoinRoom {
            room_id: "R1".to_string(),
            peer_id: "p2".to_string(),
            display_name: "Grace".to_string(),
        },
    )
    .await;
    assert!(matches!(
        next_message(&mut p1).await,
        ServerMessage::NewParticipant { .. }
    ));

    drop(p2);
    assert_eq!(
        next_message(&mut p1).await,
        ServerMessage::ParticipantLeft {
            peer_id: "p2".to_string()
        }
    );
    wait_for_members(&hub, "R1", 1).await;
}

#[tokio::test]
async fn test_participant_leaves_room_on_shutdown() {
    init_test_tracing();
    let (url, hub) = start_server().await;
    let config = ClientConfig {
        url,
        room: "R9".to_string(),
        display_name: "Solo".to_string(),
        peer_id: Some("solo".to_string()),
        ice_servers: vec![],
        no_audio: false,
        video: false,
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let participant = client::run_until(config, async {
        let _ = stop_rx.await;
    });
    let driver = async {
        wait_for_members(&hub, "R9", 1).await;
        assert_eq!(hub.lock().room_members("R9"), vec!["solo"]);
        stop_tx.send(()).unwrap();
    };

    let (result, ()) = timeout(WAIT, async { tokio::join!(participant, driver) })
        .await
        .unwrap();
    assert!(result.is_ok());
    wait_for_members(&hub, "R9", 0).await;
}
