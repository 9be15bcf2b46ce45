//! Chat and operator command scenarios against the mock server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use rornet::{AuthStatus, MessageType, UserInfo};
use rornet_test_utils::{MockServer, MockSession};

use ror_bot::config::{
    AnnouncementsConfig, BotConfig, ReconnectionConfig, ServerConfig, UserConfig,
};
use ror_bot::events::{handler, Event, EventKind};
use ror_bot::RoRClient;

const BOT_UID: u32 = 7;

fn peer_info(uid: u32, username: &str, auth: AuthStatus) -> UserInfo {
    UserInfo {
        unique_id: uid,
        auth_status: auth,
        slot_num: 0,
        color_num: 2,
        username: username.to_owned(),
        user_token: String::new(),
        server_password: String::new(),
        language: "en_US".to_owned(),
        client_name: "RoR".to_owned(),
        client_version: "2022.12".to_owned(),
        client_guid: String::new(),
        session_type: "normal".to_owned(),
        session_options: String::new(),
    }
}

/// Connect a full client (command surface installed) to a mock session.
async fn connect_client() -> (MockSession, RoRClient) {
    let server = MockServer::start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let config = BotConfig {
        server: ServerConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            password: String::new(),
        },
        user: UserConfig {
            name: "bot".to_owned(),
            token: String::new(),
            language: "en_US".to_owned(),
        },
        reconnection: ReconnectionConfig {
            interval_seconds: 1,
            tries: 1,
        },
        announcements: AnnouncementsConfig {
            delay_seconds: 300,
            messages: Vec::new(),
            color: "#FFFF00".to_owned(),
        },
        truck_names_file: None,
    };

    let client_task = tokio::spawn(async move { RoRClient::connect(config).await });
    let mut session = server.accept().await.unwrap();
    session.complete_handshake(BOT_UID).await.unwrap();
    let client = client_task.await.unwrap().unwrap();
    (session, client)
}

async fn join_peer(session: &mut MockSession, uid: u32, username: &str, auth: AuthStatus) {
    session
        .send(
            MessageType::UserJoin,
            uid,
            0,
            peer_info(uid, username, auth).encode().unwrap(),
        )
        .await
        .unwrap();
}

/// Read packets until the next CHAT from the bot and return its text.
async fn next_chat_reply(session: &mut MockSession) -> String {
    let packet = timeout(
        Duration::from_secs(5),
        session.read_until(|p| p.kind == MessageType::Chat),
    )
    .await
    .unwrap()
    .unwrap();
    String::from_utf8(packet.payload).unwrap()
}

#[tokio::test]
async fn own_chat_echoes_are_suppressed() {
    let (mut session, client) = connect_client().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.conn.events().on(
        EventKind::Chat,
        handler(move |event| {
            let tx = tx.clone();
            async move {
                if let Event::Chat { from_uid, message } = event {
                    let _ = tx.send((from_uid, message));
                }
                Ok(())
            }
        }),
    );

    // An echo of the bot's own chat, then a real peer line.  Packets are
    // processed in order, so the first event we see decides the outcome.
    session
        .send(MessageType::Chat, BOT_UID, 0, b"hi".to_vec())
        .await
        .unwrap();
    session
        .send(MessageType::Chat, 42, 0, b"hello bot".to_vec())
        .await
        .unwrap();

    let (from_uid, message) = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((from_uid, message.as_str()), (42, "hello bot"));
}

#[tokio::test]
async fn ping_gets_a_pong() {
    let (mut session, _client) = connect_client().await;

    session
        .send(MessageType::Chat, 42, 0, b">ping".to_vec())
        .await
        .unwrap();

    assert_eq!(next_chat_reply(&mut session).await, "pong");
}

#[tokio::test]
async fn unknown_verbs_are_reported() {
    let (mut session, _client) = connect_client().await;

    session
        .send(MessageType::Chat, 42, 0, b">bogus 1 2".to_vec())
        .await
        .unwrap();

    assert_eq!(next_chat_reply(&mut session).await, "Invalid command bogus");
}

#[tokio::test]
async fn status_commands_use_the_colored_username() {
    let (mut session, _client) = connect_client().await;
    join_peer(&mut session, 42, "alice", AuthStatus::NONE).await;

    session
        .send(MessageType::Chat, 42, 0, b">afk".to_vec())
        .await
        .unwrap();

    // color_num 2 -> orange.
    assert_eq!(
        next_chat_reply(&mut session).await,
        "#FF8000alice#FFFFFF is afk!"
    );
}

#[tokio::test]
async fn recorder_verbs_require_privileges() {
    let (mut session, _client) = connect_client().await;
    join_peer(&mut session, 42, "alice", AuthStatus::NONE).await;
    join_peer(&mut session, 43, "mod", AuthStatus::MOD).await;

    session
        .send(MessageType::Chat, 42, 0, b">recordings".to_vec())
        .await
        .unwrap();
    assert_eq!(
        next_chat_reply(&mut session).await,
        "You do not have permission to do that."
    );

    session
        .send(MessageType::Chat, 43, 0, b">recordings".to_vec())
        .await
        .unwrap();
    assert_eq!(
        next_chat_reply(&mut session).await,
        "No recordings available"
    );
}

#[tokio::test]
async fn countdown_counts_to_go() {
    let (mut session, client) = connect_client().await;
    join_peer(&mut session, 42, "alice", AuthStatus::NONE).await;

    session
        .send(MessageType::Chat, 42, 0, b">countdown 2".to_vec())
        .await
        .unwrap();

    assert_eq!(
        next_chat_reply(&mut session).await,
        "alice started a 2 second countdown!"
    );
    // Numbers tick out roughly once per second on the frame clock, red,
    // then the green finale.
    assert_eq!(next_chat_reply(&mut session).await, "#FF0000\t2");
    assert_eq!(next_chat_reply(&mut session).await, "#FF0000\t1");
    assert_eq!(next_chat_reply(&mut session).await, "#00FF00\tGO!!!");

    // The one-shot handler removed itself.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        client.conn.events().listener_count(EventKind::FrameStep),
        0
    );
}
