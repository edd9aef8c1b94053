//! ProtocolServer end to end over loopback TCP

use chrono::{Duration as ChronoDuration, Utc};
use dds_codec::{AuthHello, Frame, Hello, MessageId, ServerErrorCode};
use dds_config::{ConfigHandle, ConnectionSettings, DdsConfig, SaveLastPolicy, UserSettings};
use dds_network::{FrameConnection, LddsRecvConnection, RecvConnection, TransportError};
use dds_server::{ConnectionIdCounter, MemoryArchive, ProtocolServer};
use dds_types::{DcpAddress, DcpMessage, SearchCriteria, SourceType};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    server: Arc<ProtocolServer>,
    archive: Arc<MemoryArchive>,
    port: u16,
    _dir: TempDir,
}

async fn start(tweak: impl FnOnce(&mut DdsConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DdsConfig::default();
    config.server.search_window_secs = 1;
    config.server.netlist_dir = dir.path().join("netlist");
    config.server.sandbox_dir = dir.path().join("users");
    tweak(&mut config);

    let archive = Arc::new(MemoryArchive::new());
    let server = ProtocolServer::with_counter(
        Arc::new(ConfigHandle::fixed(config)),
        archive.clone(),
        ConnectionIdCounter::in_memory(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server.clone().serve(listener));

    Harness {
        server,
        archive,
        port,
        _dir: dir,
    }
}

fn client(port: u16, user: &str) -> LddsRecvConnection {
    let mut settings = ConnectionSettings::new("127.0.0.1", port);
    settings.username = user.to_string();
    LddsRecvConnection::new(1, settings, Duration::from_secs(60))
}

async fn raw_client(port: u16) -> FrameConnection {
    FrameConnection::connect("127.0.0.1", port, WAIT).await.unwrap()
}

async fn request(conn: &mut FrameConnection, frame: Frame) -> Frame {
    conn.send_frame(&frame).await.unwrap();
    tokio::time::timeout(WAIT, conn.receive_frame()).await.unwrap().unwrap()
}

fn message(address: u32, minutes_ago: i64) -> DcpMessage {
    DcpMessage::new(
        DcpAddress::new(address),
        SourceType::GoesSelfTimed,
        Utc::now() - ChronoDuration::minutes(minutes_ago),
        format!("payload {}", address).into_bytes(),
    )
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_delivers_matching_messages_then_caught_up() {
    let h = start(|_| {}).await;
    for minutes_ago in [30, 20, 10] {
        h.archive.append(message(0xCE1234A6, minutes_ago));
    }
    h.archive.append(message(0x00000001, 15));
    h.archive.append(message(0xCE1234A6, 120));

    let conn = client(h.port, "tester");
    conn.connect().await.unwrap();
    let criteria = SearchCriteria::parse("LRGS_SINCE: now - 1 hour\nDCP_ADDRESS: CE1234A6\n").unwrap();
    conn.send_criteria(&criteria).await.unwrap();

    let mut received = Vec::new();
    while let Some(msg) = conn.next_message(WAIT).await.unwrap() {
        received.push(msg);
    }
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|m| m.address == DcpAddress::new(0xCE1234A6)));
    assert!(received.windows(2).all(|w| w[0].receive_time <= w[1].receive_time));

    let status = h.server.status_snapshot();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].user.as_deref(), Some("tester"));
    assert_eq!(status[0].connection.messages, 3);

    conn.disconnect().await;
    assert!(wait_for(|| h.server.client_count() == 0).await);
}

#[tokio::test]
async fn test_saved_position_resumes_with_since_last() {
    let h = start(|_| {}).await;
    h.archive.append(message(0x10, 20));
    h.archive.append(message(0x10, 10));

    let criteria = SearchCriteria::parse("LRGS_SINCE: now - 1 hour\n").unwrap();
    let first = client(h.port, "resumer");
    first.connect().await.unwrap();
    first.send_criteria(&criteria).await.unwrap();
    let mut count = 0;
    while first.next_message(WAIT).await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 2);
    first.disconnect().await;
    assert!(wait_for(|| h.server.client_count() == 0).await);

    h.archive.append(message(0x10, 0));

    let second = client(h.port, "resumer");
    second.connect().await.unwrap();
    let criteria = SearchCriteria::parse("LRGS_SINCE: last\n").unwrap();
    second.send_criteria(&criteria).await.unwrap();
    let mut resumed = Vec::new();
    while let Some(msg) = second.next_message(WAIT).await.unwrap() {
        resumed.push(msg);
    }
    // The since bound is inclusive, so the last delivered message repeats.
    assert_eq!(resumed.len(), 2);
    second.disconnect().await;
}

#[tokio::test]
async fn test_unknown_network_list_is_reported() {
    let h = start(|_| {}).await;
    let conn = client(h.port, "tester");
    conn.connect().await.unwrap();

    let criteria = SearchCriteria::parse("NETWORKLIST: nowhere\n").unwrap();
    match conn.send_criteria(&criteria).await {
        Err(TransportError::Server { status }) => assert_eq!(status.code, ServerErrorCode::BadNetworkList),
        other => panic!("expected BadNetworkList, got {:?}", other.map(|_| ())),
    }
    // Not fatal: the connection keeps working.
    conn.send_noop().await.unwrap();
}

#[tokio::test]
async fn test_block_before_criteria_is_rejected_without_hangup() {
    let h = start(|_| {}).await;
    let mut conn = raw_client(h.port).await;
    request(&mut conn, Frame::text(MessageId::Hello, &Hello::new("tester").encode()).unwrap()).await;

    let reply = request(&mut conn, Frame::empty(MessageId::DcpBlock)).await;
    assert_eq!(reply.id, MessageId::DcpBlock);
    assert_eq!(reply.status().unwrap().code, ServerErrorCode::BadRequest);

    let reply = request(&mut conn, Frame::empty(MessageId::Idle)).await;
    assert_eq!(reply.id, MessageId::Idle);
    assert!(reply.status().is_none());
}

#[tokio::test]
async fn test_relative_until_before_since_is_rejected() {
    let h = start(|_| {}).await;
    let mut conn = raw_client(h.port).await;
    request(&mut conn, Frame::text(MessageId::Hello, &Hello::new("tester").encode()).unwrap()).await;

    let text = "LRGS_SINCE: now\nLRGS_UNTIL: now - 1 hour\n";
    let reply = request(&mut conn, Frame::text(MessageId::Criteria, text).unwrap()).await;
    assert_eq!(reply.id, MessageId::Criteria);
    assert_eq!(reply.status().unwrap().code, ServerErrorCode::BadSearchCriteria);

    // No session was initialised from the rejected criteria.
    let reply = request(&mut conn, Frame::empty(MessageId::DcpBlock)).await;
    assert_eq!(reply.status().unwrap().code, ServerErrorCode::BadRequest);
}

#[tokio::test]
async fn test_unknown_request_id_gets_bad_keyword_then_hangup() {
    let h = start(|_| {}).await;
    let mut stream = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
    stream.write_all(b"FAF0z00000").await.unwrap();
    let peer = stream.peer_addr().unwrap();
    let mut conn = FrameConnection::new(stream, peer);

    let reply = tokio::time::timeout(WAIT, conn.receive_frame()).await.unwrap().unwrap();
    assert_eq!(reply.id, MessageId::Hello);
    assert_eq!(reply.status().unwrap().code, ServerErrorCode::BadKeyword);
    assert!(tokio::time::timeout(WAIT, conn.receive_frame()).await.unwrap().is_err());
}

#[tokio::test]
async fn test_authenticated_hello() {
    let h = start(|config| {
        config.server.require_auth = true;
        config.server.users.push(UserSettings {
            name: "secure".into(),
            password: Some("hunter2".into()),
            good_only: false,
            force_ascending: false,
            disabled: false,
            save_last: SaveLastPolicy::OnDetach,
        });
    })
    .await;

    let anonymous = client(h.port, "secure");
    assert!(matches!(
        anonymous.connect().await,
        Err(TransportError::Authentication { .. })
    ));

    let mut settings = ConnectionSettings::new("127.0.0.1", h.port);
    settings.username = "secure".into();
    settings.authenticate = true;
    settings.password = Some("hunter2".into());
    let authed = LddsRecvConnection::new(2, settings.clone(), Duration::from_secs(60));
    authed.connect().await.unwrap();
    authed.send_noop().await.unwrap();

    settings.password = Some("wrong".into());
    let wrong = LddsRecvConnection::new(3, settings, Duration::from_secs(60));
    assert!(matches!(
        wrong.connect().await,
        Err(TransportError::Authentication { .. })
    ));

    let mut conn = raw_client(h.port).await;
    let hello = AuthHello::sign("secure", "hunter2", Utc::now());
    let reply = request(&mut conn, Frame::text(MessageId::AuthHello, &hello.encode()).unwrap()).await;
    assert!(reply.body_text().starts_with(&format!("secure {}", hello.timestamp)));
}

#[tokio::test]
async fn test_idle_client_is_hung_up_by_housekeeping() {
    let h = start(|config| config.server.hangup_secs = 0).await;
    let mut conn = raw_client(h.port).await;
    request(&mut conn, Frame::text(MessageId::Hello, &Hello::new("sleepy").encode()).unwrap()).await;
    assert_eq!(h.server.active_clients().len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.server.housekeeping_pass(), 1);
    assert!(h.server.active_clients().is_empty());

    let closed = tokio::time::timeout(WAIT, conn.receive_frame()).await.unwrap();
    assert!(closed.is_err());
}

#[tokio::test]
async fn test_disable_disconnects_and_refuses() {
    let h = start(|_| {}).await;
    let mut conn = raw_client(h.port).await;
    request(&mut conn, Frame::text(MessageId::Hello, &Hello::new("tester").encode()).unwrap()).await;

    h.server.set_enabled(false);
    assert_eq!(h.server.client_count(), 0);
    assert!(tokio::time::timeout(WAIT, conn.receive_frame()).await.unwrap().is_err());

    let refused = client(h.port, "tester");
    assert!(refused.connect().await.is_err());

    h.server.set_enabled(true);
    let accepted = client(h.port, "tester");
    accepted.connect().await.unwrap();
}

#[tokio::test]
async fn test_client_capacity() {
    let h = start(|config| config.server.max_clients = 1).await;
    let first = client(h.port, "one");
    first.connect().await.unwrap();

    let second = client(h.port, "two");
    assert!(second.connect().await.is_err());
    assert_eq!(h.server.client_count(), 1);

    first.disconnect().await;
    assert!(wait_for(|| h.server.client_count() == 0).await);
    second.connect().await.unwrap();
}
