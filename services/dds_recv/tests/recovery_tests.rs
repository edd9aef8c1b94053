//! GapRecoveryEngine against a live server and against in-process peers

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use dds_config::{ConfigHandle, ConnectionSettings, DdsConfig};
use dds_network::{ConnectionPool, ConnectionStats, RecvConnection, TransportError};
use dds_recv::{
    GapRecoveryEngine, LastReceiveFile, MemoryOutageStore, MessageSink, OutageQueue, OutageStore, RecvError,
    Step,
};
use dds_server::{ConnectionIdCounter, MemoryArchive, ProtocolServer};
use dds_types::{DcpAddress, DcpMessage, Outage, OutageId, OutageKind, OutageStatus, SearchCriteria, SourceType};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const MAX_STEPS: usize = 1000;

#[derive(Default)]
struct CollectingSink {
    messages: Mutex<Vec<(DcpMessage, String)>>,
}

impl CollectingSink {
    fn messages(&self) -> Vec<DcpMessage> {
        self.messages.lock().iter().map(|(m, _)| m.clone()).collect()
    }
}

impl MessageSink for CollectingSink {
    fn archive(&self, message: DcpMessage, source: &str) -> dds_recv::Result<()> {
        self.messages.lock().push((message, source.to_string()));
        Ok(())
    }
}

/// Peer that hands out a fixed script of messages, then reports caught up.
struct ScriptedPeer {
    settings: ConnectionSettings,
    stats: Arc<ConnectionStats>,
    connected: AtomicBool,
    script: Mutex<VecDeque<DcpMessage>>,
    criteria: Mutex<Vec<SearchCriteria>>,
}

impl ScriptedPeer {
    fn new(name: &str, script: Vec<DcpMessage>) -> Arc<Self> {
        let mut settings = ConnectionSettings::new(name, 16003);
        settings.name = Some(name.to_string());
        Arc::new(Self {
            stats: Arc::new(ConnectionStats::new(0, name, name)),
            settings,
            connected: AtomicBool::new(false),
            script: Mutex::new(script.into()),
            criteria: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, message: DcpMessage) {
        self.script.lock().push_back(message);
    }
}

#[async_trait]
impl RecvConnection for ScriptedPeer {
    fn name(&self) -> &str {
        self.settings.name.as_deref().unwrap_or_default()
    }
    fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }
    async fn connect(&self) -> dds_network::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn send_criteria(&self, criteria: &SearchCriteria) -> dds_network::Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                name: self.name().to_string(),
            });
        }
        self.criteria.lock().push(criteria.clone());
        Ok(())
    }
    async fn next_message(&self, _wait: Duration) -> dds_network::Result<Option<DcpMessage>> {
        Ok(self.script.lock().pop_front())
    }
    async fn send_noop(&self) -> dds_network::Result<()> {
        Ok(())
    }
    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Store wrapper counting writes per outage id.
#[derive(Default)]
struct CountingStore {
    inner: MemoryOutageStore,
    updates: Mutex<HashMap<OutageId, usize>>,
    deletes: Mutex<HashMap<OutageId, usize>>,
}

impl CountingStore {
    fn updates(&self, id: OutageId) -> usize {
        self.updates.lock().get(&id).copied().unwrap_or(0)
    }
    fn deletes(&self, id: OutageId) -> usize {
        self.deletes.lock().get(&id).copied().unwrap_or(0)
    }
}

impl OutageStore for CountingStore {
    fn assert_outage(&self, outage: Outage) -> dds_recv::Result<Outage> {
        self.inner.assert_outage(outage)
    }
    fn update(&self, outage: &Outage) -> dds_recv::Result<bool> {
        *self.updates.lock().entry(outage.id).or_default() += 1;
        self.inner.update(outage)
    }
    fn change_status(&self, id: OutageId, status: OutageStatus) -> dds_recv::Result<bool> {
        self.inner.change_status(id, status)
    }
    fn delete(&self, id: OutageId) -> dds_recv::Result<bool> {
        *self.deletes.lock().entry(id).or_default() += 1;
        self.inner.delete(id)
    }
    fn highest_priority_active(&self) -> dds_recv::Result<Option<Outage>> {
        self.inner.highest_priority_active()
    }
    fn list(&self) -> dds_recv::Result<Vec<Outage>> {
        self.inner.list()
    }
}

struct Rig {
    engine: GapRecoveryEngine,
    config: Arc<ConfigHandle>,
    sink: Arc<CollectingSink>,
    _dir: TempDir,
}

fn rig(config: DdsConfig, pool: ConnectionPool, store: Arc<dyn OutageStore>) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ConfigHandle::fixed(config));
    let sink = Arc::new(CollectingSink::default());
    let engine = GapRecoveryEngine::new(
        config.clone(),
        Arc::new(pool),
        OutageQueue::new(store),
        sink.clone(),
        Arc::new(LastReceiveFile::load(dir.path().join("ddsrecv.last"))),
    );
    Rig {
        engine,
        config,
        sink,
        _dir: dir,
    }
}

fn pool_of(peers: &[Arc<ScriptedPeer>]) -> ConnectionPool {
    ConnectionPool::new(
        peers.iter().map(|p| p.clone() as Arc<dyn RecvConnection>).collect(),
        Duration::from_secs(10),
    )
}

/// Steps until the claimed outage is released.
async fn step_until_resolved(engine: &mut GapRecoveryEngine) -> OutageStatus {
    for _ in 0..MAX_STEPS {
        match engine.step().await.unwrap() {
            Step::Resolved(status) => return status,
            Step::Received | Step::CaughtUp => {}
            other => panic!("unexpected step {:?}", other),
        }
    }
    panic!("outage not resolved within {} steps", MAX_STEPS);
}

fn sequenced(seq: u16) -> DcpMessage {
    DcpMessage::new(DcpAddress::new(0x1000 + seq as u32), SourceType::Goes, Utc::now(), vec![b'x'; 8])
        .with_sequence(seq)
}

#[tokio::test]
async fn test_address_backfill_from_live_server() {
    let address = DcpAddress::new(0xCE1234A6);
    let t0: DateTime<Utc> = (Utc::now() - ChronoDuration::hours(2))
        .duration_trunc(ChronoDuration::seconds(1))
        .unwrap();

    let server_dir = tempfile::tempdir().unwrap();
    let mut server_config = DdsConfig::default();
    server_config.server.search_window_secs = 1;
    server_config.server.netlist_dir = server_dir.path().join("netlist");
    server_config.server.sandbox_dir = server_dir.path().join("users");

    let archive = Arc::new(MemoryArchive::new());
    for i in 0..100 {
        let t = t0 + ChronoDuration::seconds(36 * i);
        archive.append(DcpMessage::new(address, SourceType::GoesSelfTimed, t, format!("msg {}", i).into_bytes()));
        archive.append(DcpMessage::new(DcpAddress::new(0x42), SourceType::GoesSelfTimed, t, b"other".to_vec()));
    }
    let server = ProtocolServer::with_counter(
        Arc::new(ConfigHandle::fixed(server_config)),
        archive,
        ConnectionIdCounter::in_memory(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server.clone().serve(listener));

    let mut config = DdsConfig::default();
    config.recv.connections = vec![ConnectionSettings::new("127.0.0.1", port)];
    config.recv.message_wait_secs = 5;
    let pool = ConnectionPool::new(
        dds_network::LddsRecvConnection::from_settings(&config.recv.connections, config.recv.timeout()),
        config.recv.reconnect_interval(),
    );
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(config, pool, store.clone());

    let outage = rig
        .engine
        .queue()
        .register(Outage::address(address, t0, t0 + ChronoDuration::hours(1)).unwrap())
        .unwrap();
    assert_eq!(outage.status, OutageStatus::Active);

    let status = step_until_resolved(&mut rig.engine).await;
    assert_eq!(status, OutageStatus::Recovered);

    let received = rig.sink.messages();
    assert_eq!(received.len(), 100);
    assert!(received.iter().all(|m| m.address == address));
    assert!(received.windows(2).all(|w| w[0].receive_time < w[1].receive_time));
    assert_eq!(received[0].receive_time, t0);

    // Recovered outages leave the queue.
    assert!(store.list().unwrap().is_empty());
    assert_eq!(rig.engine.step().await.unwrap(), Step::Idle);
    server.shutdown();
}

#[tokio::test]
async fn test_sequence_sweep_partial_recovery() {
    let peer1 = ScriptedPeer::new("peer1", (1000..=1004).map(sequenced).collect());
    let peer2 = ScriptedPeer::new("peer2", (1005..=1008).map(sequenced).collect());
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer1.clone(), peer2.clone()]), store.clone());

    rig.engine
        .queue()
        .register(Outage::sequence("domsat", 1000, 1010).unwrap())
        .unwrap();

    let status = step_until_resolved(&mut rig.engine).await;
    assert_eq!(status, OutageStatus::Partial);
    assert_eq!(rig.sink.messages().len(), 9);

    // Both peers were asked for the whole range.
    for peer in [&peer1, &peer2] {
        let sent = peer.criteria.lock();
        assert_eq!(sent.len(), 1);
        let range = sent[0].sequence.unwrap();
        assert_eq!((range.start(), range.end()), (1000, 1010));
    }

    let remaining = store.list().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, OutageStatus::Partial);
    assert_eq!(remaining[0].kind, OutageKind::Sequence { begin: 1009, end: 1010 });

    // Partial outages are not claimed again.
    assert_eq!(rig.engine.step().await.unwrap(), Step::Idle);
}

#[tokio::test]
async fn test_sequence_sweep_with_scattered_holes_requeues_each_span() {
    let peer = ScriptedPeer::new("only", [10u16, 11, 14, 15].into_iter().map(sequenced).collect());
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer]), store.clone());
    rig.engine
        .queue()
        .register(Outage::sequence("domsat", 10, 18).unwrap())
        .unwrap();

    assert_eq!(step_until_resolved(&mut rig.engine).await, OutageStatus::Partial);
    let ranges: Vec<_> = store
        .list()
        .unwrap()
        .iter()
        .filter(|o| o.status == OutageStatus::Partial)
        .filter_map(|o| o.sequence_range())
        .collect();
    assert_eq!(ranges.len(), 2);
    assert!(ranges.contains(&(12, 13)));
    assert!(ranges.contains(&(16, 18)));
}

#[tokio::test]
async fn test_sequence_sweep_with_nothing_found_fails() {
    let peers = [ScriptedPeer::new("a", Vec::new()), ScriptedPeer::new("b", Vec::new())];
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&peers), store.clone());
    rig.engine
        .queue()
        .register(Outage::sequence("domsat", 1, 5).unwrap())
        .unwrap();

    assert_eq!(step_until_resolved(&mut rig.engine).await, OutageStatus::Failed);
    assert_eq!(store.list().unwrap()[0].status, OutageStatus::Failed);
    assert!(peers.iter().all(|p| p.criteria.lock().len() == 1));
}

#[tokio::test]
async fn test_preempted_claim_is_resolved_exactly_once() {
    let now = Utc::now();
    let peer = ScriptedPeer::new("peer", Vec::new());
    let store = Arc::new(CountingStore::default());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer.clone()]), store.clone());
    let queue = rig.engine.queue().clone();

    let channel = queue
        .register(Outage::channel("drgs", vec![5], now - ChronoDuration::hours(2), now - ChronoDuration::hours(1)).unwrap())
        .unwrap();
    peer.push(
        DcpMessage::new(DcpAddress::new(7), SourceType::Drgs, now - ChronoDuration::minutes(90), b"m".to_vec())
            .with_channel(5),
    );
    assert_eq!(rig.engine.step().await.unwrap(), Step::Received);
    assert_eq!(rig.engine.current_outage().unwrap().id, channel.id);

    // A higher-priority outage arrives mid-claim.
    let system = queue
        .register(Outage::system(now - ChronoDuration::hours(3), now - ChronoDuration::minutes(150)).unwrap())
        .unwrap();
    assert_eq!(rig.engine.step().await.unwrap(), Step::Resolved(OutageStatus::Recovered));
    assert_eq!(store.updates(channel.id), 1);
    assert_eq!(store.deletes(channel.id), 0);
    assert_eq!(store.deletes(system.id), 1);

    // The preempted outage kept its dragged watermark.
    let saved = store.list().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved[0].begin_time(),
        Some(now - ChronoDuration::minutes(90) - ChronoDuration::seconds(60))
    );

    assert_eq!(rig.engine.step().await.unwrap(), Step::Resolved(OutageStatus::Recovered));
    assert_eq!(store.deletes(channel.id), 1);
    assert_eq!(store.updates(channel.id), 1);
    assert_eq!(rig.engine.step().await.unwrap(), Step::Idle);
}

#[tokio::test]
async fn test_preempted_sequence_sweep_starts_over() {
    let peer1 = ScriptedPeer::new("peer1", (1000..=1004).map(sequenced).collect());
    let peer2 = ScriptedPeer::new("peer2", (1005..=1008).map(sequenced).collect());
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer1.clone(), peer2.clone()]), store.clone());
    let queue = rig.engine.queue().clone();

    let sequence = queue.register(Outage::sequence("domsat", 1000, 1010).unwrap()).unwrap();
    assert_eq!(rig.engine.step().await.unwrap(), Step::Received);

    // The system outage takes over peer1 and drains the rest of its script.
    let now = Utc::now();
    queue
        .register(Outage::system(now - ChronoDuration::hours(1), now).unwrap())
        .unwrap();
    assert_eq!(step_until_resolved(&mut rig.engine).await, OutageStatus::Recovered);

    // Reclaimed with a fresh tracker: peer1 is asked again, 1000..=1004
    // no longer count towards the range.
    assert_eq!(step_until_resolved(&mut rig.engine).await, OutageStatus::Partial);
    assert_eq!(rig.sink.messages().len(), 9);
    assert_eq!(peer1.criteria.lock().len(), 3);
    assert_eq!(peer2.criteria.lock().len(), 1);

    let mut ranges: Vec<_> = store.list().unwrap().iter().filter_map(|o| o.sequence_range()).collect();
    ranges.sort();
    assert_eq!(ranges, vec![(1000, 1004), (1009, 1010)]);
    assert!(store.list().unwrap().iter().all(|o| o.status == OutageStatus::Partial));
    assert!(store.list().unwrap().iter().any(|o| o.id == sequence.id));
}

#[tokio::test]
async fn test_address_without_real_messages_fails() {
    let now = Utc::now();
    let address = DcpAddress::new(0xABCD);
    let peer = ScriptedPeer::new(
        "peer",
        vec![DcpMessage::new(address, SourceType::Goes, now - ChronoDuration::minutes(30), Vec::new()).with_failure_code('M')],
    );
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer]), store.clone());
    rig.engine
        .queue()
        .register(Outage::address(address, now - ChronoDuration::hours(1), now).unwrap())
        .unwrap();

    assert_eq!(step_until_resolved(&mut rig.engine).await, OutageStatus::Failed);
    assert_eq!(rig.sink.messages().len(), 1);
    assert_eq!(store.list().unwrap()[0].status, OutageStatus::Failed);
}

#[tokio::test]
async fn test_real_time_outage_is_never_self_completed() {
    let peer = ScriptedPeer::new("peer", vec![sequenced(1)]);
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer.clone()]), store.clone());
    rig.engine.queue().register(Outage::real_time(Utc::now() - ChronoDuration::minutes(5))).unwrap();

    assert_eq!(rig.engine.step().await.unwrap(), Step::Received);
    for _ in 0..3 {
        assert_eq!(rig.engine.step().await.unwrap(), Step::CaughtUp);
    }
    assert_eq!(store.list().unwrap().len(), 1);

    let sent = peer.criteria.lock();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].daps_until.is_some());
}

#[tokio::test]
async fn test_disabling_releases_claim() {
    let peer = ScriptedPeer::new("peer", vec![sequenced(1)]);
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[peer]), store.clone());
    rig.engine.queue().register(Outage::real_time(Utc::now())).unwrap();
    assert_eq!(rig.engine.step().await.unwrap(), Step::Received);
    assert!(rig.engine.current_outage().is_some());

    let mut config = (*rig.config.current()).clone();
    config.recv.enabled = false;
    rig.config.replace(config);
    assert_eq!(rig.engine.step().await.unwrap(), Step::Disabled);
    assert!(rig.engine.current_outage().is_none());
    assert_eq!(store.list().unwrap()[0].status, OutageStatus::Active);
}

#[tokio::test]
async fn test_bootstrap_registers_startup_outages() {
    let store = Arc::new(MemoryOutageStore::new());
    let rig = rig(DdsConfig::default(), pool_of(&[]), store.clone());
    rig.engine.bootstrap().unwrap();

    let outages = store.list().unwrap();
    assert_eq!(outages.len(), 2);
    assert!(matches!(outages[0].kind, OutageKind::System { .. }));
    assert!(matches!(outages[1].kind, OutageKind::RealTime { .. }));

    let begin = outages[0].begin_time().unwrap();
    let expected = Utc::now() - ChronoDuration::seconds(3600 + 30);
    assert!((begin - expected).num_seconds().abs() < 5);
}

#[tokio::test]
async fn test_no_connection_keeps_claim() {
    let store = Arc::new(MemoryOutageStore::new());
    let mut rig = rig(DdsConfig::default(), pool_of(&[]), store.clone());
    rig.engine.queue().register(Outage::real_time(Utc::now())).unwrap();
    assert_eq!(rig.engine.step().await.unwrap(), Step::NoConnection);
    assert!(rig.engine.current_outage().is_some());
}

#[test]
fn test_store_errors_surface_as_recv_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outages.json");
    std::fs::write(&path, "[").unwrap();
    assert!(matches!(
        dds_recv::JsonFileOutageStore::open(&path),
        Err(RecvError::Json(_))
    ));
}
