//! Gap recovery engine
//!
//! The intake loop. Each [`GapRecoveryEngine::step`] re-reads the queue,
//! keeps or switches its claim on the highest-priority active outage, and
//! pulls at most one message for it from upstream. Real-time intake is just
//! the lowest-priority outage kind, so backfill always preempts it.
//!
//! ```text
//!   OutageQueue ──claim──► GapRecoveryEngine ──criteria──► ConnectionPool
//!        ▲                        │                              │
//!        └──resolve (once)────────┘◄──────── DcpMessage ─────────┘
//!                                 │
//!                                 └──► MessageSink (local archive)
//! ```

use crate::error::Result;
use crate::last_receive::LastReceiveFile;
use crate::queue::{OutageQueue, Resolution};
use crate::sink::MessageSink;
use crate::strategy::{Completion, CriteriaContext, Progress, Strategy};
use crate::tracker::SequenceTracker;
use chrono::{Duration as ChronoDuration, Utc};
use dds_config::ConfigHandle;
use dds_network::{ConnectionPool, RecvConnection};
use dds_types::{DcpMessage, Outage, OutageStatus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Recovered data pulls the begin time to this far behind the newest message.
const WATERMARK_LAG_SECS: i64 = 60;
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);
/// First start with no last-receive file looks back this far.
const FIRST_START_LOOKBACK_SECS: i64 = 3600;
const BOOTSTRAP_OVERLAP_SECS: i64 = 30;
const BOOTSTRAP_LEAD_SECS: i64 = 10;

const IDLE_PAUSE: Duration = Duration::from_millis(500);
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Outcome of one engine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No active outage to work.
    Idle,
    /// Receiving is turned off in configuration.
    Disabled,
    /// One message was archived.
    Received,
    /// The peer has nothing more for now; the claim is kept.
    CaughtUp,
    /// The claimed outage was released with this status.
    Resolved(OutageStatus),
    /// No usable peer at the moment.
    NoConnection,
    /// The peer failed; the pool will re-select next time.
    ConnectionFailed,
}

impl Step {
    fn pause(self) -> Duration {
        match self {
            Step::Received | Step::Resolved(_) => Duration::ZERO,
            Step::Idle => IDLE_PAUSE,
            Step::Disabled | Step::CaughtUp | Step::NoConnection | Step::ConnectionFailed => RETRY_PAUSE,
        }
    }
}

/// The outage currently being worked and what has come in for it
struct Claim {
    outage: Outage,
    claimed_status: OutageStatus,
    strategy: &'static Strategy,
    /// Peer the current criteria were uploaded to
    connection: Option<Arc<dyn RecvConnection>>,
    tried: HashSet<String>,
    tracker: Option<SequenceTracker>,
    real_messages: u64,
    total_messages: u64,
    modified: bool,
    checkpointed: Instant,
}

impl Claim {
    fn new(outage: Outage) -> Self {
        let tracker = outage
            .sequence_range()
            .map(|(begin, end)| SequenceTracker::new(begin, end));
        Self {
            claimed_status: outage.status,
            strategy: Strategy::for_kind(&outage.kind),
            outage,
            connection: None,
            tried: HashSet::new(),
            tracker,
            real_messages: 0,
            total_messages: 0,
            modified: false,
            checkpointed: Instant::now(),
        }
    }

    fn progress(&self) -> Progress<'_> {
        Progress {
            real_messages: self.real_messages,
            total_messages: self.total_messages,
            tracker: self.tracker.as_ref(),
        }
    }

    /// True if criteria for this claim are live on `conn`.
    fn is_on(&self, conn: &Arc<dyn RecvConnection>) -> bool {
        self.connection.as_ref().is_some_and(|c| {
            std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(conn)) && c.is_connected()
        })
    }

    fn record(&mut self, message: &DcpMessage) {
        self.total_messages += 1;
        if message.is_real_message() {
            self.real_messages += 1;
        }
        if self.strategy.drags_watermark {
            let mark = message.receive_time - ChronoDuration::seconds(WATERMARK_LAG_SECS);
            if self.outage.advance_begin(mark) {
                self.modified = true;
            }
        }
        if let (Some(tracker), Some(seq)) = (self.tracker.as_mut(), message.sequence_num) {
            tracker.mark(seq);
        }
    }

    /// Releases the claim, persisting its final state. Consumes the claim so
    /// it cannot be resolved twice. `None` keeps the current status.
    fn resolve(mut self, queue: &OutageQueue, status: Option<OutageStatus>) -> Result<Resolution> {
        let mut leftover = Vec::new();
        if let Some(status) = status {
            self.outage.status = status;
            if status == OutageStatus::Partial {
                if let Some(tracker) = &self.tracker {
                    let mut spans = tracker.missing_spans().into_iter();
                    if let Some((begin, end)) = spans.next() {
                        self.outage.narrow_sequence(begin, end)?;
                        self.modified = true;
                    }
                    leftover = spans.collect();
                }
            }
        }

        info!(
            outage = %self.outage,
            status = %self.outage.status,
            recovered = self.total_messages,
            real = self.real_messages,
            missing = self.tracker.as_ref().map(|t| t.missing()),
            "Releasing outage"
        );
        let resolution = queue.resolve(&self.outage, self.claimed_status, self.modified)?;

        for (begin, end) in leftover {
            let mut rest = Outage::sequence(self.outage.source.clone(), begin, end)?;
            rest.status = OutageStatus::Partial;
            queue.register(rest)?;
        }
        Ok(resolution)
    }
}

pub struct GapRecoveryEngine {
    config: Arc<ConfigHandle>,
    pool: Arc<ConnectionPool>,
    queue: OutageQueue,
    sink: Arc<dyn MessageSink>,
    last_receive: Arc<LastReceiveFile>,
    claim: Option<Claim>,
}

impl GapRecoveryEngine {
    pub fn new(
        config: Arc<ConfigHandle>,
        pool: Arc<ConnectionPool>,
        queue: OutageQueue,
        sink: Arc<dyn MessageSink>,
        last_receive: Arc<LastReceiveFile>,
    ) -> Self {
        Self {
            config,
            pool,
            queue,
            sink,
            last_receive,
            claim: None,
        }
    }

    pub fn queue(&self) -> &OutageQueue {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The outage being worked, with any unsaved progress.
    pub fn current_outage(&self) -> Option<&Outage> {
        self.claim.as_ref().map(|c| &c.outage)
    }

    /// Registers the startup outages: a system outage covering the time
    /// the receiver was down and, without local satellite links, the
    /// perpetual real-time outage.
    pub fn bootstrap(&self) -> Result<()> {
        let settings = self.config.current();
        let now = Utc::now();
        let last = self
            .last_receive
            .last()
            .unwrap_or_else(|| now - ChronoDuration::seconds(FIRST_START_LOOKBACK_SECS));
        let begin = last - ChronoDuration::seconds(BOOTSTRAP_OVERLAP_SECS);
        let end = now + ChronoDuration::seconds(BOOTSTRAP_LEAD_SECS);
        if begin < end {
            self.queue.register(Outage::system(begin, end)?)?;
        }
        if !settings.recv.satellite_links_enabled {
            self.queue.register(Outage::real_time(now))?;
        }
        Ok(())
    }

    pub async fn step(&mut self) -> Result<Step> {
        let settings = self.config.current();
        if !settings.recv.enabled {
            if self.claim.is_some() {
                info!("Receiving disabled, releasing claim");
                self.release(None)?;
                self.pool.clear_current();
            }
            return Ok(Step::Disabled);
        }

        let next = self.queue.highest_priority_active()?;
        let keep = matches!((&self.claim, &next), (Some(c), Some(n)) if c.outage.id == n.id);
        if !keep {
            if let Some(claim) = &self.claim {
                if let Some(tracker) = claim.tracker.as_ref().filter(|t| t.received() > 0) {
                    // Sweep state is not persisted; the range is swept again from scratch.
                    debug!(
                        outage = %claim.outage,
                        received = tracker.received(),
                        missing = tracker.missing(),
                        peers_tried = claim.tried.len(),
                        "Discarding sweep progress of preempted outage"
                    );
                }
            }
            self.release(None)?;
            let Some(outage) = next else {
                return Ok(Step::Idle);
            };
            info!(outage = %outage, "Claimed outage");
            self.pool.clear_current();
            self.claim = Some(Claim::new(outage));
        }

        let netlists = settings.recv.group_netlists();
        self.get_some_data(&netlists, settings.recv.message_wait()).await
    }

    /// Runs until `shutdown` flips to true, then releases the claim and
    /// saves the last receive time.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Recovery engine started");
        while !*shutdown.borrow() {
            let pause = match self.step().await {
                Ok(step) => step.pause(),
                Err(e) => {
                    error!(error = %e, "Recovery step failed");
                    RETRY_PAUSE
                }
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.release(None) {
            warn!(error = %e, "Could not save claimed outage on shutdown");
        }
        if let Err(e) = self.last_receive.flush() {
            warn!(error = %e, "Could not save last receive time");
        }
        self.pool.disconnect_all().await;
        info!("Recovery engine stopped");
    }

    fn release(&mut self, status: Option<OutageStatus>) -> Result<Option<Resolution>> {
        match self.claim.take() {
            Some(claim) => claim.resolve(&self.queue, status).map(Some),
            None => Ok(None),
        }
    }

    async fn get_some_data(&mut self, netlists: &[String], wait: Duration) -> Result<Step> {
        let Some(claim) = self.claim.as_mut() else {
            return Ok(Step::Idle);
        };

        let conn = if claim.strategy.sweeps_connections {
            match &claim.connection {
                Some(c) if c.is_connected() => c.clone(),
                _ => match self.pool.untried_connection(&mut claim.tried).await {
                    Some(c) => c,
                    None => return self.finish_sweep(),
                },
            }
        } else {
            match self.pool.current_connection().await {
                Some(c) => c,
                None => return Ok(Step::NoConnection),
            }
        };

        if !claim.is_on(&conn) {
            let ctx = CriteriaContext {
                netlists,
                now: Utc::now(),
            };
            let criteria = (claim.strategy.build_criteria)(&claim.outage, &ctx)?;
            if let Err(e) = conn.send_criteria(&criteria).await {
                warn!(connection = %conn.name(), outage = %claim.outage, error = %e, "Criteria rejected");
                claim.connection = None;
                self.pool.clear_current();
                return Ok(Step::ConnectionFailed);
            }
            debug!(connection = %conn.name(), outage = %claim.outage, "Criteria sent");
            claim.connection = Some(conn.clone());
        }

        match conn.next_message(wait).await {
            Ok(Some(message)) => {
                self.accept(message, conn.name())?;
                Ok(Step::Received)
            }
            Ok(None) => self.caught_up(),
            Err(e) => {
                warn!(connection = %conn.name(), error = %e, "Upstream connection failed");
                claim.connection = None;
                self.pool.clear_current();
                Ok(Step::ConnectionFailed)
            }
        }
    }

    fn accept(&mut self, message: DcpMessage, source: &str) -> Result<()> {
        let receive_time = message.receive_time;
        if let Some(claim) = self.claim.as_mut() {
            claim.record(&message);
        }
        self.sink.archive(message, source)?;
        if let Err(e) = self.last_receive.record(receive_time) {
            warn!(error = %e, "Could not save last receive time");
        }

        if let Some(claim) = self.claim.as_mut() {
            if claim.modified && claim.checkpointed.elapsed() >= CHECKPOINT_INTERVAL {
                self.queue.checkpoint(&claim.outage)?;
                claim.checkpointed = Instant::now();
            }
        }
        Ok(())
    }

    fn caught_up(&mut self) -> Result<Step> {
        let Some(claim) = self.claim.as_mut() else {
            return Ok(Step::Idle);
        };
        match (claim.strategy.on_caught_up)(&claim.progress()) {
            Completion::Resolve(status) => {
                self.release(Some(status))?;
                self.pool.clear_current();
                Ok(Step::Resolved(status))
            }
            Completion::NextConnection => {
                debug!(outage = %claim.outage, "Peer exhausted, moving on");
                claim.connection = None;
                self.pool.clear_current();
                Ok(Step::CaughtUp)
            }
            Completion::Wait => Ok(Step::CaughtUp),
        }
    }

    /// Every peer has been tried for a sweeping outage.
    fn finish_sweep(&mut self) -> Result<Step> {
        let Some(claim) = self.claim.as_ref() else {
            return Ok(Step::Idle);
        };
        let status = (claim.strategy.on_exhausted)(&claim.progress());
        self.release(Some(status))?;
        self.pool.clear_current();
        Ok(Step::Resolved(status))
    }
}
