//! Bully Election Coordinator
//!
//! Implements the Bully leader-election algorithm: each node carries a unique
//! numeric priority, and the highest-priority healthy node eventually wins.
//! A periodic tick task probes the current leader's health and starts a new
//! election when the leader misses `max_skip_heartbeat_count` probes in a
//! row. Elections fan out concurrently to all higher-priority peers; any OK
//! reply means a stronger contender exists and this node stands down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::config::CoordinatorConfig;
use crate::error::CommunicationError;
use crate::node::{ElectionReply, LivelinessState, Node};

/// How long `shutdown` waits for the tick task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Election state of a node, governs re-entrancy of the election logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No election has run since creation or the last reset
    Init,
    /// An election is currently running on this node
    InProgress,
    /// The last election on this node ran to completion
    Elected,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Init => write!(f, "INIT"),
            ElectionState::InProgress => write!(f, "ELECTION_IN_PROGRESS"),
            ElectionState::Elected => write!(f, "ELECTED"),
        }
    }
}

/// The liveliness/election/leader triple, always updated together under one
/// lock so concurrent readers never observe a torn transition.
struct LocalState {
    liveliness: LivelinessState,
    election: ElectionState,
    /// Priority of the believed leader (possibly self); None when unknown
    leader: Option<i64>,
}

/// Peer handles, populated at wiring time before the timer starts
#[derive(Default)]
struct PeerSet {
    /// All known peers by priority, never including self
    all: HashMap<i64, Arc<dyn Node>>,
    /// Peers with priority strictly greater than self, in insertion order;
    /// precomputed so elections skip re-filtering on the hot path
    higher: Vec<Arc<dyn Node>>,
}

struct Inner {
    priority_id: i64,
    config: CoordinatorConfig,
    state: Mutex<LocalState>,
    peers: RwLock<PeerSet>,
    /// Concurrency budget for peer RPC fan-out; None means unbounded
    limiter: Option<Arc<Semaphore>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

/// Per-node election coordinator.
///
/// Cheaply cloneable handle; clones share the same node state, so a clone can
/// be handed to peers as an `Arc<dyn Node>` while the owner keeps driving the
/// lifecycle.
#[derive(Clone)]
pub struct ElectionCoordinator {
    inner: Arc<Inner>,
}

impl ElectionCoordinator {
    /// Create a coordinator with the given unique priority.
    pub fn new(priority_id: i64, config: CoordinatorConfig) -> Self {
        let limiter = match config.worker_pool_size {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Self {
            inner: Arc::new(Inner {
                priority_id,
                config,
                state: Mutex::new(LocalState {
                    liveliness: LivelinessState::Healthy,
                    election: ElectionState::Init,
                    leader: None,
                }),
                peers: RwLock::new(PeerSet::default()),
                limiter,
                ticker: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register a peer. A handle whose priority equals self is ignored, so a
    /// whole group can be wired with the same handle list.
    pub fn add_peer(&self, peer: Arc<dyn Node>) {
        let pid = peer.priority_id();
        if pid == self.inner.priority_id {
            return;
        }

        let mut peers = write_lock(&self.inner.peers);
        if pid > self.inner.priority_id {
            peers.higher.retain(|p| p.priority_id() != pid);
            peers.higher.push(peer.clone());
        }
        peers.all.insert(pid, peer);
    }

    /// Register a whole peer list at once.
    pub fn add_peers<I>(&self, peers: I)
    where
        I: IntoIterator<Item = Arc<dyn Node>>,
    {
        for peer in peers {
            self.add_peer(peer);
        }
    }

    /// Mark this node faulty: it stops initiating elections, refuses to
    /// participate in others', and forgets its leader.
    pub fn set_faulty(&self) {
        let mut state = self.inner.state();
        state.liveliness = LivelinessState::Faulty;
        state.election = ElectionState::Init;
        state.leader = None;
    }

    /// Bring a faulty node back, with election state and leader reset.
    pub fn set_healthy(&self) {
        let mut state = self.inner.state();
        state.liveliness = LivelinessState::Healthy;
        state.election = ElectionState::Init;
        state.leader = None;
    }

    /// Current election state of this node.
    pub fn election_state(&self) -> ElectionState {
        self.inner.state().election
    }

    /// Priority of the node currently believed to be leader, if any.
    pub fn leader_priority_id(&self) -> Option<i64> {
        self.inner.state().leader
    }

    /// Schedule the periodic health-check/election-trigger task.
    ///
    /// The tick runs on its own tokio task, independent of the fan-out
    /// workers, first after `initial_delay` and then every `period`.
    pub fn start(&self, initial_delay: Duration, period: Duration) {
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() {
            tracing::warn!(node = self.inner.priority_id, "timer already started");
            return;
        }

        tracing::info!(
            node = self.inner.priority_id,
            "starting leader election module"
        );

        let inner = self.inner.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + initial_delay, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if inner.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                Inner::run_tick(&inner).await;
            }
        }));
    }

    /// Stop the timer and clear the leader reference.
    ///
    /// Waits up to a bounded grace period for the tick task to notice the
    /// stop request, then aborts it. After this returns the node initiates
    /// no further elections or promotions; inbound peer calls fail with a
    /// [`CommunicationError`] naming this node.
    pub async fn shutdown(&self) {
        tracing::info!(node = self.inner.priority_id, "shutting down");
        self.inner.shutting_down.store(true, Ordering::Release);

        let handle = lock(&self.inner.ticker).take();
        if let Some(mut handle) = handle {
            if timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                tracing::error!(
                    node = self.inner.priority_id,
                    "timer did not stop within grace period, aborting"
                );
                handle.abort();
            }
        }

        self.inner.state().leader = None;
        tracing::info!(node = self.inner.priority_id, "shutdown complete");
    }

    fn refuse_if_shut_down(&self) -> Result<(), CommunicationError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            Err(CommunicationError::new(self.inner.priority_id))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Node for ElectionCoordinator {
    fn priority_id(&self) -> i64 {
        self.inner.priority_id
    }

    async fn liveliness_state(&self) -> Result<LivelinessState, CommunicationError> {
        self.refuse_if_shut_down()?;
        Ok(self.inner.state().liveliness)
    }

    async fn election_message(&self) -> Result<ElectionReply, CommunicationError> {
        self.refuse_if_shut_down()?;
        tracing::debug!(node = self.inner.priority_id, "received election message");

        let in_progress = {
            let state = self.inner.state();
            if state.liveliness == LivelinessState::Faulty {
                return Ok(ElectionReply::Fail);
            }
            state.election == ElectionState::InProgress
        };

        // A lower-priority peer suspects the leader; contend ourselves.
        // Non-blocking dispatch: the reply returns immediately while our own
        // election proceeds concurrently.
        if !in_progress {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                Inner::run_election(inner).await;
            });
        }

        Ok(ElectionReply::Ok)
    }

    async fn coordinate_message(
        &self,
        leader_priority_id: i64,
    ) -> Result<(), CommunicationError> {
        self.refuse_if_shut_down()?;
        tracing::debug!(
            node = self.inner.priority_id,
            leader = leader_priority_id,
            "received coordinate message"
        );

        let known = read_lock(&self.inner.peers)
            .all
            .contains_key(&leader_priority_id);

        let mut state = self.inner.state();
        state.election = ElectionState::Elected;
        if known {
            state.leader = Some(leader_priority_id);
        }
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.inner.state().leader == Some(self.inner.priority_id)
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LocalState> {
        lock(&self.state)
    }

    /// One periodic tick: probe the believed leader, or start an election if
    /// there is none (or it stopped answering).
    async fn run_tick(inner: &Arc<Inner>) {
        let (liveliness, election, leader) = {
            let state = inner.state();
            (state.liveliness, state.election, state.leader)
        };

        if liveliness == LivelinessState::Faulty || election == ElectionState::InProgress {
            return;
        }

        let mut start_election = true;
        if let Some(leader_id) = leader {
            let mut attempts = 0;
            while start_election && attempts < inner.config.max_skip_heartbeat_count {
                attempts += 1;
                start_election = !Self::leader_healthy(inner, leader_id).await;
                tracing::debug!(
                    node = inner.priority_id,
                    leader = leader_id,
                    healthy = !start_election,
                    "heartbeat"
                );
            }
        }

        // Re-check: a peer's election message may have started one meanwhile.
        if start_election && inner.state().election != ElectionState::InProgress {
            Self::run_election(inner.clone()).await;
        }
    }

    /// Probe the believed leader once; any communication failure counts as
    /// unhealthy.
    async fn leader_healthy(inner: &Arc<Inner>, leader_id: i64) -> bool {
        if leader_id == inner.priority_id {
            return inner.state().liveliness == LivelinessState::Healthy;
        }

        let handle = read_lock(&inner.peers).all.get(&leader_id).cloned();
        let Some(handle) = handle else {
            return false;
        };

        match handle.liveliness_state().await {
            Ok(state) => state == LivelinessState::Healthy,
            Err(err) => {
                tracing::warn!(
                    node = inner.priority_id,
                    leader = err.target_priority_id,
                    "communication failure probing leader"
                );
                false
            }
        }
    }

    /// Run one Bully election on this node.
    ///
    /// The precondition check and the transition to `InProgress` are two
    /// separate lock acquisitions, so adversarial timing can let a bounded
    /// number of redundant elections run concurrently on one node. That race
    /// is tolerated: duplicates waste a few calls but cannot elect two
    /// leaders, and tightening it would serialize the trigger paths.
    async fn run_election(inner: Arc<Inner>) {
        if inner.shutting_down.load(Ordering::Acquire) {
            return;
        }

        if inner.state().election == ElectionState::InProgress {
            tracing::error!(
                node = inner.priority_id,
                "election start requested while one is already in progress"
            );
            return;
        }
        inner.state().election = ElectionState::InProgress;

        if inner.state().liveliness != LivelinessState::Healthy {
            tracing::info!(node = inner.priority_id, "quitting election, node is faulty");
        } else {
            let higher: Vec<Arc<dyn Node>> = read_lock(&inner.peers).higher.clone();
            if higher.is_empty() {
                // Nobody outranks us
                Self::promote_self(&inner).await;
            } else {
                Self::contend(&inner, higher).await;
            }
        }

        inner.state().election = ElectionState::Elected;
    }

    /// Fan election messages out to every higher-priority peer and drain the
    /// replies in submission order. Any OK reply means a stronger contender
    /// is alive, so this node stands down; FAIL, communication failure, and
    /// timeout all mean "not a viable competitor right now".
    async fn contend(inner: &Arc<Inner>, higher: Vec<Arc<dyn Node>>) {
        let mut calls = Vec::with_capacity(higher.len());
        for peer in higher {
            if !Self::still_contending(inner) {
                tracing::info!(
                    node = inner.priority_id,
                    "quitting election while sending election messages"
                );
                return;
            }
            let pid = peer.priority_id();
            let limiter = inner.limiter.clone();
            calls.push((
                pid,
                tokio::spawn(async move {
                    let _permit = acquire(limiter).await;
                    peer.election_message().await
                }),
            ));
        }

        let reply_timeout = inner.config.election_reply_timeout();
        for (pid, call) in calls {
            if !Self::still_contending(inner) {
                tracing::info!(
                    node = inner.priority_id,
                    "quitting election while awaiting election replies"
                );
                return;
            }

            // A timeout abandons the join handle; the call itself keeps
            // running detached and its remote effects stand.
            match timeout(reply_timeout, call).await {
                Ok(Ok(Ok(reply))) => {
                    tracing::debug!(
                        node = inner.priority_id,
                        peer = pid,
                        %reply,
                        "received election reply"
                    );
                    if reply == ElectionReply::Ok {
                        // A higher-priority healthy peer will take it from here
                        return;
                    }
                }
                Ok(Ok(Err(err))) => {
                    tracing::warn!(
                        node = inner.priority_id,
                        peer = err.target_priority_id,
                        "communication failure awaiting election reply"
                    );
                }
                Ok(Err(join_err)) => {
                    tracing::warn!(
                        node = inner.priority_id,
                        peer = pid,
                        error = %join_err,
                        "election call task failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        node = inner.priority_id,
                        peer = pid,
                        "timeout awaiting election reply"
                    );
                }
            }
        }

        // No higher-priority peer answered OK
        Self::promote_self(inner).await;
    }

    /// Take leadership and broadcast the victory to every known peer.
    /// Per-peer failures are logged and skipped; the announcement is
    /// best-effort.
    async fn promote_self(inner: &Arc<Inner>) {
        {
            let mut state = inner.state();
            if state.liveliness != LivelinessState::Healthy {
                return;
            }
            if state.election != ElectionState::InProgress {
                tracing::error!(
                    node = inner.priority_id,
                    "self-promotion attempted outside of an election"
                );
                return;
            }
            state.leader = Some(inner.priority_id);
        }

        tracing::info!(node = inner.priority_id, "promoting self as leader");

        let peers: Vec<Arc<dyn Node>> = read_lock(&inner.peers).all.values().cloned().collect();
        let leader_id = inner.priority_id;
        let broadcasts: Vec<JoinHandle<()>> = peers
            .into_iter()
            .map(|peer| {
                let limiter = inner.limiter.clone();
                tokio::spawn(async move {
                    let _permit = acquire(limiter).await;
                    if let Err(err) = peer.coordinate_message(leader_id).await {
                        tracing::warn!(
                            leader = leader_id,
                            peer = err.target_priority_id,
                            "communication failure broadcasting coordinate message"
                        );
                    }
                })
            })
            .collect();

        join_all(broadcasts).await;
    }

    /// Cooperative cancellation point: true while this node should keep
    /// driving the current election.
    fn still_contending(inner: &Arc<Inner>) -> bool {
        if inner.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        let state = inner.state();
        state.liveliness == LivelinessState::Healthy
            && state.election == ElectionState::InProgress
    }
}

async fn acquire(limiter: Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    }
}

// Lock helpers that ride over poisoning: state is a plain value triple, so a
// panicking writer cannot leave it logically torn.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
