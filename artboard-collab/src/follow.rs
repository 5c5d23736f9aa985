//! Follow mode: one user's navigation mirrored onto another's board.
//!
//! ```text
//! leader                                        follower
//! ──────                                        ────────
//! set_page ──────► pageChange ─────────────────► SwitchPage, settle window
//! set_view_state ► viewState  ──┐  (in window) ─► pending (last write wins)
//! frame ─────────► scrollIndex ─┘               │
//!                                               ▼ window elapses
//!                                 SetViewState, then ScrollTo { smooth: false }
//! ```
//!
//! [`FollowLeader`] and [`FollowReceiver`] are pure; [`FollowReplicator`]
//! drives them over a [`PresenceSession`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use artboard_core::{PageId, Timer};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::channel::PresenceError;
use crate::config::SyncConfig;
use crate::presence::{CustomEvent, PresenceSession};
use crate::protocol::FollowEvent;

/// Row-major index of the first visible item for a scroll offset.
pub fn scroll_index_for(offset: f32, row_extent: f32, columns: u32) -> u32 {
    if row_extent <= 0.0 || !offset.is_finite() {
        return 0;
    }
    let row = (offset.max(0.0) / row_extent).floor() as u32;
    row.saturating_mul(columns.max(1))
}

// ───────────────────────────────────────────────────────────────────
// Leader
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FollowLeader {
    page_id: Option<PageId>,
    columns: u32,
    fit_mode: bool,
    scroll_index: u32,
    sampled_scroll: Option<u32>,
    last_broadcast_scroll: Option<u32>,
}

impl FollowLeader {
    pub fn new(columns: u32, fit_mode: bool) -> Self {
        Self {
            page_id: None,
            columns,
            fit_mode,
            scroll_index: 0,
            sampled_scroll: None,
            last_broadcast_scroll: None,
        }
    }

    pub fn set_page(&mut self, page_id: PageId) -> Option<FollowEvent> {
        if self.page_id == Some(page_id) {
            return None;
        }
        self.page_id = Some(page_id);
        Some(FollowEvent::PageChange { page_id })
    }

    pub fn set_view_state(&mut self, columns: u32, fit_mode: bool) -> Option<FollowEvent> {
        if self.columns == columns && self.fit_mode == fit_mode {
            return None;
        }
        self.columns = columns;
        self.fit_mode = fit_mode;
        Some(FollowEvent::ViewState { columns, fit_mode })
    }

    /// Record a scroll sample; only the latest per frame is kept.
    pub fn sample_scroll(&mut self, index: u32) {
        self.sampled_scroll = Some(index);
    }

    /// Animation frame tick: emit the sampled index if it differs from the
    /// last one broadcast.
    pub fn frame(&mut self) -> Option<FollowEvent> {
        let index = self.sampled_scroll.take()?;
        self.scroll_index = index;
        if self.last_broadcast_scroll == Some(index) {
            return None;
        }
        self.last_broadcast_scroll = Some(index);
        Some(FollowEvent::ScrollIndex { index })
    }

    /// Page, view state and scroll index for a newly joined follower.
    pub fn initial_sync(&mut self) -> Vec<FollowEvent> {
        let mut events = Vec::with_capacity(3);
        if let Some(page_id) = self.page_id {
            events.push(FollowEvent::PageChange { page_id });
        }
        events.push(FollowEvent::ViewState { columns: self.columns, fit_mode: self.fit_mode });
        events.push(FollowEvent::ScrollIndex { index: self.scroll_index });
        self.last_broadcast_scroll = Some(self.scroll_index);
        events
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.page_id
    }

    pub fn scroll_index(&self) -> u32 {
        self.scroll_index
    }
}

impl Default for FollowLeader {
    fn default() -> Self {
        Self::new(4, false)
    }
}

// ───────────────────────────────────────────────────────────────────
// Follower
// ───────────────────────────────────────────────────────────────────

/// Instruction for the follower's rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowAction {
    SwitchPage { page_id: PageId },
    SetViewState { columns: u32, fit_mode: bool },
    ScrollTo { index: u32, smooth: bool },
}

/// What the follower has applied so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowerView {
    pub page_id: Option<PageId>,
    pub columns: Option<u32>,
    pub fit_mode: Option<bool>,
    pub scroll_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Receiving { leader_id: String },
}

#[derive(Debug, Default)]
struct PendingFields {
    columns: Option<u32>,
    fit_mode: Option<bool>,
    scroll_index: Option<u32>,
}

#[derive(Debug)]
pub struct FollowReceiver {
    state: ReceiverState,
    settle_window: Duration,
    settle: Timer,
    pending: PendingFields,
    view: FollowerView,
}

impl FollowReceiver {
    pub fn new(settle_window: Duration) -> Self {
        Self {
            state: ReceiverState::Idle,
            settle_window,
            settle: Timer::idle(),
            pending: PendingFields::default(),
            view: FollowerView::default(),
        }
    }

    pub fn follow(&mut self, leader_id: impl Into<String>) {
        self.state = ReceiverState::Receiving { leader_id: leader_id.into() };
        self.settle.cancel();
        self.pending = PendingFields::default();
    }

    pub fn unfollow(&mut self) {
        self.state = ReceiverState::Idle;
        self.settle.cancel();
        self.pending = PendingFields::default();
    }

    /// Apply an event from `sender`. Anyone but the current leader is
    /// ignored.
    pub fn handle(&mut self, sender: &str, event: FollowEvent, now: Instant) -> Vec<FollowAction> {
        match &self.state {
            ReceiverState::Receiving { leader_id } if leader_id == sender => {}
            _ => return Vec::new(),
        }

        match event {
            FollowEvent::PageChange { page_id } => {
                // Repeat of the page being settled (a replayed event
                // followed by the initial sync): keep the pending fields.
                if self.is_changing_page() && self.view.page_id == Some(page_id) {
                    self.settle.arm(now, self.settle_window);
                    return Vec::new();
                }
                self.pending = PendingFields::default();
                self.settle.arm(now, self.settle_window);
                self.view.page_id = Some(page_id);
                self.view.scroll_index = 0;
                vec![FollowAction::SwitchPage { page_id }]
            }
            FollowEvent::ViewState { columns, fit_mode } => {
                if self.is_changing_page() {
                    self.pending.columns = Some(columns);
                    self.pending.fit_mode = Some(fit_mode);
                    return Vec::new();
                }
                self.view.columns = Some(columns);
                self.view.fit_mode = Some(fit_mode);
                vec![FollowAction::SetViewState { columns, fit_mode }]
            }
            FollowEvent::ScrollIndex { index } => {
                if self.is_changing_page() {
                    self.pending.scroll_index = Some(index);
                    return Vec::new();
                }
                self.view.scroll_index = index;
                vec![FollowAction::ScrollTo { index, smooth: true }]
            }
            FollowEvent::FollowRequest { .. } => Vec::new(),
        }
    }

    /// Flush pending fields once the settle window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Vec<FollowAction> {
        if !self.settle.fire(now) {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pending);
        let mut actions = Vec::new();

        if pending.columns.is_some() || pending.fit_mode.is_some() {
            let columns = pending.columns.or(self.view.columns).unwrap_or(1);
            let fit_mode = pending.fit_mode.or(self.view.fit_mode).unwrap_or(false);
            self.view.columns = Some(columns);
            self.view.fit_mode = Some(fit_mode);
            actions.push(FollowAction::SetViewState { columns, fit_mode });
        }
        if let Some(index) = pending.scroll_index {
            self.view.scroll_index = index;
            actions.push(FollowAction::ScrollTo { index, smooth: false });
        }
        actions
    }

    pub fn is_changing_page(&self) -> bool {
        self.settle.is_armed()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.settle.deadline()
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    pub fn view(&self) -> FollowerView {
        self.view
    }
}

// ───────────────────────────────────────────────────────────────────
// Replicator
// ───────────────────────────────────────────────────────────────────

struct FollowHandle {
    leader_id: String,
    task: JoinHandle<()>,
}

/// Async follow mode over one presence session.
pub struct FollowReplicator {
    session: Arc<PresenceSession>,
    config: SyncConfig,
    leader: Arc<Mutex<FollowLeader>>,
    view: Arc<RwLock<FollowerView>>,
    following: Option<FollowHandle>,
    responder: JoinHandle<()>,
    action_tx: mpsc::Sender<FollowAction>,
    action_rx: Option<mpsc::Receiver<FollowAction>>,
}

impl FollowReplicator {
    /// Must be called within a tokio runtime: spawns the task answering
    /// `followRequest`s addressed to the local user.
    pub fn new(session: Arc<PresenceSession>, leader: FollowLeader, config: SyncConfig) -> Self {
        let (action_tx, action_rx) = mpsc::channel(config.action_capacity);
        let leader = Arc::new(Mutex::new(leader));
        let responder = tokio::spawn(Self::respond(session.clone(), leader.clone(), session.subscribe_events()));
        Self {
            session,
            config,
            leader,
            view: Arc::new(RwLock::new(FollowerView::default())),
            following: None,
            responder,
            action_tx,
            action_rx: Some(action_rx),
        }
    }

    async fn respond(
        session: Arc<PresenceSession>,
        leader: Arc<Mutex<FollowLeader>>,
        mut events: broadcast::Receiver<CustomEvent>,
    ) {
        let local = session.local_user().socket_id.clone();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(FollowEvent::FollowRequest { leader_id }) = FollowEvent::from_custom(&event.name, &event.payload)
            else {
                continue;
            };
            if leader_id != local {
                continue;
            }
            log::debug!("{} requested initial sync from {local}", event.sender);
            let triple = leader.lock().await.initial_sync();
            for sync in triple {
                if let Err(e) = session.broadcast_custom_event(sync.name(), sync.payload()).await {
                    log::warn!("Initial sync to {} failed: {e}", event.sender);
                    break;
                }
            }
        }
    }

    async fn send(&self, event: Option<FollowEvent>) -> Result<(), PresenceError> {
        match event {
            Some(event) => self.session.broadcast_custom_event(event.name(), event.payload()).await,
            None => Ok(()),
        }
    }

    pub async fn set_page(&self, page_id: PageId) -> Result<(), PresenceError> {
        let event = self.leader.lock().await.set_page(page_id);
        self.send(event).await
    }

    pub async fn set_view_state(&self, columns: u32, fit_mode: bool) -> Result<(), PresenceError> {
        let event = self.leader.lock().await.set_view_state(columns, fit_mode);
        self.send(event).await
    }

    pub async fn sample_scroll(&self, index: u32) {
        self.leader.lock().await.sample_scroll(index);
    }

    /// Animation frame tick on the leader side.
    pub async fn frame(&self) -> Result<(), PresenceError> {
        let event = self.leader.lock().await.frame();
        self.send(event).await
    }

    /// Start mirroring `leader_id`, replacing any current leader.
    pub async fn start_following(&mut self, leader_id: &str) -> Result<(), PresenceError> {
        self.stop_following();

        // Subscribe before asking so the initial sync cannot be missed
        let events = self.session.subscribe_events();
        let task = tokio::spawn(Self::receive(
            events,
            leader_id.to_string(),
            self.config.follow_settle,
            self.view.clone(),
            self.action_tx.clone(),
        ));
        self.following = Some(FollowHandle { leader_id: leader_id.to_string(), task });

        let request = FollowEvent::FollowRequest { leader_id: leader_id.to_string() };
        self.send(Some(request)).await
    }

    async fn receive(
        mut events: broadcast::Receiver<CustomEvent>,
        leader_id: String,
        settle: Duration,
        view: Arc<RwLock<FollowerView>>,
        actions: mpsc::Sender<FollowAction>,
    ) {
        let mut receiver = FollowReceiver::new(settle);
        receiver.follow(leader_id);

        loop {
            let deadline = receiver.next_deadline().map(tokio::time::Instant::from_std);
            let produced = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => match FollowEvent::from_custom(&event.name, &event.payload) {
                        Some(follow) => receiver.handle(&event.sender, follow, now()),
                        None => {
                            log::debug!("Ignoring {} from {}", event.name, event.sender);
                            Vec::new()
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Follower lagged by {n} events");
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => receiver.poll(now()),
            };

            if produced.is_empty() {
                continue;
            }
            *view.write().await = receiver.view();
            for action in produced {
                match actions.try_send(action) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        log::warn!("Follow action buffer full, dropping {dropped:?}");
                    }
                    // Nobody consumes actions; the view still tracks the leader
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }

    /// Stop mirroring; cancels any pending settle window.
    pub fn stop_following(&mut self) {
        if let Some(handle) = self.following.take() {
            handle.task.abort();
            log::debug!("Stopped following {}", handle.leader_id);
        }
    }

    pub fn following(&self) -> Option<&str> {
        self.following.as_ref().map(|h| h.leader_id.as_str())
    }

    /// Take the action receiver (can only be called once).
    pub fn take_action_rx(&mut self) -> Option<mpsc::Receiver<FollowAction>> {
        self.action_rx.take()
    }

    pub async fn follower_view(&self) -> FollowerView {
        *self.view.read().await
    }

    pub fn session(&self) -> &Arc<PresenceSession> {
        &self.session
    }
}

impl Drop for FollowReplicator {
    fn drop(&mut self) {
        self.stop_following();
        self.responder.abort();
    }
}

/// Current time on tokio's clock, which tests can pause.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
