//! Drag reorder & collection engine.
//!
//! Pointer-driven state machine deciding whether a drag is an ordinary
//! reorder or a grouping gesture:
//!
//! ```text
//!            start_drag
//!   Idle ───────────────► Reorder ◄──────────────┐
//!    ▲                      │  over a groupable   │ target lost
//!    │                      ▼  target             │
//!    │               CollectionPending ───────────┤
//!    │                      │  still ≥ 400ms      │ moved > 5px
//!    │                      ▼                     │
//!    │               CollectionActive ────────────┘
//!    │                      │
//!    └──── end_drag ◄───────┘   (then Settling 250ms → Reorder command)
//! ```
//!
//! Time is passed in by the caller, so every transition is deterministic.
//! Each timed phase owns a [`Timer`]; every reset cancels it.

use std::time::{Duration, Instant};

use crate::collection::{self, can_add_to_collection, visible_items};
use crate::command::{apply_order, Command};
use crate::geometry::Vec2;
use crate::model::{ArtifactId, ArtifactPatch, ProjectArtifact};
use crate::timer::Timer;

/// Tuning for the drag gesture.
#[derive(Debug, Clone)]
pub struct DragConfig {
    /// Pointer travel (px) between samples that counts as movement.
    pub movement_threshold: f32,
    /// Hover time over a target before grouping engages.
    pub stillness_delay: Duration,
    /// Window after a drop during which the dropped item does not animate
    /// and before the backing order is submitted.
    pub settle_delay: Duration,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 5.0,
            stillness_delay: Duration::from_millis(400),
            settle_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Reorder { dragged: ArtifactId },
    CollectionPending { dragged: ArtifactId, target: ArtifactId },
    CollectionActive { dragged: ArtifactId, target: ArtifactId },
}

impl DragState {
    pub fn dragged(&self) -> Option<ArtifactId> {
        match self {
            DragState::Idle => None,
            DragState::Reorder { dragged }
            | DragState::CollectionPending { dragged, .. }
            | DragState::CollectionActive { dragged, .. } => Some(*dragged),
        }
    }
}

/// Something the caller must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum DragSignal {
    /// Grouping engaged; highlight `target`.
    CollectionActivated { dragged: ArtifactId, target: ArtifactId },
    /// Settle window closed; submit this Reorder command.
    Settled(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    /// Dropped onto a target in collection mode.
    Grouped { head: ArtifactId },
    /// Dropped inside an expanded collection it was not part of.
    Joined { head: ArtifactId },
    /// Dragged out of its expanded collection.
    Ungrouped { from: ArtifactId },
    /// Plain move.
    Moved,
}

/// Result of a drop: the optimistic page and the grouping updates to
/// submit now. The Reorder follows once the settle window closes.
#[derive(Debug, Clone)]
pub struct DropOutcome {
    pub kind: DropKind,
    pub artifacts: Vec<ProjectArtifact>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Settling {
    artifact: ArtifactId,
    reorder: Command,
}

pub struct DragEngine {
    config: DragConfig,
    state: DragState,
    last_pointer: Vec2,
    stillness: Timer,
    settle: Timer,
    settling: Option<Settling>,
}

impl DragEngine {
    pub fn new(config: DragConfig) -> Self {
        Self {
            config,
            state: DragState::Idle,
            last_pointer: Vec2::ZERO,
            stillness: Timer::idle(),
            settle: Timer::idle(),
            settling: None,
        }
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn config(&self) -> &DragConfig {
        &self.config
    }

    /// Target highlighted for grouping, if collection mode is active.
    pub fn hovered_target(&self) -> Option<ArtifactId> {
        match self.state {
            DragState::CollectionActive { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.stillness.deadline(), self.settle.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Begin dragging `dragged`. Resets every timer and the hovered target.
    ///
    /// A Reorder still waiting for its settle window is returned so the
    /// caller can submit it immediately rather than lose it.
    pub fn start_drag(&mut self, dragged: ArtifactId, pointer: Vec2, _now: Instant) -> Option<Command> {
        let flushed = self.take_settling();
        self.stillness.cancel();
        self.state = DragState::Reorder { dragged };
        self.last_pointer = pointer;
        log::trace!("drag start {dragged}");
        flushed
    }

    /// Pointer moved to `pointer`, currently over `over`.
    pub fn drag_move(
        &mut self,
        pointer: Vec2,
        over: Option<ArtifactId>,
        items: &[ProjectArtifact],
        now: Instant,
    ) -> Option<DragSignal> {
        let Some(dragged) = self.state.dragged() else {
            return None;
        };

        let moved = self.last_pointer.distance(&pointer) > self.config.movement_threshold;
        self.last_pointer = pointer;
        let candidate = over.filter(|o| can_add_to_collection(items, dragged, *o));

        self.state = match (self.state, candidate) {
            (DragState::Reorder { .. }, Some(target)) => {
                self.stillness.arm(now, self.config.stillness_delay);
                DragState::CollectionPending { dragged, target }
            }
            (DragState::Reorder { .. }, None) => DragState::Reorder { dragged },
            (DragState::CollectionPending { target, .. }, Some(c))
            | (DragState::CollectionActive { target, .. }, Some(c))
                if c != target =>
            {
                self.stillness.arm(now, self.config.stillness_delay);
                DragState::CollectionPending { dragged, target: c }
            }
            (DragState::CollectionPending { target, .. }, Some(_)) => {
                if moved {
                    self.stillness.arm(now, self.config.stillness_delay);
                }
                DragState::CollectionPending { dragged, target }
            }
            (DragState::CollectionActive { target, .. }, Some(_)) => {
                if moved {
                    self.stillness.arm(now, self.config.stillness_delay);
                    DragState::CollectionPending { dragged, target }
                } else {
                    DragState::CollectionActive { dragged, target }
                }
            }
            (_, None) => {
                self.stillness.cancel();
                DragState::Reorder { dragged }
            }
            (DragState::Idle, Some(_)) => DragState::Idle,
        };

        self.poll_stillness(now)
    }

    /// Fire any elapsed timer.
    pub fn poll(&mut self, now: Instant) -> Option<DragSignal> {
        if let Some(signal) = self.poll_stillness(now) {
            return Some(signal);
        }
        if self.settle.fire(now) {
            if let Some(settling) = self.settling.take() {
                log::debug!("drop of {} settled; submitting order", settling.artifact);
                return Some(DragSignal::Settled(settling.reorder));
            }
        }
        None
    }

    fn poll_stillness(&mut self, now: Instant) -> Option<DragSignal> {
        if let DragState::CollectionPending { dragged, target } = self.state {
            if self.stillness.fire(now) {
                self.state = DragState::CollectionActive { dragged, target };
                log::debug!("collection mode: {dragged} over {target}");
                return Some(DragSignal::CollectionActivated { dragged, target });
            }
        }
        None
    }

    /// Whether layout animation is suppressed for `id` right now.
    pub fn is_settling(&self, id: ArtifactId, now: Instant) -> bool {
        self.settling.as_ref().is_some_and(|s| s.artifact == id) && self.settle.is_armed() && !self.settle.is_due(now)
    }

    /// Abandon the gesture and every timer. Returns a Reorder that was
    /// still waiting to settle.
    pub fn cancel(&mut self) -> Option<Command> {
        self.stillness.cancel();
        self.state = DragState::Idle;
        self.take_settling()
    }

    fn take_settling(&mut self) -> Option<Command> {
        self.settle.cancel();
        self.settling.take().map(|s| s.reorder)
    }

    /// Drop at `over_index` of the visible list.
    ///
    /// Returns `None` when no drag is in progress or the dragged item is not
    /// visible on this page.
    pub fn end_drag(&mut self, over_index: usize, items: &[ProjectArtifact], now: Instant) -> Option<DropOutcome> {
        let state = self.state;
        self.state = DragState::Idle;
        self.stillness.cancel();

        let dragged = state.dragged()?;
        let visible = visible_items(items);
        let from = visible.iter().position(|id| *id == dragged)?;
        let to = over_index.min(visible.len().saturating_sub(1));

        let (kind, next, backing) = match state {
            DragState::CollectionActive { target, .. } if target != dragged => {
                drop_into_collection(items, dragged, target)
            }
            _ => drop_reorder(items, &visible, dragged, from, to),
        };

        let commands = grouping_commands(items, &next);
        let reorder = Command::reorder(items, backing);

        self.settle.arm(now, self.config.settle_delay);
        self.settling = Some(Settling { artifact: dragged, reorder });
        log::debug!("drop {dragged}: {kind:?}, {} grouping updates", commands.len());

        Some(DropOutcome { kind, artifacts: next, commands })
    }
}

impl Default for DragEngine {
    fn default() -> Self {
        Self::new(DragConfig::default())
    }
}

// ───────────────────────────────────────────────────────────────────
// Drop resolution
// ───────────────────────────────────────────────────────────────────

fn drop_into_collection(
    items: &[ProjectArtifact],
    dragged: ArtifactId,
    target: ArtifactId,
) -> (DropKind, Vec<ProjectArtifact>, Vec<ArtifactId>) {
    let head = collection::resolve_head(items, target).unwrap_or(target);
    let mut next = items.to_vec();
    collection::add_to_collection(&mut next, head, dragged, None);

    let top_level = collection::top_level_order(&next);
    let backing = collection::backing_order(&top_level, &next);
    let next = apply_order(&next, &backing);
    (DropKind::Grouped { head }, next, backing)
}

/// Head of the expanded collection whose visible span contains `id`.
fn expanded_span(items: &[ProjectArtifact], id: ArtifactId) -> Option<ArtifactId> {
    let parent = collection::find(items, id)?.parent_collection_id?;
    collection::find(items, parent).filter(|h| h.is_expanded).map(|h| h.id)
}

fn drop_reorder(
    items: &[ProjectArtifact],
    visible: &[ArtifactId],
    dragged: ArtifactId,
    from: usize,
    to: usize,
) -> (DropKind, Vec<ProjectArtifact>, Vec<ArtifactId>) {
    let mut moved = visible.to_vec();
    let id = moved.remove(from);
    moved.insert(to, id);

    let prev = to.checked_sub(1).and_then(|i| moved.get(i)).copied();
    let after = moved.get(to + 1).copied();

    let dragged_item = collection::find(items, dragged);
    let is_head = dragged_item.is_some_and(|d| d.is_collection_head());
    let current = expanded_span(items, dragged);

    // A slot directly before a member lies inside that member's
    // collection; the slot after the last member only counts for items
    // already inside it.
    let mut landing = after.and_then(|a| expanded_span(items, a));
    if landing.is_none() {
        if let (Some(p), Some(c)) = (prev, current) {
            if p == c || expanded_span(items, p) == Some(c) {
                landing = Some(c);
            }
        }
    }

    let mut next = items.to_vec();
    let kind = match (landing, current) {
        (Some(head), cur) if cur != Some(head) && !is_head && head != dragged => {
            let at = after
                .and_then(|a| collection::find(items, head)?.collection_items.iter().position(|m| *m == a));
            collection::add_to_collection(&mut next, head, dragged, at);
            DropKind::Joined { head }
        }
        (landing, Some(from_head)) if landing != Some(from_head) => {
            collection::remove_from_collection(&mut next, dragged);
            DropKind::Ungrouped { from: from_head }
        }
        _ => DropKind::Moved,
    };

    // Expanded collections take their internal order from the drop.
    let heads: Vec<ArtifactId> = next.iter().filter(|a| a.is_expanded).map(|a| a.id).collect();
    for head in heads {
        let listed = collection::find(&next, head).map(|h| h.collection_items.clone()).unwrap_or_default();
        let mut reordered: Vec<ArtifactId> = moved.iter().copied().filter(|m| listed.contains(m)).collect();
        let unplaced: Vec<ArtifactId> = listed.iter().copied().filter(|m| !reordered.contains(m)).collect();
        reordered.extend(unplaced);
        if let Some(h) = collection::find_mut(&mut next, head) {
            h.collection_items = reordered;
        }
    }

    let top_level: Vec<ArtifactId> =
        moved.iter().copied().filter(|m| collection::is_top_level(&next, *m)).collect();
    let backing = collection::backing_order(&top_level, &next);
    let next = apply_order(&next, &backing);
    (kind, next, backing)
}

/// Update commands for every placement whose grouping fields changed.
fn grouping_commands(prior: &[ProjectArtifact], next: &[ProjectArtifact]) -> Vec<Command> {
    let mut commands = Vec::new();
    for after in next {
        let Some(before) = collection::find(prior, after.id) else {
            continue;
        };
        if before.collection_items == after.collection_items
            && before.parent_collection_id == after.parent_collection_id
            && before.is_expanded == after.is_expanded
        {
            continue;
        }
        let patch = ArtifactPatch {
            collection_items: Some(after.collection_items.clone()),
            is_expanded: Some(after.is_expanded),
            parent_collection_id: Some(after.parent_collection_id),
            ..ArtifactPatch::default()
        };
        commands.push(Command::update(prior, after.id, patch));
    }
    commands
}
