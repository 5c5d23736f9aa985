//! # artboard-core: deterministic core of the board sync subsystem
//!
//! Everything in this crate is synchronous and pure with respect to time:
//! timed state machines take the current [`std::time::Instant`] as an
//! argument and expose their next deadline instead of sleeping.
//!
//! ## Modules
//!
//! - [`model`]: artifacts, page placements, reactions, patches
//! - [`collection`]: nested artifact groups and their invariants
//! - [`command`]: optimistic mutation commands
//! - [`drag`]: drag reorder vs. grouping state machine
//! - [`timer`]: cancellable deadline handle
//!
//! ```text
//! pointer ──► DragEngine ──► DropOutcome ──► Command ──► (artboard-collab)
//!                  │                            ▲
//!                  └──── collection rules ──────┘
//! ```

pub mod collection;
pub mod command;
pub mod drag;
pub mod geometry;
pub mod model;
pub mod timer;

pub use collection::{can_add_to_collection, check_invariants, visible_items, CollectionViolation};
pub use command::{apply_order, remove_artifact, Command, CommandKind};
pub use drag::{DragConfig, DragEngine, DragSignal, DragState, DropKind, DropOutcome};
pub use geometry::Vec2;
pub use model::{
    compact_positions, is_dense, ordered_ids, Artifact, ArtifactId, ArtifactPatch, ArtifactType, PageId,
    ProjectArtifact, ProjectId, ReactionKind, Reactions, UserId,
};
pub use timer::Timer;
