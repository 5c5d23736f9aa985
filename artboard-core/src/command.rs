//! Optimistic mutation commands.
//!
//! A [`Command`] is built synchronously from the page state the user is
//! looking at. [`Command::optimistic_state`] is a pure projection of that
//! state; submitting the command to the store happens elsewhere
//! (`artboard-collab`). When submission fails the caller refetches the page
//! instead of rolling back, because later commands may already be layered
//! on top of this one.

use serde::{Deserialize, Serialize};

use crate::collection;
use crate::model::{
    compact_positions, sort_by_position, ArtifactId, ArtifactPatch, ProjectArtifact, ReactionKind, Reactions, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Update,
    Delete,
    Reorder,
    ToggleLike,
    ToggleDislike,
}

/// One user mutation together with the state it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Update {
        id: ArtifactId,
        patch: ArtifactPatch,
        snapshot: Option<ProjectArtifact>,
    },
    Delete {
        id: ArtifactId,
        snapshot: Option<ProjectArtifact>,
    },
    /// Full rewrite: `position = index` for every listed id.
    Reorder {
        ids: Vec<ArtifactId>,
        snapshot: Vec<ProjectArtifact>,
    },
    ToggleReaction {
        id: ArtifactId,
        reaction: ReactionKind,
        user: UserId,
        snapshot: Option<ProjectArtifact>,
    },
}

impl Command {
    pub fn update(prior: &[ProjectArtifact], id: ArtifactId, patch: ArtifactPatch) -> Self {
        Command::Update { id, patch, snapshot: collection::find(prior, id).cloned() }
    }

    pub fn delete(prior: &[ProjectArtifact], id: ArtifactId) -> Self {
        Command::Delete { id, snapshot: collection::find(prior, id).cloned() }
    }

    pub fn reorder(prior: &[ProjectArtifact], ids: Vec<ArtifactId>) -> Self {
        Command::Reorder { ids, snapshot: prior.to_vec() }
    }

    pub fn toggle_like(prior: &[ProjectArtifact], id: ArtifactId, user: impl Into<UserId>) -> Self {
        Self::toggle(prior, id, ReactionKind::Like, user.into())
    }

    pub fn toggle_dislike(prior: &[ProjectArtifact], id: ArtifactId, user: impl Into<UserId>) -> Self {
        Self::toggle(prior, id, ReactionKind::Dislike, user.into())
    }

    fn toggle(prior: &[ProjectArtifact], id: ArtifactId, reaction: ReactionKind, user: UserId) -> Self {
        Command::ToggleReaction { id, reaction, user, snapshot: collection::find(prior, id).cloned() }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Update { .. } => CommandKind::Update,
            Command::Delete { .. } => CommandKind::Delete,
            Command::Reorder { .. } => CommandKind::Reorder,
            Command::ToggleReaction { reaction: ReactionKind::Like, .. } => CommandKind::ToggleLike,
            Command::ToggleReaction { reaction: ReactionKind::Dislike, .. } => CommandKind::ToggleDislike,
        }
    }

    pub fn target_ids(&self) -> Vec<ArtifactId> {
        match self {
            Command::Update { id, .. } | Command::Delete { id, .. } | Command::ToggleReaction { id, .. } => vec![*id],
            Command::Reorder { ids, .. } => ids.clone(),
        }
    }

    /// Entities as they were when the command was built.
    pub fn snapshot(&self) -> Vec<ProjectArtifact> {
        match self {
            Command::Update { snapshot, .. }
            | Command::Delete { snapshot, .. }
            | Command::ToggleReaction { snapshot, .. } => snapshot.iter().cloned().collect(),
            Command::Reorder { snapshot, .. } => snapshot.clone(),
        }
    }

    /// Reaction lists after the toggle, computed from the snapshot.
    ///
    /// This is what gets written to the store for reaction commands.
    pub fn toggled_reactions(&self) -> Option<Reactions> {
        match self {
            Command::ToggleReaction { reaction, user, snapshot, .. } => {
                let mut reactions = snapshot.as_ref().map(|s| s.reactions.clone()).unwrap_or_default();
                reactions.toggle(*reaction, user);
                Some(reactions)
            }
            _ => None,
        }
    }

    /// Predicted page state after this command. Pure and total: a command
    /// whose target is missing returns `prior` unchanged (re-sorted).
    pub fn optimistic_state(&self, prior: &[ProjectArtifact]) -> Vec<ProjectArtifact> {
        let mut next = prior.to_vec();
        match self {
            Command::Update { id, patch, .. } => {
                if let Some(item) = collection::find_mut(&mut next, *id) {
                    patch.apply_to(item);
                }
                sort_by_position(&mut next);
            }
            Command::Delete { id, .. } => {
                remove_artifact(&mut next, *id);
            }
            Command::Reorder { ids, .. } => {
                next = apply_order(&next, ids);
            }
            Command::ToggleReaction { id, reaction, user, .. } => {
                if let Some(item) = collection::find_mut(&mut next, *id) {
                    item.reactions.toggle(*reaction, user);
                }
                sort_by_position(&mut next);
            }
        }
        next
    }
}

/// Assign `position = index` following `ids`. Items not listed keep their
/// relative order after the listed ones; unknown ids are skipped.
pub fn apply_order(items: &[ProjectArtifact], ids: &[ArtifactId]) -> Vec<ProjectArtifact> {
    let mut listed = Vec::with_capacity(items.len());
    for id in ids {
        if listed.iter().any(|a: &ProjectArtifact| a.id == *id) {
            continue;
        }
        if let Some(item) = collection::find(items, *id) {
            listed.push(item.clone());
        }
    }

    let mut rest: Vec<ProjectArtifact> =
        items.iter().filter(|a| !ids.contains(&a.id)).cloned().collect();
    sort_by_position(&mut rest);
    listed.extend(rest);

    for (idx, item) in listed.iter_mut().enumerate() {
        item.position = idx as u32;
    }
    listed
}

/// Remove `id` from a page, repair grouping links and compact positions.
///
/// Members of a removed head become top-level items. Returns whether
/// anything was removed.
pub fn remove_artifact(items: &mut Vec<ProjectArtifact>, id: ArtifactId) -> bool {
    let Some(idx) = items.iter().position(|a| a.id == id) else {
        return false;
    };
    collection::remove_from_collection(items, id);
    let removed = items.remove(idx);

    for item in items.iter_mut().filter(|a| a.parent_collection_id == Some(removed.id)) {
        item.parent_collection_id = None;
    }
    compact_positions(items);
    true
}
