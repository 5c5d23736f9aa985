//! Collection model: nested artifact groups ("stacks") on one page.
//!
//! A head lists its members in `collection_items`; each member points
//! back through `parent_collection_id`. Two orders are derived from a
//! page's placements:
//!
//! ```text
//! backing order (positions):  H  m1  m2  A  B
//! visible order (H expanded): H  m1  m2  A  B
//! visible order (H collapsed): H  A  B
//! ```
//!
//! The backing order always keeps members directly after their head, in
//! `collection_items` order. The visible order is what the pointer sees.

use std::collections::HashSet;
use std::fmt;

use crate::model::{sort_by_position, ArtifactId, ProjectArtifact};

/// A broken grouping invariant, reported by [`check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionViolation {
    /// A member points at itself.
    SelfParent(ArtifactId),
    /// A head lists itself as a member.
    SelfMember(ArtifactId),
    /// One id listed by two different heads.
    SharedMember { member: ArtifactId, first: ArtifactId, second: ArtifactId },
    /// Head lists a member whose `parent_collection_id` disagrees.
    ParentMismatch { head: ArtifactId, member: ArtifactId },
    /// Member points at a head that does not list it.
    Unlisted { head: ArtifactId, member: ArtifactId },
}

impl fmt::Display for CollectionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfParent(id) => write!(f, "artifact {id} is its own parent"),
            Self::SelfMember(id) => write!(f, "collection {id} lists itself"),
            Self::SharedMember { member, first, second } => {
                write!(f, "artifact {member} listed by both {first} and {second}")
            }
            Self::ParentMismatch { head, member } => {
                write!(f, "collection {head} lists {member} but its parent differs")
            }
            Self::Unlisted { head, member } => {
                write!(f, "artifact {member} points at {head} which does not list it")
            }
        }
    }
}

impl std::error::Error for CollectionViolation {}

// ───────────────────────────────────────────────────────────────────
// Lookup
// ───────────────────────────────────────────────────────────────────

pub fn find(items: &[ProjectArtifact], id: ArtifactId) -> Option<&ProjectArtifact> {
    items.iter().find(|a| a.id == id)
}

pub fn find_mut(items: &mut [ProjectArtifact], id: ArtifactId) -> Option<&mut ProjectArtifact> {
    items.iter_mut().find(|a| a.id == id)
}

/// The head an item groups under: its parent if that parent exists on the
/// page, otherwise the item itself.
pub fn resolve_head(items: &[ProjectArtifact], id: ArtifactId) -> Option<ArtifactId> {
    let item = find(items, id)?;
    match item.parent_collection_id {
        Some(parent) if find(items, parent).is_some() => Some(parent),
        _ => Some(id),
    }
}

/// Members of `head` in display order.
///
/// Listed members come first in `collection_items` order; members that
/// point at the head without being listed follow in position order.
pub fn members_of(items: &[ProjectArtifact], head: ArtifactId) -> Vec<ArtifactId> {
    let Some(head_item) = find(items, head) else {
        return Vec::new();
    };

    let mut members: Vec<ArtifactId> = head_item
        .collection_items
        .iter()
        .copied()
        .filter(|m| *m != head)
        .filter(|m| find(items, *m).is_some_and(|a| a.parent_collection_id == Some(head)))
        .collect();

    let mut stray: Vec<ProjectArtifact> = items
        .iter()
        .filter(|a| a.parent_collection_id == Some(head) && a.id != head && !members.contains(&a.id))
        .cloned()
        .collect();
    sort_by_position(&mut stray);
    members.extend(stray.into_iter().map(|a| a.id));
    members
}

/// Whether `id` renders at top level (no parent, or an orphaned parent).
pub fn is_top_level(items: &[ProjectArtifact], id: ArtifactId) -> bool {
    resolve_head(items, id) == Some(id)
}

// ───────────────────────────────────────────────────────────────────
// Orders
// ───────────────────────────────────────────────────────────────────

/// Ids the user sees, in order: top-level items by position, each
/// expanded head followed by its members.
pub fn visible_items(items: &[ProjectArtifact]) -> Vec<ArtifactId> {
    let mut sorted = items.to_vec();
    sort_by_position(&mut sorted);

    let mut out = Vec::with_capacity(sorted.len());
    for item in sorted.iter().filter(|a| is_top_level(items, a.id)) {
        out.push(item.id);
        if item.is_expanded {
            out.extend(members_of(items, item.id));
        }
    }
    out
}

/// Full backing order from a top-level order: every head is followed by
/// all of its members (expanded or not). Items missing from `top_level`
/// keep their relative position order at the end.
pub fn backing_order(top_level: &[ArtifactId], items: &[ProjectArtifact]) -> Vec<ArtifactId> {
    let mut out = Vec::with_capacity(items.len());
    let mut emitted = HashSet::with_capacity(items.len());

    for id in top_level {
        if find(items, *id).is_none() || !emitted.insert(*id) {
            continue;
        }
        out.push(*id);
        for member in members_of(items, *id) {
            if emitted.insert(member) {
                out.push(member);
            }
        }
    }

    let mut rest: Vec<ProjectArtifact> =
        items.iter().filter(|a| !emitted.contains(&a.id)).cloned().collect();
    sort_by_position(&mut rest);
    out.extend(rest.into_iter().map(|a| a.id));
    out
}

/// Top-level ids in position order.
pub fn top_level_order(items: &[ProjectArtifact]) -> Vec<ArtifactId> {
    let mut sorted = items.to_vec();
    sort_by_position(&mut sorted);
    sorted
        .into_iter()
        .filter(|a| is_top_level(items, a.id))
        .map(|a| a.id)
        .collect()
}

// ───────────────────────────────────────────────────────────────────
// Grouping rules
// ───────────────────────────────────────────────────────────────────

/// Whether dropping `dragged` onto `over` may form or extend a collection.
///
/// Refused when the ids match, when `dragged` heads more than one member
/// (a dragged stack never groups), when both already share a parent, or
/// when `over` belongs to the collection headed by `dragged`.
pub fn can_add_to_collection(items: &[ProjectArtifact], dragged: ArtifactId, over: ArtifactId) -> bool {
    if dragged == over {
        return false;
    }
    let (Some(d), Some(o)) = (find(items, dragged), find(items, over)) else {
        return false;
    };
    if d.collection_items.len() > 1 {
        return false;
    }
    if d.parent_collection_id.is_some() && d.parent_collection_id == o.parent_collection_id {
        return false;
    }
    resolve_head(items, over) != Some(dragged)
}

/// Detach `member` from whatever collection holds it.
///
/// Returns the ids whose grouping fields changed. A head left without
/// members is collapsed back into an ordinary artifact.
pub fn remove_from_collection(items: &mut [ProjectArtifact], member: ArtifactId) -> Vec<ArtifactId> {
    let mut touched = Vec::new();

    for head in items.iter_mut().filter(|a| a.collection_items.contains(&member)) {
        head.collection_items.retain(|m| *m != member);
        if head.collection_items.is_empty() {
            head.is_expanded = false;
        }
        touched.push(head.id);
    }

    if let Some(item) = find_mut(items, member) {
        if item.parent_collection_id.take().is_some() {
            touched.push(member);
        }
    }

    touched.sort();
    touched.dedup();
    touched
}

/// Put `member` into the collection headed by `head`, at `at` (clamped) or
/// appended when `None`.
///
/// The member first leaves any previous collection. If the member heads
/// its own collection, its members are released to top level. Returns the
/// ids whose grouping fields changed.
pub fn add_to_collection(
    items: &mut [ProjectArtifact],
    head: ArtifactId,
    member: ArtifactId,
    at: Option<usize>,
) -> Vec<ArtifactId> {
    if head == member || find(items, head).is_none() || find(items, member).is_none() {
        return Vec::new();
    }

    let mut touched = remove_from_collection(items, member);

    let released = find(items, member).map(|m| m.collection_items.clone()).unwrap_or_default();
    if !released.is_empty() {
        for id in &released {
            if let Some(r) = find_mut(items, *id) {
                if r.parent_collection_id == Some(member) {
                    r.parent_collection_id = None;
                    touched.push(*id);
                }
            }
        }
        if let Some(m) = find_mut(items, member) {
            m.collection_items.clear();
            m.is_expanded = false;
        }
    }

    if let Some(h) = find_mut(items, head) {
        let idx = at.unwrap_or(h.collection_items.len()).min(h.collection_items.len());
        h.collection_items.insert(idx, member);
    }
    if let Some(m) = find_mut(items, member) {
        m.parent_collection_id = Some(head);
    }
    touched.push(head);
    touched.push(member);

    touched.sort();
    touched.dedup();
    touched
}

/// Verify the grouping invariants over one page.
pub fn check_invariants(items: &[ProjectArtifact]) -> Result<(), CollectionViolation> {
    let mut owner: std::collections::HashMap<ArtifactId, ArtifactId> = std::collections::HashMap::new();

    for item in items {
        if item.parent_collection_id == Some(item.id) {
            return Err(CollectionViolation::SelfParent(item.id));
        }
        for member in &item.collection_items {
            if *member == item.id {
                return Err(CollectionViolation::SelfMember(item.id));
            }
            if let Some(first) = owner.insert(*member, item.id) {
                return Err(CollectionViolation::SharedMember { member: *member, first, second: item.id });
            }
            if let Some(m) = find(items, *member) {
                if m.parent_collection_id != Some(item.id) {
                    return Err(CollectionViolation::ParentMismatch { head: item.id, member: *member });
                }
            }
        }
    }

    for item in items {
        if let Some(parent) = item.parent_collection_id {
            if find(items, parent).is_some() && owner.get(&item.id) != Some(&parent) {
                return Err(CollectionViolation::Unlisted { head: parent, member: item.id });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, ArtifactType};
    use uuid::Uuid;

    fn page(n: usize) -> Vec<ProjectArtifact> {
        (0..n)
            .map(|i| {
                let a = Artifact::new(ArtifactType::Image, format!("a{i}"), "https://cdn/a.png");
                ProjectArtifact::new(Uuid::nil(), Uuid::nil(), i as u32, a)
            })
            .collect()
    }

    fn ids(items: &[ProjectArtifact]) -> Vec<ArtifactId> {
        items.iter().map(|a| a.id).collect()
    }

    #[test]
    fn test_add_to_collection_links_both_sides() {
        let mut items = page(3);
        let v = ids(&items);
        let (x, y) = (v[0], v[1]);

        let touched = add_to_collection(&mut items, y, x, None);
        assert!(touched.contains(&x) && touched.contains(&y));
        assert_eq!(find(&items, y).unwrap().collection_items, vec![x]);
        assert_eq!(find(&items, x).unwrap().parent_collection_id, Some(y));
        check_invariants(&items).unwrap();
    }

    #[test]
    fn test_add_to_self_is_noop() {
        let mut items = page(1);
        let id = items[0].id;
        assert!(add_to_collection(&mut items, id, id, None).is_empty());
        check_invariants(&items).unwrap();
    }

    #[test]
    fn test_move_between_collections_keeps_exclusivity() {
        let mut items = page(4);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[2], None);
        add_to_collection(&mut items, v[1], v[2], None);

        assert!(find(&items, v[0]).unwrap().collection_items.is_empty());
        assert_eq!(find(&items, v[1]).unwrap().collection_items, vec![v[2]]);
        check_invariants(&items).unwrap();
    }

    #[test]
    fn test_remove_last_member_demotes_head() {
        let mut items = page(2);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[1], None);
        find_mut(&mut items, v[0]).unwrap().is_expanded = true;

        remove_from_collection(&mut items, v[1]);
        let head = find(&items, v[0]).unwrap();
        assert!(!head.is_collection_head());
        assert!(!head.is_expanded);
        assert!(find(&items, v[1]).unwrap().is_top_level());
    }

    #[test]
    fn test_can_add_rejects_multi_member_head() {
        let mut items = page(4);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[1], None);
        add_to_collection(&mut items, v[0], v[2], None);
        assert!(!can_add_to_collection(&items, v[0], v[3]));
    }

    #[test]
    fn test_can_add_rejects_shared_parent_and_same_id() {
        let mut items = page(3);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[1], None);
        add_to_collection(&mut items, v[0], v[2], None);
        assert!(!can_add_to_collection(&items, v[1], v[2]));
        assert!(!can_add_to_collection(&items, v[1], v[1]));
    }

    #[test]
    fn test_can_add_rejects_own_member() {
        let mut items = page(2);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[1], None);
        // single-member head hovering its own member would list itself
        assert!(!can_add_to_collection(&items, v[0], v[1]));
    }

    #[test]
    fn test_visible_items_respect_expansion() {
        let mut items = page(4);
        let v = ids(&items);
        add_to_collection(&mut items, v[0], v[3], None);

        assert_eq!(visible_items(&items), vec![v[0], v[1], v[2]]);
        find_mut(&mut items, v[0]).unwrap().is_expanded = true;
        assert_eq!(visible_items(&items), vec![v[0], v[3], v[1], v[2]]);
    }

    #[test]
    fn test_backing_order_keeps_members_after_head() {
        let mut items = page(4);
        let v = ids(&items);
        add_to_collection(&mut items, v[2], v[0], None);

        let order = backing_order(&[v[3], v[2], v[1]], &items);
        assert_eq!(order, vec![v[3], v[2], v[0], v[1]]);
    }

    #[test]
    fn test_backing_order_appends_missing() {
        let items = page(3);
        let v = ids(&items);
        assert_eq!(backing_order(&[v[2]], &items), vec![v[2], v[0], v[1]]);
    }

    #[test]
    fn test_check_invariants_detects_shared_member() {
        let mut items = page(3);
        let v = ids(&items);
        items[0].collection_items = vec![v[2]];
        items[1].collection_items = vec![v[2]];
        items[2].parent_collection_id = Some(v[0]);
        assert!(matches!(
            check_invariants(&items),
            Err(CollectionViolation::SharedMember { .. })
        ));
    }
}
