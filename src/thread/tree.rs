//! Threaded Model Index (§4.5): an in-memory conversation tree over a
//! filtered, sorted slice of the message store, plus the delta operations
//! a client view needs to move from one rebuild to the next without a full
//! re-render.
//!
//! The source codebase's `sync/conversation.rs` groups messages by
//! participant set rather than building a reply tree, so the reparenting
//! and delta algorithm here is new; only the on-disk mirror in
//! `persist_mirror` reuses its transaction/upsert idiom.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};

use crate::ids::MessageId;

/// One message as seen by the tree builder: id, its own `Message-Id`
/// header, and the header it claims to be `In-Response-To`.
#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub id: MessageId,
    pub message_id_header: String,
    pub in_response_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationNode {
    pub message_id: MessageId,
    message_id_header: String,
    in_response_to: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// `(parent-index, row)` location of a node in a client view, per §4.5.
/// `parent = None` means the node is a root, and `row` is its position
/// among its siblings in sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub parent: Option<usize>,
    pub row: usize,
}

pub struct ConversationTree {
    nodes: Vec<ConversationNode>,
    roots: Vec<usize>,
    index_by_message_id: HashMap<MessageId, usize>,
}

impl ConversationTree {
    /// Build the tree for a filter/sort result. `displayed` must already
    /// be in final child-sort order; `universe` maps every message header
    /// known to the store (not just the displayed ones) to its own
    /// `In-Response-To`, so the reparenting climb can pass through
    /// messages that fell outside the filter (§4.5 "Reparenting rule").
    pub fn rebuild(displayed: &[MessageSummary], universe: &HashMap<String, Option<String>>) -> Self {
        let header_position: HashMap<&str, usize> = displayed
            .iter()
            .enumerate()
            .map(|(i, m)| (m.message_id_header.as_str(), i))
            .collect();

        let mut nodes: Vec<ConversationNode> = displayed
            .iter()
            .map(|m| ConversationNode {
                message_id: m.id,
                message_id_header: m.message_id_header.clone(),
                in_response_to: m.in_response_to.clone(),
                parent: None,
                children: Vec::new(),
            })
            .collect();

        let mut roots = Vec::new();
        for i in 0..nodes.len() {
            let parent_idx = resolve_parent(&nodes[i].in_response_to, &header_position, universe);
            nodes[i].parent = parent_idx;
            match parent_idx {
                Some(p) => nodes[p].children.push(i),
                None => roots.push(i),
            }
        }

        let index_by_message_id = nodes.iter().enumerate().map(|(i, n)| (n.message_id, i)).collect();

        Self { nodes, roots, index_by_message_id }
    }

    pub fn node(&self, idx: usize) -> &ConversationNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn index_of(&self, id: MessageId) -> Option<usize> {
        self.index_by_message_id.get(&id).copied()
    }

    fn siblings(&self, idx: usize) -> &[usize] {
        match self.nodes[idx].parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        }
    }

    fn location_of(&self, idx: usize) -> Location {
        let row = self.siblings(idx).iter().position(|&i| i == idx).unwrap_or(0);
        Location { parent: self.nodes[idx].parent, row }
    }

    fn depth_of(&self, idx: usize) -> usize {
        let mut depth = 0;
        let mut cur = idx;
        while let Some(p) = self.nodes[cur].parent {
            depth += 1;
            cur = p;
        }
        depth
    }

    fn parent_message_id(&self, idx: usize) -> Option<MessageId> {
        self.nodes[idx].parent.map(|p| self.nodes[p].message_id)
    }
}

fn resolve_parent(
    in_response_to: &Option<String>,
    header_position: &HashMap<&str, usize>,
    universe: &HashMap<String, Option<String>>,
) -> Option<usize> {
    let mut cursor = in_response_to.clone();
    let mut visited = HashSet::new();
    while let Some(header) = cursor {
        if !visited.insert(header.clone()) {
            return None; // cyclic reference chain, treat as root
        }
        if let Some(&idx) = header_position.get(header.as_str()) {
            return Some(idx);
        }
        cursor = universe.get(&header).cloned().flatten();
    }
    None
}

/// Insertion, reparent/reorder, and removal tuples to bring a client view
/// from `old` to `new` without a full re-render (§4.5).
#[derive(Debug, Clone, Default)]
pub struct TreeDelta {
    pub additions: Vec<(MessageId, Location)>,
    pub updates: Vec<(MessageId, Location)>,
    pub removals: Vec<(MessageId, Location)>,
}

/// Compute `additionLocations`/`updateLocations`/`removalLocations` between
/// two successive rebuilds of the same tree.
pub fn diff(old: &ConversationTree, new: &ConversationTree) -> TreeDelta {
    let old_ids: HashSet<MessageId> = old.nodes.iter().map(|n| n.message_id).collect();
    let new_ids: HashSet<MessageId> = new.nodes.iter().map(|n| n.message_id).collect();

    let mut removals: Vec<(MessageId, Location, usize)> = old
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !new_ids.contains(&n.message_id))
        .map(|(i, n)| (n.message_id, old.location_of(i), old.depth_of(i)))
        .collect();
    // Depth-descending, then row-descending, so removing a node never
    // shifts the index of one still pending removal (§4.5 "Removal order").
    removals.sort_by(|a, b| b.2.cmp(&a.2).then(b.1.row.cmp(&a.1.row)));
    let removals = removals.into_iter().map(|(id, loc, _)| (id, loc)).collect();

    let mut additions: Vec<(MessageId, Location, usize)> = new
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !old_ids.contains(&n.message_id))
        .map(|(i, n)| (n.message_id, new.location_of(i), new.depth_of(i)))
        .collect();
    additions.sort_by(|a, b| a.2.cmp(&b.2).then(a.1.row.cmp(&b.1.row)));
    let additions = additions.into_iter().map(|(id, loc, _)| (id, loc)).collect();

    let mut updates = Vec::new();
    for (new_idx, node) in new.nodes.iter().enumerate() {
        let Some(old_idx) = old.index_of(node.message_id) else { continue };
        let old_parent = old.parent_message_id(old_idx);
        let new_parent = new.parent_message_id(new_idx);
        let old_loc = old.location_of(old_idx);
        let new_loc = new.location_of(new_idx);
        // Reinsertion is required when the effective parent changed, or
        // the row moved relative to siblings (§4.5 "Update reinsertion").
        if old_parent != new_parent || old_loc.row != new_loc.row {
            updates.push((node.message_id, new_loc));
        }
    }

    TreeDelta { additions, updates, removals }
}

/// Persist the arena's parent/child shape as a participant-free mirror
/// table, for clients that want conversation membership without holding
/// the tree in memory themselves. Reuses the source codebase's
/// transaction-scoped upsert idiom (`rebuild_conversations`,
/// `assign_to_conversation_with_tx`).
pub fn persist_mirror(conn: &mut Connection, account: &str, tree: &ConversationTree) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM conversation_mirror WHERE account_id = ?1", params![account])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO conversation_mirror (account_id, message_id, parent_message_id)
             VALUES (?1, ?2, ?3)",
        )?;
        for node in &tree.nodes {
            let parent_message_id = node.parent.map(|p| tree.nodes[p].message_id.value());
            stmt.execute(params![account, node.message_id.value(), parent_message_id])?;
        }
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: u64, header: &str, in_reply_to: Option<&str>) -> MessageSummary {
        MessageSummary {
            id: MessageId::new(id),
            message_id_header: header.to_string(),
            in_response_to: in_reply_to.map(String::from),
        }
    }

    #[test]
    fn reparents_through_an_undisplayed_ancestor() {
        let displayed = vec![summary(1, "a", None), summary(3, "c", Some("b".into()))];
        let mut universe = HashMap::new();
        universe.insert("a".to_string(), None);
        universe.insert("b".to_string(), Some("a".to_string())); // not displayed
        universe.insert("c".to_string(), Some("b".to_string()));

        let tree = ConversationTree::rebuild(&displayed, &universe);
        assert_eq!(tree.location_of(1).parent, Some(0));
        assert_eq!(tree.location_of(1).row, 0);
    }

    #[test]
    fn diff_reports_additions_updates_and_removals() {
        let universe = HashMap::new();
        let old = ConversationTree::rebuild(
            &[summary(1, "a", None), summary(2, "b", None)],
            &universe,
        );
        let new = ConversationTree::rebuild(
            &[summary(2, "b", None), summary(3, "c", Some("b".into()))],
            &universe,
        );

        let delta = diff(&old, &new);
        assert_eq!(delta.removals.len(), 1);
        assert_eq!(delta.removals[0].0, MessageId::new(1));
        assert_eq!(delta.additions.len(), 1);
        assert_eq!(delta.additions[0].0, MessageId::new(3));
        // `b` moved from root row 1 to root row 0.
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].0, MessageId::new(2));
    }
}
