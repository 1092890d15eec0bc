//! Threaded Model Index (§4.5): conversation arena and delta computation
//! over a filtered, sorted slice of the message store.

pub mod tree;

pub use tree::{diff, ConversationNode, ConversationTree, Location, MessageSummary, TreeDelta};
