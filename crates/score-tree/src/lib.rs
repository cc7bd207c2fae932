//! Duplicate-key-tolerant ordered ranking structure.
//!
//! A red-black tree over distinct score keys where every key node owns an
//! insertion-ordered set of opaque 32-byte ids. Nodes live in an index
//! arena rather than behind pointers, and every node carries the id count
//! of its subtree so rank and select run in O(log n).
//!
//! The FIFO order of ids sharing a key is part of the contract: when
//! several entries are tied on score, consumers walk them in the order
//! they arrived. A key node is deleted the moment its last id is removed,
//! so `key_exists` never reports a key with an empty id set.

mod tree;

pub use tree::{Error, ScoreTree};
