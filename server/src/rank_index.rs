//! Ordered rank index over every player with a best score.
//!
//! The index is a cache derived from the best records: it can be dropped and
//! reloaded at any time without losing data. Entries are ordered by
//! [`EncodedKey`] descending; two players with identical keys are ordered by
//! ascending player id so the order is strict.
//!
//! [`TreapRankIndex`] is an order-statistic treap. Every node tracks the size
//! of its subtree, which gives O(log N) rank lookups next to the usual
//! O(log N) insert and delete. A `player_id -> key` map locates a player's
//! current node for replacement.

use crate::encoding::EncodedKey;
use crate::error::IndexError;
use shared::PlayerId;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

/// Operations the store needs from a rank index backend.
///
/// Implementations handle their own locking; readers must never observe a
/// partially applied write.
pub trait RankIndex: Send + Sync {
    /// Inserts or replaces the entry for `player_id`.
    fn upsert(&self, player_id: PlayerId, key: EncodedKey) -> Result<(), IndexError>;

    /// Deletes the entry for `player_id`. Returns false if there was none.
    fn remove(&self, player_id: PlayerId) -> Result<bool, IndexError>;

    /// Returns up to `n` entries, best first.
    fn top_n(&self, n: usize) -> Result<Vec<(PlayerId, EncodedKey)>, IndexError>;

    /// 0-based position of the player, or `None` if not indexed.
    fn rank_of(&self, player_id: PlayerId) -> Result<Option<usize>, IndexError>;

    fn key_of(&self, player_id: PlayerId) -> Result<Option<EncodedKey>, IndexError>;

    fn len(&self) -> Result<usize, IndexError>;

    fn clear(&self) -> Result<(), IndexError>;

    /// Replaces the whole index with `entries` in one step.
    fn load(&self, entries: Vec<(PlayerId, EncodedKey)>) -> Result<(), IndexError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    key: EncodedKey,
    player_id: PlayerId,
}

impl Ord for Entry {
    /// Ascending `Entry` order is rank order: larger keys first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.player_id.cmp(&other.player_id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Link = Option<Box<Node>>;

#[derive(Debug)]
struct Node {
    entry: Entry,
    priority: u32,
    size: usize,
    left: Link,
    right: Link,
}

impl Node {
    fn new(entry: Entry) -> Box<Self> {
        Box::new(Node {
            entry,
            priority: rand::random(),
            size: 1,
            left: None,
            right: None,
        })
    }

    fn update(&mut self) {
        self.size = 1 + size(&self.left) + size(&self.right);
    }
}

fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

/// Splits into entries `< pivot` and entries `>= pivot`.
fn split(link: Link, pivot: &Entry) -> (Link, Link) {
    match link {
        None => (None, None),
        Some(mut node) => {
            if node.entry < *pivot {
                let (less, rest) = split(node.right.take(), pivot);
                node.right = less;
                node.update();
                (Some(node), rest)
            } else {
                let (less, rest) = split(node.left.take(), pivot);
                node.left = rest;
                node.update();
                (less, Some(node))
            }
        }
    }
}

/// Joins two treaps where every entry of `a` orders before every entry of `b`.
fn merge(a: Link, b: Link) -> Link {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority > b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.update();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.update();
                Some(b)
            }
        }
    }
}

fn erase(link: Link, target: &Entry) -> Link {
    let mut node = link?;
    match target.cmp(&node.entry) {
        Ordering::Equal => return merge(node.left.take(), node.right.take()),
        Ordering::Less => node.left = erase(node.left.take(), target),
        Ordering::Greater => node.right = erase(node.right.take(), target),
    }
    node.update();
    Some(node)
}

#[derive(Debug, Default)]
struct Treap {
    root: Link,
    keys: HashMap<PlayerId, EncodedKey>,
}

impl Treap {
    fn insert(&mut self, entry: Entry) {
        let (less, rest) = split(self.root.take(), &entry);
        self.root = merge(merge(less, Some(Node::new(entry))), rest);
    }

    fn upsert(&mut self, player_id: PlayerId, key: EncodedKey) {
        match self.keys.insert(player_id, key) {
            Some(old) if old == key => return,
            Some(old) => {
                self.root = erase(self.root.take(), &Entry { key: old, player_id });
            }
            None => {}
        }
        self.insert(Entry { key, player_id });
    }

    fn remove(&mut self, player_id: PlayerId) -> bool {
        match self.keys.remove(&player_id) {
            Some(key) => {
                self.root = erase(self.root.take(), &Entry { key, player_id });
                true
            }
            None => false,
        }
    }

    fn rank(&self, target: &Entry) -> Option<usize> {
        let mut rank = 0;
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            match target.cmp(&node.entry) {
                Ordering::Less => current = node.left.as_deref(),
                Ordering::Equal => return Some(rank + size(&node.left)),
                Ordering::Greater => {
                    rank += size(&node.left) + 1;
                    current = node.right.as_deref();
                }
            }
        }
        None
    }

    fn first_n(&self, n: usize) -> Vec<(PlayerId, EncodedKey)> {
        let mut out = Vec::with_capacity(n.min(self.keys.len()));
        let mut stack: Vec<&Node> = Vec::new();
        let mut current = self.root.as_deref();

        while out.len() < n {
            while let Some(node) = current {
                stack.push(node);
                current = node.left.as_deref();
            }
            let Some(node) = stack.pop() else {
                break;
            };
            out.push((node.entry.player_id, node.entry.key));
            current = node.right.as_deref();
        }

        out
    }

    fn clear(&mut self) {
        // Dropping a deep Box chain recurses; the expected depth is O(log N).
        self.root = None;
        self.keys.clear();
    }
}

/// In-memory [`RankIndex`] guarded by a single-writer, multi-reader lock.
#[derive(Debug, Default)]
pub struct TreapRankIndex {
    inner: RwLock<Treap>,
}

impl TreapRankIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RankIndex for TreapRankIndex {
    fn upsert(&self, player_id: PlayerId, key: EncodedKey) -> Result<(), IndexError> {
        let mut treap = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        treap.upsert(player_id, key);
        Ok(())
    }

    fn remove(&self, player_id: PlayerId) -> Result<bool, IndexError> {
        let mut treap = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        Ok(treap.remove(player_id))
    }

    fn top_n(&self, n: usize) -> Result<Vec<(PlayerId, EncodedKey)>, IndexError> {
        let treap = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        Ok(treap.first_n(n))
    }

    fn rank_of(&self, player_id: PlayerId) -> Result<Option<usize>, IndexError> {
        let treap = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        Ok(treap
            .keys
            .get(&player_id)
            .and_then(|&key| treap.rank(&Entry { key, player_id })))
    }

    fn key_of(&self, player_id: PlayerId) -> Result<Option<EncodedKey>, IndexError> {
        let treap = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        Ok(treap.keys.get(&player_id).copied())
    }

    fn len(&self) -> Result<usize, IndexError> {
        let treap = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        Ok(treap.keys.len())
    }

    fn clear(&self) -> Result<(), IndexError> {
        let mut treap = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        treap.clear();
        Ok(())
    }

    fn load(&self, entries: Vec<(PlayerId, EncodedKey)>) -> Result<(), IndexError> {
        let mut treap = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        treap.clear();
        for (player_id, key) in entries {
            treap.upsert(player_id, key);
        }
        Ok(())
    }
}
