//! Change-marker store
//!
//! Populated by the tree-diff step before normalization. A node can carry
//! several markers at once, so they are kept as a bit set per node.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::{DomError, NodeId};

bitflags! {
    /// Set of change markers on one node (empty = none)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DiffMarks: u8 {
        const INSERTED = 1 << 0;
        const DELETED = 1 << 1;
        const MOVED = 1 << 2;
        const CHILDREN_CHANGED = 1 << 3;
        const SUBTREE_CHANGED = 1 << 4;
    }
}

/// A single change marker value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffMark {
    None,
    Inserted,
    Deleted,
    Moved,
    ChildrenChanged,
    SubtreeChanged,
}

impl DiffMark {
    pub const ALL: [DiffMark; 5] = [
        DiffMark::Inserted,
        DiffMark::Deleted,
        DiffMark::Moved,
        DiffMark::ChildrenChanged,
        DiffMark::SubtreeChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiffMark::None => "none",
            DiffMark::Inserted => "inserted",
            DiffMark::Deleted => "deleted",
            DiffMark::Moved => "moved",
            DiffMark::ChildrenChanged => "children-changed",
            DiffMark::SubtreeChanged => "subtree-changed",
        }
    }

    pub fn flag(self) -> DiffMarks {
        match self {
            DiffMark::None => DiffMarks::empty(),
            DiffMark::Inserted => DiffMarks::INSERTED,
            DiffMark::Deleted => DiffMarks::DELETED,
            DiffMark::Moved => DiffMarks::MOVED,
            DiffMark::ChildrenChanged => DiffMarks::CHILDREN_CHANGED,
            DiffMark::SubtreeChanged => DiffMarks::SUBTREE_CHANGED,
        }
    }
}

impl fmt::Display for DiffMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffMark {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => DiffMark::None,
            "inserted" => DiffMark::Inserted,
            "deleted" => DiffMark::Deleted,
            "moved" => DiffMark::Moved,
            "children-changed" => DiffMark::ChildrenChanged,
            "subtree-changed" => DiffMark::SubtreeChanged,
            other => return Err(DomError::UnknownDiffMark(other.to_string())),
        })
    }
}

impl DiffMarks {
    /// Parse a list of marker names; any unknown name is an error
    pub fn parse_list<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, DomError> {
        names
            .into_iter()
            .try_fold(DiffMarks::empty(), |acc, n| Ok(acc | n.parse::<DiffMark>()?.flag()))
    }

    /// Marker names in vocabulary order
    pub fn names(self) -> Vec<&'static str> {
        DiffMark::ALL
            .iter()
            .filter(|m| self.contains(m.flag()))
            .map(|m| m.as_str())
            .collect()
    }
}

/// Node-keyed change markers
#[derive(Debug, Clone, Default)]
pub struct DiffStore {
    marks: HashMap<NodeId, DiffMarks>,
}

impl DiffStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marks(&self, id: NodeId) -> DiffMarks {
        self.marks.get(&id).copied().unwrap_or_default()
    }

    pub fn has(&self, id: NodeId, mark: DiffMark) -> bool {
        let flag = mark.flag();
        !flag.is_empty() && self.marks(id).contains(flag)
    }

    /// Any marker at all
    pub fn has_any(&self, id: NodeId) -> bool {
        !self.marks(id).is_empty()
    }

    pub fn add(&mut self, id: NodeId, mark: DiffMark) {
        let flag = mark.flag();
        if !flag.is_empty() {
            *self.marks.entry(id).or_default() |= flag;
        }
    }

    pub fn set(&mut self, id: NodeId, marks: DiffMarks) {
        if marks.is_empty() {
            self.marks.remove(&id);
        } else {
            self.marks.insert(id, marks);
        }
    }

    pub fn clear_node(&mut self, id: NodeId) {
        self.marks.remove(&id);
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }
}
