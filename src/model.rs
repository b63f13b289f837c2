use std::collections::HashMap;

use identity_hash::IntSet;
use indexmap::IndexMap;

pub use crate::strand::Strand;

pub type QueryId = usize;
pub type SegmentIndex = usize;

/// Interns query names into dense ids; names are only used for display and I/O.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    names: Vec<String>,
    ids: HashMap<String, QueryId>,
    references: IntSet<QueryId>,
}
impl QueryRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn intern(&mut self, name: &str) -> QueryId {
        if let Some(id) = self.ids.get(name) {
            *id
        } else {
            let id = self.names.len();
            self.names.push(name.to_owned());
            self.ids.insert(name.to_owned(), id);
            id
        }
    }

    pub fn id(&self, name: &str) -> Option<QueryId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: QueryId) -> &str {
        self.names.get(id).map(|s| s.as_str()).unwrap_or("UNKNWN")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = QueryId> {
        0..self.names.len()
    }

    /// Flag a query as a reference; returns false if the name is unknown.
    pub fn mark_reference(&mut self, name: &str) -> bool {
        if let Some(id) = self.id(name) {
            self.references.insert(id);
            true
        } else {
            false
        }
    }

    pub fn references(&self) -> &IntSet<QueryId> {
        &self.references
    }
}

/// One query's contribution to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SingleGroup {
    pub segment: SegmentIndex,
    pub strand: Strand,
}
impl SingleGroup {
    pub fn new(segment: SegmentIndex, strand: Strand) -> Self {
        SingleGroup { segment, strand }
    }

    pub fn forward(segment: SegmentIndex) -> Self {
        SingleGroup::new(segment, Strand::Forward)
    }

    pub fn reversed(&self) -> Self {
        SingleGroup::new(self.segment, self.strand.flip())
    }

    pub fn oriented(&self, strand: Strand) -> Self {
        SingleGroup::new(self.segment, self.strand * strand)
    }

    /// Signed offset to the next segment in the block direction.
    pub fn step(&self) -> i64 {
        self.strand.sign()
    }

    /// The segment met right after this one when walking in the block direction.
    pub fn next_segment(&self) -> Option<SegmentIndex> {
        match self.strand {
            Strand::Forward => self.segment.checked_add(1),
            Strand::Reverse => self.segment.checked_sub(1),
        }
    }

    pub fn previous_segment(&self) -> Option<SegmentIndex> {
        self.reversed().next_segment()
    }

    /// Whether `other` directly follows `self` on their query.
    pub fn precedes(&self, other: &SingleGroup) -> bool {
        self.strand == other.strand && self.next_segment() == Some(other.segment)
    }
}

/// A block: a set of homologous segments, at most one per query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingEntry {
    pub name: String,
    groups: IndexMap<QueryId, SingleGroup>,
}
impl GroupingEntry {
    pub fn new(name: &str) -> Self {
        GroupingEntry { name: name.to_owned(), groups: IndexMap::new() }
    }

    pub fn with_groups(name: &str, groups: IndexMap<QueryId, SingleGroup>) -> Self {
        GroupingEntry { name: name.to_owned(), groups }
    }

    /// Returns false, leaving the entry untouched, if `query` is already present.
    pub fn insert(&mut self, query: QueryId, group: SingleGroup) -> bool {
        if self.groups.contains_key(&query) {
            false
        } else {
            self.groups.insert(query, group);
            true
        }
    }

    pub fn get(&self, query: QueryId) -> Option<SingleGroup> {
        self.groups.get(&query).copied()
    }

    pub fn contains(&self, query: QueryId) -> bool {
        self.groups.contains_key(&query)
    }

    pub fn groups(&self) -> &IndexMap<QueryId, SingleGroup> {
        &self.groups
    }

    pub fn queries(&self) -> impl Iterator<Item = QueryId> + '_ {
        self.groups.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn can_merge(&self, other: &GroupingEntry) -> bool {
        self.groups.keys().all(|q| !other.groups.contains_key(q))
    }

    pub fn can_directly_connect(&self, other: &GroupingEntry) -> bool {
        self.groups.len() == other.groups.len()
            && self.groups.iter().all(|(q, g)| other.get(*q).map(|o| g.precedes(&o)).unwrap_or(false))
    }

    pub fn reversed(&self) -> GroupingEntry {
        self.oriented(Strand::Reverse)
    }

    pub fn oriented(&self, strand: Strand) -> GroupingEntry {
        GroupingEntry {
            name: self.name.clone(),
            groups: self.groups.iter().map(|(q, g)| (*q, g.oriented(strand))).collect(),
        }
    }

    /// Append the groups of `other`, read along `strand`; queries already
    /// present are left as they are and reported as false.
    pub fn absorb(&mut self, other: &GroupingEntry, strand: Strand) -> bool {
        other.groups.iter().fold(true, |ok, (q, g)| self.insert(*q, g.oriented(strand)) && ok)
    }
}
