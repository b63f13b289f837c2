use std::ops::Range;

use either::Either;
use identity_hash::IntMap;

use crate::model::{GroupingEntry, QueryId, SingleGroup};

pub type ChainId = usize;

/// An ordered sequence of blocks forming a putative collinear path.
///
/// For every query it touches, the chain caches the position of the first
/// (`incoming`) and last (`outgoing`) entry containing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    id: ChainId,
    entries: Vec<GroupingEntry>,
    incoming: IntMap<QueryId, usize>,
    outgoing: IntMap<QueryId, usize>,
}

impl Chain {
    pub fn singleton(id: ChainId, entry: GroupingEntry) -> Chain {
        Chain::from_entries(id, vec![entry])
    }

    pub fn from_entries(id: ChainId, entries: Vec<GroupingEntry>) -> Chain {
        let mut incoming = IntMap::default();
        let mut outgoing = IntMap::default();
        for (i, e) in entries.iter().enumerate() {
            for q in e.queries() {
                incoming.entry(q).or_insert(i);
                outgoing.insert(q, i);
            }
        }
        Chain { id, entries, incoming, outgoing }
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GroupingEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<GroupingEntry> {
        self.entries
    }

    pub fn queries(&self) -> impl Iterator<Item = QueryId> + '_ {
        self.incoming.keys().copied()
    }

    pub fn touches(&self, query: QueryId) -> bool {
        self.incoming.contains_key(&query)
    }

    pub fn incoming_index(&self, query: QueryId) -> Option<usize> {
        self.incoming.get(&query).copied()
    }

    pub fn outgoing_index(&self, query: QueryId) -> Option<usize> {
        self.outgoing.get(&query).copied()
    }

    pub fn incoming_group(&self, query: QueryId) -> Option<SingleGroup> {
        self.incoming_index(query).and_then(|i| self.entries[i].get(query))
    }

    pub fn outgoing_group(&self, query: QueryId) -> Option<SingleGroup> {
        self.outgoing_index(query).and_then(|i| self.entries[i].get(query))
    }

    /// The same path read backwards: entries in reverse order, every
    /// orientation negated, incoming and outgoing swapped.
    pub fn reverse(&self) -> Chain {
        let last = self.len().saturating_sub(1);
        Chain {
            id: self.id,
            entries: self.entries.iter().rev().map(|e| e.reversed()).collect(),
            incoming: self.outgoing.iter().map(|(q, i)| (*q, last - i)).collect(),
            outgoing: self.incoming.iter().map(|(q, i)| (*q, last - i)).collect(),
        }
    }

    /// Split the chain into maximal runs where every query only ever steps to
    /// the directly adjacent segment, with a constant orientation.
    pub fn collinear_runs(&self) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut start = 0;
        let mut last: IntMap<QueryId, SingleGroup> = IntMap::default();
        for (i, e) in self.entries.iter().enumerate() {
            let breaks = e
                .groups()
                .iter()
                .any(|(q, g)| last.get(q).map(|l| !l.precedes(g)).unwrap_or(false));
            if breaks {
                runs.push(start..i);
                start = i;
                last.clear();
            }
            last.extend(e.groups().iter().map(|(q, g)| (*q, *g)));
        }
        if start < self.len() {
            runs.push(start..self.len());
        }
        runs
    }

    pub fn is_collinear(&self) -> bool {
        self.collinear_runs().len() <= 1
    }
}

/// A chain read either forward or backward, without materializing the reversal.
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    chain: &'a Chain,
    reversed: bool,
}

impl<'a> ChainView<'a> {
    pub fn new(chain: &'a Chain, reversed: bool) -> Self {
        ChainView { chain, reversed }
    }

    pub fn chain(&self) -> &'a Chain {
        self.chain
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn flip(&self, i: usize) -> usize {
        self.chain.len() - 1 - i
    }

    pub fn incoming_index(&self, query: QueryId) -> Option<usize> {
        if self.reversed {
            self.chain.outgoing_index(query).map(|i| self.flip(i))
        } else {
            self.chain.incoming_index(query)
        }
    }

    pub fn outgoing_index(&self, query: QueryId) -> Option<usize> {
        if self.reversed {
            self.chain.incoming_index(query).map(|i| self.flip(i))
        } else {
            self.chain.outgoing_index(query)
        }
    }

    pub fn incoming_group(&self, query: QueryId) -> Option<SingleGroup> {
        if self.reversed {
            self.chain.outgoing_group(query).map(|g| g.reversed())
        } else {
            self.chain.incoming_group(query)
        }
    }

    pub fn outgoing_group(&self, query: QueryId) -> Option<SingleGroup> {
        if self.reversed {
            self.chain.incoming_group(query).map(|g| g.reversed())
        } else {
            self.chain.outgoing_group(query)
        }
    }

    /// Positions in the underlying chain, in reading order.
    pub fn positions(&self) -> impl Iterator<Item = usize> {
        if self.reversed {
            Either::Left((0..self.chain.len()).rev())
        } else {
            Either::Right(0..self.chain.len())
        }
    }

    pub fn to_entries(&self) -> Vec<GroupingEntry> {
        self.positions()
            .map(|i| {
                let e = &self.chain.entries[i];
                if self.reversed {
                    e.reversed()
                } else {
                    e.clone()
                }
            })
            .collect()
    }
}
