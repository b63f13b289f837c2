use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Range;

use identity_hash::{IntMap, IntSet};
use indicatif::ProgressBar;
use itertools::Itertools;
use log::*;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::chain::{Chain, ChainId, ChainView};
use crate::connection::{best_connection, EntryConnection};
use crate::model::{GroupingEntry, QueryId, SegmentIndex};
use crate::range_merge::merge_ranges;

type SegmentIndexMap = IntMap<QueryId, IntMap<SegmentIndex, SmallVec<[ChainId; 2]>>>;

/// How the entries of the two chains are interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Join {
    Concatenate,
    /// Spans of the second chain, each inserted before a slot of the first one.
    Insert(Vec<(Range<usize>, usize)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    connection: EntryConnection,
    join: Join,
}
impl Candidate {
    fn key(&self) -> (ChainId, ChainId) {
        let c = &self.connection;
        (c.from.min(c.to), c.from.max(c.to))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.connection
            .score
            .cmp(&other.connection.score)
            .then_with(|| other.key().cmp(&self.key()))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub joins: usize,
    pub stale: usize,
    pub infeasible: usize,
    /// Whether a strict run stopped on a rearranging candidate.
    pub halted: bool,
}

/// Slot placement of the merged match ranges: groups land at non-decreasing
/// slots, as early as their limits allow, dragging the unconstrained entries
/// that follow them.
fn plan_insertion(connection: &EntryConnection, len_b: usize) -> Option<Vec<(Range<usize>, usize)>> {
    let groups = merge_ranges(&connection.ranges)?;
    let mut r = Vec::with_capacity(groups.len());
    let mut slot = 0;
    for (i, g) in groups.iter().enumerate() {
        slot = slot.max(g.limit.0);
        if slot > g.limit.1 {
            return None;
        }
        let start = if i == 0 { 0 } else { g.base.0 };
        let end = groups.get(i + 1).map(|n| n.base.0).unwrap_or(len_b);
        r.push((start..end, slot));
    }
    Some(r)
}

fn splice(a: Vec<GroupingEntry>, b: Vec<GroupingEntry>, placement: &[(Range<usize>, usize)]) -> Vec<GroupingEntry> {
    let mut r = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter();
    let mut b = b.into_iter();
    let mut taken = 0;
    for (span, slot) in placement {
        r.extend(a.by_ref().take(slot.saturating_sub(taken)));
        taken = taken.max(*slot);
        r.extend(b.by_ref().take(span.len()));
    }
    r.extend(a);
    r.extend(b);
    r
}

fn index_chain(index: &mut SegmentIndexMap, query: QueryId, segment: SegmentIndex, chain: ChainId) {
    let slot = index.entry(query).or_default().entry(segment).or_default();
    if !slot.contains(&chain) {
        slot.push(chain);
    }
}

fn unindex_chain(index: &mut SegmentIndexMap, query: QueryId, segment: SegmentIndex, chain: ChainId) {
    if let Some(segments) = index.get_mut(&query) {
        if let Some(slot) = segments.get_mut(&segment) {
            slot.retain(|c| *c != chain);
            if slot.is_empty() {
                segments.remove(&segment);
            }
        }
    }
}

/// The segments a chain starts and ends with, per query.
fn boundaries(chain: &Chain) -> Vec<(QueryId, SegmentIndex)> {
    chain
        .queries()
        .flat_map(|q| {
            [chain.incoming_group(q), chain.outgoing_group(q)]
                .into_iter()
                .flatten()
                .map(move |g| (q, g.segment))
        })
        .collect()
}

/// The segments expected right outside of a chain, per query.
fn predictions(chain: &Chain) -> Vec<(QueryId, SegmentIndex)> {
    chain
        .queries()
        .flat_map(|q| {
            [
                chain.incoming_group(q).and_then(|g| g.previous_segment()),
                chain.outgoing_group(q).and_then(|g| g.next_segment()),
            ]
            .into_iter()
            .flatten()
            .map(move |s| (q, s))
        })
        .collect()
}

/// Greedily joins chains whose ends lead into each other, best junction first.
pub struct ChainOrderer {
    chains: IntMap<ChainId, Chain>,
    predicted: SegmentIndexMap,
    boundary: SegmentIndexMap,
    queue: BinaryHeap<Candidate>,
    next_id: ChainId,
    references: IntSet<QueryId>,
    insert_mode: bool,
    infeasible: usize,
}

impl ChainOrderer {
    pub fn from_entries(entries: Vec<GroupingEntry>, references: IntSet<QueryId>, insert_mode: bool) -> Self {
        ChainOrderer::new(
            entries.into_iter().enumerate().map(|(i, e)| Chain::singleton(i, e)).collect(),
            references,
            insert_mode,
        )
    }

    pub fn new(chains: Vec<Chain>, references: IntSet<QueryId>, insert_mode: bool) -> Self {
        let mut r = ChainOrderer {
            next_id: chains.iter().map(|c| c.id() + 1).max().unwrap_or(0),
            chains: IntMap::default(),
            predicted: IntMap::default(),
            boundary: IntMap::default(),
            queue: BinaryHeap::new(),
            references,
            insert_mode,
            infeasible: 0,
        };
        for c in chains {
            r.index(&c);
            r.chains.insert(c.id(), c);
        }

        let pairs = r
            .chains
            .keys()
            .copied()
            .sorted()
            .flat_map(|id| {
                r.neighbours(&r.chains[&id])
                    .into_iter()
                    .filter(move |n| *n > id)
                    .map(move |n| (id, n))
            })
            .collect::<Vec<_>>();
        debug!("seeding {} candidate junctions between {} chains", pairs.len(), r.chains.len());
        let candidates = pairs.par_iter().map(|&(a, b)| r.evaluate(a, b)).collect::<Vec<_>>();
        for c in candidates {
            r.offer(c);
        }
        r
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.get(&id)
    }

    fn index(&mut self, chain: &Chain) {
        for (q, s) in boundaries(chain) {
            index_chain(&mut self.boundary, q, s, chain.id());
        }
        for (q, s) in predictions(chain) {
            index_chain(&mut self.predicted, q, s, chain.id());
        }
    }

    fn unindex(&mut self, chain: &Chain) {
        for (q, s) in boundaries(chain) {
            unindex_chain(&mut self.boundary, q, s, chain.id());
        }
        for (q, s) in predictions(chain) {
            unindex_chain(&mut self.predicted, q, s, chain.id());
        }
    }

    /// Chains expecting one of the boundaries of `chain`, or bounded by a
    /// segment it expects.
    fn neighbours(&self, chain: &Chain) -> Vec<ChainId> {
        let lookup = |index: &SegmentIndexMap, (q, s): (QueryId, SegmentIndex)| {
            index
                .get(&q)
                .and_then(|segments| segments.get(&s))
                .map(|ids| ids.to_vec())
                .unwrap_or_default()
        };
        boundaries(chain)
            .into_iter()
            .flat_map(|k| lookup(&self.predicted, k))
            .chain(predictions(chain).into_iter().flat_map(|k| lookup(&self.boundary, k)))
            .filter(|id| *id != chain.id())
            .sorted()
            .dedup()
            .collect()
    }

    /// `None` when the best junction can not be realized.
    fn evaluate(&self, a: ChainId, b: ChainId) -> Option<Candidate> {
        let connection = best_connection(self.chains.get(&a)?, self.chains.get(&b)?, &self.references);
        let score = connection.score;
        let join = if self.insert_mode && score.matches > 0 && !score.has_rearrangement() {
            let len_b = self.chains.get(&connection.to)?.len();
            Join::Insert(plan_insertion(&connection, len_b)?)
        } else {
            Join::Concatenate
        };
        Some(Candidate { connection, join })
    }

    fn offer(&mut self, candidate: Option<Candidate>) {
        match candidate {
            Some(c) => self.queue.push(c),
            None => self.infeasible += 1,
        }
    }

    fn join(&mut self, candidate: Candidate) -> Option<ChainId> {
        let c = &candidate.connection;
        let from = self.chains.remove(&c.from)?;
        let to = match self.chains.remove(&c.to) {
            Some(to) => to,
            None => {
                self.chains.insert(from.id(), from);
                return None;
            }
        };
        self.unindex(&from);
        self.unindex(&to);

        let a = ChainView::new(&from, c.from_reversed).to_entries();
        let b = ChainView::new(&to, c.to_reversed).to_entries();
        let entries = match &candidate.join {
            Join::Concatenate => a.into_iter().chain(b).collect(),
            Join::Insert(placement) => splice(a, b, placement),
        };

        let id = self.next_id;
        self.next_id += 1;
        trace!(
            "{}{} + {}{} -> {} ({:?})",
            c.from,
            if c.from_reversed { "'" } else { "" },
            c.to,
            if c.to_reversed { "'" } else { "" },
            id,
            c.score
        );
        let joined = Chain::from_entries(id, entries);
        self.index(&joined);
        let neighbours = self.neighbours(&joined);
        self.chains.insert(id, joined);
        for n in neighbours {
            let candidate = self.evaluate(n.min(id), n.max(id));
            self.offer(candidate);
        }
        Some(id)
    }

    /// Join chains until no candidate remains. A strict run stops at the first
    /// junction that is not a clean match.
    pub fn run(&mut self, strict: bool) -> JoinReport {
        let mut report = JoinReport::default();
        let bar = if self.chains.len() > 5000 && atty::is(atty::Stream::Stdout) {
            Some(ProgressBar::new(self.chains.len() as u64))
        } else {
            None
        };

        while self.chains.len() > 1 {
            let Some(candidate) = self.queue.pop() else {
                break;
            };
            let (a, b) = candidate.key();
            if !self.chains.contains_key(&a) || !self.chains.contains_key(&b) {
                trace!("dropping outdated junction {} ~ {}", a, b);
                report.stale += 1;
                continue;
            }
            let score = candidate.connection.score;
            if strict && (score.matches == 0 || score.has_rearrangement()) {
                debug!("strict ordering stops before joining {} and {} ({:?})", a, b, score);
                self.queue.push(candidate);
                report.halted = true;
                break;
            }
            if self.join(candidate).is_some() {
                report.joins += 1;
                bar.as_ref().map(|b| b.inc(1));
            }
        }
        bar.map(|b| b.finish_and_clear());

        report.infeasible = self.infeasible;
        report
    }

    pub fn into_chains(self) -> Vec<Chain> {
        self.chains.into_values().sorted_by_key(|c| c.id()).collect()
    }
}
