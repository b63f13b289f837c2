use identity_hash::IntMap;
use indexmap::IndexMap;
use itertools::Itertools;
use log::*;
use ordered_float::OrderedFloat;

use crate::errors::RelationError;
use crate::model::{GroupingEntry, QueryId, SegmentIndex, SingleGroup, Strand};
use crate::segments::Segmentation;
use crate::strand::SegmentLinks;

pub type BlockId = usize;
pub type Groups = IndexMap<QueryId, SingleGroup>;

/// What a successful relation did to the blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorption {
    /// None of the candidate segments belongs to a block yet.
    Untouched,
    /// The candidate was folded into an existing block.
    Extended(BlockId),
    /// Several blocks were fused into a new one.
    Fused(BlockId),
}

enum Plan {
    Untouched,
    Extend { block: BlockId, additions: Vec<(QueryId, SingleGroup)> },
    Fuse { retired: Vec<BlockId>, groups: Groups },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldReport {
    pub accepted: usize,
    pub created: usize,
    pub rejected: usize,
    pub ignored: usize,
}

/// Incremental builder folding pairwise segment relations into blocks.
///
/// Every (query, segment) belongs to at most one live block, and no block
/// holds two segments of the same query. Relations contradicting the current
/// blocks are rejected as a whole, leaving the builder untouched.
#[derive(Debug, Clone, Default)]
pub struct PreCollinearBlocks {
    segment_group: IntMap<QueryId, IntMap<SegmentIndex, BlockId>>,
    assigned_block_info: IntMap<BlockId, Groups>,
    next_block: BlockId,
}

impl PreCollinearBlocks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn block_of(&self, query: QueryId, segment: SegmentIndex) -> Option<BlockId> {
        self.segment_group.get(&query).and_then(|s| s.get(&segment)).copied()
    }

    pub fn block(&self, id: BlockId) -> Option<&Groups> {
        self.assigned_block_info.get(&id)
    }

    pub fn len(&self) -> usize {
        self.assigned_block_info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned_block_info.is_empty()
    }

    fn plan(&self, candidate: &Groups) -> Result<Plan, RelationError> {
        let mut touched: IndexMap<BlockId, Strand> = IndexMap::new();
        for (&q, g) in candidate.iter() {
            if let Some(block) = self.block_of(q, g.segment) {
                let existing = self.assigned_block_info[&block][&q];
                let relative = existing.strand * g.strand;
                match touched.get(&block) {
                    Some(&s) if s != relative => {
                        return Err(RelationError::AmbiguousOrientation { block })
                    }
                    Some(_) => {}
                    None => {
                        touched.insert(block, relative);
                    }
                }
            }
        }

        match (touched.len(), touched.first()) {
            (_, None) => Ok(Plan::Untouched),
            (1, Some((&block, &relative))) => {
                let content = &self.assigned_block_info[&block];
                let mut additions = Vec::new();
                for (&q, g) in candidate.iter() {
                    match content.get(&q) {
                        Some(existing) if existing.segment != g.segment => {
                            return Err(RelationError::SegmentConflict {
                                query: q,
                                existing: existing.segment,
                                proposed: g.segment,
                            })
                        }
                        Some(_) => {}
                        None => additions.push((q, g.oriented(relative))),
                    }
                }
                Ok(Plan::Extend { block, additions })
            }
            _ => {
                let mut groups = Groups::new();
                let mut owner: IntMap<QueryId, BlockId> = IntMap::default();
                for (&block, &relative) in touched.iter() {
                    for (&q, g) in self.assigned_block_info[&block].iter() {
                        if let Some(&first) = owner.get(&q) {
                            return Err(RelationError::QueryClaimedTwice { query: q, first, second: block });
                        }
                        owner.insert(q, block);
                        groups.insert(q, g.oriented(relative));
                    }
                }
                for (&q, g) in candidate.iter() {
                    match groups.get(&q) {
                        Some(existing) if existing.segment != g.segment => {
                            return Err(RelationError::SegmentConflict {
                                query: q,
                                existing: existing.segment,
                                proposed: g.segment,
                            })
                        }
                        Some(_) => {}
                        None => {
                            groups.insert(q, *g);
                        }
                    }
                }
                Ok(Plan::Fuse { retired: touched.keys().copied().collect(), groups })
            }
        }
    }

    /// Evaluate a relation without applying it.
    pub fn check_new_relations(&self, candidate: &Groups) -> Result<Absorption, RelationError> {
        self.plan(candidate).map(|plan| match plan {
            Plan::Untouched => Absorption::Untouched,
            Plan::Extend { block, .. } => Absorption::Extended(block),
            Plan::Fuse { .. } => Absorption::Fused(self.next_block),
        })
    }

    pub fn add_new_relations(&mut self, candidate: &Groups) -> Result<Absorption, RelationError> {
        let r = match self.plan(candidate)? {
            Plan::Untouched => Absorption::Untouched,
            Plan::Extend { block, additions } => {
                for (q, g) in additions {
                    self.segment_group.entry(q).or_default().insert(g.segment, block);
                    if let Some(content) = self.assigned_block_info.get_mut(&block) {
                        content.insert(q, g);
                    }
                }
                Absorption::Extended(block)
            }
            Plan::Fuse { retired, groups } => {
                for block in retired {
                    self.assigned_block_info.remove(&block);
                }
                Absorption::Fused(self.new_block(groups))
            }
        };
        Ok(r)
    }

    /// Open a block for a candidate whose segments are all unassigned.
    pub fn new_block(&mut self, groups: Groups) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        for (&q, g) in groups.iter() {
            self.segment_group.entry(q).or_default().insert(g.segment, id);
        }
        self.assigned_block_info.insert(id, groups);
        id
    }

    /// Fold a relation, opening a new block when none of its segments is known.
    pub fn add_relation(&mut self, candidate: &Groups) -> Result<Absorption, RelationError> {
        match self.add_new_relations(candidate)? {
            Absorption::Untouched => Ok(Absorption::Fused(self.new_block(candidate.clone()))),
            a => Ok(a),
        }
    }

    /// One single-segment block per segment not yet assigned.
    pub fn seed_singletons(&mut self, segmentation: &Segmentation) {
        for q in segmentation.registry().ids() {
            for s in 0..segmentation.segment_count(q) {
                if self.block_of(q, s).is_none() {
                    self.new_block(Groups::from([(q, SingleGroup::forward(s))]));
                }
            }
        }
    }

    /// Fold segment links, strongest first, into the blocks.
    pub fn fold_links(&mut self, links: &SegmentLinks, min_support: f64) -> FoldReport {
        let mut report = FoldReport::default();
        let pairs = links
            .pairs()
            .into_iter()
            .sorted_by_key(|(a, b, s)| (-OrderedFloat(s.best_support()), *a, *b))
            .collect::<Vec<_>>();

        for (a, b, support) in pairs {
            if a.query == b.query || support.best_support() < min_support {
                report.ignored += 1;
                continue;
            }
            let candidate = Groups::from([
                (a.query, SingleGroup::forward(a.segment)),
                (b.query, SingleGroup::new(b.segment, support.best_strand())),
            ]);
            match self.add_relation(&candidate) {
                Ok(Absorption::Fused(_)) => report.created += 1,
                Ok(_) => report.accepted += 1,
                Err(e) => {
                    debug!("rejecting {:?} ~ {:?}: {}", a, b, e);
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Live blocks as entries, ordered by their smallest (query, segment) and
    /// read so that this first segment is forward.
    pub fn to_entries(&self) -> Vec<GroupingEntry> {
        self.assigned_block_info
            .values()
            .map(|groups| {
                let anchor = groups
                    .iter()
                    .min_by_key(|(q, g)| (**q, g.segment))
                    .map(|(q, g)| (*q, g.segment, g.strand));
                (anchor, groups)
            })
            .sorted_by_key(|(anchor, _)| anchor.map(|(q, s, _)| (q, s)))
            .enumerate()
            .map(|(rank, (anchor, groups))| {
                let strand = anchor.map(|a| a.2).unwrap_or(Strand::Forward);
                let ordered = groups
                    .iter()
                    .sorted_by_key(|(q, _)| **q)
                    .map(|(q, g)| (*q, g.oriented(strand)))
                    .collect();
                GroupingEntry::with_groups(&format!("b{}", rank + 1), ordered)
            })
            .collect()
    }
}
