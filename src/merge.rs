use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use identity_hash::{IntMap, IntSet};
use itertools::Itertools;
use log::*;
use ordered_float::OrderedFloat;

use crate::blocks::BlockId;
use crate::chain::ChainId;
use crate::dependency::MergeGraph;
use crate::errors::MergeRejection;
use crate::model::Strand;
use crate::segments::Segmentation;
use crate::strand::{SegmentLinks, StrandSupport};

type BlockPair = (BlockId, BlockId);

fn pair(a: BlockId, b: BlockId) -> BlockPair {
    (a.min(b), a.max(b))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub reversed: usize,
    pub rejected: usize,
    pub stale: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PairSupport {
    support: StrandSupport,
    generation: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeCandidate {
    weight: OrderedFloat<f64>,
    pair: BlockPair,
    strand: Strand,
    generation: usize,
}
impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight.cmp(&other.weight).then_with(|| other.pair.cmp(&self.pair))
    }
}
impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The support of a pair once every block of `members` is read backwards.
pub fn reoriented(support: StrandSupport, (a, b): BlockPair, members: &IntSet<BlockId>) -> StrandSupport {
    if members.contains(&a) != members.contains(&b) {
        support.reversed()
    } else {
        support
    }
}

/// Merges blocks bound by segment links, strongest evidence first.
pub struct LinkMergeManager {
    supports: HashMap<BlockPair, PairSupport>,
    partners: IntMap<BlockId, IntSet<BlockId>>,
    queue: BinaryHeap<MergeCandidate>,
    min_support: f64,
}

impl LinkMergeManager {
    /// Lift segment links to the blocks of `graph`, relative to the
    /// orientation of each segment in its block.
    pub fn new(graph: &MergeGraph, links: &SegmentLinks, min_support: f64) -> Self {
        let segment_blocks = graph.segment_blocks();
        let mut r = LinkMergeManager {
            supports: HashMap::new(),
            partners: IntMap::default(),
            queue: BinaryHeap::new(),
            min_support,
        };

        for (a, b, support) in links.pairs() {
            let (Some(&ba), Some(&bb)) = (segment_blocks.get(&a), segment_blocks.get(&b)) else {
                continue;
            };
            if ba == bb {
                continue;
            }
            let strand = |block: BlockId, query| {
                graph.entry(block).and_then(|e| e.get(query)).map(|g| g.strand).unwrap_or(Strand::Forward)
            };
            let relative = strand(ba, a.query) * strand(bb, b.query);
            r.add_support(pair(ba, bb), support.oriented(relative));
        }

        for p in r.supports.keys().copied().sorted().collect::<Vec<_>>() {
            r.push(p);
        }
        r
    }

    fn add_support(&mut self, p: BlockPair, support: StrandSupport) {
        self.supports
            .entry(p)
            .and_modify(|s| {
                s.support.add_support(&support);
                s.generation += 1;
            })
            .or_insert(PairSupport { support, generation: 0 });
        self.partners.entry(p.0).or_default().insert(p.1);
        self.partners.entry(p.1).or_default().insert(p.0);
    }

    fn forget(&mut self, p: BlockPair) -> Option<PairSupport> {
        if let Some(s) = self.partners.get_mut(&p.0) {
            s.remove(&p.1);
        }
        if let Some(s) = self.partners.get_mut(&p.1) {
            s.remove(&p.0);
        }
        self.supports.remove(&p)
    }

    fn push(&mut self, p: BlockPair) {
        if let Some(s) = self.supports.get(&p) {
            self.queue.push(MergeCandidate {
                weight: OrderedFloat(s.support.best_support()),
                pair: p,
                strand: s.support.best_strand(),
                generation: s.generation,
            });
        }
    }

    pub fn support(&self, a: BlockId, b: BlockId) -> Option<StrandSupport> {
        self.supports.get(&pair(a, b)).map(|s| s.support)
    }

    pub fn pending(&self) -> usize {
        self.supports.len()
    }

    /// Reverse a chain of `graph`, and every pair support crossing its border.
    fn reverse_chain(&mut self, graph: &mut MergeGraph, chain: ChainId) {
        graph.reverse_chain(chain);
        let members = graph.members(chain).cloned().unwrap_or_default();
        let crossing = members
            .iter()
            .flat_map(|m| {
                self.partners
                    .get(m)
                    .into_iter()
                    .flatten()
                    .filter(|p| !members.contains(*p))
                    .map(move |p| pair(*m, *p))
            })
            .sorted()
            .collect::<Vec<_>>();
        for p in crossing {
            if let Some(s) = self.supports.get_mut(&p) {
                s.support = reoriented(s.support, p, &members);
                s.generation += 1;
            }
            self.push(p);
        }
    }

    pub fn run(&mut self, graph: &mut MergeGraph) -> MergeReport {
        let mut report = MergeReport::default();
        while let Some(c) = self.queue.pop() {
            if c.weight.0 < self.min_support {
                break;
            }
            match self.supports.get(&c.pair) {
                Some(s) if s.generation == c.generation => {}
                _ => {
                    trace!("dropping outdated candidate {:?}", c.pair);
                    report.stale += 1;
                    continue;
                }
            }
            let (b1, b2) = c.pair;
            if let Err(e) = self.validate(graph, b1, b2, c.strand) {
                debug!("not merging {} and {}: {}", b1, b2, e);
                report.rejected += 1;
                self.forget(c.pair);
                continue;
            }

            if c.strand == Strand::Reverse {
                let size = |b| graph.chain_of(b).and_then(|ch| graph.members(ch)).map(|m| m.len()).unwrap_or(0);
                let flipped = if size(b1) < size(b2) { b1 } else { b2 };
                if let Some(chain) = graph.chain_of(flipped) {
                    trace!("reversing chain {} to merge {} and {}", chain, b1, b2);
                    self.reverse_chain(graph, chain);
                    report.reversed += 1;
                }
            }

            if let Err(e) = graph.merge(b1, b2) {
                debug!("not merging {} and {}: {}", b1, b2, e);
                report.rejected += 1;
                self.forget(c.pair);
                continue;
            }
            trace!("merged {} into {}", b2, b1);
            report.merged += 1;
            self.forget(c.pair);

            let moved = self.partners.get(&b2).cloned().unwrap_or_default();
            for p in moved.into_iter().sorted() {
                if let Some(s) = self.forget(pair(b2, p)) {
                    if p != b1 {
                        self.add_support(pair(b1, p), s.support);
                        self.push(pair(b1, p));
                    }
                }
            }
            self.partners.remove(&b2);
        }
        report
    }

    fn validate(&self, graph: &MergeGraph, b1: BlockId, b2: BlockId, strand: Strand) -> Result<(), MergeRejection> {
        graph.check_merge(b1, b2)?;
        if strand == Strand::Reverse && graph.chain_of(b1) == graph.chain_of(b2) {
            return Err(MergeRejection::StrandConflict(b1, b2));
        }
        Ok(())
    }
}

/// Mean length of the segments of a block.
fn mean_length(graph: &MergeGraph, segmentation: &Segmentation, b: BlockId) -> Option<f64> {
    let e = graph.entry(b)?;
    if e.is_empty() {
        return None;
    }
    let total = e
        .groups()
        .iter()
        .map(|(q, g)| segmentation.length(*q, g.segment).unwrap_or(0))
        .sum::<usize>();
    Some(total as f64 / e.len() as f64)
}

/// Merges sibling blocks, i.e. blocks sharing a neighbour but no query, whose
/// segments have similar lengths.
pub struct ProximityMerger<'a> {
    segmentation: &'a Segmentation,
    min_ratio: f64,
    queue: BinaryHeap<(OrderedFloat<f64>, Reverse<BlockPair>)>,
}

impl<'a> ProximityMerger<'a> {
    pub fn new(graph: &MergeGraph, segmentation: &'a Segmentation, min_ratio: f64) -> Self {
        let mut r = ProximityMerger { segmentation, min_ratio, queue: BinaryHeap::new() };
        let pairs = graph.live_blocks().flat_map(|b| r.siblings(graph, b)).sorted().dedup().collect::<Vec<_>>();
        for p in pairs {
            r.offer(graph, p);
        }
        r
    }

    /// Length ratio of two blocks, in `[0, 1]`.
    pub fn ratio(&self, graph: &MergeGraph, a: BlockId, b: BlockId) -> Option<f64> {
        let la = mean_length(graph, self.segmentation, a)?;
        let lb = mean_length(graph, self.segmentation, b)?;
        if la.max(lb) <= 0. {
            return None;
        }
        Some(la.min(lb) / la.max(lb))
    }

    fn siblings(&self, graph: &MergeGraph, b: BlockId) -> Vec<BlockPair> {
        let by_next = graph.prev(b).flat_map(|p| graph.next(p).collect::<Vec<_>>());
        let by_prev = graph.next(b).flat_map(|n| graph.prev(n).collect::<Vec<_>>());
        by_next
            .chain(by_prev)
            .filter(|s| *s != b)
            .filter(|s| match (graph.entry(b), graph.entry(*s)) {
                (Some(x), Some(y)) => x.can_merge(y),
                _ => false,
            })
            .map(|s| pair(b, s))
            .collect()
    }

    fn offer(&mut self, graph: &MergeGraph, p: BlockPair) {
        if let Some(ratio) = self.ratio(graph, p.0, p.1) {
            if ratio >= self.min_ratio {
                self.queue.push((OrderedFloat(ratio), Reverse(p)));
            }
        }
    }

    pub fn run(&mut self, graph: &mut MergeGraph) -> MergeReport {
        let mut report = MergeReport::default();
        while let Some((ratio, Reverse((b1, b2)))) = self.queue.pop() {
            if !graph.is_live(b1) || !graph.is_live(b2) {
                report.stale += 1;
                continue;
            }
            if self.ratio(graph, b1, b2) != Some(ratio.0) {
                report.stale += 1;
                continue;
            }
            if let Err(e) = graph.merge(b1, b2) {
                debug!("not merging {} and {}: {}", b1, b2, e);
                report.rejected += 1;
                continue;
            }
            trace!("merged {} into {} (length ratio {:.2})", b2, b1, ratio);
            report.merged += 1;
            let around = std::iter::once(b1).chain(graph.prev(b1)).chain(graph.next(b1)).collect::<Vec<_>>();
            let pairs = around.into_iter().flat_map(|b| self.siblings(graph, b)).sorted().dedup().collect::<Vec<_>>();
            for p in pairs {
                self.offer(graph, p);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::model::{GroupingEntry, QueryId, SingleGroup};
    use crate::strand::SegmentId;
    use pretty_assertions::assert_eq;
    use Strand::{Forward, Reverse};

    fn entry(name: &str, groups: &[(QueryId, usize, Strand)]) -> GroupingEntry {
        GroupingEntry::with_groups(
            name,
            groups.iter().map(|&(q, s, o)| (q, SingleGroup::new(s, o))).collect(),
        )
    }

    fn link(links: &mut SegmentLinks, a: (QueryId, usize), b: (QueryId, usize), support: StrandSupport) {
        links.add(SegmentId::new(a.0, a.1), SegmentId::new(b.0, b.1), support);
    }

    fn names(chain: &Chain) -> Vec<&str> {
        chain.entries().iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn reorientation_only_touches_crossing_pairs() {
        let members = [1, 2].into_iter().collect::<IntSet<_>>();
        let s = StrandSupport::new(3., 1.);
        assert_eq!(reoriented(s, (0, 1), &members), StrandSupport::new(1., 3.));
        assert_eq!(reoriented(s, (1, 2), &members), s);
        assert_eq!(reoriented(s, (0, 3), &members), s);
    }

    #[test]
    fn links_merge_parallel_chains() {
        let mut graph = MergeGraph::from_chains(vec![
            Chain::from_entries(0, vec![entry("x0", &[(0, 0, Forward)]), entry("x1", &[(0, 1, Forward)])]),
            Chain::from_entries(1, vec![entry("y0", &[(1, 0, Forward)]), entry("y1", &[(1, 1, Forward)])]),
        ]);
        let mut links = SegmentLinks::new();
        link(&mut links, (0, 0), (1, 0), StrandSupport::new(2., 0.));
        link(&mut links, (0, 1), (1, 1), StrandSupport::new(3., 0.));
        // contradicts the two others
        link(&mut links, (0, 0), (1, 1), StrandSupport::new(1., 0.));

        let mut manager = LinkMergeManager::new(&graph, &links, 0.5);
        let report = manager.run(&mut graph);
        assert_eq!(report.merged, 2);
        assert_eq!(report.rejected, 1);

        let chains = graph.into_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(names(&chains[0]), vec!["x0", "x1"]);
        assert_eq!(chains[0].entries()[1].len(), 2);
    }

    #[test]
    fn reverse_links_flip_a_chain() {
        let mut graph = MergeGraph::from_chains(vec![
            Chain::from_entries(0, vec![entry("x0", &[(0, 0, Forward)]), entry("x1", &[(0, 1, Forward)])]),
            Chain::from_entries(1, vec![entry("y0", &[(1, 1, Reverse)]), entry("y1", &[(1, 0, Reverse)])]),
        ]);
        let mut links = SegmentLinks::new();
        link(&mut links, (0, 0), (1, 0), StrandSupport::new(2., 0.));
        link(&mut links, (0, 1), (1, 1), StrandSupport::new(2., 0.));

        let mut manager = LinkMergeManager::new(&graph, &links, 0.);
        assert_eq!(manager.support(0, 3), Some(StrandSupport::new(0., 2.)));
        let report = manager.run(&mut graph);
        assert_eq!(report.reversed, 1);
        assert_eq!(report.merged, 2);

        let chains = graph.into_chains();
        assert_eq!(chains.len(), 1);
        assert!(chains[0].is_collinear());
        assert!(chains[0].entries().iter().all(|e| e.groups().values().all(|g| g.strand == Forward)));
    }

    #[test]
    fn absorbed_supports_outdate_queued_candidates() {
        let mut graph = MergeGraph::from_chains(vec![
            Chain::singleton(0, entry("x", &[(0, 0, Forward)])),
            Chain::singleton(1, entry("y", &[(1, 0, Forward)])),
            Chain::singleton(2, entry("z", &[(2, 0, Forward)])),
        ]);
        let mut links = SegmentLinks::new();
        link(&mut links, (0, 0), (1, 0), StrandSupport::new(5., 0.));
        link(&mut links, (1, 0), (2, 0), StrandSupport::new(2., 0.));
        link(&mut links, (0, 0), (2, 0), StrandSupport::new(1., 0.));

        let mut manager = LinkMergeManager::new(&graph, &links, 0.);
        assert_eq!(manager.queue.len(), 3);
        let report = manager.run(&mut graph);
        // y~z moved onto x~z, leaving both queued entries behind
        assert_eq!(report, MergeReport { merged: 2, stale: 2, ..Default::default() });
        assert_eq!(manager.pending(), 0);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.entry(0).map(|e| e.len()), Some(3));
    }

    #[test]
    fn reversal_within_a_chain_is_rejected() {
        let mut graph = MergeGraph::from_chains(vec![Chain::from_entries(
            0,
            vec![entry("x0", &[(0, 0, Forward)]), entry("x1", &[(1, 0, Forward)])],
        )]);
        let mut links = SegmentLinks::new();
        link(&mut links, (0, 0), (1, 0), StrandSupport::new(0., 1.));

        let report = LinkMergeManager::new(&graph, &links, 0.).run(&mut graph);
        assert_eq!(report, MergeReport { rejected: 1, ..Default::default() });
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn siblings_merge_by_length() {
        let segmentation = Segmentation::from_reader("A\t0 10 20\nB\t0 10 30\n".as_bytes()).unwrap();
        let graph = MergeGraph::from_chains(vec![Chain::from_entries(
            0,
            vec![
                entry("x0", &[(0, 0, Forward), (1, 0, Forward)]),
                entry("x1", &[(0, 1, Forward)]),
                entry("x2", &[(1, 1, Forward)]),
            ],
        )]);

        let mut strict = graph.clone();
        let report = ProximityMerger::new(&strict, &segmentation, 0.6).run(&mut strict);
        assert_eq!(report.merged, 0);
        assert_eq!(strict.len(), 3);

        let mut loose = graph;
        let mut merger = ProximityMerger::new(&loose, &segmentation, 0.4);
        assert_eq!(merger.ratio(&loose, 1, 2), Some(0.5));
        assert_eq!(merger.run(&mut loose).merged, 1);
        let chains = loose.into_chains();
        assert_eq!(names(&chains[0]), vec!["x0", "x1"]);
        assert!(chains[0].is_collinear());
    }
}
