use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use identity_hash::{IntMap, IntSet};
use itertools::Itertools;

use crate::blocks::BlockId;
use crate::chain::{Chain, ChainId};
use crate::errors::MergeRejection;
use crate::model::{GroupingEntry, QueryId, Strand};
use crate::strand::SegmentId;

#[derive(Debug, Clone, PartialEq)]
struct BlockNode {
    entry: GroupingEntry,
    prev: IntSet<BlockId>,
    next: IntSet<BlockId>,
    /// Every block this one depends on, itself included.
    dependent_prev: IntSet<BlockId>,
    /// Every block depending on this one, itself included.
    dependent_next: IntSet<BlockId>,
    chain: ChainId,
    rank: i64,
}

/// Blocks laid out by their chains, with the transitive closure of their
/// ordering constraints, so that merges never create a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeGraph {
    nodes: Vec<Option<BlockNode>>,
    chain_members: IntMap<ChainId, IntSet<BlockId>>,
}

impl MergeGraph {
    pub fn from_chains(chains: Vec<Chain>) -> MergeGraph {
        let mut nodes: Vec<Option<BlockNode>> = Vec::new();
        let mut chain_members: IntMap<ChainId, IntSet<BlockId>> = IntMap::default();

        for chain in chains {
            let chain_id = chain.id();
            let first = nodes.len();
            let mut last_seen: IntMap<QueryId, BlockId> = IntMap::default();
            for (rank, entry) in chain.into_entries().into_iter().enumerate() {
                let id = nodes.len();
                let mut node = BlockNode {
                    prev: IntSet::default(),
                    next: IntSet::default(),
                    dependent_prev: IntSet::default(),
                    dependent_next: IntSet::default(),
                    chain: chain_id,
                    rank: rank as i64,
                    entry,
                };
                for q in node.entry.queries() {
                    if let Some(p) = last_seen.insert(q, id) {
                        node.prev.insert(p);
                    }
                }
                for p in node.prev.iter() {
                    if let Some(Some(pn)) = nodes.get_mut(*p) {
                        pn.next.insert(id);
                    }
                }
                nodes.push(Some(node));
                chain_members.entry(chain_id).or_default().insert(id);
            }

            let ids = first..nodes.len();
            for id in ids.clone() {
                let mut closure = IntSet::default();
                closure.insert(id);
                if let Some(n) = &nodes[id] {
                    for p in n.prev.iter() {
                        if let Some(pn) = &nodes[*p] {
                            closure.extend(pn.dependent_prev.iter().copied());
                        }
                    }
                }
                if let Some(n) = nodes[id].as_mut() {
                    n.dependent_prev = closure;
                }
            }
            for id in ids.rev() {
                let mut closure = IntSet::default();
                closure.insert(id);
                if let Some(n) = &nodes[id] {
                    for x in n.next.iter() {
                        if let Some(xn) = &nodes[*x] {
                            closure.extend(xn.dependent_next.iter().copied());
                        }
                    }
                }
                if let Some(n) = nodes[id].as_mut() {
                    n.dependent_next = closure;
                }
            }
        }

        MergeGraph { nodes, chain_members }
    }

    fn node(&self, b: BlockId) -> Option<&BlockNode> {
        self.nodes.get(b).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, b: BlockId) -> Option<&mut BlockNode> {
        self.nodes.get_mut(b).and_then(|n| n.as_mut())
    }

    pub fn is_live(&self, b: BlockId) -> bool {
        self.node(b).is_some()
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| n.as_ref().map(|_| i))
    }

    pub fn len(&self) -> usize {
        self.live_blocks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, b: BlockId) -> Option<&GroupingEntry> {
        self.node(b).map(|n| &n.entry)
    }

    pub fn chain_of(&self, b: BlockId) -> Option<ChainId> {
        self.node(b).map(|n| n.chain)
    }

    pub fn members(&self, chain: ChainId) -> Option<&IntSet<BlockId>> {
        self.chain_members.get(&chain)
    }

    pub fn prev(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.node(b).into_iter().flat_map(|n| n.prev.iter().copied())
    }

    pub fn next(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.node(b).into_iter().flat_map(|n| n.next.iter().copied())
    }

    pub fn dependencies(&self, b: BlockId) -> Option<(&IntSet<BlockId>, &IntSet<BlockId>)> {
        self.node(b).map(|n| (&n.dependent_prev, &n.dependent_next))
    }

    /// Which live block holds every segment.
    pub fn segment_blocks(&self) -> HashMap<SegmentId, BlockId> {
        self.live_blocks()
            .flat_map(|b| {
                self.entry(b)
                    .into_iter()
                    .flat_map(move |e| e.groups().iter().map(move |(q, g)| (SegmentId::new(*q, g.segment), b)))
            })
            .collect()
    }

    /// Whether `b1` and `b2` may become a single block.
    pub fn check_merge(&self, b1: BlockId, b2: BlockId) -> Result<(), MergeRejection> {
        if b1 == b2 {
            return Err(MergeRejection::SameBlock);
        }
        let n1 = self.node(b1).ok_or(MergeRejection::Dead(b1))?;
        let n2 = self.node(b2).ok_or(MergeRejection::Dead(b2))?;
        if !n1.entry.can_merge(&n2.entry) {
            return Err(MergeRejection::SharedQuery(b1, b2));
        }
        if !n1.dependent_prev.is_disjoint(&n2.dependent_next) || !n2.dependent_prev.is_disjoint(&n1.dependent_next) {
            return Err(MergeRejection::WouldCycle(b1, b2));
        }
        Ok(())
    }

    /// Fold `b2` into `b1`; `b2` is dead afterwards. A rejected merge leaves
    /// the graph untouched.
    pub fn merge(&mut self, b1: BlockId, b2: BlockId) -> Result<(), MergeRejection> {
        self.check_merge(b1, b2)?;
        let n2 = self.nodes[b2].take().ok_or(MergeRejection::Dead(b2))?;

        for &p in n2.prev.iter() {
            if let Some(pn) = self.node_mut(p) {
                pn.next.remove(&b2);
                pn.next.insert(b1);
            }
        }
        for &x in n2.next.iter() {
            if let Some(xn) = self.node_mut(x) {
                xn.prev.remove(&b2);
                xn.prev.insert(b1);
            }
        }
        for &a in n2.dependent_prev.iter().filter(|a| **a != b2) {
            if let Some(an) = self.node_mut(a) {
                an.dependent_next.remove(&b2);
                an.dependent_next.insert(b1);
            }
        }
        for &d in n2.dependent_next.iter().filter(|d| **d != b2) {
            if let Some(dn) = self.node_mut(d) {
                dn.dependent_prev.remove(&b2);
                dn.dependent_prev.insert(b1);
            }
        }

        let (ancestors, descendants) = {
            let Some(n1) = self.node_mut(b1) else {
                return Err(MergeRejection::Dead(b1));
            };
            n1.entry.absorb(&n2.entry, Strand::Forward);
            n1.prev.extend(n2.prev.iter().copied());
            n1.next.extend(n2.next.iter().copied());
            n1.dependent_prev.extend(n2.dependent_prev.iter().copied().filter(|a| *a != b2));
            n1.dependent_next.extend(n2.dependent_next.iter().copied().filter(|d| *d != b2));
            (n1.dependent_prev.clone(), n1.dependent_next.clone())
        };
        self.propagate_forward(b1, ancestors);
        self.propagate_backward(b1, descendants);

        if let Some(members) = self.chain_members.get_mut(&n2.chain) {
            members.remove(&b2);
        }
        let c1 = self.nodes[b1].as_ref().map(|n| n.chain);
        if let Some(c1) = c1.filter(|c1| *c1 != n2.chain) {
            self.fuse_chains(c1, n2.chain);
        }
        Ok(())
    }

    /// Push new ancestors of `from` down to everything after it.
    fn propagate_forward(&mut self, from: BlockId, delta: IntSet<BlockId>) {
        let mut todo = self.next(from).map(|n| (n, delta.clone())).collect::<VecDeque<_>>();
        while let Some((b, delta)) = todo.pop_front() {
            let Some(node) = self.node_mut(b) else { continue };
            let fresh = delta.difference(&node.dependent_prev).copied().collect::<IntSet<_>>();
            if fresh.is_empty() {
                continue;
            }
            node.dependent_prev.extend(fresh.iter().copied());
            todo.extend(node.next.iter().map(|n| (*n, fresh.clone())));
        }
    }

    /// Push new descendants of `from` up to everything before it.
    fn propagate_backward(&mut self, from: BlockId, delta: IntSet<BlockId>) {
        let mut todo = self.prev(from).map(|p| (p, delta.clone())).collect::<VecDeque<_>>();
        while let Some((b, delta)) = todo.pop_front() {
            let Some(node) = self.node_mut(b) else { continue };
            let fresh = delta.difference(&node.dependent_next).copied().collect::<IntSet<_>>();
            if fresh.is_empty() {
                continue;
            }
            node.dependent_next.extend(fresh.iter().copied());
            todo.extend(node.prev.iter().map(|p| (*p, fresh.clone())));
        }
    }

    fn fuse_chains(&mut self, into: ChainId, from: ChainId) {
        let moved = self.chain_members.remove(&from).unwrap_or_default();
        for &b in moved.iter() {
            if let Some(n) = self.node_mut(b) {
                n.chain = into;
            }
        }
        self.chain_members.entry(into).or_default().extend(moved);
    }

    /// Read a whole chain backwards.
    pub fn reverse_chain(&mut self, chain: ChainId) {
        let members = self.chain_members.get(&chain).cloned().unwrap_or_default();
        for b in members {
            if let Some(n) = self.node_mut(b) {
                std::mem::swap(&mut n.prev, &mut n.next);
                std::mem::swap(&mut n.dependent_prev, &mut n.dependent_next);
                n.entry = n.entry.reversed();
                n.rank = -n.rank;
            }
        }
    }

    /// Closures computed from scratch by a traversal from every block.
    pub fn recompute_closure(&self) -> IntMap<BlockId, (IntSet<BlockId>, IntSet<BlockId>)> {
        let reach = |from: BlockId, forward: bool| {
            let mut seen = IntSet::default();
            let mut todo = vec![from];
            while let Some(b) = todo.pop() {
                if seen.insert(b) {
                    if forward {
                        todo.extend(self.next(b));
                    } else {
                        todo.extend(self.prev(b));
                    }
                }
            }
            seen
        };
        self.live_blocks().map(|b| (b, (reach(b, false), reach(b, true)))).collect()
    }

    /// Every chain in topological order, earliest original position first.
    pub fn into_chains(self) -> Vec<Chain> {
        let mut nodes = self.nodes;
        let mut r = Vec::new();
        for (chain, members) in self.chain_members.into_iter().sorted_by_key(|(c, _)| *c) {
            let mut in_degree: IntMap<BlockId, usize> = IntMap::default();
            let mut ready = BinaryHeap::new();
            for &b in members.iter() {
                if let Some(n) = &nodes[b] {
                    let d = n.prev.iter().filter(|p| members.contains(p)).count();
                    in_degree.insert(b, d);
                    if d == 0 {
                        ready.push(Reverse((n.rank, b)));
                    }
                }
            }

            let mut entries = Vec::with_capacity(members.len());
            while let Some(Reverse((_, b))) = ready.pop() {
                let Some(n) = nodes[b].take() else { continue };
                for x in n.next.iter() {
                    if let Some(d) = in_degree.get_mut(x) {
                        *d -= 1;
                        if *d == 0 {
                            if let Some(xn) = &nodes[*x] {
                                ready.push(Reverse((xn.rank, *x)));
                            }
                        }
                    }
                }
                entries.push(n.entry);
            }
            if !entries.is_empty() {
                r.push(Chain::from_entries(chain, entries));
            }
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SingleGroup;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, groups: &[(QueryId, usize)]) -> GroupingEntry {
        GroupingEntry::with_groups(
            name,
            groups.iter().map(|&(q, s)| (q, SingleGroup::forward(s))).collect(),
        )
    }

    fn two_chains() -> MergeGraph {
        MergeGraph::from_chains(vec![
            Chain::from_entries(0, vec![entry("x0", &[(0, 0)]), entry("x1", &[(0, 1)]), entry("x2", &[(0, 2)])]),
            Chain::from_entries(1, vec![entry("y0", &[(1, 0)]), entry("y1", &[(1, 1)]), entry("y2", &[(1, 2)])]),
        ])
    }

    fn assert_exact_closure(g: &MergeGraph) {
        for (b, (anc, desc)) in g.recompute_closure() {
            let (p, n) = g.dependencies(b).unwrap();
            assert_eq!((p, n), (&anc, &desc), "closure of {}", b);
        }
    }

    fn set(xs: &[BlockId]) -> IntSet<BlockId> {
        xs.iter().copied().collect()
    }

    #[test]
    fn closures_follow_chains() {
        let g = two_chains();
        assert_eq!(g.dependencies(1), Some((&set(&[0, 1]), &set(&[1, 2]))));
        assert_exact_closure(&g);
        assert_eq!(g.check_merge(0, 2), Err(MergeRejection::SharedQuery(0, 2)));
        assert_eq!(g.check_merge(1, 1), Err(MergeRejection::SameBlock));
    }

    #[test]
    fn crossing_merges_are_rejected() {
        let mut g = two_chains();
        g.merge(1, 4).unwrap();
        assert!(!g.is_live(4));
        assert_exact_closure(&g);
        assert_eq!(g.entry(1).unwrap().len(), 2);

        // x0 now precedes y2 through x1
        let before = g.clone();
        assert_eq!(g.merge(5, 0), Err(MergeRejection::WouldCycle(5, 0)));
        assert_eq!(g, before);
        assert_eq!(g.merge(4, 0), Err(MergeRejection::Dead(4)));

        g.merge(2, 5).unwrap();
        assert_exact_closure(&g);
        let chains = g.into_chains();
        assert_eq!(chains.len(), 1);
        let names = chains[0].entries().iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["x0", "y0", "x1", "x2"]);
        assert!(chains[0].is_collinear());
    }

    #[test]
    fn reversal_flips_everything() {
        let mut g = two_chains();
        g.reverse_chain(1);
        assert_exact_closure(&g);
        assert_eq!(g.entry(3).unwrap().get(1), Some(SingleGroup::new(0, Strand::Reverse)));
        g.merge(0, 5).unwrap();
        g.merge(2, 3).unwrap();
        assert_exact_closure(&g);

        let chains = g.into_chains();
        let names = chains[0].entries().iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["x0", "y1", "x1", "x2"]);
        assert!(chains[0].is_collinear());
    }
}
