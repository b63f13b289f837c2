use std::cmp::Ordering;

use identity_hash::IntSet;

use crate::chain::{Chain, ChainId, ChainView};
use crate::model::QueryId;
use crate::range_merge::MatchRange;

/// How well the end of a chain leads into the start of another one.
///
/// Greater is better. A connection with some match always beats one without,
/// then rearrangement-free connections beat the others. Among
/// rearrangement-free connections, the one with the fewest indirect matches
/// wins, so that a fully direct junction is preferred to a larger but looser
/// one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnectionScore {
    pub matches: usize,
    pub direct_matches: usize,
    pub rearrangements: usize,
    pub ref_rearrangements: usize,
}
impl ConnectionScore {
    pub fn indirect_matches(&self) -> usize {
        self.matches - self.direct_matches
    }

    pub fn has_rearrangement(&self) -> bool {
        self.rearrangements > 0
    }
}

impl Ord for ConnectionScore {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.matches > 0)
            .cmp(&(other.matches > 0))
            .then((!self.has_rearrangement()).cmp(&!other.has_rearrangement()))
            .then_with(|| {
                if !self.has_rearrangement() {
                    other
                        .indirect_matches()
                        .cmp(&self.indirect_matches())
                        .then(self.direct_matches.cmp(&other.direct_matches))
                        .then(self.matches.cmp(&other.matches))
                } else {
                    other
                        .ref_rearrangements
                        .cmp(&self.ref_rearrangements)
                        .then(other.rearrangements.cmp(&self.rearrangements))
                        .then(self.matches.cmp(&other.matches))
                        .then(self.direct_matches.cmp(&other.direct_matches))
                }
            })
    }
}
impl PartialOrd for ConnectionScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A scored junction from one oriented chain to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConnection {
    pub from: ChainId,
    pub from_reversed: bool,
    pub to: ChainId,
    pub to_reversed: bool,
    pub score: ConnectionScore,
    /// For every matching query, the span it covers in `to` and the slots of
    /// `from` it may be inserted at.
    pub ranges: Vec<MatchRange>,
}

/// Score `a` followed by `b`, query by query.
pub fn connect(a: ChainView, b: ChainView, references: &IntSet<QueryId>) -> EntryConnection {
    let mut score = ConnectionScore::default();
    let mut ranges = Vec::new();

    for q in a.chain().queries().filter(|q| b.chain().touches(*q)) {
        let (Some(out_a), Some(in_b)) = (a.outgoing_index(q), b.incoming_index(q)) else {
            continue;
        };
        let consistent = match (a.outgoing_group(q), b.incoming_group(q)) {
            (Some(last), Some(first)) => last.precedes(&first),
            _ => false,
        };
        if consistent {
            score.matches += 1;
            if out_a + 1 == a.len() && in_b == 0 {
                score.direct_matches += 1;
            }
            if let Some(out_b) = b.outgoing_index(q) {
                ranges.push(MatchRange::new((in_b, out_b), (out_a + 1, a.len())));
            }
        } else {
            score.rearrangements += 1;
            if references.contains(&q) {
                score.ref_rearrangements += 1;
            }
        }
    }
    ranges.sort();

    EntryConnection {
        from: a.chain().id(),
        from_reversed: a.is_reversed(),
        to: b.chain().id(),
        to_reversed: b.is_reversed(),
        score,
        ranges,
    }
}

/// The best of `a→b`, `b→a`, `a→rev(b)` and `rev(a)→b`; the earliest wins ties.
pub fn best_connection(a: &Chain, b: &Chain, references: &IntSet<QueryId>) -> EntryConnection {
    let combos = [
        (ChainView::new(b, false), ChainView::new(a, false)),
        (ChainView::new(a, false), ChainView::new(b, true)),
        (ChainView::new(a, true), ChainView::new(b, false)),
    ];
    combos.into_iter().fold(
        connect(ChainView::new(a, false), ChainView::new(b, false), references),
        |best, (x, y)| {
            let c = connect(x, y, references);
            if c.score > best.score {
                c
            } else {
                best
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupingEntry, SingleGroup, Strand};

    fn score(m: usize, d: usize, r: usize, rr: usize) -> ConnectionScore {
        ConnectionScore { matches: m, direct_matches: d, rearrangements: r, ref_rearrangements: rr }
    }

    fn chain(id: ChainId, entries: &[&[(QueryId, usize, Strand)]]) -> Chain {
        Chain::from_entries(
            id,
            entries
                .iter()
                .map(|groups| {
                    GroupingEntry::with_groups(
                        "e",
                        groups.iter().map(|&(q, s, o)| (q, SingleGroup::new(s, o))).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn ranking() {
        // fewer indirect matches beat more matches
        assert!(score(2, 2, 0, 0) > score(3, 2, 0, 0));
        assert!(score(3, 2, 0, 0) > score(3, 1, 0, 0));
        assert!(score(1, 0, 0, 0) > score(5, 5, 1, 0));
        assert!(score(1, 0, 3, 3) > score(0, 0, 0, 0));
        assert!(score(1, 1, 2, 0) > score(4, 4, 1, 1));
        assert!(score(1, 1, 1, 0) > score(4, 4, 2, 0));
        assert!(score(2, 0, 1, 0) > score(1, 1, 1, 0));
    }

    #[test]
    fn direct_junction() {
        use Strand::*;
        let refs = IntSet::default();
        let a = chain(0, &[&[(0, 1, Forward), (1, 4, Reverse)]]);
        let b = chain(1, &[&[(0, 2, Forward), (1, 3, Reverse)], &[(2, 0, Forward)]]);

        let c = connect(ChainView::new(&a, false), ChainView::new(&b, false), &refs);
        assert_eq!(c.score, score(2, 2, 0, 0));
        assert_eq!(c.ranges, vec![MatchRange::new((0, 0), (1, 1)); 2]);

        let back = connect(ChainView::new(&b, false), ChainView::new(&a, false), &refs);
        assert_eq!(back.score, score(0, 0, 2, 0));

        let best = best_connection(&b, &a, &refs);
        assert_eq!((best.from, best.to), (0, 1));
        assert!(!best.from_reversed && !best.to_reversed);
    }

    #[test]
    fn reversed_partner() {
        use Strand::*;
        let mut refs = IntSet::default();
        refs.insert(1);
        let a = chain(0, &[&[(0, 1, Forward)], &[(1, 7, Forward)]]);
        let b = chain(1, &[&[(1, 5, Forward)], &[(0, 2, Reverse)]]);

        let c = connect(ChainView::new(&a, false), ChainView::new(&b, false), &refs);
        assert_eq!(c.score, score(0, 0, 2, 1));

        let best = best_connection(&a, &b, &refs);
        assert_eq!((best.from, best.to, best.to_reversed), (0, 1, true));
        // query 0 steps from 1 to 2 away from the end of `a`, query 1 flips
        assert_eq!(best.score, score(1, 0, 1, 1));
    }
}
