use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A base interval in one chain's index space, constrained to land within
/// `limit` in the other chain's slot space. Both intervals are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchRange {
    pub base: (usize, usize),
    pub limit: (usize, usize),
}
impl MatchRange {
    pub fn new(base: (usize, usize), limit: (usize, usize)) -> Self {
        MatchRange { base, limit }
    }

    fn is_valid(&self) -> bool {
        self.base.0 <= self.base.1 && self.limit.0 <= self.limit.1
    }
}

/// Group overlapping base intervals and intersect their limits.
///
/// Returns the groups sorted by base start, each carrying the union of its
/// base intervals and the intersection of its limits, or `None` as soon as
/// one intersection is empty.
pub fn merge_ranges(ranges: &[MatchRange]) -> Option<Vec<MatchRange>> {
    if ranges.iter().any(|r| !r.is_valid()) {
        return None;
    }
    let mut ranges = ranges.to_vec();
    ranges.sort();

    let mut r = Vec::new();
    let mut ends = BinaryHeap::new();
    let mut lmins = BinaryHeap::new();
    let mut lmaxs = BinaryHeap::new();
    let mut group: Option<(usize, usize)> = None;

    let mut close = |group: (usize, usize),
                     lmins: &mut BinaryHeap<usize>,
                     lmaxs: &mut BinaryHeap<Reverse<usize>>|
     -> Option<()> {
        let lmin = lmins.peek().copied()?;
        let Reverse(lmax) = lmaxs.peek().copied()?;
        if lmin > lmax {
            return None;
        }
        r.push(MatchRange::new(group, (lmin, lmax)));
        lmins.clear();
        lmaxs.clear();
        Some(())
    };

    for range in ranges {
        while let Some(&Reverse(end)) = ends.peek() {
            if end < range.base.0 {
                ends.pop();
            } else {
                break;
            }
        }
        if ends.is_empty() {
            if let Some(g) = group.take() {
                close(g, &mut lmins, &mut lmaxs)?;
            }
        }

        ends.push(Reverse(range.base.1));
        lmins.push(range.limit.0);
        lmaxs.push(Reverse(range.limit.1));
        group = Some(match group {
            Some((start, end)) => (start, end.max(range.base.1)),
            None => range.base,
        });
    }
    if let Some(g) = group {
        close(g, &mut lmins, &mut lmaxs)?;
    }

    Some(r)
}
