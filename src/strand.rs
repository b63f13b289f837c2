use std::collections::HashMap;
use std::ops::Mul;

use crate::model::{QueryId, SegmentIndex};

/// The relative orientation of a segment within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}
impl Strand {
    pub fn flip(self) -> Strand {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Strand::Forward => 1,
            Strand::Reverse => -1,
        }
    }

    pub fn is_forward(self) -> bool {
        self == Strand::Forward
    }

    /// The `F`/`R` marker used in block records.
    pub fn marker(self) -> char {
        match self {
            Strand::Forward => 'F',
            Strand::Reverse => 'R',
        }
    }

    pub fn from_marker(c: char) -> Option<Strand> {
        match c {
            'F' | '+' => Some(Strand::Forward),
            'R' | '-' => Some(Strand::Reverse),
            _ => None,
        }
    }
}

impl Mul for Strand {
    type Output = Strand;

    fn mul(self, rhs: Strand) -> Strand {
        if self == rhs {
            Strand::Forward
        } else {
            Strand::Reverse
        }
    }
}

/// Accumulated evidence weight for both relative orientations of two segments
/// (or, once lifted, of two blocks).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrandSupport {
    pub forward: f64,
    pub reverse: f64,
}
impl StrandSupport {
    pub fn new(forward: f64, reverse: f64) -> Self {
        StrandSupport { forward, reverse }
    }

    pub fn on(strand: Strand, weight: f64) -> Self {
        match strand {
            Strand::Forward => StrandSupport::new(weight, 0.),
            Strand::Reverse => StrandSupport::new(0., weight),
        }
    }

    pub fn add_support(&mut self, other: &StrandSupport) {
        self.forward += other.forward;
        self.reverse += other.reverse;
    }

    pub fn max_support(&mut self, other: &StrandSupport) {
        self.forward = self.forward.max(other.forward);
        self.reverse = self.reverse.max(other.reverse);
    }

    pub fn reversed(&self) -> StrandSupport {
        StrandSupport::new(self.reverse, self.forward)
    }

    /// Reorient the support when one side of the pair flips its strand.
    pub fn oriented(&self, strand: Strand) -> StrandSupport {
        match strand {
            Strand::Forward => *self,
            Strand::Reverse => self.reversed(),
        }
    }

    /// Ties favour the forward strand.
    pub fn best_strand(&self) -> Strand {
        if self.forward >= self.reverse {
            Strand::Forward
        } else {
            Strand::Reverse
        }
    }

    pub fn best_support(&self) -> f64 {
        self.forward.max(self.reverse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId {
    pub query: QueryId,
    pub segment: SegmentIndex,
}
impl SegmentId {
    pub fn new(query: QueryId, segment: SegmentIndex) -> Self {
        SegmentId { query, segment }
    }
}

/// Pairwise segment evidence, stored symmetrically.
#[derive(Debug, Clone, Default)]
pub struct SegmentLinks {
    links: HashMap<SegmentId, HashMap<SegmentId, StrandSupport>>,
}
impl SegmentLinks {
    pub fn new() -> Self {
        Default::default()
    }

    fn update(&mut self, a: SegmentId, b: SegmentId, f: impl Fn(&mut StrandSupport)) {
        f(self.links.entry(a).or_default().entry(b).or_default());
        f(self.links.entry(b).or_default().entry(a).or_default());
    }

    pub fn add(&mut self, a: SegmentId, b: SegmentId, support: StrandSupport) {
        self.update(a, b, |s| s.add_support(&support))
    }

    pub fn keep_max(&mut self, a: SegmentId, b: SegmentId, support: StrandSupport) {
        self.update(a, b, |s| s.max_support(&support))
    }

    pub fn get(&self, a: &SegmentId, b: &SegmentId) -> Option<&StrandSupport> {
        self.links.get(a).and_then(|l| l.get(b))
    }

    pub fn neighbours(&self, a: &SegmentId) -> impl Iterator<Item = (&SegmentId, &StrandSupport)> {
        self.links.get(a).into_iter().flat_map(|l| l.iter())
    }

    /// Every link once, as `(a, b, support)` with `a < b`, sorted by segments.
    pub fn pairs(&self) -> Vec<(SegmentId, SegmentId, StrandSupport)> {
        let mut r = self
            .links
            .iter()
            .flat_map(|(a, l)| l.iter().map(move |(b, s)| (*a, *b, *s)))
            .filter(|(a, b, _)| a < b)
            .collect::<Vec<_>>();
        r.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        r
    }

    pub fn extend(&mut self, other: &SegmentLinks) {
        for (a, b, s) in other.pairs() {
            self.add(a, b, s);
        }
    }

    pub fn len(&self) -> usize {
        self.links.values().map(|l| l.len()).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
