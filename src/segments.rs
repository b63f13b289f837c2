use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;

use crate::errors::{FileError, ParseError};
use crate::model::{QueryId, QueryRegistry, SegmentIndex, Strand};
use crate::strand::{SegmentId, SegmentLinks, StrandSupport};

/// Ordered segment boundaries of a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySegments {
    pub name: String,
    positions: Vec<usize>,
}
impl QuerySegments {
    pub fn new(name: &str, positions: Vec<usize>) -> Result<Self, ParseError> {
        if positions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ParseError::UnsortedBoundaries(name.to_owned()));
        }
        Ok(QuerySegments { name: name.to_owned(), positions })
    }

    pub fn segment_count(&self) -> usize {
        self.positions.len().saturating_sub(1)
    }

    pub fn length(&self, segment: SegmentIndex) -> Option<usize> {
        self.coordinates(segment, Strand::Forward).map(|(s, e)| e - s)
    }

    /// Start and end of a segment as read along `strand`.
    pub fn coordinates(&self, segment: SegmentIndex, strand: Strand) -> Option<(usize, usize)> {
        let start = *self.positions.get(segment)?;
        let end = *self.positions.get(segment + 1)?;
        Some(match strand {
            Strand::Forward => (start, end),
            Strand::Reverse => (end, start),
        })
    }

    /// Coordinates covered by the segments `first..=last`, read along `strand`.
    pub fn span(&self, first: SegmentIndex, last: SegmentIndex, strand: Strand) -> Option<(usize, usize)> {
        let (lo, hi) = (first.min(last), first.max(last));
        let (start, _) = self.coordinates(lo, Strand::Forward)?;
        let (_, end) = self.coordinates(hi, Strand::Forward)?;
        Some(match strand {
            Strand::Forward => (start, end),
            Strand::Reverse => (end, start),
        })
    }
}

/// All the queries and their segments, addressed by query id.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    registry: QueryRegistry,
    queries: Vec<QuerySegments>,
}
impl Segmentation {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, segments: QuerySegments) -> Result<QueryId, ParseError> {
        if self.registry.id(&segments.name).is_some() {
            return Err(ParseError::DuplicateQuery(segments.name));
        }
        let id = self.registry.intern(&segments.name);
        self.queries.push(segments);
        Ok(id)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Segmentation> {
        let mut r = Segmentation::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, positions) = line.split_once('\t').ok_or_else(|| ParseError::Malformed {
                line: i + 1,
                reason: "expected a query name and its boundaries".into(),
            })?;
            let positions = positions
                .split_whitespace()
                .map(|p| {
                    p.parse::<usize>().map_err(|_| ParseError::Malformed {
                        line: i + 1,
                        reason: format!("`{}` is not a position", p),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            r.add(QuerySegments::new(name.trim(), positions)?)?;
        }
        Ok(r)
    }

    pub fn from_file(filename: &str) -> Result<Segmentation> {
        let file = File::open(filename)
            .map_err(|source| FileError::CannotOpen { source, filename: filename.into() })?;
        Segmentation::from_reader(BufReader::new(file))
            .with_context(|| anyhow!("while parsing {}", filename.yellow().bold()))
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut QueryRegistry {
        &mut self.registry
    }

    pub fn get(&self, query: QueryId) -> Option<&QuerySegments> {
        self.queries.get(query)
    }

    pub fn segment_count(&self, query: QueryId) -> usize {
        self.get(query).map(|q| q.segment_count()).unwrap_or(0)
    }

    pub fn length(&self, query: QueryId, segment: SegmentIndex) -> Option<usize> {
        self.get(query).and_then(|q| q.length(segment))
    }

    /// Resolve a `query:segment` token.
    pub fn segment_id(&self, token: &str) -> Result<SegmentId, ParseError> {
        let malformed = || ParseError::Malformed { line: 0, reason: format!("`{}` is not a query:segment", token) };
        let (name, segment) = token.rsplit_once(':').ok_or_else(malformed)?;
        let segment = segment.parse::<usize>().map_err(|_| malformed())?;
        let query = self.registry.id(name).ok_or_else(|| ParseError::UnknownQuery(name.to_owned()))?;
        if segment >= self.segment_count(query) {
            return Err(ParseError::SegmentOutOfRange { query: name.to_owned(), segment });
        }
        Ok(SegmentId::new(query, segment))
    }
}

fn with_line(e: ParseError, line: usize) -> ParseError {
    match e {
        ParseError::Malformed { reason, .. } => ParseError::Malformed { line, reason },
        e => e,
    }
}

/// Accumulate `qA:sA<TAB>qB:sB<TAB>forward<TAB>reverse` lines into segment links.
pub fn read_links<R: BufRead>(reader: R, segmentation: &Segmentation) -> Result<SegmentLinks> {
    let mut links = SegmentLinks::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() != 4 {
            bail!(ParseError::Malformed { line: i + 1, reason: format!("expected 4 fields, found {}", fields.len()) });
        }
        let a = segmentation.segment_id(fields[0]).map_err(|e| with_line(e, i + 1))?;
        let b = segmentation.segment_id(fields[1]).map_err(|e| with_line(e, i + 1))?;
        let weight = |s: &str| {
            s.trim().parse::<f64>().map_err(|_| ParseError::Malformed {
                line: i + 1,
                reason: format!("`{}` is not a weight", s),
            })
        };
        links.add(a, b, StrandSupport::new(weight(fields[2])?, weight(fields[3])?));
    }
    Ok(links)
}

pub fn read_links_file(filename: &str, segmentation: &Segmentation) -> Result<SegmentLinks> {
    let file = File::open(filename)
        .map_err(|source| FileError::CannotOpen { source, filename: filename.into() })?;
    read_links(BufReader::new(file), segmentation)
        .with_context(|| anyhow!("while parsing {}", filename.yellow().bold()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEGMENTS: &str = "# two queries\nA\t0 10 25 40\n\nB\t5 6\n";

    #[test]
    fn parse_segments() {
        let s = Segmentation::from_reader(SEGMENTS.as_bytes()).unwrap();
        assert_eq!(s.registry().len(), 2);
        assert_eq!(s.segment_count(0), 3);
        assert_eq!(s.segment_count(1), 1);
        assert_eq!(s.length(0, 1), Some(15));
        assert_eq!(s.length(0, 3), None);

        let a = s.get(0).unwrap();
        assert_eq!(a.coordinates(2, Strand::Reverse), Some((40, 25)));
        assert_eq!(a.span(0, 1, Strand::Forward), Some((0, 25)));
        assert_eq!(a.span(2, 1, Strand::Reverse), Some((40, 10)));
    }

    #[test]
    fn reject_bad_segments() {
        assert!(Segmentation::from_reader("A\t0 10 10\n".as_bytes()).is_err());
        assert!(Segmentation::from_reader("A\t0 10\nA\t0 3\n".as_bytes()).is_err());
        assert!(Segmentation::from_reader("A 0 10\n".as_bytes()).is_err());
    }

    #[test]
    fn parse_links() {
        let s = Segmentation::from_reader(SEGMENTS.as_bytes()).unwrap();
        let links = read_links("A:1\tB:0\t2\t0.5\nB:0\tA:1\t1\t0\n".as_bytes(), &s).unwrap();
        assert_eq!(
            links.get(&SegmentId::new(0, 1), &SegmentId::new(1, 0)),
            Some(&StrandSupport::new(3., 0.5))
        );

        let e = read_links("A:1\tB:1\t1\t0\n".as_bytes(), &s).unwrap_err();
        assert_eq!(
            e.downcast_ref::<ParseError>(),
            Some(&ParseError::SegmentOutOfRange { query: "B".into(), segment: 1 })
        );
        let e = read_links("A:1\tC:0\t1\t0\n".as_bytes(), &s).unwrap_err();
        assert_eq!(e.downcast_ref::<ParseError>(), Some(&ParseError::UnknownQuery("C".into())));
    }
}
