use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use indexmap::IndexMap;
use itertools::Itertools;
use log::*;

use crate::chain::Chain;
use crate::errors::{FileError, ParseError};
use crate::model::{QueryId, QueryRegistry, SegmentIndex, Strand};
use crate::segments::Segmentation;
use crate::strand::{SegmentId, SegmentLinks, StrandSupport};

/// A collinear run of segments on one query, as segment boundary indices:
/// `s-(e+1)F` covers `s..=e` forward, `(e+1)-sR` the same segments backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordField {
    pub query: QueryId,
    pub start: usize,
    pub stop: usize,
    pub strand: Strand,
}
impl RecordField {
    pub fn new(query: QueryId, first: SegmentIndex, last: SegmentIndex, strand: Strand) -> Self {
        match strand {
            Strand::Forward => RecordField { query, start: first, stop: last + 1, strand },
            Strand::Reverse => RecordField { query, start: first + 1, stop: last, strand },
        }
    }

    /// Covered segments, in reading order.
    pub fn segments(&self) -> Vec<SegmentIndex> {
        match self.strand {
            Strand::Forward => (self.start..self.stop).collect(),
            Strand::Reverse => (self.stop..self.start).rev().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub name: String,
    pub fields: Vec<RecordField>,
}

/// One record per collinear run of every chain.
pub fn records_from_chains(chains: &[Chain]) -> Vec<BlockRecord> {
    let mut r = Vec::new();
    for chain in chains {
        let runs = chain.collinear_runs();
        let split = runs.len() > 1;
        for (k, run) in runs.into_iter().enumerate() {
            let mut spans: IndexMap<QueryId, (SegmentIndex, SegmentIndex, Strand)> = Default::default();
            for e in &chain.entries()[run] {
                for (&q, g) in e.groups().iter() {
                    spans
                        .entry(q)
                        .and_modify(|span| span.1 = g.segment)
                        .or_insert((g.segment, g.segment, g.strand));
                }
            }
            r.push(BlockRecord {
                name: if split { format!("{}.{}", chain.id(), k + 1) } else { chain.id().to_string() },
                fields: spans
                    .into_iter()
                    .map(|(q, (first, last, strand))| RecordField::new(q, first, last, strand))
                    .collect(),
            });
        }
    }
    r
}

pub fn write_records<W: Write>(out: &mut W, records: &[BlockRecord], registry: &QueryRegistry) -> Result<()> {
    for record in records {
        writeln!(
            out,
            "{}\t{}",
            record.name,
            record
                .fields
                .iter()
                .map(|f| format!("{}:{}-{}{}", registry.name(f.query), f.start, f.stop, f.strand.marker()))
                .join(";")
        )?;
    }
    Ok(())
}

pub fn write_records_file(filename: &str, records: &[BlockRecord], registry: &QueryRegistry) -> Result<()> {
    let file = File::create(filename)
        .map_err(|source| FileError::WhileCreating { source, filename: filename.into() })?;
    let mut out = BufWriter::new(file);
    write_records(&mut out, records, registry)?;
    Ok(out.flush()?)
}

fn parse_field(token: &str, segmentation: &Segmentation, line: usize) -> Result<RecordField, ParseError> {
    let malformed = |reason: String| ParseError::Malformed { line, reason };
    let (name, span) = token
        .rsplit_once(':')
        .ok_or_else(|| malformed(format!("`{}` is not a query:start-stop field", token)))?;
    let query = segmentation
        .registry()
        .id(name)
        .ok_or_else(|| ParseError::UnknownQuery(name.to_owned()))?;

    let strand = span
        .chars()
        .last()
        .and_then(Strand::from_marker)
        .ok_or_else(|| malformed(format!("`{}` lacks a strand", token)))?;
    let (start, stop) = span[..span.len() - 1]
        .split_once('-')
        .ok_or_else(|| malformed(format!("`{}` is not a start-stop range", span)))?;
    let parse = |x: &str| x.parse::<usize>().map_err(|_| malformed(format!("`{}` is not a boundary", x)));
    let (start, stop) = (parse(start)?, parse(stop)?);

    let ordered = match strand {
        Strand::Forward => start < stop,
        Strand::Reverse => start > stop,
    };
    if !ordered {
        return Err(malformed(format!("`{}` runs against its strand", token)));
    }
    if start.max(stop) > segmentation.segment_count(query) {
        return Err(ParseError::SegmentOutOfRange { query: name.to_owned(), segment: start.max(stop) - 1 });
    }
    Ok(RecordField { query, start, stop, strand })
}

pub fn read_records<R: BufRead>(reader: R, segmentation: &Segmentation) -> Result<Vec<BlockRecord>> {
    let mut r = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, fields) = line.split_once('\t').ok_or_else(|| ParseError::Malformed {
            line: i + 1,
            reason: "expected a name and its fields".into(),
        })?;
        let fields = fields
            .split(';')
            .filter(|f| !f.is_empty())
            .map(|f| parse_field(f.trim(), segmentation, i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        r.push(BlockRecord { name: name.to_owned(), fields });
    }
    Ok(r)
}

pub fn read_records_file(filename: &str, segmentation: &Segmentation) -> Result<Vec<BlockRecord>> {
    let file = File::open(filename)
        .map_err(|source| FileError::CannotOpen { source, filename: filename.into() })?;
    read_records(BufReader::new(file), segmentation)
        .with_context(|| anyhow!("while parsing {}", filename.yellow().bold()))
}

/// Every pair of runs of a record covering as many segments aligns them one
/// to one, each aligned pair counting as a unit of evidence. Runs of
/// different lengths say nothing about which segments face each other and
/// are skipped.
pub fn links_from_records(records: &[BlockRecord]) -> SegmentLinks {
    let mut links = SegmentLinks::new();
    for record in records {
        for (a, b) in record.fields.iter().tuple_combinations() {
            if a.query == b.query {
                continue;
            }
            let (segments_a, segments_b) = (a.segments(), b.segments());
            if segments_a.len() != segments_b.len() {
                debug!(
                    "{}: runs on {} and {} differ in length, not used as evidence",
                    record.name, a.query, b.query
                );
                continue;
            }
            let support = StrandSupport::on(a.strand * b.strand, 1.);
            for (sa, sb) in segments_a.into_iter().zip(segments_b) {
                links.add(SegmentId::new(a.query, sa), SegmentId::new(b.query, sb), support);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupingEntry, SingleGroup};
    use pretty_assertions::assert_eq;

    fn segmentation() -> Segmentation {
        Segmentation::from_reader("A\t0 1 2 3 4\nB\t0 5 10 15 20\n".as_bytes()).unwrap()
    }

    #[test]
    fn boundary_indices() {
        let f = RecordField::new(0, 1, 2, Strand::Forward);
        assert_eq!((f.start, f.stop), (1, 3));
        assert_eq!(f.segments(), vec![1, 2]);
        let r = RecordField::new(0, 2, 1, Strand::Reverse);
        assert_eq!((r.start, r.stop), (3, 1));
        assert_eq!(r.segments(), vec![2, 1]);
    }

    #[test]
    fn runs_become_records() {
        let entries = [
            [(0, SingleGroup::forward(0)), (1, SingleGroup::new(3, Strand::Reverse))],
            [(0, SingleGroup::forward(1)), (1, SingleGroup::new(2, Strand::Reverse))],
            [(0, SingleGroup::forward(3)), (1, SingleGroup::new(1, Strand::Reverse))],
        ]
        .into_iter()
        .map(|groups| GroupingEntry::with_groups("e", groups.into_iter().collect()))
        .collect();
        let chain = Chain::from_entries(7, entries);
        let records = records_from_chains(&[chain]);

        let s = segmentation();
        let mut out = Vec::new();
        write_records(&mut out, &records, s.registry()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "7.1\tA:0-2F;B:4-2R\n7.2\tA:3-4F;B:2-1R\n");
    }

    #[test]
    fn parse_errors() {
        let s = segmentation();
        assert!(read_records("x\tA:0-2R\n".as_bytes(), &s).is_err());
        assert!(read_records("x\tA:0-5F\n".as_bytes(), &s).is_err());
        assert!(read_records("x\tC:0-1F\n".as_bytes(), &s).is_err());
        assert!(read_records("x\tA:0-1\n".as_bytes(), &s).is_err());
        assert!(read_records("x A:0-1F\n".as_bytes(), &s).is_err());
        assert_eq!(read_records("# nothing\n\n".as_bytes(), &s).unwrap(), vec![]);
    }

    #[test]
    fn uneven_runs_are_not_evidence() {
        let entries = [
            vec![(0, SingleGroup::forward(0)), (1, SingleGroup::forward(0))],
            vec![(0, SingleGroup::forward(1))],
            vec![(0, SingleGroup::forward(2)), (1, SingleGroup::forward(1))],
        ]
        .into_iter()
        .map(|groups| GroupingEntry::with_groups("e", groups.into_iter().collect()))
        .collect();
        let records = records_from_chains(&[Chain::from_entries(0, entries)]);

        let s = segmentation();
        let mut out = Vec::new();
        write_records(&mut out, &records, s.registry()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, "0\tA:0-3F;B:0-2F\n");

        let links = links_from_records(&read_records(out.as_bytes(), &s).unwrap());
        assert_eq!(links.get(&SegmentId::new(0, 1), &SegmentId::new(1, 1)), None);
        assert!(links.is_empty());
    }

    #[test]
    fn records_as_evidence() {
        let s = segmentation();
        let records = read_records("x\tA:0-2F;B:4-2R\n".as_bytes(), &s).unwrap();
        let links = links_from_records(&records);
        assert_eq!(links.len(), 2);
        assert_eq!(
            links.get(&SegmentId::new(0, 0), &SegmentId::new(1, 3)),
            Some(&StrandSupport::new(0., 1.))
        );
        assert_eq!(
            links.get(&SegmentId::new(0, 1), &SegmentId::new(1, 2)),
            Some(&StrandSupport::new(0., 1.))
        );
    }
}
