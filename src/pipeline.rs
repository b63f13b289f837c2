use std::fmt;
use std::str::FromStr;

use identity_hash::IntSet;
use log::*;

use crate::blocks::{FoldReport, PreCollinearBlocks};
use crate::chain::Chain;
use crate::dependency::MergeGraph;
use crate::errors::PhaseError;
use crate::merge::{LinkMergeManager, MergeReport, ProximityMerger};
use crate::model::QueryId;
use crate::ordering::{ChainOrderer, JoinReport};
use crate::records::{links_from_records, records_from_chains, BlockRecord};
use crate::segments::Segmentation;
use crate::strand::SegmentLinks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Link,
    Build,
    Merge,
    Proximity,
    Order,
    StrictOrder,
    Write,
}
impl Phase {
    pub const DEFAULT_SEQUENCE: &'static str = "link,build,strict-order,merge,proximity,order,write";
}
impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "link" => Ok(Phase::Link),
            "build" => Ok(Phase::Build),
            "merge" => Ok(Phase::Merge),
            "proximity" => Ok(Phase::Proximity),
            "order" => Ok(Phase::Order),
            "strict-order" => Ok(Phase::StrictOrder),
            "write" => Ok(Phase::Write),
            x => Err(format!("unknown phase `{}`", x)),
        }
    }
}
impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Link => "link",
            Phase::Build => "build",
            Phase::Merge => "merge",
            Phase::Proximity => "proximity",
            Phase::Order => "order",
            Phase::StrictOrder => "strict-order",
            Phase::Write => "write",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Names of the queries whose rearrangements weigh more.
    pub references: Vec<String>,
    /// Minimal best-strand support for a link to shape the initial blocks.
    pub min_link_support: f64,
    /// Minimal best-strand support for two blocks to be merged.
    pub min_merge_support: f64,
    /// Minimal ratio between mean segment lengths of sibling blocks.
    pub min_length_ratio: f64,
    pub insert_mode: bool,
}
impl Default for Settings {
    fn default() -> Self {
        Settings {
            references: Vec::new(),
            min_link_support: 1.,
            min_merge_support: 1.,
            min_length_ratio: 0.8,
            insert_mode: true,
        }
    }
}

/// Segments, evidence, and the chains built from them so far.
pub struct Pipeline {
    settings: Settings,
    segmentation: Segmentation,
    links: SegmentLinks,
    chains: Option<Vec<Chain>>,
}

impl Pipeline {
    pub fn new(mut segmentation: Segmentation, settings: Settings) -> Pipeline {
        for name in settings.references.iter() {
            if !segmentation.registry_mut().mark_reference(name) {
                warn!("reference {} is not a known query", name);
            }
        }
        Pipeline { settings, segmentation, links: SegmentLinks::new(), chains: None }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    pub fn links(&self) -> &SegmentLinks {
        &self.links
    }

    pub fn chains(&self) -> Option<&[Chain]> {
        self.chains.as_deref()
    }

    fn references(&self) -> IntSet<QueryId> {
        self.segmentation.registry().references().clone()
    }

    pub fn add_links(&mut self, links: &SegmentLinks) {
        self.links.extend(links);
    }

    pub fn add_records(&mut self, records: &[BlockRecord]) {
        self.links.extend(&links_from_records(records));
    }

    fn take_chains(&mut self, phase: Phase) -> Result<Vec<Chain>, PhaseError> {
        self.chains.take().ok_or(PhaseError::NotBuilt(phase))
    }

    /// Fold the links into blocks, every block starting as its own chain.
    pub fn build(&mut self) -> Result<FoldReport, PhaseError> {
        if self.chains.is_some() {
            return Err(PhaseError::AlreadyBuilt);
        }
        let mut blocks = PreCollinearBlocks::new();
        let report = blocks.fold_links(&self.links, self.settings.min_link_support);
        blocks.seed_singletons(&self.segmentation);
        let entries = blocks.to_entries();
        info!(
            "{} links folded into {} blocks ({} rejected, {} ignored)",
            report.accepted + report.created,
            entries.len(),
            report.rejected,
            report.ignored
        );
        self.chains = Some(entries.into_iter().enumerate().map(|(i, e)| Chain::singleton(i, e)).collect());
        Ok(report)
    }

    pub fn merge(&mut self) -> Result<MergeReport, PhaseError> {
        let chains = self.take_chains(Phase::Merge)?;
        let mut graph = MergeGraph::from_chains(chains);
        let report = LinkMergeManager::new(&graph, &self.links, self.settings.min_merge_support).run(&mut graph);
        info!(
            "{} blocks merged, {} chains reversed, {} candidates rejected",
            report.merged, report.reversed, report.rejected
        );
        self.chains = Some(graph.into_chains());
        Ok(report)
    }

    pub fn proximity(&mut self) -> Result<MergeReport, PhaseError> {
        let chains = self.take_chains(Phase::Proximity)?;
        let mut graph = MergeGraph::from_chains(chains);
        let report =
            ProximityMerger::new(&graph, &self.segmentation, self.settings.min_length_ratio).run(&mut graph);
        info!("{} sibling blocks merged, {} rejected", report.merged, report.rejected);
        self.chains = Some(graph.into_chains());
        Ok(report)
    }

    pub fn order(&mut self, strict: bool) -> Result<JoinReport, PhaseError> {
        let phase = if strict { Phase::StrictOrder } else { Phase::Order };
        let references = self.references();
        let chains = self.take_chains(phase)?;
        let mut orderer = ChainOrderer::new(chains, references, self.settings.insert_mode);
        let report = orderer.run(strict);
        let chains = orderer.into_chains();
        info!("{} joins, {} chains left", report.joins, chains.len());
        if report.halted {
            debug!("stopped on the first rearranging junction");
        }
        self.chains = Some(chains);
        Ok(report)
    }

    pub fn records(&self) -> Result<Vec<BlockRecord>, PhaseError> {
        self.chains
            .as_deref()
            .map(records_from_chains)
            .ok_or(PhaseError::NotBuilt(Phase::Write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        let segmentation = Segmentation::from_reader("A\t0 1 2\nB\t0 1 2\n".as_bytes()).unwrap();
        Pipeline::new(segmentation, Settings { references: vec!["B".into(), "Z".into()], ..Default::default() })
    }

    #[test]
    fn phases_parse() {
        let phases = Phase::DEFAULT_SEQUENCE
            .split(',')
            .map(Phase::from_str)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(phases.len(), 7);
        assert_eq!(phases[2], Phase::StrictOrder);
        assert!(phases.iter().all(|p| Phase::from_str(&p.to_string()) == Ok(*p)));
        assert!("shuffle".parse::<Phase>().is_err());
    }

    #[test]
    fn sequencing() {
        let mut p = pipeline();
        assert_eq!(p.merge().unwrap_err(), PhaseError::NotBuilt(Phase::Merge));
        assert_eq!(p.order(true).unwrap_err(), PhaseError::NotBuilt(Phase::StrictOrder));
        assert!(p.records().is_err());

        p.build().unwrap();
        assert_eq!(p.chains().map(|c| c.len()), Some(4));
        assert_eq!(p.build().unwrap_err(), PhaseError::AlreadyBuilt);
        assert!(p.merge().is_ok());
        assert!(p.references().contains(&1));
    }
}
