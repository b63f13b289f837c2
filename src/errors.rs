use colored::Colorize;
use thiserror::Error;

use crate::blocks::BlockId;
use crate::model::{QueryId, SegmentIndex};
use crate::pipeline::Phase;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("failed to open {}", .filename.bright_yellow().bold())]
    CannotOpen { source: std::io::Error, filename: String },

    #[error("while creating {}", .filename.bright_yellow().bold())]
    WhileCreating { source: std::io::Error, filename: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("unknown query {}", .0.yellow().bold())]
    UnknownQuery(String),

    #[error("query {} is defined twice", .0.yellow().bold())]
    DuplicateQuery(String),

    #[error("boundaries of {} are not strictly ascending", .0.yellow().bold())]
    UnsortedBoundaries(String),

    #[error("segment {segment} is out of range for {}", .query.yellow().bold())]
    SegmentOutOfRange { query: String, segment: usize },
}

/// Why a relation could not be folded into the current blocks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationError {
    #[error("block {block} would have to be read in both orientations")]
    AmbiguousOrientation { block: BlockId },

    #[error("query {query} is claimed by both blocks {first} and {second}")]
    QueryClaimedTwice {
        query: QueryId,
        first: BlockId,
        second: BlockId,
    },

    #[error("query {query} already sits on segment {existing}, not {proposed}")]
    SegmentConflict {
        query: QueryId,
        existing: SegmentIndex,
        proposed: SegmentIndex,
    },
}

/// Why two blocks of the dependency graph were not merged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRejection {
    #[error("block {0} does not exist anymore")]
    Dead(BlockId),

    #[error("a block can not be merged with itself")]
    SameBlock,

    #[error("blocks {0} and {1} share a query")]
    SharedQuery(BlockId, BlockId),

    #[error("merging {0} and {1} would create a cycle")]
    WouldCycle(BlockId, BlockId),

    #[error("{0} and {1} are reversed relative to each other within the same chain")]
    StrandConflict(BlockId, BlockId),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseError {
    #[error("blocks have already been built")]
    AlreadyBuilt,

    #[error("{} requires blocks to be built first", .0.to_string().yellow().bold())]
    NotBuilt(Phase),
}
