pub mod blocks;
pub mod chain;
pub mod connection;
pub mod dependency;
pub mod display;
pub mod errors;
pub mod merge;
pub mod model;
pub mod ordering;
pub mod pipeline;
pub mod range_merge;
pub mod records;
pub mod segments;
pub mod strand;
