//! Pieces of the `relayout` driver: command line enums and verified end-to-end runs.

pub mod parsers;
pub mod runs;
