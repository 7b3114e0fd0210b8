//! CLI subcommands

pub mod positions;
pub mod run;
