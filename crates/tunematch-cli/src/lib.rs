//! Support code for the `tunematch` command line tool

pub mod output;
