//! Types shared between the scanner binary and anything that consumes its rows.

pub mod config;
pub mod record;
pub mod region;
