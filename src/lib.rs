pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod disk;
pub mod error;
pub mod quorum;
pub mod region;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
