//! Parallel, distributed black-box parameter optimization.
//!
//! The crate is organized around four layers, from substrate to policy:
//! [`param`] (typed, adaptable parameter trees), [`candidate`] (a parameter
//! tree plus fitness and bookkeeping state), [`broker`]/[`executor`]
//! (where evaluation happens and how results are reassembled under
//! partial failure), and [`engine`]/[`algorithm`] (the generic iteration
//! loop and its evolutionary/swarm/scan/gradient-descent specializations).

pub mod algorithm;
pub mod broker;
pub mod candidate;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod param;
pub mod population;
pub mod postprocess;
pub mod registry;
pub mod rng;

pub use error::{OptimonError, Result};
