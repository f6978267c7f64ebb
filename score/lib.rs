#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod accumulate;
pub mod bits;
pub mod catalog;
pub mod config;
pub mod container;
pub mod error;
pub mod filter;
pub mod header;
pub mod materialize;
pub mod probability;
pub mod stats;
pub mod types;
pub mod weights;

pub use error::{BgenError, Result};
