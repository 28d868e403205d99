//! Markten: recipes for repetitive multi-step chores.
//!
//! A recipe declares parameters and a sequence of steps. It is run once per
//! permutation of the parameter values; the actions of a step run
//! concurrently, and everything they set up is torn down in reverse.

pub mod actions;
pub mod cli;
pub mod core;
pub mod parameters;
pub mod progress;
