//! Runtime system
//!
//! This module contains the fork-join scheduler.

pub mod scheduler;
