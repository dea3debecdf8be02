// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Council Core
//!
//! Coordinates autonomous agent processes working on a shared project:
//! a planning → approval → execution workflow with separation-of-powers
//! signoff, bounded execution slots, single-flight QA validation and
//! crash-recoverable timeout monitoring.
//!
//! All shared state lives in whole JSON documents inside the project
//! directory and is mutated only under the per-project lock file, so any
//! number of independent processes may drive the same project.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements the coordination core used by the `council` CLI

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
