//! batch-decomp
//!
//! Thin frontend over `decomp_core`: argument handling, logging setup and the
//! mapping from core errors to exit status live here; everything else is in
//! the library so it can be tested without a process boundary.

pub mod commands;
