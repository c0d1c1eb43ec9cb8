#![cfg_attr(docsrs, feature(doc_cfg))]
//! Local execution of a two-party vertical federated regression task.
//!
//! Both parties run in the same process. Every payload still travels through its JSON wire form,
//! so a run exercises exactly what two remote parties would exchange:
//!
//! 1. the parties intersect their sample ids with [`federation::run_psi`] and align their tables,
//! 2. [`federation::train`] drives both [`vfl_core::Process`]es round by round,
//! 3. [`federation::predict`] scores new tables with the trained models.
//!
//! The [`settings`] module loads the task description, [`table`] reads and writes sample tables.
#[macro_use]
extern crate tracing;

pub mod federation;
pub mod settings;
pub mod table;
