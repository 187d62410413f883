//! # keel-core
//!
//! Foundation types and utilities shared by all Keel crates.
//!
//! This crate provides the vocabulary the rest of the runtime depends on:
//!
//! - **Branded IDs**: [`SessionId`](ids::SessionId), [`TaskId`](ids::TaskId),
//!   [`ManifestId`](ids::ManifestId) as newtypes for type safety
//! - **Lifecycle events**: the [`EventKind`](event::EventKind) enum hooks
//!   fire on
//! - **Action descriptors**: [`ActionDescriptor`](descriptor::ActionDescriptor),
//!   the normalized representation of a requested action used for rule matching
//! - **Patterns**: [`Pattern`](pattern::Pattern), the two rule pattern
//!   families (normalized prefix, path glob)
//! - **Token estimation**: [`estimate_tokens`](tokens::estimate_tokens)
//! - **Logging**: [`init_subscriber`](logging::init_subscriber) for `tracing`
//!   setup

#![deny(unsafe_code)]

pub mod descriptor;
pub mod event;
pub mod ids;
pub mod logging;
pub mod pattern;
pub mod tokens;
