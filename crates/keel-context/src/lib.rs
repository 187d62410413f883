//! # keel-context
//!
//! Session/context budget tracking.
//!
//! The tracker accumulates token usage per category (capability manifests,
//! hook history, task results, messages) against a session budget. When
//! usage crosses the configured compaction threshold it emits a single
//! `CompactionRequested` signal per crossing — compaction itself is an
//! external collaborator's job; the tracker only triggers it and is told
//! afterwards what survived. Manual compaction requests bypass the
//! threshold entirely.
//!
//! It also renders a `/context`-style report: a per-category breakdown of
//! what is consuming the budget, serialized camelCase for the host.

#![deny(unsafe_code)]

pub mod tracker;

pub use tracker::{
    CategoryUsage, CompactionReason, CompactionSignal, ContextEvent, ContextEventKind,
    ContextReport, SessionTracker, UsageCategory,
};
