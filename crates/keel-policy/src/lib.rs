//! # keel-policy
//!
//! Permission rule engine for the Keel runtime.
//!
//! Classifies a requested action as allow/ask/deny by scanning the resolved
//! policy's rules. The scan order is the documented safety invariant:
//! all Deny rules are checked before any Ask rule, and all Ask rules before
//! any Allow rule, each scope scanned from highest to lowest tier. A
//! lower-tier Allow can therefore never unlock something an enterprise tier
//! explicitly denies, regardless of list order.
//!
//! A descriptor matched by no rule in any tier defaults to Ask.

#![deny(unsafe_code)]

pub mod engine;

pub use engine::{Classification, MatchedRule, RuleEngine};
