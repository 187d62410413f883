//! Token budget tracking and the compaction trigger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keel_core::ids::SessionId;

/// What a tracked chunk of context is spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageCategory {
    /// Promoted capability bodies and references.
    Manifests,
    /// Hook firing records and diagnostics.
    HookHistory,
    /// Delegated task outputs.
    TaskResults,
    /// Conversation messages.
    Messages,
}

impl UsageCategory {
    /// All categories, report order.
    #[must_use]
    pub fn all() -> &'static [UsageCategory] {
        &[
            Self::Manifests,
            Self::HookHistory,
            Self::TaskResults,
            Self::Messages,
        ]
    }
}

impl std::fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manifests => write!(f, "manifests"),
            Self::HookHistory => write!(f, "hookHistory"),
            Self::TaskResults => write!(f, "taskResults"),
            Self::Messages => write!(f, "messages"),
        }
    }
}

/// Why a compaction signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompactionReason {
    /// Usage crossed the configured threshold.
    ThresholdCrossed,
    /// The caller asked explicitly.
    Manual,
}

/// A request for the external compaction collaborator to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct CompactionSignal {
    /// Why it fired.
    pub reason: CompactionReason,
    /// Usage at the moment of firing.
    pub used_tokens: u64,
    /// The session budget.
    pub budget_tokens: u64,
}

/// One entry in the tracker's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEvent {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// What happened.
    pub kind: ContextEventKind,
}

/// Kinds of tracked history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContextEventKind {
    /// Tokens were recorded against a category.
    Recorded {
        /// Category charged.
        category: UsageCategory,
        /// Tokens added.
        tokens: u64,
    },
    /// A compaction signal fired.
    CompactionRequested {
        /// Why it fired.
        reason: CompactionReason,
    },
    /// The external collaborator reported compaction done.
    CompactionApplied {
        /// Tokens freed by the pass.
        reclaimed_tokens: u64,
    },
}

/// One category's line in the usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsage {
    /// Category.
    pub category: UsageCategory,
    /// Tokens spent on it.
    pub tokens: u64,
    /// Share of the total budget, 0–100.
    pub percent_of_budget: f64,
}

/// The `/context`-style usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    /// Session being reported.
    pub session_id: SessionId,
    /// Total tokens used.
    pub used_tokens: u64,
    /// Session budget.
    pub budget_tokens: u64,
    /// Usage as a fraction of budget, 0–1.
    pub usage_ratio: f64,
    /// Configured compaction threshold.
    pub compaction_threshold: f64,
    /// Per-category breakdown, fixed order.
    pub categories: Vec<CategoryUsage>,
}

/// Tracks one session's context spend against its budget.
#[derive(Debug)]
pub struct SessionTracker {
    session_id: SessionId,
    budget_tokens: u64,
    compaction_threshold: f64,
    used: HashMap<UsageCategory, u64>,
    history: Vec<ContextEvent>,
    /// Latched after a threshold signal fires; re-armed by compaction.
    threshold_signaled: bool,
}

impl SessionTracker {
    /// Create a tracker for one session.
    #[must_use]
    pub fn new(session_id: SessionId, budget_tokens: u64, compaction_threshold: f64) -> Self {
        Self {
            session_id,
            budget_tokens,
            compaction_threshold,
            used: HashMap::new(),
            history: Vec::new(),
            threshold_signaled: false,
        }
    }

    /// Total tokens recorded so far.
    #[must_use]
    pub fn used_tokens(&self) -> u64 {
        self.used.values().sum()
    }

    /// The session budget.
    #[must_use]
    pub fn budget_tokens(&self) -> u64 {
        self.budget_tokens
    }

    /// Usage as a fraction of budget; zero when the budget is zero.
    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        if self.budget_tokens == 0 {
            return 0.0;
        }
        self.used_tokens() as f64 / self.budget_tokens as f64
    }

    /// The tracked history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ContextEvent] {
        &self.history
    }

    /// Record tokens against a category.
    ///
    /// Returns a compaction signal when this record crosses the threshold.
    /// The signal is edge-triggered: once fired it will not fire again
    /// until compaction is applied, however far over threshold usage goes.
    pub fn record(&mut self, category: UsageCategory, tokens: u64) -> Option<CompactionSignal> {
        *self.used.entry(category).or_insert(0) += tokens;
        self.push_event(ContextEventKind::Recorded { category, tokens });
        debug!(
            session = %self.session_id,
            %category,
            tokens,
            used = self.used_tokens(),
            "Recorded context usage"
        );

        if self.threshold_signaled || self.usage_ratio() < self.compaction_threshold {
            return None;
        }

        self.threshold_signaled = true;
        warn!(
            session = %self.session_id,
            used = self.used_tokens(),
            budget = self.budget_tokens,
            threshold = self.compaction_threshold,
            "Context usage crossed the compaction threshold"
        );
        self.push_event(ContextEventKind::CompactionRequested {
            reason: CompactionReason::ThresholdCrossed,
        });
        Some(CompactionSignal {
            reason: CompactionReason::ThresholdCrossed,
            used_tokens: self.used_tokens(),
            budget_tokens: self.budget_tokens,
        })
    }

    /// Request compaction regardless of the threshold.
    pub fn request_compaction(&mut self) -> CompactionSignal {
        self.push_event(ContextEventKind::CompactionRequested {
            reason: CompactionReason::Manual,
        });
        CompactionSignal {
            reason: CompactionReason::Manual,
            used_tokens: self.used_tokens(),
            budget_tokens: self.budget_tokens,
        }
    }

    /// Absorb the result of an external compaction pass.
    ///
    /// All categories are cleared and the surviving summary is re-seeded
    /// under `Messages`. Re-arms the threshold trigger.
    pub fn apply_compaction(&mut self, summary_tokens: u64) {
        let before = self.used_tokens();
        self.used.clear();
        if summary_tokens > 0 {
            let _ = self.used.insert(UsageCategory::Messages, summary_tokens);
        }
        self.threshold_signaled = false;
        let reclaimed_tokens = before.saturating_sub(summary_tokens);
        self.push_event(ContextEventKind::CompactionApplied { reclaimed_tokens });
        debug!(
            session = %self.session_id,
            reclaimed = reclaimed_tokens,
            remaining = self.used_tokens(),
            "Compaction applied"
        );
    }

    /// Render the per-category usage report.
    #[must_use]
    pub fn report(&self) -> ContextReport {
        let categories = UsageCategory::all()
            .iter()
            .map(|&category| {
                let tokens = self.used.get(&category).copied().unwrap_or(0);
                let percent_of_budget = if self.budget_tokens == 0 {
                    0.0
                } else {
                    tokens as f64 / self.budget_tokens as f64 * 100.0
                };
                CategoryUsage {
                    category,
                    tokens,
                    percent_of_budget,
                }
            })
            .collect();

        ContextReport {
            session_id: self.session_id.clone(),
            used_tokens: self.used_tokens(),
            budget_tokens: self.budget_tokens,
            usage_ratio: self.usage_ratio(),
            compaction_threshold: self.compaction_threshold,
            categories,
        }
    }

    fn push_event(&mut self, kind: ContextEventKind) {
        self.history.push(ContextEvent {
            at: Utc::now(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(budget: u64, threshold: f64) -> SessionTracker {
        SessionTracker::new(SessionId::from("s-test"), budget, threshold)
    }

    #[test]
    fn test_record_accumulates_per_category() {
        let mut t = tracker(1_000, 0.9);
        let _ = t.record(UsageCategory::Messages, 100);
        let _ = t.record(UsageCategory::Messages, 50);
        let _ = t.record(UsageCategory::Manifests, 25);
        assert_eq!(t.used_tokens(), 175);

        let report = t.report();
        let messages = report
            .categories
            .iter()
            .find(|c| c.category == UsageCategory::Messages)
            .unwrap();
        assert_eq!(messages.tokens, 150);
        assert!((messages.percent_of_budget - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_signal_fires_exactly_once_per_crossing() {
        let mut t = tracker(100, 0.8);
        assert!(t.record(UsageCategory::Messages, 50).is_none());
        // Crossing 80 fires.
        let signal = t.record(UsageCategory::Messages, 40).unwrap();
        assert_eq!(signal.reason, CompactionReason::ThresholdCrossed);
        assert_eq!(signal.used_tokens, 90);
        // Still over threshold: no repeat fire.
        assert!(t.record(UsageCategory::Messages, 10).is_none());
        assert!(t.record(UsageCategory::TaskResults, 100).is_none());
    }

    #[test]
    fn test_compaction_rearms_the_trigger() {
        let mut t = tracker(100, 0.8);
        assert!(t.record(UsageCategory::Messages, 85).is_some());
        assert!(t.record(UsageCategory::Messages, 5).is_none());

        t.apply_compaction(10);
        assert_eq!(t.used_tokens(), 10);

        // A fresh crossing fires again.
        assert!(t.record(UsageCategory::Messages, 60).is_none());
        assert!(t.record(UsageCategory::Messages, 20).is_some());
    }

    #[test]
    fn test_exact_threshold_fires() {
        let mut t = tracker(100, 0.8);
        assert!(t.record(UsageCategory::Messages, 80).is_some());
    }

    #[test]
    fn test_manual_request_bypasses_threshold() {
        let mut t = tracker(100, 0.8);
        let _ = t.record(UsageCategory::Messages, 5);
        let signal = t.request_compaction();
        assert_eq!(signal.reason, CompactionReason::Manual);
        assert_eq!(signal.used_tokens, 5);
    }

    #[test]
    fn test_zero_budget_never_signals() {
        let mut t = tracker(0, 0.8);
        assert!(t.record(UsageCategory::Messages, 1_000).is_none());
        assert!((t.usage_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_preserves_order() {
        let mut t = tracker(100, 0.8);
        let _ = t.record(UsageCategory::Messages, 90);
        t.apply_compaction(0);

        let kinds: Vec<&ContextEventKind> = t.history().iter().map(|e| &e.kind).collect();
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[0], ContextEventKind::Recorded { .. }));
        assert!(matches!(
            kinds[1],
            ContextEventKind::CompactionRequested {
                reason: CompactionReason::ThresholdCrossed
            }
        ));
        assert!(matches!(
            kinds[2],
            ContextEventKind::CompactionApplied {
                reclaimed_tokens: 90
            }
        ));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let mut t = tracker(200, 0.85);
        let _ = t.record(UsageCategory::HookHistory, 40);
        let json = serde_json::to_value(t.report()).unwrap();
        assert_eq!(json["sessionId"], serde_json::json!("s-test"));
        assert_eq!(json["usedTokens"], serde_json::json!(40));
        assert_eq!(json["categories"][1]["category"], serde_json::json!("hookHistory"));
        assert_eq!(json["categories"][1]["percentOfBudget"], serde_json::json!(20.0));
    }
}
