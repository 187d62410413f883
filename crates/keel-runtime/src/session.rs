//! Session lifecycle and the action pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use keel_capabilities::{CapabilityError, CapabilityLoader, LoadLevel, LoadedContent};
use keel_context::{CompactionSignal, ContextReport, SessionTracker, UsageCategory};
use keel_core::descriptor::ActionDescriptor;
use keel_core::event::EventKind;
use keel_core::ids::{ManifestId, SessionId};
use keel_core::pattern::Pattern;
use keel_core::tokens::estimate_tokens;
use keel_hooks::{EventPayload, FiringOutcome, FiringStatus, HookDispatcher, PromptEvaluator};
use keel_policy::{MatchedRule, RuleEngine};
use keel_settings::types::{EffectivePolicy, RuleScope};
use keel_tasks::{IsolatedContext, TaskExecutor, TaskOrchestrator, TaskRequest, TaskResult};

use crate::errors::RuntimeError;

/// Opaque failure executing an approved action.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Host-provided execution of an allowed action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the action and return its textual output.
    async fn execute(&self, descriptor: &ActionDescriptor) -> Result<String, ActionError>;
}

/// What an attempted action came to.
#[derive(Debug)]
pub enum ActionOutcome {
    /// The action was allowed and ran; the descriptor reflects any hook
    /// rewrites applied before execution.
    Executed {
        /// The descriptor that actually executed.
        descriptor: ActionDescriptor,
        /// Executor output.
        output: String,
    },
    /// The action needs manual approval before it may run.
    NeedsApproval {
        /// The descriptor awaiting approval (post-rewrite).
        descriptor: ActionDescriptor,
        /// The Ask rule that matched, or `None` for the unmatched default.
        rule: Option<MatchedRule>,
    },
}

/// One live session: policy, hooks, capabilities, tasks, and context.
pub struct Session {
    id: SessionId,
    policy: EffectivePolicy,
    dispatcher: HookDispatcher,
    capabilities: CapabilityLoader,
    tracker: SessionTracker,
    executor: Arc<dyn ActionExecutor>,
    tasks: Option<TaskOrchestrator>,
    root_context: IsolatedContext,
    pending_compaction: Option<CompactionSignal>,
}

impl Session {
    /// Create a session over a resolved policy.
    #[must_use]
    pub fn new(policy: EffectivePolicy, executor: Arc<dyn ActionExecutor>) -> Self {
        let id = SessionId::new();
        let tunables = policy.tunables().clone();
        Self {
            tracker: SessionTracker::new(
                id.clone(),
                tunables.context_budget_tokens,
                tunables.compaction_threshold,
            ),
            dispatcher: HookDispatcher::new(tunables.hook_timeout_ms),
            capabilities: CapabilityLoader::new(tunables.capability_budget_tokens),
            id,
            policy,
            executor,
            tasks: None,
            root_context: IsolatedContext::default(),
            pending_compaction: None,
        }
    }

    /// Replace the capability loader (e.g. seeded from a capsule scan).
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityLoader) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Attach the host's prompt evaluator for prompt hooks.
    #[must_use]
    pub fn with_prompt_evaluator(mut self, evaluator: Arc<dyn PromptEvaluator>) -> Self {
        self.dispatcher = HookDispatcher::new(self.policy.tunables().hook_timeout_ms)
            .with_prompt_evaluator(evaluator);
        self
    }

    /// Attach a task executor, enabling delegated batches at the policy's
    /// concurrency cap.
    #[must_use]
    pub fn with_task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.tasks = Some(TaskOrchestrator::new(
            executor,
            self.policy.tunables().task_cap,
        ));
        self
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The resolved policy this session operates under.
    #[must_use]
    pub fn policy(&self) -> &EffectivePolicy {
        &self.policy
    }

    /// Fire session-start hooks.
    pub async fn open(&mut self) -> Result<(), RuntimeError> {
        let payload = EventPayload::new(EventKind::SessionStart, self.id.clone());
        let outcome = self.dispatcher.fire(&self.policy, payload).await;
        self.ingest_firing(&outcome);
        Self::require_unblocked(outcome)
    }

    /// Fire session-end hooks.
    pub async fn close(&mut self) -> Result<(), RuntimeError> {
        let payload = EventPayload::new(EventKind::SessionEnd, self.id.clone());
        let outcome = self.dispatcher.fire(&self.policy, payload).await;
        self.ingest_firing(&outcome);
        Self::require_unblocked(outcome)
    }

    /// Submit a user prompt.
    ///
    /// Fires `UserPromptSubmit` hooks (which may veto or rewrite the
    /// prompt), then lazily promotes any capability the final prompt text
    /// triggers. Returns the prompt as the model should see it.
    pub async fn submit_prompt(&mut self, text: &str) -> Result<String, RuntimeError> {
        let payload = EventPayload::new(EventKind::UserPromptSubmit, self.id.clone())
            .with_field("prompt", json!(text));
        let outcome = self.dispatcher.fire(&self.policy, payload).await;
        self.ingest_firing(&outcome);
        if let FiringStatus::Blocked {
            registration,
            message,
        } = outcome.status
        {
            return Err(RuntimeError::HookBlocked {
                registration,
                message,
            });
        }

        let final_text = outcome
            .payload
            .fields
            .get("prompt")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(text)
            .to_string();
        self.record_usage(UsageCategory::Messages, estimate_tokens(&final_text));

        for manifest_id in self.capabilities.triggered_by(&final_text) {
            match self.capabilities.ensure_loaded(&manifest_id, &LoadLevel::Body) {
                Ok(content) if content.newly_loaded => {
                    self.record_usage(UsageCategory::Manifests, content.tokens);
                }
                Ok(_) => {}
                Err(CapabilityError::BudgetExceeded { .. }) => {
                    // Fail closed but keep the session going; the host can
                    // compact and retry explicitly.
                    warn!(id = %manifest_id, "Capability left unloaded: budget exceeded");
                }
                Err(err) => warn!(id = %manifest_id, error = %err, "Capability promotion failed"),
            }
        }

        Ok(final_text)
    }

    /// Attempt an action through the full pipeline: pre-action hooks,
    /// permission classification, execution, post-action hooks.
    pub async fn attempt_action(
        &mut self,
        descriptor: ActionDescriptor,
    ) -> Result<ActionOutcome, RuntimeError> {
        let payload = EventPayload::new(EventKind::PreAction, self.id.clone())
            .with_descriptor(descriptor.clone());
        let outcome = self.dispatcher.fire(&self.policy, payload).await;
        self.ingest_firing(&outcome);
        if let FiringStatus::Blocked {
            registration,
            message,
        } = outcome.status
        {
            return Err(RuntimeError::HookBlocked {
                registration,
                message,
            });
        }

        // Hook rewrites are what the rule engine and the executor see.
        let descriptor = outcome.payload.action_descriptor.unwrap_or(descriptor);

        let classification = RuleEngine::classify(&self.policy, &descriptor);
        match (classification.scope, classification.matched) {
            (RuleScope::Deny, Some(rule)) => Err(RuntimeError::PermissionDenied {
                pattern: rule.pattern,
                tier: rule.tier,
            }),
            // The engine never denies without a matching rule; treat a
            // rule-less deny as the unmatched default instead.
            (RuleScope::Deny, None) | (RuleScope::Ask, None) => Ok(ActionOutcome::NeedsApproval {
                descriptor,
                rule: None,
            }),
            (RuleScope::Ask, rule) => Ok(ActionOutcome::NeedsApproval { descriptor, rule }),
            (RuleScope::Allow, _) => {
                let output = self.run_executor(&descriptor).await?;
                Ok(ActionOutcome::Executed { descriptor, output })
            }
        }
    }

    /// Execute an action the host has manually approved (the Ask path).
    ///
    /// Skips re-classification; pre-action hooks already ran when the
    /// action was first attempted.
    pub async fn execute_approved(
        &mut self,
        descriptor: ActionDescriptor,
    ) -> Result<String, RuntimeError> {
        self.run_executor(&descriptor).await
    }

    /// Append a one-off Allow grant at the runtime-override tier.
    pub fn grant_once(&mut self, pattern: Pattern) {
        self.policy.grant_once(pattern);
    }

    /// Explicitly promote a capability and account for its tokens.
    pub fn load_capability(
        &mut self,
        id: &ManifestId,
        level: &LoadLevel,
    ) -> Result<LoadedContent, RuntimeError> {
        let content = self.capabilities.ensure_loaded(id, level)?;
        if content.newly_loaded {
            self.record_usage(UsageCategory::Manifests, content.tokens);
        }
        Ok(content)
    }

    /// The capability loader's enumeration and state.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityLoader {
        &self.capabilities
    }

    /// Run a batch of delegated tasks.
    ///
    /// Tasks see a read-only world: each gets only the context its request
    /// carried, and results are folded back into this session's tracker.
    pub async fn run_tasks(
        &mut self,
        requests: Vec<TaskRequest>,
    ) -> Result<Vec<TaskResult>, RuntimeError> {
        let Some(orchestrator) = &self.tasks else {
            return Err(RuntimeError::NoTaskExecutor);
        };
        let results = orchestrator.run_batch(&self.root_context, requests).await?;

        let tokens: u64 = results
            .iter()
            .filter_map(|r| r.output.as_deref())
            .map(estimate_tokens)
            .sum();
        self.record_usage(UsageCategory::TaskResults, tokens);
        Ok(results)
    }

    /// Run a compaction pass: fire pre-compact hooks, then tell the
    /// tracker what survived.
    ///
    /// `summary_tokens` is the size of the summary produced by the
    /// external compaction collaborator.
    pub async fn compact(&mut self, summary_tokens: u64) -> Result<(), RuntimeError> {
        let payload = EventPayload::new(EventKind::PreCompact, self.id.clone());
        let outcome = self.dispatcher.fire(&self.policy, payload).await;
        self.ingest_firing(&outcome);
        Self::require_unblocked(outcome)?;

        self.tracker.apply_compaction(summary_tokens);
        self.pending_compaction = None;
        Ok(())
    }

    /// Request compaction regardless of the threshold.
    pub fn request_compaction(&mut self) -> CompactionSignal {
        let signal = self.tracker.request_compaction();
        self.pending_compaction = Some(signal.clone());
        signal
    }

    /// Take the pending compaction signal, if one fired since last asked.
    pub fn take_compaction_signal(&mut self) -> Option<CompactionSignal> {
        self.pending_compaction.take()
    }

    /// The `/context`-style usage report.
    #[must_use]
    pub fn report(&self) -> ContextReport {
        self.tracker.report()
    }

    async fn run_executor(&mut self, descriptor: &ActionDescriptor) -> Result<String, RuntimeError> {
        let result = self.executor.execute(descriptor).await;
        debug!(descriptor = %descriptor, ok = result.is_ok(), "Action executed");

        let mut post = EventPayload::new(EventKind::PostAction, self.id.clone())
            .with_descriptor(descriptor.clone());
        post = match &result {
            Ok(output) => post.with_field("output", json!(output)),
            Err(err) => post.with_field("error", json!(err.to_string())),
        };
        let outcome = self.dispatcher.fire(&self.policy, post).await;
        self.ingest_firing(&outcome);

        match result {
            Ok(output) => {
                self.record_usage(UsageCategory::Messages, estimate_tokens(&output));
                Ok(output)
            }
            Err(err) => Err(RuntimeError::ActionFailed(err.to_string())),
        }
    }

    /// Fold a hook firing into the context tracker.
    fn ingest_firing(&mut self, outcome: &FiringOutcome) {
        if outcome.records.is_empty() {
            return;
        }
        let serialized = serde_json::to_string(&outcome.records).unwrap_or_default();
        self.record_usage(UsageCategory::HookHistory, estimate_tokens(&serialized));
    }

    fn record_usage(&mut self, category: UsageCategory, tokens: u64) {
        if tokens == 0 {
            return;
        }
        if let Some(signal) = self.tracker.record(category, tokens) {
            self.pending_compaction = Some(signal);
        }
    }

    fn require_unblocked(outcome: FiringOutcome) -> Result<(), RuntimeError> {
        match outcome.status {
            FiringStatus::Completed => Ok(()),
            FiringStatus::Blocked {
                registration,
                message,
            } => Err(RuntimeError::HookBlocked {
                registration,
                message,
            }),
        }
    }
}
