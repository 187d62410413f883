//! Sequential hook dispatch.
//!
//! One firing runs every matching registration in order (tier precedence,
//! then registration order within a tier). Dispatch is cooperative and
//! single-threaded: registration *i + 1* does not start until *i* finishes,
//! so a rewritten payload from *i* is what *i + 1* receives.
//!
//! Misbehavior never blocks. Timeouts, spawn failures, unreadable
//! verdicts, unexpected exit codes, and missing evaluators all downgrade
//! to warnings in the firing record; only an explicit block verdict from a
//! blocking registration vetoes the operation, and doing so short-circuits
//! the remaining registrations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use keel_settings::types::{EffectivePolicy, HookCallable, HookRegistration};

use crate::command::{self, Invocation};
use crate::errors::HookError;
use crate::prompt::PromptEvaluator;
use crate::types::{Disposition, EventPayload, FiringOutcome, FiringStatus, RegistrationRecord};

/// Dispatches lifecycle event firings to registered hooks.
pub struct HookDispatcher {
    /// Deadline applied when a registration does not set its own.
    default_timeout_ms: u64,
    /// Secondary-model seam for prompt hooks; absent means prompt hooks
    /// warn instead of running.
    prompt_evaluator: Option<Arc<dyn PromptEvaluator>>,
}

impl HookDispatcher {
    /// Create a dispatcher with the given default deadline.
    #[must_use]
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            default_timeout_ms,
            prompt_evaluator: None,
        }
    }

    /// Attach the host's prompt evaluator.
    #[must_use]
    pub fn with_prompt_evaluator(mut self, evaluator: Arc<dyn PromptEvaluator>) -> Self {
        self.prompt_evaluator = Some(evaluator);
        self
    }

    /// Fire one lifecycle event through every matching registration.
    pub async fn fire(&self, policy: &EffectivePolicy, mut payload: EventPayload) -> FiringOutcome {
        let event = payload.event_kind;
        let registrations = policy.hooks_for(event);
        let mut records = Vec::new();

        for registration in registrations {
            if !Self::matches(registration, &payload) {
                continue;
            }

            let effective_timeout = if registration.timeout_ms == 0 {
                self.default_timeout_ms
            } else {
                registration.timeout_ms
            };
            let blocking = registration.blocking || event.is_forced_blocking();

            let started = Instant::now();
            let result = self.invoke(registration, &payload, effective_timeout).await;
            let duration_ms =
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let disposition = match result {
                Ok(Invocation::Verdict(verdict)) if verdict.is_block() => {
                    if blocking {
                        let message = verdict.message.unwrap_or_else(|| {
                            format!("hook '{}' blocked the operation", registration.name)
                        });
                        warn!(
                            hook = %registration.name,
                            event = %event,
                            %message,
                            "Hook blocked the operation"
                        );
                        records.push(RegistrationRecord {
                            name: registration.name.clone(),
                            disposition: Disposition::Blocked {
                                message: message.clone(),
                            },
                            duration_ms,
                        });
                        return FiringOutcome {
                            status: FiringStatus::Blocked {
                                registration: registration.name.clone(),
                                message,
                            },
                            payload,
                            records,
                        };
                    }
                    // Observational registrations cannot veto.
                    Disposition::Warned {
                        message: format!(
                            "non-blocking hook '{}' asked to block; ignored",
                            registration.name
                        ),
                    }
                }
                Ok(Invocation::Verdict(verdict)) => {
                    if blocking {
                        if let Some(rewrite) = verdict.rewritten_payload {
                            debug!(hook = %registration.name, "Hook rewrote the payload");
                            payload.apply_rewrite(rewrite);
                            Disposition::Rewrote
                        } else {
                            Disposition::Proceeded
                        }
                    } else {
                        // Observational registrations cannot rewrite either.
                        Disposition::Proceeded
                    }
                }
                Ok(Invocation::Warning(message)) => {
                    warn!(hook = %registration.name, event = %event, %message, "Hook warning");
                    Disposition::Warned { message }
                }
                Err(err) => {
                    warn!(hook = %registration.name, event = %event, error = %err, "Hook failed");
                    Disposition::Warned {
                        message: err.to_string(),
                    }
                }
            };

            records.push(RegistrationRecord {
                name: registration.name.clone(),
                disposition,
                duration_ms,
            });
        }

        FiringOutcome {
            status: FiringStatus::Completed,
            payload,
            records,
        }
    }

    /// Whether a registration's matcher accepts this firing.
    ///
    /// No matcher matches every firing. A matcher on a firing without a
    /// descriptor never matches.
    fn matches(registration: &HookRegistration, payload: &EventPayload) -> bool {
        match (&registration.matcher, &payload.action_descriptor) {
            (None, _) => true,
            (Some(pattern), Some(descriptor)) => pattern.matches(descriptor),
            (Some(_), None) => false,
        }
    }

    /// Invoke one registration's callable under a deadline.
    async fn invoke(
        &self,
        registration: &HookRegistration,
        payload: &EventPayload,
        timeout_ms: u64,
    ) -> Result<Invocation, HookError> {
        match &registration.callable {
            HookCallable::Command { program, args } => {
                let payload_json =
                    serde_json::to_vec(payload).map_err(|source| HookError::Payload {
                        name: registration.name.clone(),
                        source,
                    })?;
                command::invoke(&registration.name, program, args, &payload_json, timeout_ms).await
            }
            HookCallable::Prompt { text } => {
                let Some(evaluator) = self.prompt_evaluator.as_ref() else {
                    return Err(HookError::NoEvaluator {
                        name: registration.name.clone(),
                    });
                };
                let deadline = Duration::from_millis(timeout_ms);
                match timeout(deadline, evaluator.evaluate(text, payload)).await {
                    Ok(Ok(verdict)) => Ok(Invocation::Verdict(verdict)),
                    Ok(Err(err)) => Err(HookError::Evaluator {
                        name: registration.name.clone(),
                        message: err.to_string(),
                    }),
                    Err(_elapsed) => Err(HookError::Timeout {
                        name: registration.name.clone(),
                        timeout_ms,
                    }),
                }
            }
        }
    }
}
