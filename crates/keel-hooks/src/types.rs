//! Hook payload, verdict, and firing outcome types.
//!
//! [`EventPayload`] is what hooks receive on stdin (or in a prompt
//! delegation); [`Verdict`] is what they answer with; [`FiringOutcome`]
//! is the dispatcher's record of one complete event firing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keel_core::descriptor::ActionDescriptor;
use keel_core::event::EventKind;
use keel_core::ids::SessionId;

/// The structured payload delivered to every registration of one firing.
///
/// Serializes as a flat JSON object: `eventKind`, `sessionId`, an optional
/// `actionDescriptor`, and event-specific fields spliced in at the top
/// level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// The lifecycle point being fired.
    pub event_kind: EventKind,
    /// Owning session.
    pub session_id: SessionId,
    /// The action being attempted, when the event concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_descriptor: Option<ActionDescriptor>,
    /// Event-specific fields, flattened into the wire object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventPayload {
    /// Create a payload with no descriptor and no extra fields.
    #[must_use]
    pub fn new(event_kind: EventKind, session_id: SessionId) -> Self {
        Self {
            event_kind,
            session_id,
            action_descriptor: None,
            fields: Map::new(),
        }
    }

    /// Attach the action descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ActionDescriptor) -> Self {
        self.action_descriptor = Some(descriptor);
        self
    }

    /// Attach an event-specific field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.fields.insert(key.into(), value);
        self
    }

    /// Apply a hook's rewritten payload.
    ///
    /// The event kind and session identity are not rewritable; a rewrite
    /// may replace the action descriptor and the event-specific fields.
    /// Non-object rewrites are ignored.
    pub fn apply_rewrite(&mut self, rewrite: Value) {
        let Value::Object(mut map) = rewrite else {
            return;
        };
        let _ = map.remove("eventKind");
        let _ = map.remove("sessionId");
        if let Some(raw) = map.remove("actionDescriptor") {
            if let Ok(descriptor) = serde_json::from_value::<ActionDescriptor>(raw) {
                self.action_descriptor = Some(descriptor);
            }
        }
        for (key, value) in map {
            let _ = self.fields.insert(key, value);
        }
    }
}

/// A hook's structured answer.
///
/// Command hooks emit this as JSON on stdout; prompt evaluators return it
/// directly. An empty stdout from a zero-exit command is an implicit
/// proceed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Verdict {
    /// `false` blocks the operation (on a blocking registration).
    pub proceed: Option<bool>,
    /// Replacement payload visible to subsequent registrations and to the
    /// eventual action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_payload: Option<Value>,
    /// Human-readable explanation, surfaced on block and on warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verdict {
    /// A plain proceed with no rewrite and no message.
    #[must_use]
    pub fn proceed() -> Self {
        Self {
            proceed: Some(true),
            ..Self::default()
        }
    }

    /// A block with an explanation.
    #[must_use]
    pub fn block(message: impl Into<String>) -> Self {
        Self {
            proceed: Some(false),
            rewritten_payload: None,
            message: Some(message.into()),
        }
    }

    /// Whether this verdict asks to block.
    #[must_use]
    pub fn is_block(&self) -> bool {
        self.proceed == Some(false)
    }
}

/// How one registration's invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Disposition {
    /// Hook answered proceed (possibly implicitly).
    Proceeded,
    /// Hook answered proceed and rewrote the payload.
    Rewrote,
    /// Hook misbehaved (bad exit code, timeout, spawn failure) or asked to
    /// block from a non-blocking registration; execution continued.
    Warned {
        /// What went wrong.
        message: String,
    },
    /// Hook vetoed the operation; later registrations did not run.
    Blocked {
        /// The diagnostic surfaced to the model and the user.
        message: String,
    },
}

/// One registration's entry in the firing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    /// Registration name.
    pub name: String,
    /// How the invocation ended.
    pub disposition: Disposition,
    /// Wall-clock duration of the invocation.
    pub duration_ms: u64,
}

/// Terminal status of one event firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FiringStatus {
    /// Every matching registration ran (some may have warned).
    Completed,
    /// A blocking registration vetoed the operation.
    Blocked {
        /// Name of the vetoing registration.
        registration: String,
        /// The block diagnostic.
        message: String,
    },
}

/// The dispatcher's record of one complete event firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiringOutcome {
    /// Terminal status.
    pub status: FiringStatus,
    /// The payload after all rewrites, as the eventual action sees it.
    pub payload: EventPayload,
    /// Per-registration records, in execution order.
    pub records: Vec<RegistrationRecord>,
}

impl FiringOutcome {
    /// Whether the firing was vetoed.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self.status, FiringStatus::Blocked { .. })
    }

    /// The block diagnostic, if the firing was vetoed.
    #[must_use]
    pub fn block_message(&self) -> Option<&str> {
        match &self.status {
            FiringStatus::Blocked { message, .. } => Some(message),
            FiringStatus::Completed => None,
        }
    }

    /// Warning messages accumulated across registrations, in order.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|r| match &r.disposition {
                Disposition::Warned { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}
