//! Policy source resolution.
//!
//! Resolution flow:
//! 1. Parse each tier's JSON document ([`PolicyDocument`]).
//! 2. Compile rule and hook entries, tagging each with its tier.
//! 3. Deep-merge scalar tunables from lowest to highest precedence, so the
//!    highest tier that sets a field wins.
//! 4. Apply environment variable overrides (operator escape hatch).
//!
//! A malformed enterprise source or entry is fatal. In lower tiers a
//! malformed source is dropped with a warning and a malformed entry is
//! skipped with a warning; the session still starts.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use keel_core::event::EventKind;
use keel_core::pattern::Pattern;

use crate::errors::ConfigError;
use crate::types::{
    EffectivePolicy, HookCallable, HookRegistration, HookSpec, PermissionRule, PolicyDocument,
    RuleSpec, RuntimeTunables, SourceTier,
};

/// One configuration source: a tier tag plus its raw JSON document.
#[derive(Debug, Clone)]
pub struct PolicySource {
    /// Tier this document belongs to.
    pub tier: SourceTier,
    /// Raw JSON text.
    pub document: String,
}

impl PolicySource {
    /// Create a source from a tier and raw JSON text.
    #[must_use]
    pub fn new(tier: SourceTier, document: impl Into<String>) -> Self {
        Self {
            tier,
            document: document.into(),
        }
    }

    /// Read a source document from disk.
    ///
    /// An unreadable file gets the same treatment as unparseable text: fatal
    /// for the enterprise tier, warn-and-drop below it (the resolver sees it
    /// as a malformed source).
    pub fn from_file(tier: SourceTier, path: &std::path::Path) -> Result<Self, ConfigError> {
        let document =
            std::fs::read_to_string(path).map_err(|err| ConfigError::MalformedSource {
                tier,
                message: format!("{}: {err}", path.display()),
            })?;
        Ok(Self { tier, document })
    }
}

/// Resolve an ordered list of policy sources into one [`EffectivePolicy`].
///
/// Sources may arrive in any order; tier tags decide precedence. Multiple
/// sources for the same tier concatenate in the order given.
pub fn resolve(sources: &[PolicySource]) -> Result<EffectivePolicy, ConfigError> {
    let mut parsed: Vec<(SourceTier, PolicyDocument)> = Vec::new();

    for source in sources {
        match serde_json::from_str::<PolicyDocument>(&source.document) {
            Ok(doc) => parsed.push((source.tier, doc)),
            Err(err) if source.tier == SourceTier::Enterprise => {
                return Err(ConfigError::MalformedSource {
                    tier: source.tier,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                warn!(tier = %source.tier, error = %err, "Dropping malformed policy source");
            }
        }
    }

    // Stable sort: highest precedence first, original order within a tier.
    parsed.sort_by_key(|(tier, _)| tier.precedence());

    let mut rules: Vec<PermissionRule> = Vec::new();
    let mut hooks: HashMap<EventKind, Vec<HookRegistration>> = HashMap::new();

    for (tier, doc) in &parsed {
        collect_rules(*tier, &doc.rules, &mut rules)?;
        collect_hooks(*tier, &doc.hooks, &mut hooks)?;
    }

    let tunables = merge_tunables(&parsed)?;
    let policy = EffectivePolicy::from_parts(rules, hooks, tunables);

    debug!(
        rule_count = policy.rules().len(),
        hook_count = policy.hook_count(),
        "Policy resolved"
    );

    Ok(policy)
}

/// Compile one tier's rule specs, appending to the flattened list.
fn collect_rules(
    tier: SourceTier,
    specs: &[RuleSpec],
    out: &mut Vec<PermissionRule>,
) -> Result<(), ConfigError> {
    for spec in specs {
        match compile_rule(tier, spec) {
            Ok(rule) => out.push(rule),
            Err(err) if tier == SourceTier::Enterprise => return Err(err),
            Err(err) => warn!(tier = %tier, error = %err, "Skipping invalid rule"),
        }
    }
    Ok(())
}

/// Compile a single rule spec into a [`PermissionRule`].
fn compile_rule(tier: SourceTier, spec: &RuleSpec) -> Result<PermissionRule, ConfigError> {
    let pattern = compile_pattern(spec.prefix.as_deref(), spec.glob.as_deref())
        .map_err(|message| ConfigError::InvalidRule { tier, message })?;
    Ok(PermissionRule {
        scope: spec.scope,
        pattern,
        tier,
    })
}

/// Compile one tier's hook specs, appending per-event.
fn collect_hooks(
    tier: SourceTier,
    specs: &HashMap<EventKind, Vec<HookSpec>>,
    out: &mut HashMap<EventKind, Vec<HookRegistration>>,
) -> Result<(), ConfigError> {
    // Deterministic event order so default names are stable across runs.
    for event in EventKind::all() {
        let Some(entries) = specs.get(event) else {
            continue;
        };
        for (index, spec) in entries.iter().enumerate() {
            match compile_hook(tier, *event, index, spec) {
                Ok(registration) => out.entry(*event).or_default().push(registration),
                Err(err) if tier == SourceTier::Enterprise => return Err(err),
                Err(err) => {
                    warn!(tier = %tier, event = %event, error = %err, "Skipping invalid hook");
                }
            }
        }
    }
    Ok(())
}

/// Compile a single hook spec into a [`HookRegistration`].
fn compile_hook(
    tier: SourceTier,
    event: EventKind,
    index: usize,
    spec: &HookSpec,
) -> Result<HookRegistration, ConfigError> {
    let callable = match (&spec.command, &spec.prompt) {
        (Some(command), None) => {
            let Some((program, args)) = command.split_first() else {
                return Err(ConfigError::InvalidHook {
                    tier,
                    message: "command must name a program".to_string(),
                });
            };
            HookCallable::Command {
                program: program.clone(),
                args: args.to_vec(),
            }
        }
        (None, Some(text)) => HookCallable::Prompt { text: text.clone() },
        _ => {
            return Err(ConfigError::InvalidHook {
                tier,
                message: "exactly one of command or prompt must be set".to_string(),
            });
        }
    };

    let matcher = match (&spec.prefix, &spec.glob) {
        (None, None) => None,
        (prefix, glob) => Some(
            compile_pattern(prefix.as_deref(), glob.as_deref())
                .map_err(|message| ConfigError::InvalidHook { tier, message })?,
        ),
    };

    Ok(HookRegistration {
        name: spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{tier}:{event}:{index}")),
        event,
        matcher,
        callable,
        timeout_ms: spec.timeout_ms.unwrap_or(0),
        blocking: spec.blocking,
        tier,
    })
}

/// Compile a prefix/glob pair into a pattern, requiring exactly one.
fn compile_pattern(prefix: Option<&str>, glob: Option<&str>) -> Result<Pattern, String> {
    match (prefix, glob) {
        (Some(prefix), None) => Ok(Pattern::prefix(prefix)),
        (None, Some(glob)) => Pattern::path_glob(glob).map_err(|e| e.to_string()),
        _ => Err("exactly one of prefix or glob must be set".to_string()),
    }
}

/// Merge tunables across tiers, lowest precedence first, then env overrides.
///
/// Each tier's fragment is validated on its own before it is allowed into
/// the merge: a type-invalid fragment is fatal at the enterprise tier and
/// warn-and-skip below it, matching how whole malformed sources are
/// treated.
fn merge_tunables(
    parsed: &[(SourceTier, PolicyDocument)],
) -> Result<RuntimeTunables, ConfigError> {
    let defaults = serde_json::to_value(RuntimeTunables::default())?;
    let mut merged = defaults.clone();

    // parsed is sorted highest-precedence-first; merge in reverse so a
    // higher tier's value lands last and wins.
    for (tier, doc) in parsed.iter().rev() {
        if doc.tunables.is_null() {
            continue;
        }
        let trial = deep_merge(defaults.clone(), doc.tunables.clone());
        match serde_json::from_value::<RuntimeTunables>(trial) {
            Ok(_) => merged = deep_merge(merged, doc.tunables.clone()),
            Err(err) if *tier == SourceTier::Enterprise => {
                return Err(ConfigError::Tunables(err));
            }
            Err(err) => {
                warn!(tier = %tier, error = %err, "Skipping invalid tunables fragment");
            }
        }
    }

    let mut tunables: RuntimeTunables = serde_json::from_value(merged)?;
    apply_env_overrides(&mut tunables);
    Ok(tunables)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to merged tunables.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored (fall back to file/default).
pub fn apply_env_overrides(tunables: &mut RuntimeTunables) {
    if let Some(v) = read_env_usize("KEEL_TASK_CAP", 1, 100) {
        tunables.task_cap = v;
    }
    if let Some(v) = read_env_u64("KEEL_HOOK_TIMEOUT_MS", 100, 600_000) {
        tunables.hook_timeout_ms = v;
    }
    if let Some(v) = read_env_f64("KEEL_COMPACTION_THRESHOLD", 0.1, 0.99) {
        tunables.compaction_threshold = v;
    }
    if let Some(v) = read_env_u64("KEEL_CAPABILITY_BUDGET_TOKENS", 1024, 10_000_000) {
        tunables.capability_budget_tokens = v;
    }
    if let Some(v) = read_env_u64("KEEL_CONTEXT_BUDGET_TOKENS", 1024, 100_000_000) {
        tunables.context_budget_tokens = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
