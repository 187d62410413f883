//! End-to-end session pipeline tests: hooks, permissions, capabilities,
//! tasks, and the context tracker wired together.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;

use keel_capabilities::{CapabilityLoader, scan_capsules};
use keel_context::UsageCategory;
use keel_core::descriptor::ActionDescriptor;
use keel_runtime::{ActionError, ActionExecutor, ActionOutcome, RuntimeError, Session};
use keel_settings::resolver::{PolicySource, resolve};
use keel_settings::types::{EffectivePolicy, SourceTier};
use keel_tasks::{ExecutionError, IsolatedContext, TaskExecutor, TaskRequest, TaskStatus};

struct EchoExecutor;

#[async_trait]
impl ActionExecutor for EchoExecutor {
    async fn execute(&self, descriptor: &ActionDescriptor) -> Result<String, ActionError> {
        Ok(format!("ran {descriptor}"))
    }
}

struct SleepyTaskExecutor;

#[async_trait]
impl TaskExecutor for SleepyTaskExecutor {
    async fn execute(
        &self,
        prompt: &str,
        _context: &IsolatedContext,
    ) -> Result<String, ExecutionError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(format!("task output for {prompt}"))
    }
}

fn policy_from(sources: &[(SourceTier, serde_json::Value)]) -> EffectivePolicy {
    let sources: Vec<PolicySource> = sources
        .iter()
        .map(|(tier, doc)| PolicySource::new(*tier, doc.to_string()))
        .collect();
    resolve(&sources).unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn pre_action_rewrite_flows_into_classification_and_execution() {
    // A sanitizing hook rewrites the path; the rule engine and the
    // executor must both see the rewritten descriptor.
    let rewrite = r#"echo '{"rewrittenPayload":{"actionDescriptor":{"kind":"path","path":"/workspace/out/report.clean"}}}'"#;
    let policy = policy_from(&[(
        SourceTier::Project,
        json!({
            "rules": [
                {"scope": "deny", "glob": "/workspace/raw/**"},
                {"scope": "allow", "glob": "/workspace/out/**"}
            ],
            "hooks": {"PreAction": [
                {"glob": "/workspace/raw/**", "command": ["/bin/sh", "-c", rewrite]}
            ]}
        }),
    )]);

    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    let outcome = session
        .attempt_action(ActionDescriptor::path("/workspace/raw/report"))
        .await
        .unwrap();

    assert_matches!(outcome, ActionOutcome::Executed { descriptor, output } => {
        assert_eq!(descriptor, ActionDescriptor::path("/workspace/out/report.clean"));
        assert_eq!(output, "ran path:/workspace/out/report.clean");
    });
}

#[cfg(unix)]
#[tokio::test]
async fn hook_block_halts_before_permissions_and_execution() {
    let policy = policy_from(&[(
        SourceTier::Project,
        json!({
            "rules": [{"scope": "allow", "prefix": "git"}],
            "hooks": {"PreAction": [
                {"prefix": "git push", "command": ["/bin/sh", "-c", "echo push to protected branch >&2; exit 2"]}
            ]}
        }),
    )]);

    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    let err = session
        .attempt_action(ActionDescriptor::command("git push origin main"))
        .await
        .unwrap_err();

    assert_matches!(err, RuntimeError::HookBlocked { message, .. } => {
        assert_eq!(message, "push to protected branch");
    });

    // The matcher does not catch other git commands.
    let outcome = session
        .attempt_action(ActionDescriptor::command("git status"))
        .await
        .unwrap();
    assert_matches!(outcome, ActionOutcome::Executed { .. });
}

#[tokio::test]
async fn enterprise_deny_beats_lower_tier_allows() {
    let policy = policy_from(&[
        (
            SourceTier::Enterprise,
            json!({"rules": [{"scope": "deny", "prefix": "git push"}]}),
        ),
        (
            SourceTier::Project,
            json!({"rules": [{"scope": "allow", "prefix": "git push"}]}),
        ),
        (
            SourceTier::User,
            json!({"rules": [{"scope": "allow", "prefix": "git push"}]}),
        ),
    ]);

    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    let err = session
        .attempt_action(ActionDescriptor::command("git push origin main"))
        .await
        .unwrap_err();
    assert_matches!(err, RuntimeError::PermissionDenied { tier: SourceTier::Enterprise, .. });
}

#[cfg(unix)]
#[tokio::test]
async fn misbehaving_hooks_never_wedge_the_session() {
    // A timing-out hook and a crashing hook both downgrade to warnings.
    let policy = policy_from(&[(
        SourceTier::Project,
        json!({
            "rules": [{"scope": "allow", "prefix": "ls"}],
            "hooks": {"PreAction": [
                {"command": ["/bin/sh", "-c", "sleep 5"], "timeoutMs": 50},
                {"command": ["/bin/sh", "-c", "exit 9"]}
            ]}
        }),
    )]);

    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    let outcome = session
        .attempt_action(ActionDescriptor::command("ls"))
        .await
        .unwrap();
    assert_matches!(outcome, ActionOutcome::Executed { .. });

    // The misbehavior still landed in the hook-history accounting.
    let report = session.report();
    let hook_history = report
        .categories
        .iter()
        .find(|c| c.category == UsageCategory::HookHistory)
        .unwrap();
    assert!(hook_history.tokens > 0);
}

#[cfg(unix)]
#[tokio::test]
async fn prompt_submission_rewrite_and_capability_trigger() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("pdf-tools");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("CAPSULE.md"),
        "---\nid: pdf-tools\ntrigger: working with PDF files\n---\nAlways use the pdf helper.",
    )
    .unwrap();

    let rewrite =
        r#"cat > /dev/null; echo '{"rewrittenPayload":{"prompt":"summarize the pdf politely"}}'"#;
    let policy = policy_from(&[(
        SourceTier::User,
        json!({
            "hooks": {"UserPromptSubmit": [
                {"command": ["/bin/sh", "-c", rewrite]}
            ]}
        }),
    )]);

    let scan = scan_capsules(tmp.path());
    let loader = CapabilityLoader::with_manifests(scan.manifests, 10_000);
    let mut session = Session::new(policy, Arc::new(EchoExecutor)).with_capabilities(loader);

    let final_text = session.submit_prompt("summarize the pdf").await.unwrap();
    assert_eq!(final_text, "summarize the pdf politely");

    // The trigger word promoted the capsule body and charged the budget.
    let report = session.report();
    let manifests = report
        .categories
        .iter()
        .find(|c| c.category == UsageCategory::Manifests)
        .unwrap();
    assert!(manifests.tokens > 0);
    assert!(session.capabilities().resident_tokens() > 0);
}

#[tokio::test]
async fn task_batch_reports_results_and_charges_tracker() {
    let policy = policy_from(&[]);
    let mut session =
        Session::new(policy, Arc::new(EchoExecutor)).with_task_executor(Arc::new(SleepyTaskExecutor));

    let results = session
        .run_tasks(vec![TaskRequest::new("alpha"), TaskRequest::new("beta")])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == TaskStatus::Done));
    assert_eq!(results[0].output.as_deref(), Some("task output for alpha"));

    let report = session.report();
    let task_results = report
        .categories
        .iter()
        .find(|c| c.category == UsageCategory::TaskResults)
        .unwrap();
    assert!(task_results.tokens > 0);
}

#[cfg(unix)]
#[tokio::test]
async fn compaction_signal_fires_once_and_precompact_hook_can_veto() {
    // Tiny budget so hook history crosses the threshold quickly.
    let policy = policy_from(&[(
        SourceTier::Local,
        json!({
            "tunables": {"contextBudgetTokens": 20, "compactionThreshold": 0.5},
            "hooks": {"PreCompact": [
                {"command": ["/bin/sh", "-c", "echo not now >&2; exit 2"]}
            ]}
        }),
    )]);

    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    let _ = session.submit_prompt("a prompt long enough to cross the tiny threshold")
        .await
        .unwrap();

    let signal = session.take_compaction_signal().unwrap();
    assert_eq!(signal.budget_tokens, 20);
    // Edge-triggered: no second signal while still over threshold.
    let _ = session.submit_prompt("more text").await.unwrap();
    assert!(session.take_compaction_signal().is_none());

    // The pre-compact hook vetoes the pass; tracked usage is untouched.
    let used_before = session.report().used_tokens;
    let err = session.compact(5).await.unwrap_err();
    assert_matches!(err, RuntimeError::HookBlocked { message, .. } => {
        assert_eq!(message, "not now");
    });
    assert!(session.report().used_tokens >= used_before);
}

#[tokio::test]
async fn session_open_close_fire_lifecycle_hooks() {
    let policy = policy_from(&[]);
    let mut session = Session::new(policy, Arc::new(EchoExecutor));
    session.open().await.unwrap();
    session.close().await.unwrap();
}
