//! End-to-end tests through the dispatcher: plan gate → validation →
//! permission gate → tool → bookkeeping.

use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;
use tricode_tools::config::ToolsConfig;
use tricode_tools::{
    AgentContext, ConfirmationStrategy, Decision, Dispatcher, PermissionGate, ToolOutcome,
};
use tricode_types::ConversationId;

struct Harness {
    dir: TempDir,
    ctx: AgentContext,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();
        let gate = PermissionGate::new(ConfirmationStrategy::fixed(Decision::AllowOnce));
        let dispatcher = Dispatcher::new(gate).unwrap();
        Self {
            dir,
            ctx,
            dispatcher,
        }
    }

    async fn call(&mut self, name: &str, args: Value) -> ToolOutcome {
        self.dispatcher
            .execute(&mut self.ctx, name, args)
            .await
            .unwrap()
    }

    async fn skip_plan(&mut self) {
        let outcome = self.call("plan", json!({"action": "skip"})).await;
        assert!(outcome.ok, "{}", outcome.result);
    }

    fn write(&self, name: &str, content: &str) {
        std::fs::write(self.dir.path().join(name), content).unwrap();
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap()
    }
}

#[tokio::test]
async fn plan_gate_blocks_until_skip() {
    let mut h = Harness::new();
    h.write("notes.txt", "hello\n");

    let blocked = h.call("read_file", json!({"path": "notes.txt"})).await;
    assert!(!blocked.ok);
    assert!(blocked.result.contains("plan(action='create'"));
    assert!(blocked.result.contains("plan(action='skip')"));

    h.skip_plan().await;
    let read = h.call("read_file", json!({"path": "notes.txt"})).await;
    assert!(read.ok);
    assert_eq!(read.result, "hello\n");
}

#[tokio::test]
async fn unique_anchor_replace_produces_diff() {
    let mut h = Harness::new();
    h.skip_plan().await;
    h.write("f.txt", "alpha\nfoo\nomega\n");

    let outcome = h
        .call(
            "edit_file",
            json!({
                "path": "f.txt",
                "hunks": [{
                    "op": "replace",
                    "anchor": {"type": "exact", "pattern": "foo"},
                    "content": "bar"
                }]
            }),
        )
        .await;
    assert!(outcome.ok, "{}", outcome.result);

    let result: Value = serde_json::from_str(&outcome.result).unwrap();
    assert_eq!(result["applied"], true);
    let diff = result["diff"].as_str().unwrap();
    assert!(diff.lines().any(|l| l == "-foo"));
    assert!(diff.lines().any(|l| l == "+bar"));
    assert_eq!(result["matches"][0]["start_line"], 2);
    assert_eq!(h.read("f.txt"), "alpha\nbar\nomega\n");
}

#[tokio::test]
async fn ambiguous_anchor_leaves_file_unchanged() {
    let mut h = Harness::new();
    h.skip_plan().await;
    h.write("f.txt", "foo\nfoo\n");

    let outcome = h
        .call(
            "edit_file",
            json!({
                "path": "f.txt",
                "hunks": [{
                    "op": "replace",
                    "anchor": {"type": "exact", "pattern": "foo"},
                    "content": "bar"
                }]
            }),
        )
        .await;
    assert!(!outcome.ok);
    assert!(outcome.result.contains("ambiguous anchor"));
    assert_eq!(h.read("f.txt"), "foo\nfoo\n");
}

#[tokio::test]
async fn anchor_without_type_fails_schema_validation() {
    let mut h = Harness::new();
    h.skip_plan().await;
    h.write("f.txt", "foo\n");

    let outcome = h
        .call(
            "edit_file",
            json!({
                "path": "f.txt",
                "hunks": [{
                    "op": "replace",
                    "anchor": {"pattern": "foo"},
                    "content": "bar"
                }]
            }),
        )
        .await;
    assert!(!outcome.ok);
    assert!(outcome.result.starts_with("Invalid arguments:"), "{}", outcome.result);
    assert!(outcome.result.contains("\"type\""), "{}", outcome.result);
    assert!(!outcome.result.contains("missing field"), "{}", outcome.result);
    assert_eq!(h.read("f.txt"), "foo\n");
}

#[tokio::test]
async fn stale_precondition_is_rejected() {
    let mut h = Harness::new();
    h.skip_plan().await;
    h.write("f.txt", "v1\n");

    let outcome = h
        .call(
            "edit_file",
            json!({
                "path": "f.txt",
                "mode": "overwrite",
                "content": "v2\n",
                "precondition": {"file_sha256": tricode_utils::sha256_hex(b"v0\n")}
            }),
        )
        .await;
    assert!(!outcome.ok);
    assert!(outcome.result.starts_with("Conflict:"));
    assert_eq!(h.read("f.txt"), "v1\n");
}

#[tokio::test]
async fn sandbox_rejects_paths_outside_root() {
    let mut h = Harness::new();
    h.skip_plan().await;
    let outcome = h.call("read_file", json!({"path": "../outside.txt"})).await;
    assert!(!outcome.ok);
    assert!(outcome.result.starts_with("Sandbox violation:"));
}

#[tokio::test]
async fn plan_create_update_check() {
    let mut h = Harness::new();

    let created = h
        .call("plan", json!({"action": "create", "tasks": ["A", {"description": "B"}]}))
        .await;
    assert!(created.ok);

    let updated = h
        .call(
            "plan",
            json!({"action": "update", "task_id": 1, "status": "completed"}),
        )
        .await;
    assert!(updated.ok);

    let checked = h.call("plan", json!({"action": "check"})).await;
    assert!(checked.ok);
    let lines: Vec<&str> = checked.result.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "↳ - \x1b[32mA\x1b[0m");
    assert_eq!(lines[1], "  - \x1b[31mB\x1b[0m");

    let reminder = h.ctx.plan.reminder().unwrap();
    assert!(reminder.starts_with("WARNING: 1 task(s) still incomplete:"));
    assert!(reminder.contains("[2] pending"));

    let missing = h
        .call(
            "plan",
            json!({"action": "update", "task_id": 9, "status": "completed"}),
        )
        .await;
    assert!(!missing.ok);
    assert!(missing.result.contains("Task ID 9 not found"));
}

#[tokio::test]
async fn session_approval_is_cleared_for_new_conversation() {
    let dir = TempDir::new().unwrap();
    let mut ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();
    let prompts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let gate = PermissionGate::new(ConfirmationStrategy::callback(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Decision::AllowForSession }
    }));
    let dispatcher = Dispatcher::new(gate).unwrap();

    ctx.begin_conversation(ConversationId::new("first").unwrap());
    for name in ["a", "b"] {
        dispatcher
            .execute(&mut ctx, "plan", json!({"action": "skip"}))
            .await
            .unwrap();
        let outcome = dispatcher
            .execute(&mut ctx, "mkdir", json!({"path": name}))
            .await
            .unwrap();
        assert!(outcome.ok);
    }
    assert_eq!(prompts.load(std::sync::atomic::Ordering::SeqCst), 1);

    ctx.begin_conversation(ConversationId::new("second").unwrap());
    dispatcher
        .execute(&mut ctx, "plan", json!({"action": "skip"}))
        .await
        .unwrap();
    dispatcher
        .execute(&mut ctx, "mkdir", json!({"path": "c"}))
        .await
        .unwrap();
    assert_eq!(prompts.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interactive_session_echo() {
    let mut h = Harness::new();
    h.skip_plan().await;

    let started = h
        .call(
            "start_session",
            json!({"command": "bash", "shell": "/bin/bash"}),
        )
        .await;
    assert!(started.ok, "{}", started.result);
    let id = started.result.split_whitespace().nth(1).unwrap().to_string();

    let sent = h
        .call("send_input", json!({"session_id": id, "input_text": "echo hi"}))
        .await;
    assert!(sent.ok, "{}", sent.result);

    let read = h
        .call("read_output", json!({"session_id": id, "timeout": 2}))
        .await;
    assert!(read.ok);
    assert!(read.result.contains("hi"), "{}", read.result);

    h.ctx.sessions.shutdown().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fourth_session_is_resource_exhausted() {
    let mut h = Harness::new();
    h.skip_plan().await;

    for _ in 0..3 {
        let outcome = h.call("start_session", json!({"shell": "/bin/sh"})).await;
        assert!(outcome.ok, "{}", outcome.result);
    }
    let fourth = h.call("start_session", json!({"shell": "/bin/sh"})).await;
    assert!(!fourth.ok);
    assert!(fourth.result.starts_with("Resource exhausted:"));

    h.ctx.sessions.shutdown().await;
}
