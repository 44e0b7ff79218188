use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use nightshift::engine::{ActionContext, ActionHandler, ExecutionEngine, HandlerRegistry};
use nightshift::errors::NightshiftError;
use nightshift::facts::StaticFactSource;
use nightshift::graph::resolve;
use nightshift::models::{
    ActionKind, ActionRunStatus, Agent, AgentCategory, AgentConfig, CreateAgentParams,
    NotificationEvent, RunStatus,
};
use nightshift::notify::{Notification, Notifier};
use nightshift::scheduler::{AgentRegistry, Scheduler, Submission};
use nightshift::store::{AgentStore, Database, RunHistoryStore};

/// Fails the first `failures` attempts, then succeeds.
struct FlakyHandler {
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl ActionHandler for FlakyHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(n, ctx.attempt);
        if n <= self.failures {
            Err(NightshiftError::ActionExecution(format!("mount not responding (attempt {})", n)))
        } else {
            Ok(format!("ok after {}", n))
        }
    }
}

/// Never answers within any sane timeout.
struct StalledHandler {
    attempts: AtomicU32,
}

#[async_trait]
impl ActionHandler for StalledHandler {
    async fn execute(&self, _ctx: ActionContext) -> Result<String, NightshiftError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".into())
    }
}

/// Records the order in which actions start and finish.
struct RecordingHandler {
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        self.events.lock().unwrap().push(format!("start:{}", ctx.action.id));
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.events.lock().unwrap().push(format!("end:{}", ctx.action.id));
        Ok(ctx.action.id.clone())
    }
}

/// Signals that it started, then holds until cancelled or released.
struct GatedHandler {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ActionHandler for GatedHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        self.started.notify_one();
        tokio::select! {
            _ = self.release.notified() => Ok("released".into()),
            _ = ctx.cancel.cancelled() => Ok("stopped early".into()),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NightshiftError> {
        self.events.lock().unwrap().push(notification.event);
        Ok(())
    }
}

fn create(db: &Database, id: &str, config: serde_json::Value) -> Agent {
    let config: AgentConfig = serde_json::from_value(config).unwrap();
    db.create_agent(CreateAgentParams {
        id: Some(id.into()),
        name: id.into(),
        description: String::new(),
        category: AgentCategory::Custom,
        config,
    })
    .unwrap()
}

fn engine(db: &Database, handlers: HandlerRegistry, notifier: Arc<dyn Notifier>) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(handlers), Arc::new(db.clone()), notifier)
}

fn quiet() -> Arc<dyn Notifier> {
    Arc::new(RecordingNotifier::default())
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_two_makes_three_attempts_with_backoff() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "slew", json!({
        "actions": [{"id": "slew", "type": "flaky", "name": "Slew", "retryCount": 2, "parameters": {}}]
    }));
    let handler = Arc::new(FlakyHandler { failures: 2, attempts: AtomicU32::new(0) });
    let mut handlers = HandlerRegistry::new();
    handlers.register_shared(ActionKind::parse("flaky"), handler.clone());
    let engine = engine(&db, handlers, quiet());
    let plan = resolve(&agent.config.actions).unwrap();

    let started = tokio::time::Instant::now();
    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    let record = run.action("slew").unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.output.as_deref(), Some("ok after 3"));

    // Default policy: 1s then 2s.
    assert!(started.elapsed() >= Duration::from_secs(3));
    let logs = db.list_logs("slew", 100).unwrap();
    let backoffs: Vec<&str> = logs
        .iter()
        .map(|l| l.message.as_str())
        .filter(|m| m.contains("retrying in"))
        .collect();
    assert_eq!(backoffs.len(), 2);
    assert!(backoffs[0].contains("retrying in 1000ms"));
    assert!(backoffs[1].contains("retrying in 2000ms"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fails_action() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "slew", json!({
        "actions": [{"id": "slew", "type": "flaky", "name": "Slew", "retryCount": 1, "parameters": {}}]
    }));
    let mut handlers = HandlerRegistry::new();
    handlers.register(ActionKind::parse("flaky"), FlakyHandler { failures: 5, attempts: AtomicU32::new(0) });
    let engine = engine(&db, handlers, quiet());
    let plan = resolve(&agent.config.actions).unwrap();

    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let record = run.action("slew").unwrap();
    assert_eq!(record.attempts, 2);
    assert!(record.error.as_deref().unwrap().contains("attempt 2"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_two_always_failing_fails_after_three_attempts() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "focus", json!({
        "actions": [{"id": "focus", "type": "flaky", "name": "Focus", "retryCount": 2, "parameters": {}}]
    }));
    let handler = Arc::new(FlakyHandler { failures: u32::MAX, attempts: AtomicU32::new(0) });
    let mut handlers = HandlerRegistry::new();
    handlers.register_shared(ActionKind::parse("flaky"), handler.clone());
    let engine = engine(&db, handlers, quiet());
    let plan = resolve(&agent.config.actions).unwrap();

    let started = tokio::time::Instant::now();
    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    let record = run.action("focus").unwrap();
    assert_eq!(record.status, ActionRunStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert!(record.error.as_deref().unwrap().contains("attempt 3"));
    assert!(started.elapsed() >= Duration::from_secs(3));

    let logs = db.list_logs("focus", 100).unwrap();
    let backoffs: Vec<&str> = logs
        .iter()
        .map(|l| l.message.as_str())
        .filter(|m| m.contains("retrying in"))
        .collect();
    assert_eq!(backoffs, vec![
        "Action 'focus' attempt 1/3 failed, retrying in 1000ms: Action failed: mount not responding (attempt 1)",
        "Action 'focus' attempt 2/3 failed, retrying in 2000ms: Action failed: mount not responding (attempt 2)",
    ]);
    assert_eq!(db.get_run("run-1").unwrap().unwrap().status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_action_timeout_recorded_after_retries() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "solve", json!({
        "actions": [
            {"id": "solve", "type": "stalled", "name": "Plate solve", "timeout": 30, "retryCount": 1, "parameters": {}},
            {"id": "image", "type": "stalled", "name": "Image", "parameters": {}, "dependsOn": ["solve"]}
        ]
    }));
    let handler = Arc::new(StalledHandler { attempts: AtomicU32::new(0) });
    let mut handlers = HandlerRegistry::new();
    handlers.register_shared(ActionKind::parse("stalled"), handler.clone());
    let engine = engine(&db, handlers, quiet());
    let plan = resolve(&agent.config.actions).unwrap();

    let started = tokio::time::Instant::now();
    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();

    // Two 30s attempts around one 1s backoff.
    assert!(started.elapsed() >= Duration::from_secs(61));
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

    assert_eq!(run.status, RunStatus::Failed);
    let solve = run.action("solve").unwrap();
    assert_eq!(solve.status, ActionRunStatus::Failed);
    assert_eq!(solve.attempts, 2);
    assert!(solve.error.as_deref().unwrap().starts_with("Action timed out"));
    assert_eq!(run.action("image").unwrap().status, ActionRunStatus::Skipped);
}

#[tokio::test]
async fn test_skipped_downstream_fails_run() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "chain", json!({
        "actions": [
            {"id": "a", "type": "command", "name": "A", "parameters": {"command": "exit 1"}},
            {"id": "b", "type": "command", "name": "B", "parameters": {"command": "echo never"}, "dependsOn": ["a"]}
        ]
    }));
    let notifier = quiet();
    let engine = engine(&db, HandlerRegistry::builtin(notifier.clone()), notifier);
    let plan = resolve(&agent.config.actions).unwrap();

    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.action("a").unwrap().status, ActionRunStatus::Failed);
    assert_eq!(run.action("b").unwrap().status, ActionRunStatus::Skipped);
    assert!(run.error.as_deref().unwrap().contains("action 'a'"));

    let stored = db.get_run("run-1").unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_dependency_runs_after_prerequisite() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "ordered", json!({
        "actions": [
            {"id": "b", "type": "record", "name": "B", "parameters": {}, "dependsOn": ["a"]},
            {"id": "a", "type": "record", "name": "A", "parameters": {}}
        ]
    }));
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut handlers = HandlerRegistry::new();
    handlers.register(ActionKind::parse("record"), RecordingHandler { events: events.clone() });
    let engine = engine(&db, handlers, quiet());
    let plan = resolve(&agent.config.actions).unwrap();

    let run = engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(*events.lock().unwrap(), vec!["start:a", "end:a", "start:b", "end:b"]);

    let a = run.action("a").unwrap();
    let b = run.action("b").unwrap();
    assert!(b.start_time.unwrap() >= a.end_time.unwrap());
}

#[tokio::test]
async fn test_cancel_skips_pending_actions() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "session", json!({
        "actions": [
            {"id": "a", "type": "gated", "name": "A", "parameters": {}},
            {"id": "b", "type": "gated", "name": "B", "parameters": {}, "dependsOn": ["a"]}
        ]
    }));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut handlers = HandlerRegistry::new();
    handlers.register(ActionKind::parse("gated"), GatedHandler { started: started.clone(), release });
    let engine = Arc::new(engine(&db, handlers, quiet()));
    let plan = resolve(&agent.config.actions).unwrap();

    let cancel = CancellationToken::new();
    let task = {
        let (engine, agent, cancel) = (engine.clone(), agent.clone(), cancel.clone());
        tokio::spawn(async move { engine.execute(&agent, &plan, "run-1", cancel).await })
    };

    started.notified().await;
    cancel.cancel();
    let run = task.await.unwrap().unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.action("a").unwrap().output.as_deref(), Some("stopped early"));
    assert_eq!(run.action("b").unwrap().status, ActionRunStatus::Skipped);
    assert_eq!(db.get_run("run-1").unwrap().unwrap().status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_lifecycle_notifications() {
    let db = Database::in_memory().unwrap();
    let agent = create(&db, "notify", json!({
        "actions": [{"id": "a", "type": "command", "name": "A", "parameters": {"command": "true"}}],
        "notifications": {"onStart": true, "onComplete": true, "onError": true, "channels": ["push"]}
    }));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(&db, HandlerRegistry::builtin(notifier.clone()), notifier.clone());
    let plan = resolve(&agent.config.actions).unwrap();

    engine.execute(&agent, &plan, "run-1", CancellationToken::new()).await.unwrap();

    for _ in 0..50 {
        if notifier.events.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut events = notifier.events.lock().unwrap().clone();
    events.sort_by_key(|e| e.as_str());
    assert_eq!(events, vec![NotificationEvent::Complete, NotificationEvent::Start]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_due_checks_start_one_run() {
    let db = Database::in_memory().unwrap();
    let due = Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap();
    create(&db, "once", json!({
        "schedule": {"type": "once", "date": due.to_rfc3339()},
        "actions": [{"id": "hold", "type": "gated", "name": "Hold", "parameters": {}}]
    }));

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut handlers = HandlerRegistry::new();
    handlers.register(ActionKind::parse("gated"), GatedHandler { started, release: release.clone() });
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(AgentRegistry::new()),
        Arc::new(db.clone()),
        Arc::new(StaticFactSource::new()),
        Arc::new(engine(&db, handlers, quiet())),
    ));
    scheduler.reload().unwrap();

    let now = Utc::now();
    let polls: Vec<_> = (0..100)
        .map(|_| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.poll_once(now).await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for poll in polls {
        for (_, submission) in poll.await.unwrap() {
            match submission {
                Submission::Started(handle) => handles.push(handle),
                Submission::AlreadyRunning { .. } => {}
                other => panic!("unexpected submission {:?}", other),
            }
        }
    }
    assert_eq!(handles.len(), 1);

    release.notify_one();
    let run = handles.pop().unwrap().wait().await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(db.list_runs("once", 10).unwrap().len(), 1);

    // The one-shot occurrence is consumed.
    assert!(scheduler.poll_once(Utc::now()).await.unwrap().is_empty());
}
