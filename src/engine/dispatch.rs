use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::NightshiftError;
use crate::models::{ActionKind, ActionParams, AgentAction, NotificationEvent};
use crate::notify::{Notification, Notifier};
use super::template::{has_unresolved, render_template};

/// Longest captured output kept on an action record.
const MAX_OUTPUT_CHARS: usize = 4000;

/// Everything a handler gets for one attempt.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub agent_id: String,
    pub agent_name: String,
    pub run_id: String,
    pub action: AgentAction,
    /// 1-based.
    pub attempt: u32,
    /// Cancelled when the run is cancelled; handlers may stop early.
    pub cancel: CancellationToken,
}

/// Executes one attempt of an action. Timeouts and retries are applied by the engine.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError>;
}

/// Handlers keyed by action kind.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process handlers for `command` and `script`, notifier-backed `notification`.
    pub fn builtin(notifier: Arc<dyn Notifier>) -> Self {
        let mut registry = Self::new();
        let process: Arc<dyn ActionHandler> = Arc::new(ProcessHandler);
        registry.register_shared(ActionKind::Command, process.clone());
        registry.register_shared(ActionKind::Script, process);
        registry.register(ActionKind::Notification, NotificationActionHandler::new(notifier));
        registry
    }

    /// Add a command-template handler per configured kind, e.g. `capture: "ekos-capture --exp {exposure}"`.
    pub fn with_templates(mut self, templates: &BTreeMap<String, String>) -> Self {
        for (kind, template) in templates {
            self.register(ActionKind::parse(kind), TemplateCommandHandler::new(template));
        }
        self
    }

    pub fn register(&mut self, kind: ActionKind, handler: impl ActionHandler + 'static) {
        self.register_shared(kind, Arc::new(handler));
    }

    pub fn register_shared(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind.as_str().to_string(), handler);
    }

    pub fn get(&self, kind: &ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(kind.as_str()).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

fn truncate_output(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Run a prepared command, killing it if the attempt is dropped or the run is cancelled.
async fn run_process(mut command: Command, label: &str, cancel: &CancellationToken) -> Result<String, NightshiftError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| NightshiftError::ActionExecution(format!("failed to start {}: {}", label, e)))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output
            .map_err(|e| NightshiftError::ActionExecution(format!("{} failed: {}", label, e)))?,
        _ = cancel.cancelled() => {
            return Err(NightshiftError::ActionExecution(format!("{} interrupted by cancellation", label)));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        Ok(truncate_output(&stdout))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(NightshiftError::ActionExecution(format!(
            "{} exited with {}: {}",
            label,
            code,
            truncate_output(if stderr.trim().is_empty() { &stdout } else { &stderr })
        )))
    }
}

fn shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

/// `command` actions via `sh -c`, `script` actions via their interpreter.
pub struct ProcessHandler;

#[async_trait]
impl ActionHandler for ProcessHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        let (mut command, working_dir, env) = match &ctx.action.params {
            ActionParams::Command(p) => (shell(&p.command), p.working_dir.clone(), p.env.clone()),
            ActionParams::Script(p) => {
                let mut command = Command::new(p.interpreter.as_deref().unwrap_or("sh"));
                command.arg(&p.path).args(&p.args);
                (command, p.working_dir.clone(), p.env.clone())
            }
            other => {
                return Err(NightshiftError::Config(format!(
                    "process handler cannot run {} actions",
                    other.kind()
                )))
            }
        };

        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        command
            .envs(env)
            .env("NIGHTSHIFT_AGENT_ID", &ctx.agent_id)
            .env("NIGHTSHIFT_RUN_ID", &ctx.run_id)
            .env("NIGHTSHIFT_ACTION_ID", &ctx.action.id);

        debug!(action_id = %ctx.action.id, attempt = ctx.attempt, "Spawning process");
        run_process(command, &format!("action '{}'", ctx.action.id), &ctx.cancel).await
    }
}

/// Equipment and custom kinds: a configured shell template filled from the action parameters.
pub struct TemplateCommandHandler {
    template: String,
}

impl TemplateCommandHandler {
    pub fn new(template: &str) -> Self {
        Self { template: template.to_string() }
    }
}

#[async_trait]
impl ActionHandler for TemplateCommandHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        let command_line = render_template(
            &self.template,
            &ctx.action.params.to_map(),
            &[
                ("agent_id", ctx.agent_id.as_str()),
                ("run_id", ctx.run_id.as_str()),
                ("action_id", ctx.action.id.as_str()),
            ],
        );
        if has_unresolved(&command_line) {
            // Missing parameters will not appear on retry
            return Err(NightshiftError::Validation(format!(
                "unresolved placeholders in command for action '{}': {}",
                ctx.action.id, command_line
            )));
        }

        debug!(action_id = %ctx.action.id, command = %command_line, "Running command template");
        run_process(shell(&command_line), &format!("action '{}'", ctx.action.id), &ctx.cancel).await
    }
}

/// `notification` actions, delivered through the configured notifier.
pub struct NotificationActionHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationActionHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionHandler for NotificationActionHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<String, NightshiftError> {
        let ActionParams::Notification(params) = &ctx.action.params else {
            return Err(NightshiftError::Config(format!(
                "notification handler cannot run {} actions",
                ctx.action.kind()
            )));
        };

        self.notifier
            .notify(Notification {
                agent_id: ctx.agent_id.clone(),
                agent_name: ctx.agent_name.clone(),
                event: NotificationEvent::Message,
                channels: params.channels.clone(),
                payload: json!({
                    "runId": ctx.run_id,
                    "actionId": ctx.action.id,
                    "title": params.title,
                    "message": params.message,
                }),
            })
            .await?;
        Ok(format!("notification sent: {}", params.message))
    }
}
