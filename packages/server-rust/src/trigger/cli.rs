//! Command-line trigger: runs one handler once and reports its result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use switchyard_core::{
    Outcome, Payload, PipelineError, RequestContext, TriggerBinding, TriggerKind, Value,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Trigger;
use crate::service::{Executor, HandlerDefinition, Invocation};

/// Exit code for malformed arguments (`EX_USAGE`).
pub const EXIT_USAGE: u8 = 64;

/// A malformed `key=value` argument.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("argument {0:?} is not of the form key=value")]
    MissingEquals(String),
    #[error("argument {0:?} has an empty key")]
    EmptyKey(String),
}

/// Parses `key=value` arguments into a payload.
///
/// A value that parses as JSON keeps its JSON type (`n=3`, `flag=true`,
/// `tags=["a"]`); anything else is taken as a plain string. A repeated key
/// keeps its last value.
///
/// # Errors
///
/// Returns [`ArgError`] for an argument without `=` or with an empty key.
pub fn parse_args<I, S>(args: I) -> Result<Payload, ArgError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut payload = Payload::new();
    for arg in args {
        let arg = arg.as_ref();
        let Some((key, raw)) = arg.split_once('=') else {
            return Err(ArgError::MissingEquals(arg.to_string()));
        };
        if key.is_empty() {
            return Err(ArgError::EmptyKey(arg.to_string()));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        payload.insert(key.to_string(), value);
    }
    Ok(payload)
}

/// Process exit code for an outcome.
///
/// Codes follow `sysexits.h` where one fits.
#[must_use]
pub fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Ok => 0,
        Outcome::Failed => 1,
        Outcome::NotFound => 2,
        Outcome::Invalid => EXIT_USAGE,
        Outcome::Unavailable => 69,
        Outcome::Internal => 70,
        Outcome::Throttled | Outcome::DeadlineExceeded => 75,
    }
}

/// What the binary prints and exits with.
#[derive(Debug, Clone, PartialEq)]
pub struct CliOutput {
    pub exit_code: u8,
    /// `{"request_id", "result"}` on success, `{"error", ...}` otherwise.
    pub body: serde_json::Value,
}

impl CliOutput {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    fn from_invocation(invocation: Invocation) -> Self {
        let exit_code = exit_code(invocation.outcome());
        let request_id = invocation.request_id.to_string();
        let body = match invocation.result {
            Ok(value) => json!({
                "request_id": request_id,
                "result": serde_json::Value::from(value),
            }),
            Err(err) => json!({ "error": err.to_string(), "request_id": request_id }),
        };
        Self { exit_code, body }
    }

    fn from_error(request_id: Uuid, err: &PipelineError) -> Self {
        Self {
            exit_code: exit_code(err.outcome()),
            body: json!({ "error": err.to_string(), "request_id": request_id.to_string() }),
        }
    }

    fn usage(err: &ArgError) -> Self {
        Self {
            exit_code: EXIT_USAGE,
            body: json!({ "error": err.to_string() }),
        }
    }
}

/// Invokes handlers by command name.
///
/// A command resolves to the handler whose `TriggerBinding::Cli` names it,
/// falling back to the handler registered under that name.
pub struct CliTrigger {
    executor: Executor,
    shutdown: CancellationToken,
}

impl CliTrigger {
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Finds the handler for `command`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NotFound` when nothing matches.
    pub fn resolve(&self, command: &str) -> Result<Arc<HandlerDefinition>, PipelineError> {
        let registry = self.executor.registry();
        let bound = registry
            .list_by_trigger(TriggerKind::Cli)
            .into_iter()
            .find(|definition| {
                definition.triggers().iter().any(|binding| {
                    matches!(binding, TriggerBinding::Cli { command: c } if c == command)
                })
            });
        match bound {
            Some(definition) => Ok(definition),
            None => registry.lookup(command),
        }
    }

    /// Runs `command` once with `key=value` arguments as the payload.
    pub async fn invoke<I, S>(&self, command: &str, args: I) -> CliOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let payload = match parse_args(args) {
            Ok(payload) => payload,
            Err(err) => return CliOutput::usage(&err),
        };
        let definition = match self.resolve(command) {
            Ok(definition) => definition,
            Err(err) => return CliOutput::from_error(Uuid::new_v4(), &err),
        };
        let ctx = RequestContext::new(TriggerKind::Cli, definition.name())
            .with_payload(payload)
            .with_cancellation(&self.shutdown);
        let invocation = self.executor.execute_supervised(definition, ctx).await;
        CliOutput::from_invocation(invocation)
    }
}

#[async_trait]
impl Trigger for CliTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Cli
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cancels any invocation still running.
    async fn stop(&self) {
        self.shutdown.cancel();
    }
}
