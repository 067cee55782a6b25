//! Trigger kinds and the per-handler bindings that declare them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// External event source that can initiate a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Http,
    Rpc,
    Queue,
    Cron,
    Cli,
}

impl TriggerKind {
    /// Returns the lowercase name used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Rpc => "rpc",
            Self::Queue => "queue",
            Self::Cron => "cron",
            Self::Cli => "cli",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler's declaration that it should be invoked by a particular trigger.
///
/// Each variant carries the parameters its trigger adapter needs to wire the
/// handler up at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerBinding {
    /// Route an HTTP method + path to the handler.
    Http { method: String, path: String },
    /// Expose the handler as an RPC method.
    Rpc { method: String },
    /// Consume messages from a queue topic.
    Queue { topic: String },
    /// Fire on a schedule expression (`@every 5m`, `0 3 * * *`, ...).
    Cron { schedule: String },
    /// Invoke from the command line under the given command name.
    Cli { command: String },
}

impl TriggerBinding {
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Http { .. } => TriggerKind::Http,
            Self::Rpc { .. } => TriggerKind::Rpc,
            Self::Queue { .. } => TriggerKind::Queue,
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Cli { .. } => TriggerKind::Cli,
        }
    }

    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Http {
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn cron(schedule: impl Into<String>) -> Self {
        Self::Cron {
            schedule: schedule.into(),
        }
    }

    pub fn cli(command: impl Into<String>) -> Self {
        Self::Cli {
            command: command.into(),
        }
    }

    pub fn queue(topic: impl Into<String>) -> Self {
        Self::Queue {
            topic: topic.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_reports_its_kind() {
        assert_eq!(TriggerBinding::cron("@every 1s").kind(), TriggerKind::Cron);
        assert_eq!(TriggerBinding::http("GET", "/x").kind(), TriggerKind::Http);
        assert_eq!(TriggerBinding::cli("run").kind(), TriggerKind::Cli);
        assert_eq!(TriggerBinding::queue("jobs").kind(), TriggerKind::Queue);
        assert_eq!(
            TriggerBinding::Rpc {
                method: "Echo".into()
            }
            .kind(),
            TriggerKind::Rpc
        );
    }

    #[test]
    fn binding_serializes_with_kind_tag() {
        let json = serde_json::to_value(TriggerBinding::cron("@hourly")).unwrap();
        assert_eq!(json["kind"], "cron");
        assert_eq!(json["schedule"], "@hourly");
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(TriggerKind::Queue.to_string(), "queue");
    }
}
