//! Coordination rules.

use crate::error::{Error, Result};
use crate::events::EventKind;

/// What a strategy does with the event it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Run the event's query against the target
    Query,
    /// Apply the event's operation to the target
    Update,
    /// Merge the event's result into the target
    Sync,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Query => "query",
            Action::Update => "update",
            Action::Sync => "sync",
        }
    }
}

/// A rule: when `source` emits `on`, perform `action` on `target`.
///
/// A blocking strategy completes before the operation that emitted the
/// event continues, and its failure fails that operation. A non-blocking
/// strategy runs in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub source: String,
    pub on: EventKind,
    pub target: String,
    pub action: Action,
    pub blocking: bool,
}

impl Strategy {
    /// Forward a query or an update from one source to another.
    pub fn request(
        source: impl Into<String>,
        on: EventKind,
        target: impl Into<String>,
        action: Action,
        blocking: bool,
    ) -> Self {
        Self {
            source: source.into(),
            on,
            target: target.into(),
            action,
            blocking,
        }
    }

    /// Merge everything `source` returns, from queries and updates alike,
    /// into `target`.
    pub fn sync(source: impl Into<String>, target: impl Into<String>, blocking: bool) -> Vec<Self> {
        let source = source.into();
        let target = target.into();
        [EventKind::AfterQuery, EventKind::AfterUpdate]
            .into_iter()
            .map(|on| Self::request(source.clone(), on, target.clone(), Action::Sync, blocking))
            .collect()
    }

    /// The usual wiring for a local source backed by a remote one: local
    /// queries and updates are forwarded to the remote before they run
    /// locally, and remote results are merged back, all blocking.
    pub fn remote_backed(local: &str, remote: &str) -> Vec<Self> {
        let mut strategies = vec![
            Self::request(local, EventKind::BeforeQuery, remote, Action::Query, true),
            Self::request(local, EventKind::BeforeUpdate, remote, Action::Update, true),
        ];
        strategies.extend(Self::sync(remote, local, true));
        strategies
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Check that the event carries what the action needs.
    pub fn validate(&self) -> Result<()> {
        let valid = match self.action {
            Action::Query => self.on.is_query(),
            Action::Update => self.on.is_update(),
            Action::Sync => self.on.is_after(),
        };
        if !valid {
            return Err(Error::InvalidStrategy(format!(
                "{} cannot be triggered by {}",
                self.action.as_str(),
                self.on
            )));
        }
        if self.source == self.target {
            return Err(Error::InvalidStrategy(format!(
                "{self} forwards a source to itself"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source,
            self.on,
            self.target,
            self.action.as_str()
        )
    }
}
