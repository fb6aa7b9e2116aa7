use agent_primitives::AgentDid;
use serde::{Deserialize, Serialize};

/// Processing priority of a queued sentinel event.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Background rescans.
    Low,
    /// Ordinary file saves.
    #[default]
    Normal,
    /// Changes touching sensitive paths.
    High,
    /// Explicit operator requests.
    Critical,
}

/// A file change handed to the arbiter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelEvent {
    /// Workspace-relative or absolute path of the changed file.
    pub path: String,
    /// File content; read from the workspace when absent.
    pub content: Option<String>,
    /// Agent that authored the change, when known.
    pub agent: Option<AgentDid>,
    /// Paths the agent claims to have written.
    pub claimed_paths: Vec<String>,
    /// Queue priority.
    pub priority: EventPriority,
}

impl SentinelEvent {
    /// Event for `path` at normal priority.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            agent: None,
            claimed_paths: Vec::new(),
            priority: EventPriority::Normal,
        }
    }

    /// Supplies the content instead of reading it from disk.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attributes the change to `agent`.
    #[must_use]
    pub fn with_agent(mut self, agent: AgentDid) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Adds paths the agent claims to have produced.
    #[must_use]
    pub fn with_claimed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claimed_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the queue priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }
}
