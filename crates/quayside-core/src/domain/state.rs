//! Publish pipeline states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of one publish attempt.
///
/// `Staging → Uploaded → Activated → Invalidated`, with `Failed` reachable
/// from every non-terminal state. `Invalidated` is the published state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishState {
    /// Archives are being unpacked into the deployment namespace.
    Staging,
    /// Content is staged; placeholder substitution runs here.
    Uploaded,
    /// The live pointer names the new deployment.
    Activated,
    /// Edge caches were told to drop stale responses. Published.
    Invalidated,
    /// Terminal failure.
    Failed,
}

impl PublishState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PublishState::Invalidated | PublishState::Failed)
    }

    /// Whether the deploy is live and caches are clear.
    pub fn is_published(self) -> bool {
        self == PublishState::Invalidated
    }

    /// The state that follows on success, `None` for terminal states.
    pub fn next(self) -> Option<PublishState> {
        match self {
            PublishState::Staging => Some(PublishState::Uploaded),
            PublishState::Uploaded => Some(PublishState::Activated),
            PublishState::Activated => Some(PublishState::Invalidated),
            PublishState::Invalidated | PublishState::Failed => None,
        }
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: PublishState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == PublishState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishState::Staging => "STAGING",
            PublishState::Uploaded => "UPLOADED",
            PublishState::Activated => "ACTIVATED",
            PublishState::Invalidated => "INVALIDATED",
            PublishState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}
