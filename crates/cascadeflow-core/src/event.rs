use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolCall;

/// Which stage of the cascade produced a text chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPhase {
    /// Single-model execution, no cascade.
    Direct,
    /// Drafter output, subject to the accept/reject decision.
    Draft,
    /// Verifier output after a rejected draft.
    Verifier,
}

/// An element of the cascade engine's event stream.
///
/// The engine yields these in order; the gateway's SSE translators consume
/// them. Draft chunks must be buffered by consumers until the corresponding
/// `DraftDecision` resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Routing {
        data: Value,
    },
    TextChunk {
        content: String,
        phase: ChunkPhase,
    },
    DraftDecision {
        accepted: bool,
        #[serde(default)]
        data: Value,
    },
    Switch {
        #[serde(default)]
        content: String,
    },
    ToolCallComplete {
        tool_call: ToolCall,
    },
    Complete {
        data: Value,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
}

impl StreamEvent {
    /// Terminal events end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}
