//! Conversation producer interface
//!
//! The multi-agent conversation algorithm itself lives in an external engine;
//! agenthub only defines the boundary. A producer is handed the agents, a
//! prompt, an event sink and a cancellation token, and runs one complete
//! conversation pass. The call is treated as opaque, possibly slow, and
//! blocking — the iteration driver always runs it on a dedicated blocking
//! thread and supervises it with watchdog timeouts.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::AgentConfig;

/// One utterance produced during a conversation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerEvent {
    /// Name of the agent speaking
    pub agent: String,

    /// Utterance content
    pub content: String,

    /// Model that generated the content
    pub model: String,
}

/// Sink for producer events; called once per utterance, in order
pub type EventSink<'a> = &'a (dyn Fn(ProducerEvent) + Send + Sync);

/// External conversation engine boundary
///
/// Implementations should observe the cancellation token at safe points
/// (between turns, before/after model calls) and return `Ok(())` when
/// cancelled early; the driver decides the experiment's fate from the token,
/// not from the return value.
pub trait ConversationProducer: Send + Sync {
    /// Run one conversation pass over `prompt` with the given agents,
    /// emitting each utterance through `emit`
    ///
    /// This is a blocking call. Errors become the experiment's terminal error.
    fn run(
        &self,
        agents: &[AgentConfig],
        prompt: &str,
        emit: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
