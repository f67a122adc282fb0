use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brandkit_core::BrandId;
use brandkit_events::{EventBus, InMemoryEventBus, Subscription};

use crate::sink::SinkError;

/// Best-effort notification pushed to connected clients while a run is in
/// flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveUpdate {
    RunStarted {
        session_id: String,
        brand_id: BrandId,
        source: String,
    },
    ToolProgress {
        session_id: String,
        tool_name: String,
        percent: u8,
    },
    ToolError {
        session_id: String,
        tool_name: String,
        error: String,
    },
    RunEnded {
        session_id: String,
        reason: String,
    },
}

impl LiveUpdate {
    pub fn session_id(&self) -> &str {
        match self {
            LiveUpdate::RunStarted { session_id, .. }
            | LiveUpdate::ToolProgress { session_id, .. }
            | LiveUpdate::ToolError { session_id, .. }
            | LiveUpdate::RunEnded { session_id, .. } => session_id,
        }
    }
}

/// Publish side of the realtime channel. Delivery is not guaranteed.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn publish(&self, update: LiveUpdate) -> Result<(), SinkError>;
}

/// Adapts any [`EventBus`] carrying [`LiveUpdate`]s into a [`LiveChannel`].
#[derive(Debug, Clone)]
pub struct BusLiveChannel<B> {
    bus: B,
}

impl<B> BusLiveChannel<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

#[async_trait]
impl<B> LiveChannel for BusLiveChannel<B>
where
    B: EventBus<LiveUpdate>,
{
    async fn publish(&self, update: LiveUpdate) -> Result<(), SinkError> {
        self.bus
            .publish(update)
            .map_err(|e| SinkError::new("live channel", format!("{e:?}")))
    }
}

/// Live channel for a gateway running in the same process as the worker.
pub type LocalLiveChannel = BusLiveChannel<Arc<InMemoryEventBus<LiveUpdate>>>;

impl LocalLiveChannel {
    pub fn local() -> Self {
        Self::new(Arc::new(InMemoryEventBus::new()))
    }

    /// Updates for one wizard session, in publish order.
    pub fn watch_session(&self, session_id: impl Into<String>) -> Subscription<LiveUpdate> {
        let session_id = session_id.into();
        self.bus
            .subscribe_where(move |update: &LiveUpdate| update.session_id() == session_id)
    }
}
