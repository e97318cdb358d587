//! In-process transport: one tokio task per page context.
//!
//! Requests travel over an `mpsc` channel with a `oneshot` for the reply, so
//! the coordinator and the page agent share nothing but messages.

use crate::error::MessengerError;
use crate::messenger::{ExtractorInstaller, Messenger, PageRequest, PageResponse};
use crate::page::PageAgent;
use crate::types::ContextId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

const QUEUE_DEPTH: usize = 16;

/// Builds the agent for a context; `None` when the page cannot host one
pub type AgentFactory = dyn Fn(ContextId) -> Option<PageAgent> + Send + Sync;

struct Envelope {
    request: PageRequest,
    reply: oneshot::Sender<PageResponse>,
}

/// Hosts page agents as tasks in the current runtime
pub struct InProcessHost {
    factory: Arc<AgentFactory>,
    agents: Mutex<HashMap<ContextId, mpsc::Sender<Envelope>>>,
}

impl InProcessHost {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(ContextId) -> Option<PageAgent> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Start `agent` for `context`, replacing any running one
    pub async fn attach(&self, context: ContextId, agent: PageAgent) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let response = agent.handle(envelope.request).await;
                if envelope.reply.send(response).is_err() {
                    debug!("Requester for {} went away before the reply", context);
                }
            }
            debug!("Page agent {} stopped", context);
        });

        self.agents.lock().await.insert(context, tx);
    }

    /// Stop the agent of `context` (e.g. the page navigated away)
    pub async fn detach(&self, context: ContextId) -> bool {
        self.agents.lock().await.remove(&context).is_some()
    }

    pub async fn is_attached(&self, context: ContextId) -> bool {
        self.agents.lock().await.contains_key(&context)
    }
}

#[async_trait]
impl Messenger for InProcessHost {
    async fn send(
        &self,
        context: ContextId,
        request: PageRequest,
    ) -> Result<PageResponse, MessengerError> {
        let sender = self
            .agents
            .lock()
            .await
            .get(&context)
            .cloned()
            .ok_or(MessengerError::Unreachable(context))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            request,
            reply: reply_tx,
        };

        if sender.send(envelope).await.is_err() {
            warn!("Page agent {} is gone", context);
            self.agents.lock().await.remove(&context);
            return Err(MessengerError::Unreachable(context));
        }

        reply_rx.await.map_err(|_| MessengerError::Unreachable(context))
    }
}

#[async_trait]
impl ExtractorInstaller for InProcessHost {
    async fn install(&self, context: ContextId) -> Result<(), MessengerError> {
        let agent = (self.factory)(context).ok_or(MessengerError::Unreachable(context))?;
        self.attach(context, agent).await;
        info!("Installed page agent for {}", context);
        Ok(())
    }
}
