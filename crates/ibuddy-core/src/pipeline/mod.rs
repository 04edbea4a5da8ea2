//! Ordered update pipeline
//!
//! Every inbound event runs through a fixed list of [`Stage`]s. A stage
//! either lets the event continue or halts it; an error aborts the event
//! and is logged, never propagated to the worker.

mod access;
mod identity;
mod router;

pub use access::AccessGate;
pub use identity::{resolve_actor, IdentityResolver};
pub use router::{classify, RoleRouter, Route};

use crate::admin::AdminPanel;
use crate::config::Settings;
use crate::conversation::ConversationHandler;
use crate::event::InboundEvent;
use crate::llm::LlmProvider;
use crate::model::User;
use crate::render::Renderer;
use crate::storage::{StorageError, StorageProvider};
use crate::transport::{ChatTransport, TransportError};
use crate::voice::VoicePipeline;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// Collaborators constructed once at start-up and shared by all stages
#[derive(Clone)]
pub struct Services {
    /// Persistent records
    pub storage: Arc<dyn StorageProvider>,
    /// Messaging platform
    pub transport: Arc<dyn ChatTransport>,
    /// Generative backend
    pub llm: Arc<dyn LlmProvider>,
    /// Core settings
    pub settings: Arc<Settings>,
}

/// Errors that abort processing of a single event
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage read or write failed
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    /// Transport call failed
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// A stage ran before the user was resolved
    #[error("no resolved user before stage {0}")]
    MissingUser(&'static str),
}

/// State carried between stages of one event
#[derive(Debug, Default)]
pub struct UpdateContext {
    /// Conversational subject, set by identity resolution
    pub user: Option<User>,
}

impl UpdateContext {
    /// Resolved user, or an error naming the stage that needed it
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::MissingUser` if identity resolution has not run.
    pub fn require_user(&self, stage: &'static str) -> Result<&User, PipelineError> {
        self.user.as_ref().ok_or(PipelineError::MissingUser(stage))
    }
}

/// Stage decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next stage
    Continue,
    /// Stop here
    Halt,
}

/// One step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Handle the event
    async fn handle(
        &self,
        event: &InboundEvent,
        ctx: &mut UpdateContext,
    ) -> Result<Flow, PipelineError>;
}

/// How processing of an event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every stage continued
    Completed,
    /// A stage halted the event
    Halted(&'static str),
    /// A stage failed
    Failed(&'static str),
}

/// Fixed, ordered list of stages
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Compose a pipeline from stages, run in order
    #[must_use]
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Identity resolution, access control and role routing
    #[must_use]
    pub fn standard(services: &Services, voice: VoicePipeline) -> Self {
        let renderer = Renderer::new(services.transport.clone());
        Self::new(vec![
            Box::new(IdentityResolver::new(
                services.storage.clone(),
                services.settings.clone(),
            )),
            Box::new(AccessGate::new(renderer.clone())),
            Box::new(RoleRouter::new(
                AdminPanel::new(services.clone()),
                ConversationHandler::new(services.clone(), voice),
                renderer,
                services.transport.bot_identity().username,
            )),
        ])
    }

    /// Run one event through all stages
    #[instrument(skip_all, fields(kind = event.kind(), actor = event.actor().id))]
    pub async fn process(&self, event: &InboundEvent) -> Outcome {
        let mut ctx = UpdateContext::default();
        for stage in &self.stages {
            match stage.handle(event, &mut ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => {
                    debug!(stage = stage.name(), "Event halted");
                    return Outcome::Halted(stage.name());
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "Event processing aborted");
                    return Outcome::Failed(stage.name());
                }
            }
        }
        Outcome::Completed
    }
}
