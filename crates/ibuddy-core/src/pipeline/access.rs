use super::{Flow, PipelineError, Stage, UpdateContext};
use crate::event::InboundEvent;
use crate::l10n::{self, TextKey};
use crate::render::Renderer;
use async_trait::async_trait;
use tracing::info;

/// Stops every event of a banned user with the ban notice
pub struct AccessGate {
    renderer: Renderer,
}

impl AccessGate {
    /// Create the stage
    #[must_use]
    pub const fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Stage for AccessGate {
    fn name(&self) -> &'static str {
        "access"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        ctx: &mut UpdateContext,
    ) -> Result<Flow, PipelineError> {
        let user = ctx.require_user(self.name())?;
        let Some(reason) = user.ban_reason.as_deref() else {
            return Ok(Flow::Continue);
        };

        info!(user_id = user.id, "Blocked update from banned user");

        if let InboundEvent::Callback(cb) = event {
            self.renderer.acknowledge(&cb.id, None).await;
        }
        if let Some(chat_id) = event.chat_id() {
            let notice = l10n::format(user.lang, TextKey::UserBanned, &[("reason", reason)]);
            self.renderer
                .notify(chat_id, event.reply_target(), &notice)
                .await;
        }
        Ok(Flow::Halt)
    }
}
