use super::{Flow, PipelineError, Stage, UpdateContext};
use crate::config::Settings;
use crate::event::{Actor, InboundEvent};
use crate::l10n::Lang;
use crate::model::User;
use crate::storage::StorageProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// The conversational subject of an event.
///
/// When the bot relays someone else's content (the apparent sender is a bot
/// replying to a human), the original human is the subject.
#[must_use]
pub fn resolve_actor(event: &InboundEvent) -> &Actor {
    let actor = event.actor();
    match event.reply_to_from() {
        Some(original) if actor.is_bot => original,
        _ => actor,
    }
}

/// Maps the event's actor to a persisted user, creating it on first contact
pub struct IdentityResolver {
    storage: Arc<dyn StorageProvider>,
    settings: Arc<Settings>,
}

impl IdentityResolver {
    /// Create the stage
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>, settings: Arc<Settings>) -> Self {
        Self { storage, settings }
    }
}

#[async_trait]
impl Stage for IdentityResolver {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        ctx: &mut UpdateContext,
    ) -> Result<Flow, PipelineError> {
        let actor = resolve_actor(event);
        let username = actor.username.clone().unwrap_or_default();

        let mut user = self
            .storage
            .get_or_create_user(&User::new(actor.id, username.as_str()))
            .await?;

        // Request-scoped, never persisted
        user.lang = Lang::from_tag(actor.language_code.as_deref());
        user.is_admin = self.settings.is_admin(actor.username.as_deref());

        debug!(user_id = user.id, lang = user.lang.code(), is_admin = user.is_admin, "Resolved user");
        ctx.user = Some(user);
        Ok(Flow::Continue)
    }
}
