use super::{Flow, PipelineError, Stage, UpdateContext};
use crate::admin::AdminPanel;
use crate::callback::is_admin_namespace;
use crate::command::Command;
use crate::conversation::ConversationHandler;
use crate::event::InboundEvent;
use crate::l10n::{self, TextKey};
use crate::model::User;
use crate::render::Renderer;
use async_trait::async_trait;
use tracing::{info, warn};

/// Destination of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Admin panel
    Admin,
    /// Regular conversation handling
    Regular,
    /// Admin-namespaced event from an unprivileged user
    Denied,
}

/// Classify an event by its namespace and the user's privilege.
///
/// Admin-namespaced events never fall through to regular handling.
#[must_use]
pub fn classify(event: &InboundEvent, user: &User, bot_username: Option<&str>) -> Route {
    let admin_namespaced = match event {
        InboundEvent::Message(m) => m
            .text
            .as_deref()
            .and_then(|t| Command::parse(t, bot_username))
            .is_some_and(|c| c.is_admin_namespaced()),
        InboundEvent::Callback(c) => is_admin_namespace(&c.data),
    };

    match (admin_namespaced, user.is_admin) {
        (true, true) => Route::Admin,
        (true, false) => Route::Denied,
        (false, _) => Route::Regular,
    }
}

/// Terminal stage dispatching to the admin panel or the conversation handler
pub struct RoleRouter {
    admin: AdminPanel,
    conversation: ConversationHandler,
    renderer: Renderer,
    bot_username: Option<String>,
}

impl RoleRouter {
    /// Create the stage
    #[must_use]
    pub const fn new(
        admin: AdminPanel,
        conversation: ConversationHandler,
        renderer: Renderer,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            admin,
            conversation,
            renderer,
            bot_username,
        }
    }

    async fn deny(&self, event: &InboundEvent, user: &User) {
        warn!(user_id = user.id, kind = event.kind(), "Admin-namespaced update from unprivileged user");
        if let InboundEvent::Callback(c) = event {
            self.renderer.acknowledge(&c.id, None).await;
        }
        if let Some(chat_id) = event.chat_id() {
            self.renderer
                .notify(
                    chat_id,
                    event.reply_target(),
                    l10n::text(user.lang, TextKey::UnknownCommand),
                )
                .await;
        }
    }
}

#[async_trait]
impl Stage for RoleRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        ctx: &mut UpdateContext,
    ) -> Result<Flow, PipelineError> {
        let user = ctx.require_user(self.name())?.clone();

        match classify(event, &user, self.bot_username.as_deref()) {
            Route::Admin => {
                info!(user_id = user.id, kind = event.kind(), "Routing to admin panel");
                self.admin.handle(event, &user).await?;
                Ok(Flow::Continue)
            }
            Route::Regular => {
                self.conversation.handle(event, user).await?;
                Ok(Flow::Continue)
            }
            Route::Denied => {
                self.deny(event, &user).await;
                Ok(Flow::Halt)
            }
        }
    }
}
