//! Admin moderation panel.
//!
//! Paginated user and chat listings, per-user chat drill-through, read-only
//! transcripts and ban toggles. Only reachable through the role router, so
//! every handler here may assume the caller is privileged.

use crate::callback::{AdminAction, CallbackAction, CallbackParseError};
use crate::command::{AdminCommand, Command};
use crate::config::{ADMIN_BAN_REASON, ADMIN_PAGE_SIZE, ADMIN_TRANSCRIPT_WINDOW};
use crate::event::{IncomingCallback, InboundEvent};
use crate::history::recent_messages;
use crate::l10n::{self, Lang, TextKey};
use crate::model::{Chat, ChatId, Message, Role, User, UserId};
use crate::pipeline::{PipelineError, Services};
use crate::render::Renderer;
use crate::transport::{InlineButton, InlineKeyboard, Markup, OutgoingText};
use crate::utils::truncate_str;
use tracing::{debug, info, warn};

const ADMIN_HELP: &str = "`/admin users`\n`/admin chats`\n";
const BUTTON_LABEL_LEN: usize = 48;

/// Where panel output goes
#[derive(Debug, Clone, Copy)]
struct Reply {
    chat_id: i64,
    reply_to: Option<i32>,
}

/// Privileged moderation surface
pub struct AdminPanel {
    services: Services,
    renderer: Renderer,
}

/// Rows of page `page`, with flags for the neighbouring pages
fn paginate<T>(items: &[T], page: usize) -> (&[T], bool, bool) {
    let start = page.saturating_mul(ADMIN_PAGE_SIZE).min(items.len());
    let end = start.saturating_add(ADMIN_PAGE_SIZE).min(items.len());
    (&items[start..end], page > 0, end < items.len())
}

fn pager_row(
    page: usize,
    has_prev: bool,
    has_next: bool,
    to_page: fn(usize) -> AdminAction,
) -> Vec<InlineButton> {
    let mut row = Vec::new();
    if has_prev {
        row.push(InlineButton::new(
            "« prev",
            CallbackAction::Admin(to_page(page.saturating_sub(1))).encode(),
        ));
    }
    if has_next {
        row.push(InlineButton::new(
            "next »",
            CallbackAction::Admin(to_page(page.saturating_add(1))).encode(),
        ));
    }
    row
}

fn admin_button(label: impl Into<String>, action: AdminAction) -> InlineButton {
    InlineButton::new(label, CallbackAction::Admin(action).encode())
}

/// Keyboard of the user listing
#[must_use]
pub fn users_keyboard(users: &[User], page: usize) -> InlineKeyboard {
    let (rows, has_prev, has_next) = paginate(users, page);
    let mut keyboard: InlineKeyboard = rows
        .iter()
        .map(|u| {
            let toggle = if u.is_banned() {
                admin_button("[unban]", AdminAction::Unban(u.id))
            } else {
                admin_button("[ban]", AdminAction::Ban(u.id))
            };
            vec![
                admin_button(u.display_handle(), AdminAction::UserChats(u.id)),
                admin_button("[chats]", AdminAction::UserChats(u.id)),
                toggle,
            ]
        })
        .collect();

    let pager = pager_row(page, has_prev, has_next, AdminAction::UsersPage);
    if !pager.is_empty() {
        keyboard.push(pager);
    }
    keyboard
}

/// Keyboard of the all-chats listing
#[must_use]
pub fn chats_keyboard(chats: &[Chat], page: usize) -> InlineKeyboard {
    let (rows, has_prev, has_next) = paginate(chats, page);
    let mut keyboard: InlineKeyboard = rows
        .iter()
        .map(|c| {
            let label = format!("{}: {}", c.owner_label(), c.display_title());
            vec![admin_button(
                truncate_str(label, BUTTON_LABEL_LEN),
                AdminAction::UserChat(c.id.clone()),
            )]
        })
        .collect();

    let pager = pager_row(page, has_prev, has_next, AdminAction::ChatsPage);
    if !pager.is_empty() {
        keyboard.push(pager);
    }
    keyboard
}

/// Render a chat transcript for moderation, oldest first.
///
/// Human turns mention their author, assistant turns carry a label.
#[must_use]
pub fn format_transcript(messages: &[Message], lang: Lang) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::User => {
                let name = if m.username.is_empty() {
                    m.user_id.to_string()
                } else {
                    m.username.clone()
                };
                format!("[{name}](tg://user?id={}):\n{}", m.user_id, m.text)
            }
            Role::Assistant => format!(
                "`{}`:\n{}",
                l10n::text(lang, TextKey::AssistantLabel),
                m.text
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl AdminPanel {
    /// Create the panel
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            renderer: Renderer::new(services.transport.clone()),
            services,
        }
    }

    /// Handle an admin-namespaced event from a privileged user
    ///
    /// # Errors
    ///
    /// Returns an error if a listing cannot be read from storage.
    pub async fn handle(&self, event: &InboundEvent, admin: &User) -> Result<(), PipelineError> {
        match event {
            InboundEvent::Message(message) => {
                let reply = Reply {
                    chat_id: message.chat_id,
                    reply_to: Some(message.message_id),
                };
                let command = message.text.as_deref().and_then(|t| {
                    Command::parse(t, self.services.transport.bot_identity().username.as_deref())
                });
                match command {
                    Some(Command::Admin(AdminCommand::Users)) => self.list_users(reply, 0).await,
                    Some(Command::Admin(AdminCommand::Chats)) => self.list_chats(reply, 0).await,
                    _ => {
                        self.send(reply, ADMIN_HELP, Markup::Legacy, None).await;
                        Ok(())
                    }
                }
            }
            InboundEvent::Callback(callback) => self.handle_callback(callback, admin).await,
        }
    }

    async fn handle_callback(
        &self,
        callback: &IncomingCallback,
        admin: &User,
    ) -> Result<(), PipelineError> {
        let action = match CallbackAction::parse(&callback.data) {
            Ok(CallbackAction::Admin(action)) => action,
            Ok(CallbackAction::SwitchChat(_)) | Err(CallbackParseError::Unrecognized(_)) => {
                debug!(data = %callback.data, "Non-admin payload in admin panel");
                self.renderer.acknowledge(&callback.id, None).await;
                return Ok(());
            }
            Err(CallbackParseError::UnknownAdminAction(action)) => {
                debug!(%action, "Ignoring unknown admin action");
                self.renderer.acknowledge(&callback.id, None).await;
                return Ok(());
            }
            Err(e @ CallbackParseError::MalformedId { .. }) => {
                warn!(error = %e, "Malformed admin payload");
                self.renderer
                    .acknowledge(
                        &callback.id,
                        Some(l10n::text(admin.lang, TextKey::InvalidIdentifier).to_string()),
                    )
                    .await;
                return Ok(());
            }
        };

        self.renderer.acknowledge(&callback.id, None).await;
        let Some(chat_id) = callback.chat_id else {
            debug!(?action, "Admin callback without a conversation to answer in");
            return Ok(());
        };
        let reply = Reply {
            chat_id,
            reply_to: None,
        };

        info!(admin_id = admin.id, ?action, "Admin action");
        match action {
            AdminAction::UsersPage(page) => self.list_users(reply, page).await,
            AdminAction::ChatsPage(page) => self.list_chats(reply, page).await,
            AdminAction::UserChats(user_id) => self.list_user_chats(reply, user_id, admin.lang).await,
            AdminAction::UserChat(chat_id) => self.show_transcript(reply, &chat_id, admin.lang).await,
            AdminAction::Ban(user_id) => self.set_ban(reply, user_id, true).await,
            AdminAction::Unban(user_id) => self.set_ban(reply, user_id, false).await,
        }
    }

    async fn send(&self, reply: Reply, text: &str, markup: Markup, keyboard: Option<InlineKeyboard>) {
        let mut message = OutgoingText::new(reply.chat_id, text)
            .markup(markup)
            .reply_to(reply.reply_to);
        if let Some(keyboard) = keyboard {
            message = message.keyboard(keyboard);
        }
        let _ = self.renderer.send(message).await;
    }

    async fn list_users(&self, reply: Reply, page: usize) -> Result<(), PipelineError> {
        let users = self.services.storage.list_users().await?;
        if users.is_empty() {
            self.send(reply, "No users found", Markup::Plain, None).await;
            return Ok(());
        }
        let text = format!("Users, page {}", page.saturating_add(1));
        self.send(reply, &text, Markup::Plain, Some(users_keyboard(&users, page)))
            .await;
        Ok(())
    }

    async fn list_chats(&self, reply: Reply, page: usize) -> Result<(), PipelineError> {
        let chats = self.services.storage.list_chats().await?;
        if chats.is_empty() {
            self.send(reply, "No chats found", Markup::Plain, None).await;
            return Ok(());
        }
        let text = format!("Chats, page {}", page.saturating_add(1));
        self.send(reply, &text, Markup::Plain, Some(chats_keyboard(&chats, page)))
            .await;
        Ok(())
    }

    async fn list_user_chats(
        &self,
        reply: Reply,
        user_id: UserId,
        lang: Lang,
    ) -> Result<(), PipelineError> {
        let chats = self.services.storage.list_user_chats(user_id).await?;
        if chats.is_empty() {
            self.send(reply, l10n::text(lang, TextKey::NoChats), Markup::Plain, None)
                .await;
            return Ok(());
        }

        let handle = match self.services.storage.get_user(user_id).await? {
            Some(user) => user.display_handle(),
            None => user_id.to_string(),
        };
        let keyboard = chats
            .iter()
            .map(|c| {
                vec![admin_button(
                    truncate_str(c.display_title(), BUTTON_LABEL_LEN),
                    AdminAction::UserChat(c.id.clone()),
                )]
            })
            .collect();
        self.send(reply, &format!("@{handle} chats"), Markup::Plain, Some(keyboard))
            .await;
        Ok(())
    }

    async fn show_transcript(
        &self,
        reply: Reply,
        chat_id: &ChatId,
        lang: Lang,
    ) -> Result<(), PipelineError> {
        let messages = recent_messages(
            self.services.storage.as_ref(),
            chat_id,
            ADMIN_TRANSCRIPT_WINDOW,
        )
        .await?;
        if messages.is_empty() {
            self.send(reply, l10n::text(lang, TextKey::EmptyHistory), Markup::Plain, None)
                .await;
            return Ok(());
        }
        self.send(reply, &format_transcript(&messages, lang), Markup::Rich, None)
            .await;
        Ok(())
    }

    async fn set_ban(&self, reply: Reply, user_id: UserId, banned: bool) -> Result<(), PipelineError> {
        let Some(mut user) = self.services.storage.get_user(user_id).await? else {
            self.send(reply, &format!("User {user_id} not found"), Markup::Plain, None)
                .await;
            return Ok(());
        };

        user.ban_reason = banned.then(|| ADMIN_BAN_REASON.to_string());
        self.services.storage.update_user(&user).await?;

        let handle = user.display_handle();
        let text = if banned {
            info!(user_id, "User banned");
            format!("User @{handle} banned with reason `{ADMIN_BAN_REASON}`")
        } else {
            info!(user_id, "User unbanned");
            format!("User @{handle} unbanned")
        };
        self.send(reply, &text, Markup::Legacy, None).await;
        Ok(())
    }
}
