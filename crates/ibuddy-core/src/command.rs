//! Text command parsing.

use lazy_regex::regex_captures;

/// Reserved prefix of privileged command names
pub const ADMIN_COMMAND_PREFIX: &str = "admin";

/// Sub-commands of `/admin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// List users
    Users,
    /// List chats of all users
    Chats,
    /// Missing or unknown sub-command
    Help,
}

/// Recognized commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Welcome text
    Start,
    /// Reset the active chat
    New,
    /// Generate images from a prompt
    Image(String),
    /// List own chats
    Chats,
    /// Show recent messages of the active chat
    History,
    /// Privileged panel
    Admin(AdminCommand),
    /// Anything else, keeps the command name
    Unknown(String),
}

impl Command {
    /// Parse a `/name[@bot] [args]` message.
    ///
    /// Returns `None` for text that is not a command, or a command
    /// explicitly addressed to another bot.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let (_, name, mention, args) =
            regex_captures!(r"(?s)^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s+(.*))?$", text.trim())?;

        if !mention.is_empty() {
            if let Some(bot) = bot_username {
                if !mention.eq_ignore_ascii_case(bot) {
                    return None;
                }
            }
        }

        let args = args.trim();
        Some(match name {
            "start" => Self::Start,
            "new" => Self::New,
            "image" => Self::Image(args.to_string()),
            "chats" => Self::Chats,
            "history" => Self::History,
            "admin" => Self::Admin(match args.split_whitespace().next() {
                Some("users") => AdminCommand::Users,
                Some("chats") => AdminCommand::Chats,
                _ => AdminCommand::Help,
            }),
            other => Self::Unknown(other.to_string()),
        })
    }

    /// Whether the command name bears the privileged prefix
    #[must_use]
    pub fn is_admin_namespaced(&self) -> bool {
        match self {
            Self::Admin(_) => true,
            Self::Unknown(name) => name.starts_with(ADMIN_COMMAND_PREFIX),
            _ => false,
        }
    }
}
