//! Transport-neutral events produced from Telegram updates.

/// Kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    pub title: String,
    pub member_count: Option<u64>,
}

impl ChatInfo {
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChatKind::Group | ChatKind::Channel)
    }
}

/// A chat participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Member {
    /// First name, falling back to the username, then a generic label.
    #[must_use]
    pub fn display_name(&self) -> String {
        if !self.first_name.trim().is_empty() {
            return self.first_name.clone();
        }
        self.username
            .clone()
            .unwrap_or_else(|| "User".to_owned())
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", self.display_name()),
            _ => self.display_name(),
        }
    }

    /// `@username`, or `N/A` without one.
    #[must_use]
    pub fn mention(&self) -> String {
        self.username
            .as_ref()
            .map_or_else(|| "N/A".to_owned(), |u| format!("@{u}"))
    }
}

/// Content kind, used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Voice,
    Sticker,
    Document,
    Other,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i32,
    pub chat: ChatInfo,
    pub sender: Member,
    pub text: String,
    pub kind: MessageKind,
    pub outgoing: bool,
    /// Author of the message this one replies to.
    pub reply_to: Option<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(IncomingMessage),
    MemberJoined { chat: ChatInfo, member: Member },
    MemberLeft { chat: ChatInfo, member: Member },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(first: &str, last: Option<&str>, username: Option<&str>) -> Member {
        Member {
            user_id: 1,
            first_name: first.to_owned(),
            last_name: last.map(str::to_owned),
            username: username.map(str::to_owned),
            is_bot: false,
        }
    }

    #[test]
    fn test_names() {
        let full = member("Ann", Some("Lee"), Some("ann"));
        assert_eq!(full.display_name(), "Ann");
        assert_eq!(full.full_name(), "Ann Lee");
        assert_eq!(full.mention(), "@ann");

        let bare = member("", None, None);
        assert_eq!(bare.display_name(), "User");
        assert_eq!(bare.mention(), "N/A");
        assert_eq!(member(" ", None, Some("zed")).display_name(), "zed");
    }
}
