#![forbid(unsafe_code)]

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub const MAX_UPDATE_CHARS: usize = 140;
pub const MAX_COMMENT_CHARS: usize = 280;
pub const MAX_MESSAGE_CHARS: usize = 1_000;
pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_OFFSET: usize = 10_000;

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "murmur"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("username is invalid")]
    InvalidUsername,
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("update body is invalid")]
    InvalidUpdateBody,
    #[error("comment body is invalid")]
    InvalidCommentBody,
    #[error("message body is invalid")]
    InvalidMessageBody,
    #[error("feed scope is invalid")]
    InvalidFeedScope,
    #[error("page window is invalid")]
    InvalidPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkdownToken {
    ParagraphStart,
    ParagraphEnd,
    EmphasisStart,
    EmphasisEnd,
    StrongStart,
    StrongEnd,
    LinkStart { href: String },
    LinkEnd,
    Text { text: String },
    Code { code: String },
    SoftBreak,
    HardBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(Ulid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn from_ulid(value: Ulid) -> Self {
        Self(value)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidUserId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_username(&value)?;
        Ok(Self(value))
    }
}

/// Text of a status update. Stored verbatim once validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateBody(String);

impl UpdateBody {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for UpdateBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_text_body(&value, MAX_UPDATE_CHARS) {
            return Err(DomainError::InvalidUpdateBody);
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommentBody(String);

impl CommentBody {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for CommentBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_text_body(&value, MAX_COMMENT_CHARS) {
            return Err(DomainError::InvalidCommentBody);
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageBody(String);

impl MessageBody {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_text_body(&value, MAX_MESSAGE_CHARS) {
            return Err(DomainError::InvalidMessageBody);
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileVisibility {
    Public,
    Private,
}

impl ProfileVisibility {
    #[must_use]
    pub const fn from_is_public(is_public: bool) -> Self {
        if is_public {
            Self::Public
        } else {
            Self::Private
        }
    }

    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

/// How the viewer of a profile relates to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[serde(rename = "self")]
    SelfProfile,
    Connected,
    RequestSent,
    RequestReceived,
    None,
}

impl ConnectionState {
    /// Resolves the relation from the facts a repository can look up.
    /// A pair takes precedence over any stale pending request.
    #[must_use]
    pub fn resolve(
        viewer: Option<UserId>,
        owner: UserId,
        connected: bool,
        request_sent: bool,
        request_received: bool,
    ) -> Self {
        match viewer {
            None => Self::None,
            Some(viewer) if viewer == owner => Self::SelfProfile,
            Some(_) if connected => Self::Connected,
            Some(_) if request_sent => Self::RequestSent,
            Some(_) if request_received => Self::RequestReceived,
            Some(_) => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedScope {
    #[default]
    Public,
    Connections,
}

impl FeedScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Connections => "connections",
        }
    }
}

impl TryFrom<String> for FeedScope {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "public" => Ok(Self::Public),
            "connections" => Ok(Self::Connections),
            _ => Err(DomainError::InvalidFeedScope),
        }
    }
}

/// Offset window over a newest-first listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    offset: usize,
    limit: usize,
}

impl PageRequest {
    /// # Errors
    /// Returns [`DomainError::InvalidPage`] when the limit is zero or above
    /// [`MAX_PAGE_LIMIT`], or the offset is above [`MAX_PAGE_OFFSET`].
    pub fn new(offset: Option<usize>, limit: Option<usize>) -> Result<Self, DomainError> {
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT || offset > MAX_PAGE_OFFSET {
            return Err(DomainError::InvalidPage);
        }
        Ok(Self { offset, limit })
    }

    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn limit(self) -> usize {
        self.limit
    }

    /// One extra row is fetched so the caller can tell whether another page exists.
    #[must_use]
    pub const fn fetch_limit(self) -> usize {
        self.limit + 1
    }

    /// Trims an over-fetched page and returns the offset of the following one.
    pub fn finish<T>(self, items: &mut Vec<T>) -> Option<usize> {
        if items.len() > self.limit {
            items.truncate(self.limit);
            Some(self.offset + self.limit)
        } else {
            None
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Orders two user ids so a pair is looked up the same way from either side.
#[must_use]
pub fn canonical_pair(user_a: UserId, user_b: UserId) -> (UserId, UserId) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

/// Whether `viewer` may read the updates of `owner`.
///
/// Public owners are readable by everyone, anonymous viewers included.
/// Private owners are readable by themselves and by users they are paired with.
#[must_use]
pub fn can_view_updates(
    viewer: Option<UserId>,
    owner: UserId,
    visibility: ProfileVisibility,
    connected: bool,
) -> bool {
    if visibility.is_public() {
        return true;
    }
    match viewer {
        Some(viewer) => viewer == owner || connected,
        None => false,
    }
}

#[must_use]
pub const fn can_message(connected: bool) -> bool {
    connected
}

#[must_use]
pub fn tokenize_markdown(markdown: &str) -> Vec<MarkdownToken> {
    let mut tokens = Vec::new();
    let parser = Parser::new_ext(markdown, Options::empty());
    let mut link_stack: Vec<bool> = Vec::new();

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => tokens.push(MarkdownToken::ParagraphStart),
                Tag::Emphasis => tokens.push(MarkdownToken::EmphasisStart),
                Tag::Strong => tokens.push(MarkdownToken::StrongStart),
                Tag::Link { dest_url, .. } => {
                    let href = sanitize_link_target(dest_url.as_ref());
                    link_stack.push(href.is_some());
                    if let Some(href) = href {
                        tokens.push(MarkdownToken::LinkStart { href });
                    }
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Paragraph => tokens.push(MarkdownToken::ParagraphEnd),
                TagEnd::Emphasis => tokens.push(MarkdownToken::EmphasisEnd),
                TagEnd::Strong => tokens.push(MarkdownToken::StrongEnd),
                TagEnd::Link => {
                    if link_stack.pop().unwrap_or(false) {
                        tokens.push(MarkdownToken::LinkEnd);
                    }
                }
                _ => {}
            },
            Event::Text(text) if !text.is_empty() => tokens.push(MarkdownToken::Text {
                text: text.into_string(),
            }),
            Event::Code(code) => tokens.push(MarkdownToken::Code {
                code: code.into_string(),
            }),
            Event::SoftBreak => tokens.push(MarkdownToken::SoftBreak),
            Event::HardBreak => tokens.push(MarkdownToken::HardBreak),
            _ => {}
        }
    }

    tokens
}

fn sanitize_link_target(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (scheme, _) = trimmed.split_once(':')?;
    if matches!(
        scheme.to_ascii_lowercase().as_str(),
        "http" | "https" | "mailto"
    ) {
        Some(trimmed.to_owned())
    } else {
        None
    }
}

fn validate_username(value: &str) -> Result<(), DomainError> {
    if !(3..=20).contains(&value.len()) {
        return Err(DomainError::InvalidUsername);
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Ok(());
    }
    Err(DomainError::InvalidUsername)
}

fn is_valid_text_body(value: &str, max_chars: usize) -> bool {
    let chars = value.chars().count();
    (1..=max_chars).contains(&chars) && !value.trim().is_empty() && !value.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::{
        can_message, can_view_updates, canonical_pair, project_name, tokenize_markdown,
        CommentBody, ConnectionState, DomainError, FeedScope, MarkdownToken, MessageBody,
        PageRequest, ProfileVisibility, UpdateBody, UserId, Username, MAX_PAGE_LIMIT,
        MAX_PAGE_OFFSET,
    };

    #[test]
    fn project_name_is_stable() {
        assert_eq!(project_name(), "murmur");
    }

    #[test]
    fn username_invariants_enforced() {
        let valid = Username::try_from(String::from("alice.b_1")).unwrap();
        assert_eq!(valid.as_str(), "alice.b_1");
        assert_eq!(
            Username::try_from(String::from("al")).unwrap_err(),
            DomainError::InvalidUsername
        );
        assert_eq!(
            Username::try_from("a".repeat(21)).unwrap_err(),
            DomainError::InvalidUsername
        );
        assert_eq!(
            Username::try_from(String::from("bad-name")).unwrap_err(),
            DomainError::InvalidUsername
        );
    }

    #[test]
    fn update_body_accepts_exactly_140_chars() {
        let body = "é".repeat(140);
        assert_eq!(UpdateBody::try_from(body.clone()).unwrap().as_str(), body);
        assert_eq!(
            UpdateBody::try_from("x".repeat(141)).unwrap_err(),
            DomainError::InvalidUpdateBody
        );
    }

    #[test]
    fn text_bodies_reject_blank_and_nul() {
        assert!(UpdateBody::try_from(String::new()).is_err());
        assert!(UpdateBody::try_from(String::from("   \n")).is_err());
        assert!(CommentBody::try_from(String::from("ok\0")).is_err());
        assert!(MessageBody::try_from("m".repeat(1_001)).is_err());
        assert_eq!(
            CommentBody::try_from(String::from("  nice one ")).unwrap().as_str(),
            "  nice one "
        );
        assert!(MessageBody::try_from("m".repeat(1_000)).is_ok());
    }

    #[test]
    fn user_id_round_trips_through_string() {
        let id = UserId::new();
        let parsed = UserId::try_from(id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(
            UserId::try_from(String::from("not-a-ulid")).unwrap_err(),
            DomainError::InvalidUserId
        );
    }

    #[test]
    fn canonical_pair_is_direction_independent() {
        let first = UserId::new();
        let second = UserId::new();
        let forward = canonical_pair(first, second);
        let backward = canonical_pair(second, first);
        assert_eq!(forward, backward);
        assert!(forward.0 <= forward.1);
        assert!(forward.0.to_string() <= forward.1.to_string());
    }

    #[test]
    fn visibility_gates_private_updates() {
        let owner = UserId::new();
        let stranger = UserId::new();

        assert!(can_view_updates(None, owner, ProfileVisibility::Public, false));
        assert!(can_view_updates(
            Some(stranger),
            owner,
            ProfileVisibility::Public,
            false
        ));
        assert!(!can_view_updates(None, owner, ProfileVisibility::Private, false));
        assert!(!can_view_updates(
            Some(stranger),
            owner,
            ProfileVisibility::Private,
            false
        ));
        assert!(can_view_updates(
            Some(stranger),
            owner,
            ProfileVisibility::Private,
            true
        ));
        assert!(can_view_updates(
            Some(owner),
            owner,
            ProfileVisibility::Private,
            false
        ));
    }

    #[test]
    fn messaging_requires_pair() {
        assert!(can_message(true));
        assert!(!can_message(false));
    }

    #[test]
    fn profile_visibility_maps_is_public_flag() {
        assert_eq!(
            ProfileVisibility::from_is_public(true),
            ProfileVisibility::Public
        );
        assert!(!ProfileVisibility::from_is_public(false).is_public());
    }

    #[test]
    fn connection_state_prefers_self_then_pair() {
        let owner = UserId::new();
        let viewer = UserId::new();
        assert_eq!(
            ConnectionState::resolve(Some(owner), owner, false, false, false),
            ConnectionState::SelfProfile
        );
        assert_eq!(
            ConnectionState::resolve(Some(viewer), owner, true, true, false),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::resolve(Some(viewer), owner, false, true, false),
            ConnectionState::RequestSent
        );
        assert_eq!(
            ConnectionState::resolve(Some(viewer), owner, false, false, true),
            ConnectionState::RequestReceived
        );
        assert_eq!(
            ConnectionState::resolve(None, owner, false, false, false),
            ConnectionState::None
        );
    }

    #[test]
    fn feed_scope_enforces_allowed_values() {
        assert_eq!(
            FeedScope::try_from(String::from("public")).unwrap(),
            FeedScope::Public
        );
        assert_eq!(
            FeedScope::try_from(String::from("connections")).unwrap().as_str(),
            "connections"
        );
        assert_eq!(
            FeedScope::try_from(String::from("friends")).unwrap_err(),
            DomainError::InvalidFeedScope
        );
    }

    #[test]
    fn page_request_bounds_and_next_offset() {
        let page = PageRequest::new(None, None).unwrap();
        assert_eq!((page.offset(), page.limit()), (0, 20));
        assert!(PageRequest::new(None, Some(0)).is_err());
        assert!(PageRequest::new(None, Some(MAX_PAGE_LIMIT + 1)).is_err());
        assert!(PageRequest::new(Some(MAX_PAGE_OFFSET + 1), None).is_err());

        let page = PageRequest::new(Some(4), Some(2)).unwrap();
        let mut items = vec![1, 2, 3];
        assert_eq!(page.finish(&mut items), Some(6));
        assert_eq!(items, vec![1, 2]);

        let mut short = vec![1];
        assert_eq!(page.finish(&mut short), None);
    }

    #[test]
    fn markdown_tokenizer_drops_unsafe_links_and_html() {
        let tokens =
            tokenize_markdown("hi **there** [ok](https://example.com) [bad](javascript:alert(1)) <b>x</b>");
        assert!(tokens.contains(&MarkdownToken::StrongStart));
        assert!(tokens.contains(&MarkdownToken::LinkStart {
            href: String::from("https://example.com")
        }));
        assert!(!tokens.iter().any(|token| matches!(
            token,
            MarkdownToken::LinkStart { href } if href.starts_with("javascript")
        )));
        assert!(!tokens.iter().any(|token| matches!(
            token,
            MarkdownToken::Text { text } if text.contains("<b>")
        )));
        let link_starts = tokens
            .iter()
            .filter(|token| matches!(token, MarkdownToken::LinkStart { .. }))
            .count();
        let link_ends = tokens
            .iter()
            .filter(|token| matches!(token, MarkdownToken::LinkEnd))
            .count();
        assert_eq!(link_starts, link_ends);
    }
}
