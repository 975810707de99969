use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use murmur_core::{tokenize_markdown, ConnectionState, FeedScope, MarkdownToken};
use serde::{Deserialize, Serialize};

use super::{
    core::{METRICS_TEXT_CONTENT_TYPE, MAX_CAPTCHA_TOKEN_CHARS, MIN_CAPTCHA_TOKEN_CHARS},
    message_repository::MessageView,
    metrics::render_metrics,
    post_repository::{CommentView, UpdateView},
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegisterRequest {
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) is_public: Option<bool>,
    pub(crate) captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LoginRequest {
    pub(crate) username: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RefreshRequest {
    pub(crate) refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ChangePasswordRequest {
    pub(crate) current_password: String,
    pub(crate) new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AuthResponse {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) expires_in_secs: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterResponse {
    pub(crate) accepted: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthError {
    pub(crate) error: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct MeResponse {
    pub(crate) user_id: String,
    pub(crate) username: String,
    pub(crate) is_public: bool,
    pub(crate) joined_at_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UpdateProfileRequest {
    pub(crate) is_public: Option<bool>,
    pub(crate) username: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProfileResponse {
    pub(crate) user_id: String,
    pub(crate) username: String,
    pub(crate) is_public: bool,
    pub(crate) joined_at_unix: i64,
    pub(crate) connection: ConnectionState,
    pub(crate) pair_id: Option<String>,
    pub(crate) update_count: i64,
    pub(crate) updates_visible: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UserLookupRequest {
    pub(crate) user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserLookupItem {
    pub(crate) user_id: String,
    pub(crate) username: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserLookupResponse {
    pub(crate) users: Vec<UserLookupItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserPath {
    pub(crate) user_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdatePath {
    pub(crate) update_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectionRequestPath {
    pub(crate) request_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairPath {
    pub(crate) pair_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairMessagePath {
    pub(crate) pair_id: String,
    pub(crate) message_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PageQuery {
    pub(crate) offset: Option<usize>,
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FeedQuery {
    pub(crate) scope: Option<String>,
    pub(crate) offset: Option<usize>,
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ThreadQuery {
    pub(crate) before: Option<String>,
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SearchQuery {
    pub(crate) q: String,
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateUpdateRequest {
    pub(crate) body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateCommentRequest {
    pub(crate) body: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateResponse {
    pub(crate) update_id: String,
    pub(crate) author_id: String,
    pub(crate) author_username: String,
    pub(crate) body: String,
    pub(crate) body_tokens: Vec<MarkdownToken>,
    pub(crate) posted_at_unix: i64,
}

impl From<UpdateView> for UpdateResponse {
    fn from(view: UpdateView) -> Self {
        Self {
            update_id: view.update_id,
            author_id: view.author_id.to_string(),
            author_username: view.author_username,
            body_tokens: tokenize_markdown(&view.body),
            body: view.body,
            posted_at_unix: view.posted_at_unix,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdatePageResponse {
    pub(crate) updates: Vec<UpdateResponse>,
    pub(crate) next_offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FeedResponse {
    pub(crate) scope: FeedScope,
    pub(crate) updates: Vec<UpdateResponse>,
    pub(crate) next_offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentResponse {
    pub(crate) comment_id: String,
    pub(crate) update_id: String,
    pub(crate) author_id: String,
    pub(crate) author_username: String,
    pub(crate) body: String,
    pub(crate) body_tokens: Vec<MarkdownToken>,
    pub(crate) posted_at_unix: i64,
}

impl From<CommentView> for CommentResponse {
    fn from(view: CommentView) -> Self {
        Self {
            comment_id: view.comment_id,
            update_id: view.update_id,
            author_id: view.author_id.to_string(),
            author_username: view.author_username,
            body_tokens: tokenize_markdown(&view.body),
            body: view.body,
            posted_at_unix: view.posted_at_unix,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentListResponse {
    pub(crate) comments: Vec<CommentResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateDetailResponse {
    pub(crate) update: UpdateResponse,
    pub(crate) comments: Vec<CommentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateConnectionRequest {
    pub(crate) recipient_user_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectionRequestResponse {
    pub(crate) request_id: String,
    pub(crate) sender_user_id: String,
    pub(crate) sender_username: String,
    pub(crate) recipient_user_id: String,
    pub(crate) recipient_username: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectionRequestCreateResponse {
    pub(crate) request_id: String,
    pub(crate) sender_user_id: String,
    pub(crate) recipient_user_id: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectionRequestListResponse {
    pub(crate) incoming: Vec<ConnectionRequestResponse>,
    pub(crate) outgoing: Vec<ConnectionRequestResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PairResponse {
    pub(crate) pair_id: String,
    pub(crate) user_id: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectionResponse {
    pub(crate) user_id: String,
    pub(crate) username: String,
    pub(crate) pair_id: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectionListResponse {
    pub(crate) connections: Vec<ConnectionResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SendMessageRequest {
    pub(crate) body: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageResponse {
    pub(crate) message_id: String,
    pub(crate) sender_id: String,
    pub(crate) recipient_id: String,
    pub(crate) body: String,
    pub(crate) body_tokens: Vec<MarkdownToken>,
    pub(crate) sent_at_unix: i64,
    pub(crate) read: bool,
}

impl From<MessageView> for MessageResponse {
    fn from(view: MessageView) -> Self {
        Self {
            message_id: view.message_id,
            sender_id: view.sender_id.to_string(),
            recipient_id: view.recipient_id.to_string(),
            body_tokens: tokenize_markdown(&view.body),
            body: view.body,
            sent_at_unix: view.sent_at_unix,
            read: view.read,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ThreadResponse {
    pub(crate) pair_id: String,
    pub(crate) peer_user_id: String,
    pub(crate) messages: Vec<MessageResponse>,
    pub(crate) next_before: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InboxThreadResponse {
    pub(crate) peer_user_id: String,
    pub(crate) peer_username: String,
    pub(crate) pair_id: Option<String>,
    pub(crate) last_sent_at_unix: i64,
    pub(crate) unread_count: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct InboxResponse {
    pub(crate) threads: Vec<InboxThreadResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserSearchItem {
    pub(crate) user_id: String,
    pub(crate) username: String,
    pub(crate) is_public: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResponse {
    pub(crate) users: Vec<UserSearchItem>,
    pub(crate) updates: Vec<UpdateResponse>,
}

pub(crate) struct CaptchaToken(String);

impl CaptchaToken {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CaptchaToken {
    type Error = ();

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !(MIN_CAPTCHA_TOKEN_CHARS..=MAX_CAPTCHA_TOKEN_CHARS).contains(&value.chars().count()) {
            return Err(());
        }
        if value
            .chars()
            .any(|char| !(('\u{21}'..='\u{7e}').contains(&char)))
        {
            return Err(());
        }
        Ok(Self(value))
    }
}

/// Only `success` is read; the verify endpoint also returns hostname and
/// challenge timestamps.
#[derive(Debug, Deserialize)]
pub(crate) struct HcaptchaVerifyResponse {
    pub(crate) success: bool,
}
