use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::RETRY_AFTER,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tidings_core::{
    ConversationId, Dialog, EntityId, ErrorCategory, Message, MessageId, Session, SyncError,
};
use tracing::{debug, warn};
use url::Url;

use crate::api::{HistoryQuery, MessagingApi, UploadRequest};

/// [`MessagingApi`] over the gateway's JSON HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpMessagingApi {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct DialogsResponse {
    #[serde(default)]
    dialogs: Vec<Dialog>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AvatarsResponse {
    #[serde(default)]
    avatars: HashMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: ConversationId,
    text: &'a str,
    reply_to: Option<MessageId>,
}

#[derive(Serialize)]
struct EditMessageBody<'a> {
    chat_id: ConversationId,
    message_id: MessageId,
    text: &'a str,
}

#[derive(Serialize)]
struct DeleteMessagesBody<'a> {
    chat_id: ConversationId,
    message_ids: &'a [MessageId],
}

#[derive(Serialize)]
struct AvatarsBody<'a> {
    entity_ids: &'a [EntityId],
}

impl HttpMessagingApi {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder().timeout(timeout).build().map_err(|err| {
            SyncError::new(
                ErrorCategory::Config,
                "http_client_build_failed",
                err.to_string(),
            )
        })?;
        Ok(Self { http, base_url })
    }

    /// Resolve `segments` below the API base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::new(
                    ErrorCategory::Config,
                    "invalid_api_base_url",
                    format!("'{}' cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_checked(
        &self,
        request: RequestBuilder,
        code: &'static str,
    ) -> Result<Response, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| map_request_error(code, err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(status_error(code, status, response).await)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        code: &'static str,
    ) -> Result<T, SyncError> {
        let response = self.send_checked(request, code).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| SyncError::serialization("response_decode_error", format!("{code}: {err}")))
    }
}

#[async_trait]
impl MessagingApi for HttpMessagingApi {
    async fn list_dialogs(&self, session: &Session, limit: u32) -> Result<Vec<Dialog>, SyncError> {
        let url = self.endpoint(&["chats", "dialogs"])?;
        let request = self
            .http
            .get(url)
            .query(&[("session_id", session.handle.as_str())])
            .query(&[("limit", limit)]);
        let body: DialogsResponse = self.execute(request, "dialogs_fetch_failed").await?;
        debug!(count = body.dialogs.len(), "fetched dialogs");
        Ok(body.dialogs)
    }

    async fn fetch_history(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, SyncError> {
        let url = self.endpoint(&["messages", &conversation_id.to_string()])?;
        // The gateway reads offset_id=0 as "newest page".
        let offset_id = query.before.unwrap_or(0);
        let request = self
            .http
            .get(url)
            .query(&[("session_id", session.handle.as_str())])
            .query(&[("limit", i64::from(query.limit)), ("offset_id", offset_id)]);
        let body: MessagesResponse = self.execute(request, "history_fetch_failed").await?;
        Ok(body.messages)
    }

    async fn send_message(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        let url = self.endpoint(&["messages", "send"])?;
        let request = self
            .http
            .post(url)
            .query(&[("session_id", session.handle.as_str())])
            .json(&SendMessageBody {
                chat_id: conversation_id,
                text,
                reply_to,
            });
        self.execute(request, "send_failed").await
    }

    async fn edit_message(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, SyncError> {
        let url = self.endpoint(&["messages", "edit"])?;
        let request = self
            .http
            .put(url)
            .query(&[("session_id", session.handle.as_str())])
            .json(&EditMessageBody {
                chat_id: conversation_id,
                message_id,
                text,
            });
        self.execute(request, "edit_failed").await
    }

    async fn delete_messages(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), SyncError> {
        let url = self.endpoint(&["messages", "delete"])?;
        let request = self
            .http
            .delete(url)
            .query(&[("session_id", session.handle.as_str())])
            .json(&DeleteMessagesBody {
                chat_id: conversation_id,
                message_ids,
            });
        self.send_checked(request, "delete_failed").await?;
        Ok(())
    }

    async fn fetch_avatars(
        &self,
        session: &Session,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, String>, SyncError> {
        let url = self.endpoint(&["chats", "avatars"])?;
        let request = self
            .http
            .post(url)
            .query(&[("session_id", session.handle.as_str())])
            .json(&AvatarsBody { entity_ids });
        let body: AvatarsResponse = self.execute(request, "avatars_fetch_failed").await?;
        Ok(collect_avatars(body.avatars))
    }

    async fn upload_file(
        &self,
        session: &Session,
        upload: UploadRequest,
    ) -> Result<Message, SyncError> {
        let url = self.endpoint(&["media", "upload"])?;
        let UploadRequest {
            conversation_id,
            file_name,
            bytes,
            content_type,
            caption,
            reply_to,
        } = upload;

        let mut part = Part::bytes(bytes).file_name(file_name);
        if let Some(content_type) = content_type {
            part = part.mime_str(&content_type).map_err(|err| {
                SyncError::new(
                    ErrorCategory::Config,
                    "invalid_content_type",
                    format!("'{content_type}': {err}"),
                )
            })?;
        }

        let mut request = self
            .http
            .post(url)
            .query(&[("session_id", session.handle.as_str())])
            .query(&[("chat_id", conversation_id)]);
        if let Some(caption) = caption.as_deref().filter(|caption| !caption.is_empty()) {
            request = request.query(&[("caption", caption)]);
        }
        if let Some(reply_to) = reply_to {
            request = request.query(&[("reply_to", reply_to)]);
        }

        self.execute(request.multipart(Form::new().part("file", part)), "upload_failed")
            .await
    }

    async fn logout(&self, session: &Session) -> Result<(), SyncError> {
        let url = self.endpoint(&["auth", "logout"])?;
        let request = self
            .http
            .post(url)
            .query(&[("session_id", session.handle.as_str())]);
        self.send_checked(request, "logout_failed").await?;
        Ok(())
    }
}

fn collect_avatars(raw: HashMap<String, Option<String>>) -> HashMap<EntityId, String> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let Ok(entity_id) = key.parse::<EntityId>() else {
                warn!(%key, "ignoring avatar with non-numeric entity id");
                return None;
            };
            value
                .filter(|data| !data.is_empty())
                .map(|data| (entity_id, data))
        })
        .collect()
}

fn map_request_error(code: &'static str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        return SyncError::new(
            ErrorCategory::Network,
            "request_timeout",
            format!("{code}: {err}"),
        );
    }
    SyncError::new(ErrorCategory::Network, code, err.to_string())
}

async fn status_error(code: &'static str, status: StatusCode, response: Response) -> SyncError {
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.detail)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });

    let mut error = SyncError::from_http_status(status.as_u16(), code, message);
    if let Some(retry_after) = retry_after {
        error = error.with_retry_after(retry_after);
    }
    error
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
