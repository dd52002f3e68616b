/// REST collaborator client
use crate::config::Config;
use crate::error::{ApiError, Result, SyncError};
use crate::model::{
    Conversation, Event, Group, Message, NewEvent, NewGroup, Notification, Post, Profile,
    ProfileUpdate, SearchFilter, SearchResults, Settings, SettingsPatch, User,
};
use crate::session::SessionCredential;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Everything the sync layer asks of the REST API
#[async_trait]
pub trait ApiClient: Send + Sync + 'static {
    async fn current_user(&self) -> ApiResult<User>;

    // ─── Events ──────────────────────────────────────────────────────────────
    async fn events(&self) -> ApiResult<Vec<Event>>;
    async fn event(&self, id: &str) -> ApiResult<Event>;
    async fn create_event(&self, event: &NewEvent) -> ApiResult<Event>;
    async fn attend_event(&self, id: &str) -> ApiResult<Event>;

    // ─── Groups ──────────────────────────────────────────────────────────────
    async fn groups(&self) -> ApiResult<Vec<Group>>;
    async fn group(&self, id: &str) -> ApiResult<Group>;
    async fn create_group(&self, group: &NewGroup) -> ApiResult<Group>;
    async fn join_group(&self, id: &str) -> ApiResult<Group>;

    // ─── Posts ───────────────────────────────────────────────────────────────
    async fn posts(&self) -> ApiResult<Vec<Post>>;
    async fn create_post(&self, content: &str) -> ApiResult<Post>;
    async fn like_post(&self, id: &str) -> ApiResult<Post>;

    // ─── Messages ────────────────────────────────────────────────────────────
    async fn conversations(&self) -> ApiResult<Vec<Conversation>>;
    async fn start_conversation(&self, user_id: &str) -> ApiResult<Conversation>;
    async fn post_message(&self, conversation_id: &str, content: &str) -> ApiResult<Message>;

    // ─── Notifications ───────────────────────────────────────────────────────
    async fn notifications(&self) -> ApiResult<Vec<Notification>>;
    async fn mark_notification_read(&self, id: &str) -> ApiResult<Notification>;
    async fn mark_all_notifications_read(&self) -> ApiResult<()>;

    // ─── Profiles ────────────────────────────────────────────────────────────
    async fn profile(&self, username: &str) -> ApiResult<Profile>;
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> ApiResult<Profile>;
    async fn user_events(&self, user_id: &str) -> ApiResult<Vec<Event>>;
    async fn user_groups(&self, user_id: &str) -> ApiResult<Vec<Group>>;

    // ─── Settings ────────────────────────────────────────────────────────────
    async fn settings(&self) -> ApiResult<Settings>;
    async fn update_settings(&self, patch: &SettingsPatch) -> ApiResult<Settings>;

    async fn search(&self, query: &str, filter: SearchFilter) -> ApiResult<SearchResults>;
}

#[derive(Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartConversationBody<'a> {
    user_id: &'a str,
}

/// Error body the server sends with non-2xx responses
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

/// reqwest-backed [`ApiClient`]. Requests carry the bound credential as a
/// bearer token.
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    credential: watch::Receiver<Option<SessionCredential>>,
}

impl HttpApiClient {
    pub fn new(
        config: &Config,
        credential: watch::Receiver<Option<SessionCredential>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credential.borrow().as_ref() {
            Some(credential) => request.bearer_auth(credential.token()),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ApiError::new(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let fallback = status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => fallback,
        };
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("API rejected credential: {}", message);
        }
        Err(ApiError::with_status(message, status.as_u16()))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::with_status(format!("Invalid response body: {}", e), status))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        debug!("GET {}", path);
        self.fetch(self.client.get(self.url(path))).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        debug!("POST {}", path);
        self.fetch(self.client.post(self.url(path))).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        debug!("POST {}", path);
        self.fetch(self.client.post(self.url(path)).json(body)).await
    }

    async fn put_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        debug!("PUT {}", path);
        self.fetch(self.client.put(self.url(path)).json(body)).await
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Path and query string of the aggregate search endpoint
pub fn search_path(query: &str, filter: SearchFilter) -> String {
    let mut path = format!("/search?query={}", urlencoding::encode(query));
    if let Some(kind) = filter.as_param() {
        path.push_str("&type=");
        path.push_str(kind);
    }
    path
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn current_user(&self) -> ApiResult<User> {
        self.get("/auth/me").await
    }

    async fn events(&self) -> ApiResult<Vec<Event>> {
        self.get("/events").await
    }

    async fn event(&self, id: &str) -> ApiResult<Event> {
        self.get(&format!("/events/{}", segment(id))).await
    }

    async fn create_event(&self, event: &NewEvent) -> ApiResult<Event> {
        self.post_json("/events", event).await
    }

    async fn attend_event(&self, id: &str) -> ApiResult<Event> {
        self.post(&format!("/events/{}/attend", segment(id))).await
    }

    async fn groups(&self) -> ApiResult<Vec<Group>> {
        self.get("/groups").await
    }

    async fn group(&self, id: &str) -> ApiResult<Group> {
        self.get(&format!("/groups/{}", segment(id))).await
    }

    async fn create_group(&self, group: &NewGroup) -> ApiResult<Group> {
        self.post_json("/groups", group).await
    }

    async fn join_group(&self, id: &str) -> ApiResult<Group> {
        self.post(&format!("/groups/{}/join", segment(id))).await
    }

    async fn posts(&self) -> ApiResult<Vec<Post>> {
        self.get("/posts").await
    }

    async fn create_post(&self, content: &str) -> ApiResult<Post> {
        self.post_json("/posts", &ContentBody { content }).await
    }

    async fn like_post(&self, id: &str) -> ApiResult<Post> {
        self.post(&format!("/posts/{}/like", segment(id))).await
    }

    async fn conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.get("/conversations").await
    }

    async fn start_conversation(&self, user_id: &str) -> ApiResult<Conversation> {
        self.post_json("/conversations", &StartConversationBody { user_id })
            .await
    }

    async fn post_message(&self, conversation_id: &str, content: &str) -> ApiResult<Message> {
        self.post_json(
            &format!("/conversations/{}/messages", segment(conversation_id)),
            &ContentBody { content },
        )
        .await
    }

    async fn notifications(&self) -> ApiResult<Vec<Notification>> {
        self.get("/notifications").await
    }

    async fn mark_notification_read(&self, id: &str) -> ApiResult<Notification> {
        self.post(&format!("/notifications/{}/read", segment(id)))
            .await
    }

    async fn mark_all_notifications_read(&self) -> ApiResult<()> {
        debug!("POST /notifications/read-all");
        self.execute(self.client.post(self.url("/notifications/read-all")))
            .await
            .map(|_| ())
    }

    async fn profile(&self, username: &str) -> ApiResult<Profile> {
        self.get(&format!("/profiles/{}", segment(username))).await
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> ApiResult<Profile> {
        self.put_json(&format!("/profiles/{}", segment(user_id)), update)
            .await
    }

    async fn user_events(&self, user_id: &str) -> ApiResult<Vec<Event>> {
        self.get(&format!("/users/{}/events", segment(user_id))).await
    }

    async fn user_groups(&self, user_id: &str) -> ApiResult<Vec<Group>> {
        self.get(&format!("/users/{}/groups", segment(user_id))).await
    }

    async fn settings(&self) -> ApiResult<Settings> {
        self.get("/settings").await
    }

    async fn update_settings(&self, patch: &SettingsPatch) -> ApiResult<Settings> {
        self.put_json("/settings", patch).await
    }

    async fn search(&self, query: &str, filter: SearchFilter) -> ApiResult<SearchResults> {
        self.get(&search_path(query, filter)).await
    }
}
