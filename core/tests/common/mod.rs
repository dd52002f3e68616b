//! In-memory fakes of the REST API and the push transport
#![allow(dead_code)]

use agora_sync::api::{ApiClient, ApiResult};
use agora_sync::model::{
    Conversation, Event, Group, Message, NewEvent, NewGroup, Notification, NotificationKind,
    Organizer, Post, Profile, ProfileUpdate, SearchFilter, SearchResults, Settings, SettingsPatch,
    User,
};
use agora_sync::push::{ClientFrame, PushLink, PushTransport, ServerFrame};
use agora_sync::{ApiError, Config, Result, Session, SessionCredential, SyncClient};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ─── Builders ────────────────────────────────────────────────────────────────

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: None,
        username: id.to_string(),
        first_name: "Ana".to_string(),
        last_name: "Lopez".to_string(),
        bio: None,
        avatar: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn event(id: &str) -> Event {
    Event {
        id: id.to_string(),
        title: format!("Event {}", id),
        description: "Meetup".to_string(),
        location: "Library".to_string(),
        start_date: Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap(),
        end_date: Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap(),
        organizer: Organizer {
            id: "u1".to_string(),
            name: "Ana Lopez".to_string(),
            avatar: None,
        },
        capacity: 30,
        attendee_count: 0,
        image: None,
    }
}

pub fn post(id: &str, content: &str) -> Post {
    Post {
        id: id.to_string(),
        content: content.to_string(),
        author: user("u1"),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        likes: 0,
        comments: 0,
        liked: false,
    }
}

pub fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationKind::Comment,
        content: "commented on your post".to_string(),
        read,
        created_at: Utc::now(),
        sender: None,
        related_id: None,
    }
}

pub fn message(id: &str, conversation_id: &str) -> Message {
    Message {
        id: id.to_string(),
        content: format!("text {}", id),
        sender_id: "u2".to_string(),
        conversation_id: conversation_id.to_string(),
        created_at: Utc::now(),
        sender: None,
    }
}

pub fn conversation(id: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        participants: vec![user("u1"), user("u2")],
        messages: vec![],
        updated_at: Utc::now(),
    }
}

fn not_stubbed<T>() -> ApiResult<T> {
    Err(ApiError::new("not stubbed"))
}

fn gate(slot: &Mutex<Option<Arc<Notify>>>) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *slot.lock().unwrap() = Some(gate.clone());
    gate
}

/// Wait on the gate in `slot`, if one is set
async fn pass(slot: &Mutex<Option<Arc<Notify>>>) {
    let gate = slot.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

// ─── Fake REST API ───────────────────────────────────────────────────────────

pub struct FakeApi {
    pub current_user: Mutex<ApiResult<User>>,
    pub current_user_gate: Mutex<Option<Arc<Notify>>>,
    pub events: Mutex<ApiResult<Vec<Event>>>,
    pub events_gate: Mutex<Option<Arc<Notify>>>,
    pub event: Mutex<ApiResult<Event>>,
    pub posts: Mutex<ApiResult<Vec<Post>>>,
    pub create_post: Mutex<ApiResult<Post>>,
    pub create_post_gate: Mutex<Option<Arc<Notify>>>,
    pub conversations: Mutex<ApiResult<Vec<Conversation>>>,
    pub notifications: Mutex<ApiResult<Vec<Notification>>>,
    /// Every search received, in order
    pub search_calls: Mutex<Vec<(String, SearchFilter)>>,
    /// Searches for these queries wait until notified
    pub search_gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            current_user: Mutex::new(Ok(user("u1"))),
            current_user_gate: Mutex::new(None),
            events: Mutex::new(Ok(vec![])),
            events_gate: Mutex::new(None),
            event: Mutex::new(not_stubbed()),
            posts: Mutex::new(Ok(vec![])),
            create_post: Mutex::new(not_stubbed()),
            create_post_gate: Mutex::new(None),
            conversations: Mutex::new(Ok(vec![])),
            notifications: Mutex::new(Ok(vec![])),
            search_calls: Mutex::new(vec![]),
            search_gates: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeApi {
    pub fn gate_search(&self, query: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.search_gates
            .lock()
            .unwrap()
            .insert(query.to_string(), gate.clone());
        gate
    }

    pub fn gate_create_post(&self) -> Arc<Notify> {
        gate(&self.create_post_gate)
    }

    pub fn gate_current_user(&self) -> Arc<Notify> {
        gate(&self.current_user_gate)
    }

    pub fn gate_events(&self) -> Arc<Notify> {
        gate(&self.events_gate)
    }

    pub fn searches(&self) -> Vec<(String, SearchFilter)> {
        self.search_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn current_user(&self) -> ApiResult<User> {
        pass(&self.current_user_gate).await;
        self.current_user.lock().unwrap().clone()
    }

    async fn events(&self) -> ApiResult<Vec<Event>> {
        pass(&self.events_gate).await;
        self.events.lock().unwrap().clone()
    }

    async fn event(&self, _id: &str) -> ApiResult<Event> {
        self.event.lock().unwrap().clone()
    }

    async fn create_event(&self, _event: &NewEvent) -> ApiResult<Event> {
        not_stubbed()
    }

    async fn attend_event(&self, _id: &str) -> ApiResult<Event> {
        not_stubbed()
    }

    async fn groups(&self) -> ApiResult<Vec<Group>> {
        Ok(vec![])
    }

    async fn group(&self, _id: &str) -> ApiResult<Group> {
        not_stubbed()
    }

    async fn create_group(&self, _group: &NewGroup) -> ApiResult<Group> {
        not_stubbed()
    }

    async fn join_group(&self, _id: &str) -> ApiResult<Group> {
        not_stubbed()
    }

    async fn posts(&self) -> ApiResult<Vec<Post>> {
        self.posts.lock().unwrap().clone()
    }

    async fn create_post(&self, _content: &str) -> ApiResult<Post> {
        pass(&self.create_post_gate).await;
        self.create_post.lock().unwrap().clone()
    }

    async fn like_post(&self, _id: &str) -> ApiResult<Post> {
        not_stubbed()
    }

    async fn conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.conversations.lock().unwrap().clone()
    }

    async fn start_conversation(&self, _user_id: &str) -> ApiResult<Conversation> {
        not_stubbed()
    }

    async fn post_message(&self, conversation_id: &str, content: &str) -> ApiResult<Message> {
        Ok(Message {
            content: content.to_string(),
            ..message("sent-1", conversation_id)
        })
    }

    async fn notifications(&self) -> ApiResult<Vec<Notification>> {
        self.notifications.lock().unwrap().clone()
    }

    async fn mark_notification_read(&self, _id: &str) -> ApiResult<Notification> {
        not_stubbed()
    }

    async fn mark_all_notifications_read(&self) -> ApiResult<()> {
        Ok(())
    }

    async fn profile(&self, _username: &str) -> ApiResult<Profile> {
        not_stubbed()
    }

    async fn update_profile(&self, _user_id: &str, _update: &ProfileUpdate) -> ApiResult<Profile> {
        not_stubbed()
    }

    async fn user_events(&self, _user_id: &str) -> ApiResult<Vec<Event>> {
        Ok(vec![])
    }

    async fn user_groups(&self, _user_id: &str) -> ApiResult<Vec<Group>> {
        Ok(vec![])
    }

    async fn settings(&self) -> ApiResult<Settings> {
        not_stubbed()
    }

    async fn update_settings(&self, _patch: &SettingsPatch) -> ApiResult<Settings> {
        not_stubbed()
    }

    async fn search(&self, query: &str, filter: SearchFilter) -> ApiResult<SearchResults> {
        self.search_calls
            .lock()
            .unwrap()
            .push((query.to_string(), filter));
        let gate = self.search_gates.lock().unwrap().get(query).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(SearchResults {
            users: vec![user(query)],
            ..Default::default()
        })
    }
}

// ─── Fake push transport ─────────────────────────────────────────────────────

/// Server end of one fake connection. Dropping it closes the link.
pub struct ServerEnd {
    pub token: String,
    pub to_client: mpsc::UnboundedSender<ServerFrame>,
    pub from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

struct FakeLink {
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl PushLink for FakeLink {
    async fn send(&mut self, frame: ClientFrame) -> Result<()> {
        let _ = self.outbound.send(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<ServerFrame>> {
        Ok(self.inbound.recv().await)
    }
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    /// Links currently open
    pub live: Arc<AtomicUsize>,
    /// Highest number of links ever open at once
    pub peak: Arc<AtomicUsize>,
    pub connects: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                live: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                connects: AtomicUsize::new(0),
                servers,
            },
            rx,
        )
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, credential: &SessionCredential) -> Result<Box<dyn PushLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_live, Ordering::SeqCst);

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerEnd {
            token: credential.token().to_string(),
            to_client,
            from_client,
        });
        Ok(Box::new(FakeLink {
            inbound,
            outbound,
            live: self.live.clone(),
        }))
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub client: SyncClient,
    pub session: Session,
    pub api: Arc<FakeApi>,
    pub transport: Arc<FakeTransport>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let session = Session::new();
        let api = Arc::new(FakeApi::default());
        let (transport, servers) = FakeTransport::new();
        let transport = Arc::new(transport);
        let client = SyncClient::create(config, session.clone(), api.clone(), transport.clone());
        Self {
            client,
            session,
            api,
            transport,
            servers,
        }
    }

    /// Next server end opened by the client
    pub async fn next_server(&mut self) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(5), self.servers.recv())
            .await
            .expect("no connection within 5s")
            .expect("transport dropped")
    }
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}
