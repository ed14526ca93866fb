//! In-memory collaborators and request helpers for router-level tests.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    async_trait,
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::jwt::JwtKeys;
use crate::auth::oauth::OAuthProviders;
use crate::auth::password::hash_password;
use crate::auth::repo::UserRepo;
use crate::auth::repo_types::{AccountState, Provider, User};
use crate::auth::tokens::IssuedToken;
use crate::config::{AppConfig, JwtConfig, MailConfig, MailTransport, OAuthConfig, StorageConfig};
use crate::conversations::repo::ConversationRepo;
use crate::conversations::repo_types::{Conversation, Message};
use crate::db::{DbState, DbStatus, StoreError};
use crate::mail::{Email, Mailer};
use crate::state::AppState;
use crate::storage::StorageClient;

/// Password of every account made by [`Fixture::active_user`].
pub const PASSWORD: &str = "correct-horse-1";

#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    /// Mutates a stored record directly, e.g. to expire a token.
    pub fn edit(&self, id: Uuid, f: impl FnOnce(&mut User)) {
        let mut users = self.users.lock().unwrap();
        f(users.get_mut(&id).expect("no such user"));
    }

    pub fn remove(&self, id: Uuid) {
        self.users.lock().unwrap().remove(&id);
    }

    fn with_user<T>(&self, id: Uuid, f: impl FnOnce(&mut User) -> T) -> Option<T> {
        self.users.lock().unwrap().get_mut(&id).map(f)
    }

    pub fn take_verification_token(&self, token: &str, now: OffsetDateTime) -> Option<User> {
        let mut users = self.users.lock().unwrap();
        let found = users.values_mut().find(|u| {
            u.email_verification_token.as_deref() == Some(token)
                && u.email_verification_expires.is_some_and(|exp| exp > now)
        });
        found.map(|u| {
            u.is_email_verified = true;
            u.email_verification_token = None;
            u.email_verification_expires = None;
            u.clone()
        })
    }

    pub fn take_reset_token(&self, token: &str, now: OffsetDateTime, password_hash: &str) -> Option<User> {
        let mut users = self.users.lock().unwrap();
        let found = users.values_mut().find(|u| {
            u.reset_password_token.as_deref() == Some(token)
                && u.reset_password_expires.is_some_and(|exp| exp > now)
        });
        found.map(|u| {
            u.password_hash = Some(password_hash.to_string());
            u.reset_password_token = None;
            u.reset_password_expires = None;
            u.clone()
        })
    }

    fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Uuid) -> bool {
        users
            .values()
            .any(|u| u.id != except && u.email.eq_ignore_ascii_case(email))
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        if Self::email_taken(&users, &user.email, user.id) {
            return Err(StoreError::DuplicateEmail);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn set_name(&self, id: Uuid, name: &str) -> Result<bool, StoreError> {
        Ok(self.with_user(id, |u| u.name = name.to_string()).is_some())
    }

    async fn set_email(&self, id: Uuid, email: &str) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        if Self::email_taken(&users, email, id) {
            return Err(StoreError::DuplicateEmail);
        }
        Ok(match users.get_mut(&id) {
            Some(u) => {
                u.email = email.to_string();
                true
            }
            None => false,
        })
    }

    async fn set_profile_photo(&self, id: Uuid, photo: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_user(id, |u| std::mem::replace(&mut u.profile_photo, photo.to_string())))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .with_user(id, |u| u.password_hash = Some(password_hash.to_string()))
            .is_some())
    }

    async fn set_first_password(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .with_user(id, |u| {
                let open = u.is_email_verified && u.password_hash.is_none();
                if open {
                    u.password_hash = Some(password_hash.to_string());
                }
                open
            })
            .unwrap_or(false))
    }

    async fn regenerate_verification(
        &self,
        id: Uuid,
        token: &IssuedToken,
        name: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .with_user(id, |u| {
                if u.is_email_verified {
                    return false;
                }
                u.email_verification_token = Some(token.value.clone());
                u.email_verification_expires = Some(token.expires_at);
                if let Some(name) = name {
                    u.name = name.to_string();
                }
                true
            })
            .unwrap_or(false))
    }

    async fn set_reset_token(&self, id: Uuid, token: &IssuedToken) -> Result<bool, StoreError> {
        Ok(self
            .with_user(id, |u| {
                if u.state() != AccountState::Active {
                    return false;
                }
                u.reset_password_token = Some(token.value.clone());
                u.reset_password_expires = Some(token.expires_at);
                true
            })
            .unwrap_or(false))
    }

    async fn link_provider(
        &self,
        id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .with_user(id, |u| {
                if u.provider.is_some() {
                    return None;
                }
                u.provider = Some(provider.as_str().to_string());
                u.provider_id = Some(provider_id.to_string());
                u.is_email_verified = true;
                Some(u.clone())
            })
            .flatten())
    }

    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.take_verification_token(token, now))
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.take_reset_token(token, now, password_hash))
    }

    async fn delete_stale(&self) -> Result<u64, StoreError> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|_, u| !u.is_stale());
        Ok((before - users.len()) as u64)
    }
}

type Interleaved = Box<dyn FnOnce(&MemoryUserRepo) + Send>;

/// Wraps [`MemoryUserRepo`] and runs a queued action right before the next
/// write, as if another request committed between this request's read and
/// its write.
pub struct InterleavingUserRepo {
    inner: Arc<MemoryUserRepo>,
    pending: Mutex<Option<Interleaved>>,
}

impl InterleavingUserRepo {
    pub fn new(inner: Arc<MemoryUserRepo>, action: impl FnOnce(&MemoryUserRepo) + Send + 'static) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(Box::new(action))),
        }
    }

    fn interleave(&self) {
        let action = self.pending.lock().unwrap().take();
        if let Some(action) = action {
            action(&self.inner);
        }
    }
}

#[async_trait]
impl UserRepo for InterleavingUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        self.interleave();
        self.inner.insert(user).await
    }

    async fn set_name(&self, id: Uuid, name: &str) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.set_name(id, name).await
    }

    async fn set_email(&self, id: Uuid, email: &str) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.set_email(id, email).await
    }

    async fn set_profile_photo(&self, id: Uuid, photo: &str) -> Result<Option<String>, StoreError> {
        self.interleave();
        self.inner.set_profile_photo(id, photo).await
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.set_password_hash(id, password_hash).await
    }

    async fn set_first_password(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.set_first_password(id, password_hash).await
    }

    async fn regenerate_verification(
        &self,
        id: Uuid,
        token: &IssuedToken,
        name: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.regenerate_verification(id, token, name).await
    }

    async fn set_reset_token(&self, id: Uuid, token: &IssuedToken) -> Result<bool, StoreError> {
        self.interleave();
        self.inner.set_reset_token(id, token).await
    }

    async fn link_provider(
        &self,
        id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        self.interleave();
        self.inner.link_provider(id, provider, provider_id).await
    }

    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        self.interleave();
        self.inner.consume_verification_token(token, now).await
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.interleave();
        self.inner.consume_reset_token(token, now, password_hash).await
    }

    async fn delete_stale(&self) -> Result<u64, StoreError> {
        self.interleave();
        self.inner.delete_stale().await
    }
}

#[derive(Default)]
pub struct MemoryConversationRepo {
    rows: Mutex<Vec<Conversation>>,
}

#[async_trait]
impl ConversationRepo for MemoryConversationRepo {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, StoreError> {
        let mut out: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn insert(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.rows.lock().unwrap().push(conversation.clone());
        Ok(())
    }

    async fn rename(&self, user_id: Uuid, id: Uuid, title: &str, now: OffsetDateTime) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.iter_mut().find(|c| c.id == id && c.user_id == user_id) {
            Some(c) => {
                c.title = title.to_string();
                c.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn append_message(&self, user_id: Uuid, id: Uuid, message: &Message) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.iter_mut().find(|c| c.id == id && c.user_id == user_id) {
            Some(c) => {
                c.messages.0.push(message.clone());
                c.updated_at = message.ts;
                true
            }
            None => false,
        })
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|c| !(c.id == id && c.user_id == user_id));
        Ok(rows.len() < before)
    }
}

/// Keeps every email; can be switched to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        anyhow::ensure!(!self.failing.load(Ordering::SeqCst), "smtp unavailable");
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/lawpal_test".into(),
        bind_addr: "127.0.0.1:0".into(),
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "lawpal".into(),
            audience: "lawpal-users".into(),
            ttl_days: 7,
        },
        frontend_urls: vec!["http://localhost:5173".into(), "https://lawpal.app".into()],
        expose_dev_tokens: true,
        mail: MailConfig {
            from: "LawPal <no-reply@lawpal.app>".into(),
            transport: MailTransport::Log,
        },
        storage: StorageConfig {
            root: PathBuf::from("uploads"),
        },
        oauth: OAuthConfig::default(),
    }
}

pub struct Fixture {
    pub state: AppState,
    pub users: Arc<MemoryUserRepo>,
    pub mailer: Arc<RecordingMailer>,
    pub storage: Arc<MemoryStorage>,
}

/// State over in-memory stores with the database marked connected.
pub fn fixture() -> Fixture {
    let users = Arc::new(MemoryUserRepo::default());
    let mailer = Arc::new(RecordingMailer::default());
    let storage = Arc::new(MemoryStorage::default());
    let state = AppState {
        config: Arc::new(test_config()),
        users: users.clone(),
        conversations: Arc::new(MemoryConversationRepo::default()),
        db_status: DbStatus::new(DbState::Connected),
        mailer: mailer.clone(),
        storage: storage.clone(),
        oauth: OAuthProviders::default(),
    };
    Fixture {
        state,
        users,
        mailer,
        storage,
    }
}

impl Fixture {
    pub fn app(&self) -> Router {
        crate::app::build_app(self.state.clone())
    }

    /// Routes user writes through an [`InterleavingUserRepo`] that runs
    /// `action` before the next one.
    pub fn interleave(&mut self, action: impl FnOnce(&MemoryUserRepo) + Send + 'static) {
        self.state.users = Arc::new(InterleavingUserRepo::new(self.users.clone(), action));
    }

    /// Verified account with [`PASSWORD`], plus a session token for it.
    pub async fn active_user(&self, email: &str) -> (User, String) {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: email.split('@').next().unwrap_or("user").to_string(),
            email: email.to_lowercase(),
            password_hash: Some(hash_password(PASSWORD).unwrap()),
            profile_photo: String::new(),
            is_email_verified: true,
            provider: None,
            provider_id: None,
            email_verification_token: None,
            email_verification_expires: None,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: now,
        };
        self.users.insert(&user).await.unwrap();
        let token = JwtKeys::from_config(&self.state.config.jwt)
            .sign_session(user.id)
            .unwrap();
        (user, token)
    }
}

pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn into_json(res: Response) -> (StatusCode, Value) {
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    into_json(request(app, method, uri, token, body).await).await
}

/// Single-file multipart POST.
pub async fn upload(
    app: &Router,
    uri: &str,
    token: &str,
    field: &str,
    file_name: &str,
    content_type: &str,
    data: &[u8],
) -> (StatusCode, Value) {
    const BOUNDARY: &str = "lawpal-test-boundary";
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    into_json(app.clone().oneshot(req).await.unwrap()).await
}
