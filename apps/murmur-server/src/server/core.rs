use std::{
    collections::{BTreeMap, HashMap},
    sync::{atomic::AtomicI64, Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use murmur_core::{UserId, Username};
use pasetors::{keys::SymmetricKey, version4::V4};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tantivy::schema::Field;
use tokio::sync::{mpsc, oneshot, OnceCell, RwLock};
use ulid::{Generator, Ulid};

use super::{
    auth::{build_captcha_config, hash_password},
    errors::AuthFailure,
    network::IpNetwork,
    search::init_search_service,
    session_store::SessionStore,
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 120;
pub const DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE: u32 = 20;
pub const DEFAULT_SEARCH_QUERY_MAX_CHARS: usize = 256;
pub const DEFAULT_SEARCH_RESULT_LIMIT: usize = 20;
pub const DEFAULT_SEARCH_RESULT_LIMIT_MAX: usize = 50;
pub const DEFAULT_SEARCH_QUERY_TIMEOUT_MILLIS: u64 = 200;
pub const DEFAULT_CAPTCHA_VERIFY_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_THREAD_PAGE_LIMIT: usize = 50;
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
pub(crate) const REFRESH_REPLAY_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;
pub(crate) const AUTH_SESSION_SWEEP_INTERVAL_SECS: i64 = 60;
pub(crate) const RATE_LIMIT_SWEEP_INTERVAL_SECS: i64 = 60;
pub(crate) const LOGIN_LOCK_THRESHOLD: u8 = 5;
pub(crate) const LOGIN_LOCK_SECS: i64 = 30;
pub(crate) const MAX_THREAD_PAGE_LIMIT: usize = 100;
pub(crate) const MAX_USER_LOOKUP_IDS: usize = 64;
pub(crate) const MAX_SEARCH_TERMS: usize = 20;
pub(crate) const MAX_SEARCH_WILDCARDS: usize = 4;
pub(crate) const MAX_SEARCH_FUZZY: usize = 2;
pub(crate) const MAX_SEARCH_CANDIDATES: usize = 200;
pub(crate) const SEARCH_INDEX_QUEUE_CAPACITY: usize = 1024;
pub(crate) const MIN_CAPTCHA_TOKEN_CHARS: usize = 20;
pub(crate) const MAX_CAPTCHA_TOKEN_CHARS: usize = 4096;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) visibility_denials: Mutex<HashMap<&'static str, u64>>,
    pub(crate) search_index_failures: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub auth_route_requests_per_minute: u32,
    pub search_query_max_chars: usize,
    pub search_result_limit_max: usize,
    pub search_query_timeout: Duration,
    pub trusted_proxy_cidrs: Vec<IpNetwork>,
    pub captcha_hcaptcha_site_key: Option<String>,
    pub captcha_hcaptcha_secret: Option<String>,
    pub captcha_verify_url: String,
    pub captcha_verify_timeout: Duration,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            auth_route_requests_per_minute: DEFAULT_AUTH_ROUTE_REQUESTS_PER_MINUTE,
            search_query_max_chars: DEFAULT_SEARCH_QUERY_MAX_CHARS,
            search_result_limit_max: DEFAULT_SEARCH_RESULT_LIMIT_MAX,
            search_query_timeout: Duration::from_millis(DEFAULT_SEARCH_QUERY_TIMEOUT_MILLIS),
            trusted_proxy_cidrs: Vec::new(),
            captcha_hcaptcha_site_key: None,
            captcha_hcaptcha_secret: None,
            captcha_verify_url: String::from("https://api.hcaptcha.com/siteverify"),
            captcha_verify_timeout: Duration::from_secs(DEFAULT_CAPTCHA_VERIFY_TIMEOUT_SECS),
            database_url: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeSecurityConfig {
    pub(crate) auth_route_requests_per_minute: u32,
    pub(crate) search_query_max_chars: usize,
    pub(crate) search_result_limit_max: usize,
    pub(crate) search_query_timeout: Duration,
    pub(crate) trusted_proxy_cidrs: Vec<IpNetwork>,
    pub(crate) captcha: Option<Arc<CaptchaConfig>>,
}

#[derive(Clone)]
pub(crate) struct CaptchaConfig {
    pub(crate) site_key: String,
    pub(crate) secret: String,
    pub(crate) verify_url: String,
    pub(crate) verify_timeout: Duration,
}

#[derive(Clone)]
pub(crate) struct SearchService {
    pub(crate) tx: mpsc::Sender<SearchCommand>,
    pub(crate) state: Arc<SearchIndexState>,
}

pub(crate) struct SearchIndexState {
    pub(crate) index: tantivy::Index,
    pub(crate) reader: tantivy::IndexReader,
    pub(crate) fields: SearchFields,
}

#[derive(Clone, Copy)]
pub(crate) struct SearchFields {
    pub(crate) update_id: Field,
    pub(crate) author_id: Field,
    pub(crate) posted_at_unix: Field,
    pub(crate) body: Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexedUpdate {
    pub(crate) update_id: String,
    pub(crate) author_id: String,
    pub(crate) posted_at_unix: i64,
    pub(crate) body: String,
}

pub(crate) enum SearchOperation {
    Upsert(IndexedUpdate),
    Delete { update_id: String },
    Rebuild { docs: Vec<IndexedUpdate> },
}

pub(crate) struct SearchCommand {
    pub(crate) op: SearchOperation,
    pub(crate) ack: Option<oneshot::Sender<Result<(), AuthFailure>>>,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    pub(crate) store: Arc<RwLock<MemoryStore>>,
    pub(crate) session_store: SessionStore,
    pub(crate) token_key: Arc<SymmetricKey<V4>>,
    pub(crate) dummy_password_hash: Arc<String>,
    pub(crate) auth_route_hits: Arc<RwLock<HashMap<String, Vec<i64>>>>,
    pub(crate) rate_limit_last_sweep_unix: Arc<AtomicI64>,
    pub(crate) auth_session_last_sweep_unix: Arc<AtomicI64>,
    pub(crate) id_generator: Arc<Mutex<Generator>>,
    pub(crate) http_client: reqwest::Client,
    pub(crate) search: SearchService,
    pub(crate) search_bootstrapped: Arc<OnceCell<()>>,
    pub(crate) runtime: Arc<RuntimeSecurityConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut key_bytes = [0_u8; 32];
        OsRng.fill_bytes(&mut key_bytes);
        let token_key = SymmetricKey::<V4>::from(&key_bytes)
            .map_err(|e| anyhow!("token key init failed: {e}"))?;
        let dummy_password_hash = hash_password("murmur-dummy-password")?;
        let captcha = build_captcha_config(config)?;
        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow!("http client init failed: {e}"))?;
        let search = init_search_service().map_err(|e| anyhow!("search init failed: {e}"))?;

        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            store: Arc::new(RwLock::new(MemoryStore::default())),
            session_store: SessionStore::default(),
            token_key: Arc::new(token_key),
            dummy_password_hash: Arc::new(dummy_password_hash),
            auth_route_hits: Arc::new(RwLock::new(HashMap::new())),
            rate_limit_last_sweep_unix: Arc::new(AtomicI64::new(0)),
            auth_session_last_sweep_unix: Arc::new(AtomicI64::new(0)),
            id_generator: Arc::new(Mutex::new(Generator::new())),
            http_client,
            search,
            search_bootstrapped: Arc::new(OnceCell::new()),
            runtime: Arc::new(RuntimeSecurityConfig {
                auth_route_requests_per_minute: config.auth_route_requests_per_minute,
                search_query_max_chars: config.search_query_max_chars,
                search_result_limit_max: config.search_result_limit_max,
                search_query_timeout: config.search_query_timeout,
                trusted_proxy_cidrs: config.trusted_proxy_cidrs.clone(),
                captcha: captcha.map(Arc::new),
            }),
        })
    }

    /// Next id from a monotonic ULID generator, so ordering by id follows
    /// creation order even within the same millisecond.
    pub(crate) fn next_id(&self) -> Ulid {
        self.id_generator
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok())
            .unwrap_or_else(Ulid::new)
    }
}

/// Backing store used when no database is configured.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub(crate) users: HashMap<UserId, UserRecord>,
    pub(crate) user_ids_by_username: HashMap<String, UserId>,
    pub(crate) updates: BTreeMap<String, UpdateRecord>,
    pub(crate) comments: BTreeMap<String, CommentRecord>,
    pub(crate) pairs: HashMap<(UserId, UserId), PairRecord>,
    pub(crate) connection_requests: HashMap<String, ConnectionRequestRecord>,
    pub(crate) messages: BTreeMap<String, MessageRecord>,
}

impl MemoryStore {
    pub(crate) fn pair_between(&self, user_a: UserId, user_b: UserId) -> Option<&PairRecord> {
        self.pairs.get(&murmur_core::canonical_pair(user_a, user_b))
    }

    pub(crate) fn pair_members(&self, pair_id: &str) -> Option<(UserId, UserId)> {
        self.pairs
            .iter()
            .find(|(_, pair)| pair.pair_id == pair_id)
            .map(|(members, _)| *members)
    }

    pub(crate) fn username_of(&self, user_id: UserId) -> Option<&str> {
        self.users.get(&user_id).map(|user| user.username.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: UserId,
    pub(crate) username: Username,
    pub(crate) password_hash: String,
    pub(crate) is_public: bool,
    pub(crate) joined_at_unix: i64,
    pub(crate) failed_logins: u8,
    pub(crate) locked_until_unix: Option<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub(crate) user_id: UserId,
    pub(crate) refresh_token_hash: [u8; 32],
    pub(crate) expires_at_unix: i64,
    pub(crate) revoked: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct UpdateRecord {
    pub(crate) author_id: UserId,
    pub(crate) body: String,
    pub(crate) posted_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct CommentRecord {
    pub(crate) update_id: String,
    pub(crate) author_id: UserId,
    pub(crate) body: String,
    pub(crate) posted_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct PairRecord {
    pub(crate) pair_id: String,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectionRequestRecord {
    pub(crate) sender_user_id: UserId,
    pub(crate) recipient_user_id: UserId,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub(crate) sender_id: UserId,
    pub(crate) recipient_id: UserId,
    pub(crate) body: String,
    pub(crate) sent_at_unix: i64,
    pub(crate) read: bool,
    pub(crate) deleted: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub(crate) user_id: UserId,
    pub(crate) username: String,
    pub(crate) session_id: String,
}
