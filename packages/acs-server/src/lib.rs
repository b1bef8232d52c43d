#![deny(unreachable_pub)]
//! The CWMP session engine and its HTTP surface.
//!
//! [`AcsServer`] owns the per-POST state machine behind `/acs`, the upload
//! ingestor behind `/upload/{name}` and the out-of-band connection-request
//! sender. Persistence is delegated to the collaborator traits in
//! [`store`]; [`memory`] has in-memory implementations for the binary and
//! for tests.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use actix_web::{
    dev::HttpServiceFactory,
    middleware::from_fn,
    web::{self, Data},
};

mod connreq;
mod error;
pub mod memory;
mod middleware;
mod post;
mod rpc;
mod session;
mod store;
mod upload;

pub use error::Error;
pub use store::{
    CallState, DataModel, Device, DeviceStore, MethodCall, ObjectStore, PerformanceHandler,
    Product, ProductStore, StoredObject, Values,
};

use session::Sessions;

/// Bucket uploaded files land in.
pub const UPLOAD_BUCKET: &str = "acs-upload";

/// CWMP session lifetime, per the session cookie MaxAge.
const SESSION_TTL: Duration = Duration::from_secs(1800);

const DEFAULT_DATA_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// One-shot schema-learning kinds, flagged at most once per product and
/// process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SyncKind {
    ParameterType,
    ParameterWritable,
}

/// Compare-and-set table backing the data-model sync. Losing a race here
/// only means a redundant upsert is skipped; it is an optimization, not a
/// correctness invariant.
#[derive(Default)]
pub(crate) struct SyncFlags {
    flags: Mutex<HashSet<(SyncKind, String)>>,
}

impl SyncFlags {
    /// Returns true the first time a (kind, product) pair is requested.
    pub(crate) fn acquire(&self, kind: SyncKind, product_id: &str) -> bool {
        let mut flags = self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        flags.insert((kind, product_id.to_owned()))
    }
}

struct Inner {
    schema: String,
    upload_bucket: String,
    data_retention: Duration,
    lan_check_fail_open: bool,
    credentials: Option<(String, String)>,
    product_store: Arc<dyn ProductStore>,
    device_store: Arc<dyn DeviceStore>,
    performance_handler: Arc<dyn PerformanceHandler>,
    object_store: Arc<dyn ObjectStore>,
    sessions: Sessions,
    sync_flags: SyncFlags,
    http: reqwest::Client,
}

/// The ACS. Cheap to clone; register its [`AcsServer::service`] on an
/// actix `App`.
#[derive(Clone)]
pub struct AcsServer {
    inner: Arc<Inner>,
}

impl AcsServer {
    pub fn builder(
        product_store: Arc<dyn ProductStore>,
        device_store: Arc<dyn DeviceStore>,
        performance_handler: Arc<dyn PerformanceHandler>,
        object_store: Arc<dyn ObjectStore>,
    ) -> AcsServerBuilder {
        AcsServerBuilder {
            schema: String::new(),
            data_retention: DEFAULT_DATA_RETENTION,
            lan_check_fail_open: true,
            credentials: None,
            product_store,
            device_store,
            performance_handler,
            object_store,
        }
    }

    /// The HTTP surface: `POST /acs` and `POST|PUT /upload/{name}`, with
    /// request-span logging and the optional Basic-auth gate.
    pub fn service(&self) -> impl HttpServiceFactory + use<> {
        let credentials = self.inner.credentials.clone();
        web::scope("")
            .app_data(Data::new(self.clone()))
            .wrap(from_fn(move |req, next| {
                middleware::basic_auth(credentials.clone(), req, next)
            }))
            .wrap(from_fn(middleware::request_span))
            .route("/acs", web::post().to(post::handle_post))
            .route("/upload/{name}", web::post().to(upload::handle_upload))
            .route("/upload/{name}", web::put().to(upload::handle_upload))
    }

    pub(crate) fn schema(&self) -> &str {
        &self.inner.schema
    }

    pub(crate) fn upload_bucket(&self) -> &str {
        &self.inner.upload_bucket
    }

    pub(crate) fn data_retention(&self) -> Duration {
        self.inner.data_retention
    }

    pub(crate) fn lan_check_fail_open(&self) -> bool {
        self.inner.lan_check_fail_open
    }

    pub(crate) fn product_store(&self) -> &dyn ProductStore {
        self.inner.product_store.as_ref()
    }

    pub(crate) fn device_store(&self) -> &dyn DeviceStore {
        self.inner.device_store.as_ref()
    }

    pub(crate) fn performance_handler(&self) -> Arc<dyn PerformanceHandler> {
        self.inner.performance_handler.clone()
    }

    pub(crate) fn object_store(&self) -> &dyn ObjectStore {
        self.inner.object_store.as_ref()
    }

    pub(crate) fn sessions(&self) -> &Sessions {
        &self.inner.sessions
    }

    pub(crate) fn sync_flags(&self) -> &SyncFlags {
        &self.inner.sync_flags
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }
}

/// Configuration for an [`AcsServer`].
pub struct AcsServerBuilder {
    schema: String,
    data_retention: Duration,
    lan_check_fail_open: bool,
    credentials: Option<(String, String)>,
    product_store: Arc<dyn ProductStore>,
    device_store: Arc<dyn DeviceStore>,
    performance_handler: Arc<dyn PerformanceHandler>,
    object_store: Arc<dyn ObjectStore>,
}

impl AcsServerBuilder {
    /// Tenant schema the stores are queried with.
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_owned();
        self
    }

    /// Uploads whose measurement window ended longer ago than this are
    /// accepted and dropped.
    pub fn data_retention(mut self, period: Duration) -> Self {
        self.data_retention = period;
        self
    }

    /// Whether a DNS failure during the RFC 1918 check lets the HTTP
    /// connection request proceed (the default) or suppresses it.
    pub fn lan_check_fail_open(mut self, fail_open: bool) -> Self {
        self.lan_check_fail_open = fail_open;
        self
    }

    /// Enables HTTP Basic authentication on the whole surface.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_owned(), password.to_owned()));
        self
    }

    pub fn build(self) -> Result<AcsServer, Error> {
        // CPEs answer connection requests with self-signed certificates;
        // the request carries no payload, so verification buys nothing.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(AcsServer {
            inner: Arc::new(Inner {
                schema: self.schema,
                upload_bucket: UPLOAD_BUCKET.to_owned(),
                data_retention: self.data_retention,
                lan_check_fail_open: self.lan_check_fail_open,
                credentials: self.credentials,
                product_store: self.product_store,
                device_store: self.device_store,
                performance_handler: self.performance_handler,
                object_store: self.object_store,
                sessions: Sessions::new(SESSION_TTL),
                sync_flags: SyncFlags::default(),
                http,
            }),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sync_flags_acquire_once() {
        let flags = SyncFlags::default();

        assert!(flags.acquire(SyncKind::ParameterType, "p1"));
        assert!(!flags.acquire(SyncKind::ParameterType, "p1"));
        assert!(flags.acquire(SyncKind::ParameterWritable, "p1"));
        assert!(flags.acquire(SyncKind::ParameterType, "p2"));
    }
}
