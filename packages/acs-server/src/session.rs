use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use actix_web::{
    HttpRequest,
    cookie::{Cookie, time as cookie_time},
};
use cwmp::SoapNamespace;
use tokio::sync::RwLock;
use uuid::Uuid;

pub(crate) const SESSION_COOKIE: &str = "session";

/// What a CWMP session remembers between POSTs: the device identity from
/// the Inform that opened it, the inbound content type (echoed on every
/// reply) and the JSON-encoded namespace record.
#[derive(Clone, Debug)]
pub(crate) struct SessionData {
    pub(crate) oui: String,
    pub(crate) product_class: String,
    pub(crate) serial_number: String,
    pub(crate) soap_namespace: String,
    pub(crate) content_type: String,
    expires_at: Instant,
}

impl SessionData {
    pub(crate) fn namespace(&self) -> Option<SoapNamespace> {
        SoapNamespace::from_json(&self.soap_namespace)
    }
}

/// Server-side session store keyed by the `session` cookie.
pub(crate) struct Sessions {
    ttl: Duration,
    sessions: RwLock<HashMap<Uuid, SessionData>>,
}

impl Sessions {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn request_id(req: &HttpRequest) -> Option<Uuid> {
        let cookie = req.cookie(SESSION_COOKIE)?;
        Uuid::parse_str(cookie.value()).ok()
    }

    pub(crate) async fn get(&self, req: &HttpRequest) -> Option<SessionData> {
        let id = Self::request_id(req)?;

        let sessions = self.sessions.read().await;
        let data = sessions.get(&id)?;
        if data.expires_at < Instant::now() {
            return None;
        }
        Some(data.clone())
    }

    /// Binds (or rebinds) the session for a device and returns the cookie
    /// to set on the reply. An existing cookie keeps its id so a CPE that
    /// re-Informs mid-session does not orphan the old entry.
    pub(crate) async fn bind(
        &self,
        req: &HttpRequest,
        oui: &str,
        product_class: &str,
        serial_number: &str,
        ns: &SoapNamespace,
        content_type: &str,
    ) -> Cookie<'static> {
        let id = Self::request_id(req).unwrap_or_else(Uuid::new_v4);

        let data = SessionData {
            oui: oui.to_owned(),
            product_class: product_class.to_owned(),
            serial_number: serial_number.to_owned(),
            soap_namespace: ns.to_json(),
            content_type: content_type.to_owned(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.expires_at >= Instant::now());
        sessions.insert(id, data);

        Cookie::build(SESSION_COOKIE, id.to_string())
            .path("/acs")
            .max_age(cookie_time::Duration::seconds(self.ttl.as_secs() as i64))
            .http_only(true)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[tokio::test]
    async fn bind_then_get() {
        let sessions = Sessions::new(Duration::from_secs(1800));
        let ns = SoapNamespace::default();

        let req = TestRequest::post().uri("/acs").to_http_request();
        let cookie = sessions
            .bind(&req, "000000", "enb", "SN1", &ns, "text/xml")
            .await;
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/acs"));
        assert_eq!(cookie.http_only(), Some(true));

        let req = TestRequest::post()
            .uri("/acs")
            .cookie(cookie.clone())
            .to_http_request();
        let data = sessions.get(&req).await.unwrap();
        assert_eq!(data.oui, "000000");
        assert_eq!(data.serial_number, "SN1");
        assert_eq!(data.namespace(), Some(ns));
    }

    #[tokio::test]
    async fn missing_or_bogus_cookie_is_no_session() {
        let sessions = Sessions::new(Duration::from_secs(1800));

        let req = TestRequest::post().uri("/acs").to_http_request();
        assert!(sessions.get(&req).await.is_none());

        let req = TestRequest::post()
            .uri("/acs")
            .cookie(Cookie::new(SESSION_COOKIE, "not-a-uuid"))
            .to_http_request();
        assert!(sessions.get(&req).await.is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_gone() {
        let sessions = Sessions::new(Duration::from_secs(0));
        let ns = SoapNamespace::default();

        let req = TestRequest::post().uri("/acs").to_http_request();
        let cookie = sessions.bind(&req, "o", "p", "s", &ns, "text/xml").await;

        tokio::time::sleep(Duration::from_millis(5)).await;

        let req = TestRequest::post()
            .uri("/acs")
            .cookie(cookie)
            .to_http_request();
        assert!(sessions.get(&req).await.is_none());
    }
}
