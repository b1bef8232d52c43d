use actix_web::{
    Error, HttpResponse,
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header,
    middleware::Next,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use subtle::ConstantTimeEq;
use tracing::{Instrument, Level, debug, field, span, warn};

pub(crate) async fn request_span<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<B>, Error> {
    let span = span!(
        Level::INFO,
        "HTTP request",
        "url.path" = req.path(),
        "http.request.method" = %req.method(),
        "http.request.content_type" = field::Empty,
        "http.response.status_code" = field::Empty,
    );

    if let Some(content_type) = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
    {
        span.record("http.request.content_type", content_type);
    }

    let res = next.call(req).instrument(span.clone()).await?;

    let status = res.status();
    span.record("http.response.status_code", status.as_u16());

    if status.is_server_error() {
        warn!(parent: &span, status = status.as_u16(), "Server failure")
    } else if status.is_client_error() {
        warn!(parent: &span, status = status.as_u16(), "Bad request")
    } else {
        debug!(parent: &span, status = status.as_u16())
    }

    Ok(res)
}

fn authorized(req: &ServiceRequest, username: &str, password: &str) -> bool {
    let Some(value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(presented) = STANDARD.decode(encoded.trim()) else {
        return false;
    };

    let expected = format!("{username}:{password}");
    presented.ct_eq(expected.as_bytes()).into()
}

/// HTTP Basic gate over the whole surface, active only when credentials
/// are configured. The comparison is constant-time.
pub(crate) async fn basic_auth<B: MessageBody + 'static>(
    credentials: Option<(String, String)>,
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Some((username, password)) = credentials {
        if !authorized(&req, &username, &password) {
            let (req, _) = req.into_parts();
            let response = HttpResponse::Unauthorized()
                .insert_header((header::WWW_AUTHENTICATE, "Basic realm=\"acs\""))
                .finish()
                .map_into_right_body();
            return Ok(ServiceResponse::new(req, response));
        }
    }

    next.call(req)
        .await
        .map(ServiceResponse::map_into_left_body)
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    fn request_with_auth(value: &str) -> ServiceRequest {
        TestRequest::post()
            .uri("/acs")
            .insert_header((header::AUTHORIZATION, value.to_owned()))
            .to_srv_request()
    }

    #[test]
    fn accepts_matching_credentials() {
        let encoded = STANDARD.encode("admin:secret");
        let req = request_with_auth(&format!("Basic {encoded}"));
        assert!(authorized(&req, "admin", "secret"));
    }

    #[test]
    fn rejects_wrong_or_missing_credentials() {
        let encoded = STANDARD.encode("admin:wrong");
        let req = request_with_auth(&format!("Basic {encoded}"));
        assert!(!authorized(&req, "admin", "secret"));

        let req = request_with_auth("Bearer token");
        assert!(!authorized(&req, "admin", "secret"));

        let req = TestRequest::post().uri("/acs").to_srv_request();
        assert!(!authorized(&req, "admin", "secret"));
    }
}
