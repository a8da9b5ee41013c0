//! Bearer-token guard for the staging service.
//!
//! Staging routes carry registration material, so every route except
//! `/health` and `/build-info` requires `INTERNAL_SERVICE_TOKEN` when the
//! token is mandatory. When it is optional, a configured token is still
//! checked if the caller presents one.

use std::sync::Arc;

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{Error, HttpResponse};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::config::Settings;

const PUBLIC_PATHS: [&str; 2] = ["/health", "/build-info"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenPolicy {
    required: bool,
    token: Option<String>,
}

impl TokenPolicy {
    fn allows(&self, path: &str, provided: Option<&str>) -> bool {
        if PUBLIC_PATHS.contains(&path) {
            return true;
        }
        match (self.token.as_deref(), provided) {
            (Some(expected), Some(provided)) => expected == provided,
            (Some(_), None) | (None, _) => !self.required,
        }
    }
}

/// Middleware factory enforcing the internal service token.
#[derive(Clone)]
pub struct InternalAuth {
    policy: Arc<TokenPolicy>,
}

impl InternalAuth {
    pub fn new(settings: &Settings) -> Self {
        Self::from_config(
            settings.internal_token_required(),
            settings.internal_token().map(ToString::to_string),
        )
    }

    pub fn from_config(required: bool, token: Option<String>) -> Self {
        Self {
            policy: Arc::new(TokenPolicy { required, token }),
        }
    }
}

/// `Authorization: Bearer <token>`, falling back to `X-Internal-Token`.
fn presented_token(req: &ServiceRequest) -> Option<&str> {
    let headers = req.headers();
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-internal-token")
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
}

impl<S, B> Transform<S, ServiceRequest> for InternalAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = InternalAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalAuthMiddleware {
            service,
            policy: Arc::clone(&self.policy),
        }))
    }
}

pub struct InternalAuthMiddleware<S> {
    service: S,
    policy: Arc<TokenPolicy>,
}

impl<S, B> Service<ServiceRequest> for InternalAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !self.policy.allows(req.path(), presented_token(&req)) {
            tracing::warn!(path = %req.path(), method = %req.method(), "Rejected staging request without valid token");
            let response = HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Unauthorized",
                "code": "UNAUTHORIZED",
            }));
            let (req, _payload) = req.into_parts();
            return Box::pin(async move {
                Ok(ServiceResponse::new(req, response.map_into_right_body()))
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test as actix_test, web};

    use super::*;

    fn policy(required: bool, token: Option<&str>) -> TokenPolicy {
        TokenPolicy {
            required,
            token: token.map(ToString::to_string),
        }
    }

    #[test]
    fn test_policy_matrix() {
        let strict = policy(true, Some("secret"));
        assert!(strict.allows("/health", None));
        assert!(!strict.allows("/invites/ABC", None));
        assert!(!strict.allows("/invites/ABC", Some("wrong")));
        assert!(strict.allows("/invites/ABC", Some("secret")));

        let lenient = policy(false, Some("secret"));
        assert!(lenient.allows("/invites/ABC", None));
        assert!(!lenient.allows("/invites/ABC", Some("wrong")));

        let open = policy(false, None);
        assert!(open.allows("/invites/ABC", Some("anything")));

        // Required but unconfigured fails closed.
        assert!(!policy(true, None).allows("/invites/ABC", Some("anything")));
    }

    async fn call(auth: InternalAuth, path: &str, header: Option<(&'static str, &'static str)>) -> StatusCode {
        let app = actix_test::init_service(
            App::new()
                .wrap(auth)
                .route(path, web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let mut req = actix_test::TestRequest::get().uri(path);
        if let Some(header) = header {
            req = req.insert_header(header);
        }
        actix_test::call_service(&app, req.to_request()).await.status()
    }

    #[actix_rt::test]
    async fn test_public_route_without_token() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        assert_eq!(call(auth, "/health", None).await, StatusCode::OK);
    }

    #[actix_rt::test]
    async fn test_missing_token_rejected() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        assert_eq!(call(auth, "/invites", None).await, StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_bearer_and_fallback_header_accepted() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        assert_eq!(
            call(auth.clone(), "/invites", Some(("authorization", "Bearer secret"))).await,
            StatusCode::OK
        );
        assert_eq!(
            call(auth, "/invites", Some(("x-internal-token", "secret"))).await,
            StatusCode::OK
        );
    }
}
