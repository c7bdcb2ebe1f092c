use std::net::SocketAddr;

use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::expose_internal_detail;
use crate::state::AppState;
use crate::{auth, jobs, system, users};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(system::routes())
                .merge(auth::router())
                .merge(users::router())
                .merge(jobs::handlers::routes()),
        )
        .fallback(system::not_found)
        .with_state(state)
        .layer(middleware::map_response_with_state(
            config,
            expose_internal_detail,
        ))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::services::ensure_admin;
    use crate::config::{AdminSeed, AppConfig};
    use crate::jobs::{
        inline::InlineJobQueue,
        job::{JobHandle, JobKind},
        processor::NotificationProcessor,
        queue::{JobQueue, QueueStats},
        sinks::testing::{RecordingAudit, RecordingMailer},
    };
    use crate::users::memory::MemoryUserStore;

    /// Records what the workflow submits, then runs it inline.
    struct Tap {
        inner: InlineJobQueue,
        seen: Mutex<Vec<(JobKind, Value)>>,
    }

    #[async_trait]
    impl JobQueue for Tap {
        async fn enqueue_with_id(
            &self,
            id: Uuid,
            kind: JobKind,
            payload: Value,
        ) -> anyhow::Result<JobHandle> {
            self.seen.lock().unwrap().push((kind, payload.clone()));
            self.inner.enqueue_with_id(id, kind, payload).await
        }

        async fn stats(&self) -> anyhow::Result<QueueStats> {
            self.inner.stats().await
        }

        fn mode(&self) -> &'static str {
            self.inner.mode()
        }
    }

    struct Harness {
        app: Router,
        tap: Arc<Tap>,
        mailer: Arc<RecordingMailer>,
        audit: Arc<RecordingAudit>,
    }

    async fn harness() -> Harness {
        let mailer = Arc::new(RecordingMailer::default());
        let audit = Arc::new(RecordingAudit::default());
        let processor = NotificationProcessor::new(mailer.clone(), audit.clone());
        let tap = Arc::new(Tap {
            inner: InlineJobQueue::new(Arc::new(processor)),
            seen: Mutex::new(Vec::new()),
        });
        let state = AppState::from_parts(
            Arc::new(MemoryUserStore::new()),
            tap.clone(),
            Arc::new(AppConfig::for_tests()),
        );
        ensure_admin(
            &state,
            &AdminSeed {
                email: "admin@example.com".into(),
                password: "Adm1nPass".into(),
            },
        )
        .await
        .unwrap();
        Harness {
            app: build_app(state),
            tap,
            mailer,
            audit,
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (content_type, body) = match body {
            Some(b) => (Some("application/json"), b.to_string()),
            None => (None, String::new()),
        };
        send(app, method, uri, token, content_type, body).await
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: String,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let req = req.body(Body::from(body)).unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(app: &Router, first: &str, email: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "firstName": first,
                "lastName": "Tester",
                "email": email,
                "password": "Passw0rd",
                "dateOfBirth": "1992-04-01"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(
            body["message"],
            "Registration successful. Your account is pending approval."
        );
        assert_eq!(body["data"]["user"]["status"], "PENDING");
        assert!(body["data"]["user"].get("passwordHash").is_none());
        body["data"]["user"]["id"].as_str().unwrap().to_owned()
    }

    async fn login(app: &Router, path: &str, email: &str, password: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            path,
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["expiresIn"], 300);
        body["data"]["token"].as_str().unwrap().to_owned()
    }

    async fn admin_token(app: &Router) -> String {
        login(app, "/api/auth/admin/login", "admin@example.com", "Adm1nPass").await
    }

    #[tokio::test]
    async fn approval_end_to_end() {
        let h = harness().await;
        let user_id = register(&h.app, "Alice", "alice@example.com").await;
        let user_token = login(&h.app, "/api/auth/login", "alice@example.com", "Passw0rd").await;
        let admin = admin_token(&h.app).await;

        let (status, body) = call(&h.app, Method::GET, "/api/users/pending", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 1);

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            Some(json!({ "action": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["message"], "User approved successfully");
        let admin_id = body["data"]["approvedBy"].as_str().unwrap().to_owned();

        let (status, body) =
            call(&h.app, Method::GET, "/api/users/profile", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let profile = &body["data"];
        assert_eq!(profile["status"], "APPROVED");
        assert_eq!(profile["approvedBy"], admin_id.as_str());
        assert!(profile["rejectionReason"].is_null());
        assert_eq!(profile["approver"]["email"], "admin@example.com");

        let seen = h.tap.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, JobKind::ApprovalNotification);
        assert_eq!(seen[0].1["action"], "approved");
        assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);
        assert_eq!(h.audit.entries.lock().unwrap()[0].action, "user_approved");
        drop(seen);

        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            Some(json!({ "action": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejection_end_to_end() {
        let h = harness().await;
        let user_id = register(&h.app, "Bob", "bob@example.com").await;
        let user_token = login(&h.app, "/api/auth/login", "bob@example.com", "Passw0rd").await;
        let admin = admin_token(&h.app).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            Some(json!({ "action": "reject", "rejectionReason": "incomplete info" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) =
            call(&h.app, Method::GET, "/api/users/profile", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "REJECTED");
        assert_eq!(body["data"]["rejectionReason"], "incomplete info");

        let seen = h.tap.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["rejectionReason"], "incomplete info");
        assert!(h.mailer.sent.lock().unwrap()[0]
            .message
            .contains("incomplete info"));
        drop(seen);

        let (status, body) = call(
            &h.app,
            Method::PUT,
            "/api/users/profile",
            Some(&user_token),
            Some(json!({ "firstName": "Robert" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "REJECTED");
    }

    #[tokio::test]
    async fn reject_without_reason_never_reaches_the_workflow() {
        let h = harness().await;
        let user_id = register(&h.app, "Carol", "carol@example.com").await;
        let admin = admin_token(&h.app).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            Some(json!({ "action": "reject", "rejectionReason": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "rejectionReason");
        assert!(h.tap.seen.lock().unwrap().is_empty());

        let (_, body) = call(&h.app, Method::GET, "/api/users/stats", Some(&admin), None).await;
        assert_eq!(body["data"]["stats"]["pending"], 1);
    }

    #[tokio::test]
    async fn unreadable_bodies_get_the_error_envelope() {
        let h = harness().await;
        let json = Some("application/json");
        let cases = [
            ("/api/auth/register", json, "{\"firstName\": \"Ada\","),
            ("/api/auth/login", None, "{\"email\": \"a@example.com\"}"),
            ("/api/auth/login", Some("text/plain"), "email=a@example.com"),
            ("/api/auth/register", json, "{\"firstName\": 5}"),
        ];
        for (uri, content_type, body) in cases {
            let (status, res) =
                send(&h.app, Method::POST, uri, None, content_type, body.into()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}: {res}");
            assert_eq!(res["success"], false);
            assert_eq!(res["message"], "Validation failed");
            assert_eq!(res["errors"][0]["field"], "body");
        }

        let admin = admin_token(&h.app).await;
        let user_id = register(&h.app, "Dana", "dana@example.com").await;
        let (status, res) = send(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            json,
            "not json".into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(res["success"], false);
        assert!(h.tap.seen.lock().unwrap().is_empty());

        let (status, res) = call(
            &h.app,
            Method::GET,
            "/api/users/search?limit=lots",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(res["success"], false);
        assert_eq!(res["errors"][0]["field"], "query");
    }

    #[tokio::test]
    async fn profile_update_ignores_role_and_status() {
        let h = harness().await;
        let user_id = register(&h.app, "Dave", "dave@example.com").await;
        let token = login(&h.app, "/api/auth/login", "dave@example.com", "Passw0rd").await;
        let admin = admin_token(&h.app).await;

        let (status, body) = call(
            &h.app,
            Method::PUT,
            "/api/users/profile",
            Some(&token),
            Some(json!({ "firstName": "David" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "PENDING");

        call(
            &h.app,
            Method::POST,
            &format!("/api/users/{user_id}/approve-reject"),
            Some(&admin),
            Some(json!({ "action": "approve" })),
        )
        .await;

        let (status, body) = call(
            &h.app,
            Method::PUT,
            "/api/users/profile",
            Some(&token),
            Some(json!({
                "firstName": "David",
                "phone": "+15550001111",
                "role": "ADMIN",
                "status": "REJECTED"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["firstName"], "David");
        assert_eq!(body["data"]["phone"], "+15550001111");
        assert_eq!(body["data"]["role"], "USER");
        assert_eq!(body["data"]["status"], "APPROVED");
    }

    #[tokio::test]
    async fn admin_only_routes_and_admin_deletion() {
        let h = harness().await;
        let user_id = register(&h.app, "Erin", "erin@example.com").await;
        let user_token = login(&h.app, "/api/auth/login", "erin@example.com", "Passw0rd").await;
        let admin = admin_token(&h.app).await;

        let (status, _) = call(&h.app, Method::GET, "/api/users/pending", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            call(&h.app, Method::GET, "/api/users/pending", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            call(&h.app, Method::GET, "/api/queue/stats", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&h.app, Method::GET, "/api/queue/stats", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["stats"]["mode"], "inline");

        let (_, me) = call(&h.app, Method::GET, "/api/auth/profile", Some(&admin), None).await;
        let admin_id = me["data"]["user"]["id"].as_str().unwrap().to_owned();
        let (status, body) = call(
            &h.app,
            Method::DELETE,
            &format!("/api/users/{admin_id}"),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Cannot delete admin users");

        let (status, _) = call(
            &h.app,
            Method::DELETE,
            &format!("/api/users/{user_id}"),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            call(&h.app, Method::GET, "/api/auth/profile", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &h.app,
            Method::DELETE,
            "/api/users/not-a-uuid",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_unknown_routes() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["store"], "memory");
        assert_eq!(body["data"]["jobPipeline"], "inline");

        let (status, body) = call(&h.app, Method::GET, "/api/nowhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Route not found");
    }
}
