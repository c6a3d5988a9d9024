//! End-to-end tests of the console API against real registries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use gsw_core::audit::{AuditLog, SystemLog};
use gsw_core::sink::CommandSink;
use gsw_core::types::LineEvent;
use gsw_moderation::BanRegistry;
use gsw_requests::{EngineConfig, RequestVoteEngine};
use gsw_web::ApiState;

struct NullSink;

#[async_trait::async_trait]
impl CommandSink for NullSink {
    async fn send_line(&self, _line: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Console {
    dir: TempDir,
    app: Router,
    registry: Arc<BanRegistry>,
    engine: Arc<RequestVoteEngine>,
}

async fn console() -> Console {
    let dir = tempfile::tempdir().unwrap();
    let sink: Arc<dyn CommandSink> = Arc::new(NullSink);
    let syslog = Arc::new(SystemLog::new(100));

    let registry = Arc::new(
        BanRegistry::load(
            dir.path().join("players.list"),
            dir.path().join("banned.list"),
            Vec::new(),
            sink.clone(),
            syslog.clone(),
        )
        .unwrap(),
    );
    registry
        .on_event(&LineEvent::Join {
            player: "Alice".into(),
            client_info: "vanilla".into(),
        })
        .await
        .unwrap();

    let engine = Arc::new(
        RequestVoteEngine::load(
            dir.path().join("requests.dat"),
            dir.path().join("uploads"),
            EngineConfig {
                threshold: 2,
                ..EngineConfig::default()
            },
            sink,
            syslog.clone(),
        )
        .unwrap(),
    );

    let state = Arc::new(ApiState {
        registry: registry.clone(),
        engine: engine.clone(),
        audit: Arc::new(AuditLog::new(100)),
        syslog,
        ops: vec!["Alice".into()],
    });
    let app = gsw_web::router(
        state,
        &dir.path().join("web"),
        &dir.path().join("uploads"),
        10 * 1024 * 1024,
    );
    Console {
        dir,
        app,
        registry,
        engine,
    }
}

fn with_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn players_and_ops_are_listed() {
    let console = console().await;

    let response = console
        .app
        .clone()
        .oneshot(Request::get("/api/players").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["players"][0], "Alice");

    let response = console
        .app
        .clone()
        .oneshot(Request::get("/api/ops").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["ops"][0], "Alice");
}

#[tokio::test]
async fn urlencoded_request_filing_and_voting() {
    let console = console().await;

    let response = console
        .app
        .clone()
        .oneshot(
            Request::post("/api/requests")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(
                    "applicant=Alice&command=%2Fweather%20clear&reason=rain",
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = json_body(response).await["id"].as_str().unwrap().to_string();

    // First vote lands, the same address cannot vote twice.
    let vote_uri = format!("/api/requests/{id}/vote");
    let response = console
        .app
        .clone()
        .oneshot(with_peer(
            Request::post(vote_uri.as_str()).body(Body::empty()).unwrap(),
            "203.0.113.5:1000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let response = console
        .app
        .clone()
        .oneshot(with_peer(
            Request::post(vote_uri.as_str()).body(Body::empty()).unwrap(),
            "203.0.113.5:2000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["success"], false);

    // A proxied second voter counts through X-Forwarded-For.
    let response = console
        .app
        .clone()
        .oneshot(with_peer(
            Request::post(vote_uri.as_str())
                .header("x-forwarded-for", "198.51.100.9")
                .body(Body::empty())
                .unwrap(),
            "203.0.113.5:3000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(console.engine.get(&id).unwrap().votes(), 2);
}

#[tokio::test]
async fn filing_validation_errors() {
    let console = console().await;

    let cases = [
        ("applicant=Alice&command=%2Fsay%20hi", "missing field"),
        (
            "applicant=Stranger&command=%2Fsay%20hi&reason=x",
            "unknown applicant",
        ),
        (
            "applicant=Alice&command=%2Fpardon%20alice&reason=oops",
            "requires an attached image",
        ),
    ];
    for (body, expected) in cases {
        let response = console
            .app
            .clone()
            .oneshot(
                Request::post("/api/requests")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let error = json_body(response).await["error"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(error.contains(expected), "{error}");
    }
}

#[tokio::test]
async fn voting_on_unknown_request_is_404() {
    let console = console().await;
    let response = console
        .app
        .clone()
        .oneshot(with_peer(
            Request::post("/api/requests/missing-0000/vote")
                .body(Body::empty())
                .unwrap(),
            "203.0.113.5:1000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_self_pardon_with_image_is_accepted() {
    let console = console().await;

    let boundary = "gswtestboundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"applicant\"\r\n\r\nAlice\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"command\"\r\n\r\n/pardon alice\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"reason\"\r\n\r\nI am sorry\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"image\"; filename=\"confession.png\"\r\n\
         Content-Type: image/png\r\n\r\nfake-png-bytes\r\n\
         --{boundary}--\r\n"
    );

    let response = console
        .app
        .clone()
        .oneshot(
            Request::post("/api/requests")
                .header(
                    CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = json_body(response).await["id"].as_str().unwrap().to_string();

    let stored = console.dir.path().join("uploads").join(format!("{id}.png"));
    assert_eq!(std::fs::read(stored).unwrap(), b"fake-png-bytes");

    let response = console
        .app
        .clone()
        .oneshot(Request::get("/api/requests").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listing = json_body(response).await;
    assert_eq!(listing["threshold"], 2);
    assert_eq!(listing["requests"][0]["id"].as_str(), Some(id.as_str()));
    assert_eq!(listing["requests"][0]["votes"], 0);
}

#[tokio::test]
async fn banned_listing_reports_sentinel_for_permanent_bans() {
    let console = console().await;
    console
        .registry
        .ban("Alice", "tested the moderators", 0)
        .await
        .unwrap();

    let response = console
        .app
        .clone()
        .oneshot(Request::get("/api/banned").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listing = json_body(response).await;
    assert_eq!(listing["players"][0]["name"], "Alice");
    assert_eq!(listing["players"][0]["permanent"], true);
    assert_eq!(listing["players"][0]["unban_time"], "0000-00-00 00:00:00");
}
