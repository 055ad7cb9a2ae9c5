use crate::error::RunError;
use crate::pipeline::{Pipeline, PipelineEvent};
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

pub struct AppState {
    pub pipeline: Pipeline,
    /// One run against the origin at a time.
    pub run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            run_lock: Mutex::new(()),
        }
    }
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "izu-radar online.\n\
         JSON:\n  POST /run  (listings, decisions, stats)\n\
         Stream:\n  GET  /run/stream (SSE: started, query, candidates, decision, finished|failed, listings)\n\
         Health:\n  GET  /healthz",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

fn error_response(e: &RunError) -> HttpResponse {
    let body = serde_json::json!({ "error": e.to_string() });
    match e {
        RunError::OriginUnreachable { .. } => HttpResponse::BadGateway().json(body),
        RunError::RobotsDisallowed(_) => HttpResponse::Forbidden().json(body),
        RunError::Cancelled => HttpResponse::GatewayTimeout().json(body),
    }
}

#[post("/run")]
async fn run(state: web::Data<AppState>) -> impl Responder {
    let _guard = state.run_lock.lock().await;
    match state.pipeline.run(None).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    }
}

// --------------
// SSE streaming
// --------------

fn sse_event(event: &str, data_json: &str) -> Bytes {
    let payload = format!("event: {}\ndata: {}\n\n", event, data_json);
    Bytes::from(payload)
}

#[get("/run/stream")]
async fn run_stream(state: web::Data<AppState>) -> impl Responder {
    let (tx, mut rx) = mpsc::channel::<Bytes>(32);

    actix_web::rt::spawn(async move {
        let _guard = state.run_lock.lock().await;
        let (ev_tx, mut ev_rx) = mpsc::channel::<PipelineEvent>(64);

        let forward = {
            let tx = tx.clone();
            async move {
                while let Some(ev) = ev_rx.recv().await {
                    let json = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".into());
                    if tx.send(sse_event(ev.name(), &json)).await.is_err() {
                        break;
                    }
                }
            }
        };
        let (result, ()) = tokio::join!(state.pipeline.run(Some(ev_tx)), forward);

        if let Ok(report) = result {
            let json = serde_json::json!({ "listings": report.listings }).to_string();
            let _ = tx.send(sse_event("listings", &json)).await;
        }
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(healthz)
        .service(run)
        .service(run_stream);
}

pub async fn serve(pipeline: Pipeline, bind: &str) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(pipeline));
    info!(%bind, "starting izu-radar");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind(bind)?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::FetchError;
    use crate::fetch::PageFetcher;
    use actix_web::{http::StatusCode, test as atest};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    struct Offline;

    #[async_trait]
    impl PageFetcher for Offline {
        async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<Bytes, FetchError> {
            Err(FetchError::Transport("connection refused".into()))
        }
    }

    fn state() -> web::Data<AppState> {
        let mut cfg = Config::default();
        cfg.fetch.spacing_ms = 0;
        cfg.fetch.jitter_ms = 0;
        cfg.fetch.max_attempts = 1;
        let pipeline = Pipeline::new(cfg, Arc::new(Offline)).unwrap();
        web::Data::new(AppState::new(pipeline))
    }

    #[test]
    fn sse_frames_are_terminated() {
        let b = sse_event("query", r#"{"found":2}"#);
        assert_eq!(&b[..], b"event: query\ndata: {\"found\":2}\n\n");
    }

    #[actix_web::test]
    async fn healthz_answers() {
        let app = atest::init_service(App::new().app_data(state()).configure(routes)).await;
        let resp = atest::call_service(&app, atest::TestRequest::get().uri("/healthz").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn unreachable_origin_is_a_gateway_error() {
        let app = atest::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = atest::TestRequest::post().uri("/run").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = atest::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("origin unreachable"));
    }
}
