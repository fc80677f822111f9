use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use shared::{HealthStatus, LogEntry, SubmitReceiptRequest, SubmitReceiptResponse};

use crate::error::{json_error_handler, ApiError};
use crate::logs::log_service::RequestLog;
use crate::submission::models::{parse_wallet_address, Submission};
use crate::submission::service::SubmissionService;

/// How long a submission may run before the client gets a 504.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Duration);

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/health", web::get().to(health))
        .route("/submitReceipt", web::post().to(submit_receipt))
        .route("/api/submitReceipt", web::post().to(submit_receipt))
        .route("/submitReceipt/remaining/{address:.*}", web::get().to(remaining))
        .route("/api/submitReceipt/remaining/{address:.*}", web::get().to(remaining))
        .route("/api/v1/remaining/{address:.*}", web::get().to(remaining_live))
        .route("/api/v1/cycle", web::get().to(cycle_status))
        .route("/api/logs", web::get().to(all_logs))
        .route("/api/logs/date/{date}", web::get().to(logs_by_date))
        .route("/api/logs/search", web::get().to(search_logs))
        .default_service(web::to(not_found));
}

pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(json_error_handler)
}

async fn health(req: HttpRequest) -> HttpResponse {
    log::info!(
        "Health check called from: {}",
        req.connection_info().realip_remote_addr().unwrap_or("unknown")
    );
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn submit_receipt(
    service: web::Data<SubmissionService>,
    deadline: web::Data<RequestDeadline>,
    body: web::Json<SubmitReceiptRequest>,
) -> Result<HttpResponse, ApiError> {
    let submission = Submission::from_request(body.into_inner(), Utc::now())?;
    let id = submission.id;

    // Detached: the pipeline keeps running if the deadline passes.
    let service = service.get_ref().clone();
    let task = actix_web::rt::spawn(async move { service.submit(submission).await });

    match tokio::time::timeout(deadline.0, task).await {
        Ok(Ok(result)) => Ok(HttpResponse::Ok().json(SubmitReceiptResponse { validation: result? })),
        Ok(Err(e)) => Err(ApiError::Internal(format!("Submission task failed: {}", e))),
        Err(_) => {
            log::warn!("Submission {} exceeded {:?}; still processing", id, deadline.0);
            Err(ApiError::Timeout)
        }
    }
}

async fn remaining(
    service: web::Data<SubmissionService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let address = parse_wallet_address(path.trim())?;
    let result = service.remaining(address, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(result))
}

async fn remaining_live(
    service: web::Data<SubmissionService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let address = parse_wallet_address(path.trim())?;
    let result = service.remaining_live(address).await?;
    Ok(HttpResponse::Ok().json(result))
}

async fn cycle_status(service: web::Data<SubmissionService>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(service.cycle_status().await?))
}

async fn read_logs<F>(log: web::Data<RequestLog>, read: F) -> Result<HttpResponse, ApiError>
where
    F: FnOnce(&RequestLog) -> Vec<LogEntry> + Send + 'static,
{
    let log = log.get_ref().clone();
    let entries = web::block(move || read(&log))
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to fetch logs: {}", e)))?;
    Ok(HttpResponse::Ok().json(entries))
}

async fn all_logs(log: web::Data<RequestLog>) -> Result<HttpResponse, ApiError> {
    read_logs(log, |log| log.all()).await
}

async fn logs_by_date(log: web::Data<RequestLog>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let date = path.into_inner();
    read_logs(log, move |log| log.by_date(&date)).await
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search_logs(log: web::Data<RequestLog>, query: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let term = query
        .into_inner()
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Search query is required"))?;
    read_logs(log, move |log| log.search(&term)).await
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    log::info!("Returning JSON 404 for API path: {}", req.uri());
    HttpResponse::NotFound().json(json!({
        "status": "error",
        "message": "API endpoint not found",
        "path": req.uri().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    use crate::submission::models::tests::{ADDRESS, JPEG, PNG};
    use crate::submission::service::tests::{service, FakeContract, FakeModel};

    struct Harness {
        contract: Arc<FakeContract>,
        model: Arc<FakeModel>,
        log: RequestLog,
        _dir: tempfile::TempDir,
    }

    fn harness(contract: FakeContract) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        Harness {
            contract: Arc::new(contract),
            model: Arc::new(FakeModel::replying(1)),
            log: RequestLog::new(dir.path().join("server.log"), 100),
            _dir: dir,
        }
    }

    macro_rules! app {
        ($h:expr, $deadline:expr) => {
            test::init_service(
                App::new()
                    .app_data(json_config(1024 * 1024))
                    .app_data(web::Data::new(service($h.contract.clone(), $h.model.clone())))
                    .app_data(web::Data::new($h.log.clone()))
                    .app_data(web::Data::new(RequestDeadline($deadline)))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn submit_body(images: &[&str]) -> Value {
        json!({ "images": images, "address": ADDRESS, "deviceID": "device-1" })
    }

    #[actix_web::test]
    async fn health_on_both_paths() {
        let h = harness(FakeContract::default());
        let app = app!(h, Duration::from_secs(5));
        for uri in ["/health", "/api/health"] {
            let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(body["status"], "ok");
            assert_eq!(body["message"], "Server is running");
            assert!(body["timestamp"].is_string());
        }
    }

    #[actix_web::test]
    async fn submit_returns_the_verdict() {
        let h = harness(FakeContract::with_used(1));
        let app = app!(h, Duration::from_secs(5));
        let req = test::TestRequest::post()
            .uri("/api/submitReceipt")
            .set_json(submit_body(&[PNG, JPEG]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["validation"]["validityFactor"], 1.0);
        assert_eq!(body["validation"]["descriptionOfAnalysis"], "Receipt matches product.");
        assert_eq!(h.contract.registrations.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn one_image_is_rejected_before_any_external_call() {
        let h = harness(FakeContract::default());
        let app = app!(h, Duration::from_secs(5));
        let req = test::TestRequest::post()
            .uri("/submitReceipt")
            .set_json(submit_body(&[PNG]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Both receipt and product images are required");
        assert_eq!(h.contract.reads.load(Ordering::SeqCst), 0);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn malformed_json_is_a_bad_request() {
        let h = harness(FakeContract::default());
        let app = app!(h, Duration::from_secs(5));
        let req = test::TestRequest::post()
            .uri("/submitReceipt")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"images\": [")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "error");
    }

    #[actix_web::test]
    async fn capped_address_gets_conflict() {
        let h = harness(FakeContract::with_used(5));
        let app = app!(h, Duration::from_secs(5));
        let req = test::TestRequest::post()
            .uri("/submitReceipt")
            .set_json(submit_body(&[PNG, JPEG]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn slow_submission_times_out_but_completes() {
        let h = harness(FakeContract {
            register_delay: Some(Duration::from_millis(300)),
            ..FakeContract::with_used(0)
        });
        let app = app!(h, Duration::from_millis(50));
        let req = test::TestRequest::post()
            .uri("/submitReceipt")
            .set_json(submit_body(&[PNG, JPEG]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Gateway Timeout");
        assert_eq!(body["message"], "Request processing took too long");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.contract.registrations.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn remaining_routes() {
        let h = harness(FakeContract::with_used(2));
        let app = app!(h, Duration::from_secs(5));
        for uri in [
            format!("/submitReceipt/remaining/{}", ADDRESS),
            format!("/api/submitReceipt/remaining/{}", ADDRESS),
            format!("/api/v1/remaining/{}", ADDRESS),
        ] {
            let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
            assert_eq!(body, json!({ "remaining": 3, "max": 5 }));
        }

        for uri in ["/submitReceipt/remaining/", "/submitReceipt/remaining/0x12", "/api/v1/remaining/nope"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn cycle_route() {
        let h = harness(FakeContract::default());
        let app = app!(h, Duration::from_secs(5));
        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/cycle").to_request()).await;
        assert_eq!(
            body,
            json!({ "cycle": 3, "rewardsLeft": "1000000000000000000000", "maxSubmissions": 5 })
        );
    }

    #[actix_web::test]
    async fn log_routes() {
        let h = harness(FakeContract::default());
        h.log.record(LogEntry {
            timestamp: "2025-03-01T10:00:00.000Z".to_string(),
            method: "POST".to_string(),
            endpoint: "/submitReceipt".to_string(),
            ip_address: "127.0.0.1".to_string(),
            status: 200,
            response_time: 40,
        });
        let app = app!(h, Duration::from_secs(5));

        let all: Vec<LogEntry> =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/logs").to_request()).await;
        assert_eq!(all.len(), 1);

        let by_date: Vec<LogEntry> = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/logs/date/2025-03-01").to_request(),
        )
        .await;
        assert_eq!(by_date.len(), 1);

        let found: Vec<LogEntry> = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/logs/search?q=SUBMIT").to_request(),
        )
        .await;
        assert_eq!(found.len(), 1);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/logs/search").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unknown_path_is_json_404() {
        let h = harness(FakeContract::default());
        let app = app!(h, Duration::from_secs(5));
        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/nope?x=1").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "status": "error", "message": "API endpoint not found", "path": "/api/nope?x=1" })
        );
    }
}
