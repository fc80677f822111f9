use super::log_service::RequestLog;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use chrono::{SecondsFormat, Utc};
use futures::future::{ok, Ready};
use shared::LogEntry;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedSender};

/// Appends one `LogEntry` per finished request to the `RequestLog`.
/// A single writer thread drains the queue, so entries land in completion order.
#[derive(Clone)]
pub struct RequestLogger {
    entries: UnboundedSender<LogEntry>,
}

impl RequestLogger {
    /// Starts the writer thread. It exits once every clone of the logger is dropped.
    pub fn start(log: RequestLog) -> Self {
        let (entries, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let spawned = std::thread::Builder::new()
            .name("request-log-writer".to_string())
            .spawn(move || {
                while let Some(entry) = rx.blocking_recv() {
                    log.record(entry);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to start request log writer: {}", e);
        }
        Self { entries }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggerService {
            service: Rc::new(service),
            entries: self.entries.clone(),
        })
    }
}

pub struct RequestLoggerService<S> {
    service: Rc<S>,
    entries: UnboundedSender<LogEntry>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let entries = self.entries.clone();

        Box::pin(async move {
            let started = Instant::now();
            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let method = req.method().to_string();
            let endpoint = req.path().to_string();
            let ip_address = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();

            let res = service.call(req).await?;

            let status = res.status().as_u16();
            let response_time = started.elapsed().as_millis() as u64;
            log::info!("{} {} {} {}ms", method, endpoint, status, response_time);

            let entry = LogEntry {
                timestamp,
                method,
                endpoint,
                ip_address,
                status,
                response_time,
            };
            if entries.send(entry).is_err() {
                log::warn!("Request log writer is gone; entry dropped");
            }

            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use std::time::Duration;

    async fn wait_for(log: &RequestLog, count: usize) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        for _ in 0..100 {
            entries = log.all();
            if entries.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        entries
    }

    #[actix_web::test]
    async fn records_method_path_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("server.log"), 10);
        let app = test::init_service(
            App::new()
                .wrap(RequestLogger::start(log.clone()))
                .route("/health", web::get().to(HttpResponse::Ok))
                .route("/missing", web::get().to(HttpResponse::NotFound)),
        )
        .await;

        test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        test::call_service(&app, test::TestRequest::get().uri("/missing?x=1").to_request()).await;

        let entries = wait_for(&log, 2).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].endpoint, "/missing");
        assert_eq!(entries[0].status, 404);
        assert_eq!(entries[1].method, "GET");
        assert_eq!(entries[1].endpoint, "/health");
        assert_eq!(entries[1].status, 200);
    }

    #[actix_web::test]
    async fn sequential_requests_are_stored_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("server.log"), 100);
        let app = test::init_service(
            App::new()
                .wrap(RequestLogger::start(log.clone()))
                .route("/r/{i}", web::get().to(HttpResponse::Ok)),
        )
        .await;

        for i in 0..40 {
            let req = test::TestRequest::get().uri(&format!("/r/{}", i)).to_request();
            test::call_service(&app, req).await;
        }

        let endpoints: Vec<String> = wait_for(&log, 40)
            .await
            .into_iter()
            .map(|entry| entry.endpoint)
            .collect();
        let expected: Vec<String> = (0..40).rev().map(|i| format!("/r/{}", i)).collect();
        assert_eq!(endpoints, expected);
    }
}
