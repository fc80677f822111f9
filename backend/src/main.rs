mod cache;
mod config;
mod contract;
mod error;
mod logs;
mod routes;
mod submission;
mod vision;

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use cache::cache_service::SubmissionCache;
use config::AppConfig;
use contract::service::{EcoEarnContract, ReceiptPolling};
use contract::thor::ThorClient;
use logs::log_service::RequestLog;
use logs::middleware::RequestLogger;
use routes::{configure_routes, json_config, RequestDeadline};
use std::sync::Arc;
use submission::service::SubmissionService;
use vision::client::OpenAiVisionClient;
use vision::verdict::VerdictService;

fn cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-requested-with"),
        ])
        .max_age(86400)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };
    error::set_show_details(!config.is_production());
    log::info!("Environment: {}", config.app_env);

    let http_client = reqwest::Client::new();

    let thor = ThorClient::new(http_client.clone(), config.network_url.clone());
    let contract = EcoEarnContract::new(
        thor,
        config.contract_address,
        config.admin_private_key,
        ReceiptPolling {
            interval: config.receipt_poll_interval,
            attempts: config.receipt_poll_attempts,
        },
    );

    let vision = OpenAiVisionClient::new(
        http_client,
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_model.clone(),
    );
    let verdicts = VerdictService::new(Arc::new(vision), config.verdict_fail_open);

    let cache = SubmissionCache::new(config.cache_capacity, config.cache_ttl);
    let submissions = SubmissionService::new(
        Arc::new(contract),
        verdicts,
        cache,
        config.max_submissions_per_cycle,
        config.reward_amount,
    );
    log::info!(
        "Max {} submissions per cycle, remaining-submissions cache TTL {:?}",
        config.max_submissions_per_cycle,
        config.cache_ttl
    );

    let request_log = RequestLog::new(&config.log_file, config.max_logs);
    let request_logger = RequestLogger::start(request_log.clone());
    let deadline = RequestDeadline(config.request_timeout);

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    let allowed_origins = config.allowed_origins.clone();
    let max_body_bytes = config.max_body_bytes;

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&allowed_origins))
            .wrap(request_logger.clone())
            .app_data(json_config(max_body_bytes))
            .app_data(web::Data::new(submissions.clone()))
            .app_data(web::Data::new(request_log.clone()))
            .app_data(web::Data::new(deadline))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
