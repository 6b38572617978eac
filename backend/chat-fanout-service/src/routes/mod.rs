use crate::metrics::serve_metrics;
use actix_cors::Cors;
use actix_web::{web, HttpResponse};

pub mod wsroute;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::comments_ws)
        .service(wsroute::chat_inbound_ws)
        .service(wsroute::chat_outbound_ws)
        .service(wsroute::chat_duplex_ws)
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// CORS policy for the browser front end. `*` allows any origin.
pub fn cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default();
    for origin in allowed_origins {
        if origin == "*" {
            cors = cors.allow_any_origin();
        } else {
            cors = cors.allowed_origin(origin);
        }
    }
    cors.allow_any_method().allow_any_header().max_age(3600)
}
