use actix_web::{web, App, HttpServer};
use chat_fanout_service::{
    broker::{InMemoryBroker, MessageBroker, RedisBroker},
    config::{BrokerBackend, Config},
    error::AppError,
    logging, routes,
    state::AppState,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let broker: Arc<dyn MessageBroker> = match cfg.broker_backend {
        BrokerBackend::Redis => {
            let broker = RedisBroker::connect(&cfg.redis_url)
                .await
                .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
            Arc::new(broker)
        }
        BrokerBackend::Memory => {
            tracing::warn!("using in-memory broker; chat will not cross instances");
            Arc::new(InMemoryBroker::default())
        }
    };

    // Broker pumps run on the main runtime so they outlive any one worker.
    let state = AppState::new(cfg.clone(), broker, Handle::current());
    let bridge = state.bridge.clone();

    let bind_addr = cfg.bind_address();
    tracing::info!(
        %bind_addr,
        backend = ?cfg.broker_backend,
        comments_channel = %cfg.channels.new_comments,
        inbound_channel = %cfg.channels.client_to_broker,
        outbound_channel = %cfg.channels.broker_to_client,
        "starting chat-fanout-service"
    );

    let http_state = state.clone();
    let origins = cfg.cors_allowed_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(routes::cors(&origins))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(http_state.clone()))
            .configure(routes::configure)
    })
    .workers(cfg.workers)
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| AppError::StartServer(format!("http server: {e}")));

    bridge.shutdown().await;
    tracing::info!("chat-fanout-service stopped");
    result
}
