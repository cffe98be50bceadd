use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use support_chat_service::{
    config::Config,
    db, error, logging, middleware, routes,
    services::{
        ChatSessionStore, MemoryChatStore, MemoryNotificationStore, NotificationGateway,
        NotificationStore, PgChatSessionStore, PgNotificationStore, PresenceTracker,
    },
    state::AppState,
    websocket::{router::RealtimeRouter, ConnectionRegistry},
};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let chat_store: Arc<dyn ChatSessionStore>;
    let notification_store: Arc<dyn NotificationStore>;
    match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url).await?;
            chat_store = Arc::new(PgChatSessionStore::new(pool.clone()));
            notification_store = Arc::new(PgNotificationStore::new(pool));
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory storage (lost on restart)");
            chat_store = Arc::new(MemoryChatStore::new());
            notification_store = Arc::new(MemoryNotificationStore::new());
        }
    }

    let registry = ConnectionRegistry::new();
    let presence = PresenceTracker::new(registry.clone(), cfg.typing_ttl());
    let gateway = Arc::new(NotificationGateway::new(
        notification_store,
        registry.clone(),
    ));
    let router = Arc::new(RealtimeRouter::new(
        chat_store,
        gateway,
        registry.clone(),
        presence,
        cfg.storage_timeout(),
        cfg.history_page_size,
    ));

    let state = AppState {
        config: cfg.clone(),
        registry,
        router,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting support-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::RequestId::new())
            .app_data(web::Data::new(state.clone()))
            .service(routes::wsroute::ws_handler)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run server: {e}")))
}
