use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{docs::ApiDoc, handlers, middleware as auth_middleware, realtime::gateway, state::AppState};

pub fn router(state: AppState) -> Router {
    // Public routes (no auth). The WebSocket authenticates its own handshake.
    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/ws", get(gateway::ws_handler));

    // User-protected routes (auth required)
    let user_routes = Router::new()
        .route(
            "/api/presence/{user_id}",
            get(handlers::presence::get_presence),
        )
        .route(
            "/api/presence/{user_id}/active-chat/{conversation_id}",
            get(handlers::presence::get_active_chat),
        )
        .route(
            "/api/messages/status",
            post(handlers::messages::get_message_status),
        )
        .route(
            "/api/messages/read",
            post(handlers::messages::mark_messages_read),
        )
        .route(
            "/api/messages/{id}/aggregate-status",
            get(handlers::messages::get_aggregate_status),
        )
        .route(
            "/api/messages/{id}/status",
            put(handlers::messages::update_message_status),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(SwaggerUi::new("/api/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                        .allow_headers(Any)
                        .max_age(std::time::Duration::from_secs(24 * 60 * 60)),
                ),
        )
        .with_state(state)
}
