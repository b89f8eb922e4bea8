pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use state::AppState;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the API router. Everything except login sits behind the session cookie.
pub fn router(app_state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/auth/login", post(auth::login_handler));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/accounts", post(auth::create_account_handler))
        .route("/roster", get(rest::roster_handler))
        .route(
            "/partitions/{year}/{section}/selection",
            get(rest::selection_handler),
        )
        .route("/clearances", post(rest::generate_handler))
        .route("/clearances/{year}/{section}/latest", get(rest::latest_handler))
        .route("/clearances/{year}/{section}/history", get(rest::history_handler))
        .route(
            "/clearances/{year}/{section}/{record_id}/transitions",
            post(rest::transition_handler),
        )
        .route(
            "/partitions/{year}/{section}/courses/{course_id}/instructor",
            put(rest::assign_instructor_handler).delete(rest::unassign_instructor_handler),
        )
        .route(
            "/partitions/{year}/{section}/mentors",
            post(rest::assign_mentor_handler).delete(rest::remove_mentors_handler),
        )
        .route(
            "/faculty/{faculty_id}/coordinator",
            put(rest::set_coordinator_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
