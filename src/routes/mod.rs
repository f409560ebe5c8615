use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod candidates;
pub mod companies;
pub mod departments;
pub mod health;
pub mod positions;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = build_cors(state.config.cors_allowed_origin.as_deref());
    let body_limit = state.config.max_upload_bytes;

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route(
            "/me",
            get(users::get_me)
                .patch(users::update_me)
                .delete(users::delete_me),
        )
        .route("/me/password", put(users::change_password));

    // The listing is public; the other company handlers authenticate
    // through their `AuthenticatedUser` argument.
    let companies_routes = Router::new()
        .route(
            "/",
            get(companies::list_companies).post(companies::create_company),
        )
        .route(
            "/:id",
            get(companies::get_company)
                .patch(companies::update_company)
                .delete(companies::delete_company),
        );

    let departments_routes = Router::new()
        .route(
            "/",
            get(departments::list_departments).post(departments::create_department),
        )
        .route(
            "/:id",
            get(departments::get_department)
                .patch(departments::update_department)
                .delete(departments::delete_department),
        );

    let positions_routes = Router::new()
        .route(
            "/",
            get(positions::list_positions).post(positions::create_position),
        )
        .route("/archived", get(positions::list_archived_positions))
        .route("/bulk/delete", post(positions::bulk_delete_positions))
        .route("/bulk/trash", post(positions::bulk_trash_positions))
        .route(
            "/:id",
            get(positions::get_position)
                .patch(positions::update_position)
                .delete(positions::delete_position),
        )
        .route("/:id/archive", post(positions::toggle_archive))
        .route("/:id/resolve", post(positions::toggle_resolve))
        .route(
            "/:id/qualified-candidates",
            put(positions::set_qualified_candidates),
        );

    let candidates_routes = Router::new()
        .route(
            "/",
            get(candidates::list_candidates).post(candidates::create_candidate),
        )
        .route("/search", post(candidates::search_candidates))
        .route(
            "/archived/search",
            post(candidates::search_archived_candidates),
        )
        .route("/bulk/score", post(candidates::bulk_score))
        .route("/bulk/qualify", post(candidates::bulk_qualify))
        .route("/bulk/delete", post(candidates::bulk_delete))
        .route(
            "/:id",
            get(candidates::get_candidate)
                .patch(candidates::update_candidate)
                .delete(candidates::delete_candidate),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/departments", departments_routes)
        .nest("/api/positions", positions_routes)
        .nest("/api/candidates", candidates_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/companies", companies_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn build_cors(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub(crate) fn format_timestamp(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}
