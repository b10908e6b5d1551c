/// HTTP API surface
///
/// Deliberately small: the OAuth connect flow and health probes. All
/// delivery work happens in the background worker.
use crate::context::AppContext;
use axum::Router;

pub mod health;
pub mod oauth;

pub fn routes() -> Router<AppContext> {
    Router::new().merge(health::routes()).merge(oauth::routes())
}
