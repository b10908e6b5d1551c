/// OAuth connect flow
///
/// `/connect` sends the browser to the provider login; the provider
/// sends it back to `/oauth/callback` with an authorization code. The
/// callback exchanges the code, verifies the token against the API,
/// and persists the encrypted pair. From then on the account is
/// picked up by the polling worker.
use crate::{
    context::AppContext,
    db::credentials::AccountProfile,
    error::{PayflowError, PayflowResult},
};
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/connect", get(connect))
        .route("/oauth/callback", get(callback))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Redirect the browser to the provider's login page.
async fn connect(State(ctx): State<AppContext>) -> Redirect {
    let (url, state) = ctx.oauth.authorization_url();
    ctx.issue_state(state);
    Redirect::temporary(&url)
}

/// Complete the authorization-code exchange.
async fn callback(
    State(ctx): State<AppContext>,
    Query(query): Query<CallbackQuery>,
) -> PayflowResult<Json<serde_json::Value>> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        warn!(error = %error, description = %description, "Provider denied authorization");
        return Err(PayflowError::Auth(format!(
            "Provider denied authorization: {}",
            error
        )));
    }

    let state = query
        .state
        .ok_or_else(|| PayflowError::Auth("Missing state parameter".to_string()))?;
    if !ctx.redeem_state(&state) {
        return Err(PayflowError::Auth(
            "Unknown or already used state parameter".to_string(),
        ));
    }

    let code = query
        .code
        .ok_or_else(|| PayflowError::Auth("Missing authorization code".to_string()))?;

    let tokens = ctx.oauth.exchange_code(&code).await?;
    let identity = ctx
        .oauth
        .account_info(
            &tokens.access_token,
            &ctx.config.provider.api_base_url,
            &tokens,
        )
        .await?;

    let account_id = identity
        .account_id()
        .ok_or_else(|| PayflowError::Auth("Token carries no usable identity".to_string()))?
        .to_string();

    let profile = AccountProfile {
        owner_name: identity.name.clone(),
        owner_email: identity.email.clone(),
        company_name: identity.company_name.clone(),
    };
    ctx.tokens.save_tokens(&account_id, &tokens, &profile).await?;

    info!(account_id = %account_id, "Account connected");
    Ok(Json(json!({
        "status": "connected",
        "account_id": account_id,
        "company_name": identity.company_name,
        "owner_email": identity.email,
    })))
}
