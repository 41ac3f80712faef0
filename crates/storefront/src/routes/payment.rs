//! Payment gateway callback.
//!
//! The gateway returns the customer here with a checkout-form token, either
//! as a form POST or as a GET query. Both converge on the same settlement and
//! always answer with a redirect.

use axum::{
    Form,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    response::Redirect,
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::add_breadcrumb;
use crate::state::AppState;

/// Callback parameters.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub token: Option<String>,
}

async fn settle(state: &AppState, params: CallbackParams) -> Redirect {
    add_breadcrumb(
        "payment",
        "Payment callback received",
        &[("has_token", if params.token.is_some() { "true" } else { "false" })],
    );

    let outcome = state.settlement().settle(params.token.as_deref()).await;
    Redirect::to(&outcome.redirect_url(&state.config().checkout))
}

/// `POST /api/payment/callback`
#[instrument(skip_all)]
pub async fn callback_post(
    State(state): State<AppState>,
    form: Result<Form<CallbackParams>, FormRejection>,
) -> Redirect {
    let params = form.map(|Form(params)| params).unwrap_or_default();
    settle(&state, params).await
}

/// `GET /api/payment/callback`
#[instrument(skip_all)]
pub async fn callback_get(
    State(state): State<AppState>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Redirect {
    let params = query.map(|Query(params)| params).unwrap_or_default();
    settle(&state, params).await
}
