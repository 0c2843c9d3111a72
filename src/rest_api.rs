use std::sync::{Arc, Weak};

use anyhow::{Context as _, Error, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use derive_where::derive_where;
use serde_derive::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    backend::Backend, config::RestApiConfig, reminders::NewReminder, settings::DashboardSettings,
};

#[derive_where(Clone)]
pub struct RestApi<B: Backend> {
    config: RestApiConfig,
    backend: Weak<B>,
    cancellation_token: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SeverityQuery {
    due_date: Option<String>,
}

impl<B: Backend> RestApi<B> {
    pub fn new(
        config: RestApiConfig,
        backend: Weak<B>,
        cancellation_token: CancellationToken,
    ) -> Self {
        RestApi {
            config,
            backend,
            cancellation_token,
        }
    }

    /// Serves until Ctrl-C, then cancels the other background tasks.
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        log::info!("REST API listening on {}", self.config.bind_address);

        let cancellation_token = self.cancellation_token.clone();
        let shutdown_token = self.cancellation_token.clone();

        axum::serve(listener, Self::router(self))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = shutdown_token.cancelled() => {}
                }
            })
            .await?;

        cancellation_token.cancel();
        Ok(())
    }

    pub fn router(self) -> Router<()> {
        Router::new()
            .route("/day_window", get(Self::day_window))
            .route("/severity", get(Self::severity))
            .route("/reminders", post(Self::add_reminder))
            .route("/reminders/today", get(Self::reminders_today))
            .route("/reminders/dispatch", post(Self::dispatch))
            .route("/reminders/{id}", delete(Self::delete_reminder))
            .route(
                "/settings",
                get(Self::get_settings).put(Self::update_settings),
            )
            .layer(CatchPanicLayer::new())
            .with_state(self)
    }

    fn backend(&self) -> Result<Arc<B>> {
        self.backend.upgrade().context("backend is shutting down")
    }

    async fn day_window(State(state): State<Self>) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.day_window()))
    }

    async fn severity(
        State(state): State<Self>,
        Query(query): Query<SeverityQuery>,
    ) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.severity(query.due_date.as_deref())))
    }

    async fn reminders_today(State(state): State<Self>) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.reminders_today().await?))
    }

    async fn add_reminder(
        State(state): State<Self>,
        Json(reminder): Json<NewReminder>,
    ) -> Result<impl IntoResponse, ApiError> {
        let id = state.backend()?.add_reminder(reminder).await?;
        Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
    }

    async fn delete_reminder(
        State(state): State<Self>,
        Path(id): Path<i64>,
    ) -> Result<impl IntoResponse, ApiError> {
        if state.backend()?.delete_reminder(id).await? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Ok(StatusCode::NOT_FOUND)
        }
    }

    async fn dispatch(State(state): State<Self>) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.dispatch_now().await?))
    }

    async fn get_settings(State(state): State<Self>) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.settings()))
    }

    async fn update_settings(
        State(state): State<Self>,
        Json(settings): Json<DashboardSettings>,
    ) -> Result<impl IntoResponse, ApiError> {
        Ok(Json(state.backend()?.update_settings(settings).await?))
    }
}

// Wraps `anyhow::Error` so handlers can use `?`.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("REST API error: {:?}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
