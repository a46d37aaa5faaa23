// Copyright 2024 Bridge Relayer Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP handlers exposing the relay records for external query.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::store::{RelayRecord, TxStore, DEFAULT_LIST_LIMIT};

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<crate::error::Error> for HandlerError {
    fn from(value: crate::error::Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Builds the read-only API router over the store.
pub fn build_routes<S>(store: Arc<S>) -> Router
where
    S: TxStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/transactions/pending",
            get(handle_list_pending::<S>),
        )
        .route(
            "/api/v1/transactions/pending/:user",
            get(handle_list_pending_by_user::<S>),
        )
        .with_state(store)
}

/// Up to 1000 pending relay records, most recent first.
async fn handle_list_pending<S>(
    State(store): State<Arc<S>>,
) -> Result<Json<Vec<RelayRecord>>, HandlerError>
where
    S: TxStore,
{
    let records = store.list_pending(DEFAULT_LIST_LIMIT)?;
    Ok(Json(records))
}

/// Pending relay records for one user; the address is lowercased.
async fn handle_list_pending_by_user<S>(
    State(store): State<Arc<S>>,
    Path(user): Path<String>,
) -> Result<Json<Vec<RelayRecord>>, HandlerError>
where
    S: TxStore,
{
    let records = store.list_pending_by_user(&user)?;
    Ok(Json(records))
}
