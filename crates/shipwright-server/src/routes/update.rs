use axum::{body::Bytes, extract::State, Json};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;
use crate::update::{UpdateReport, UpdateStatus};

/// Actor recorded when the request does not name one.
const DEFAULT_ACTOR: &str = "api";

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBody {
    pub initiated_by: Option<String>,
}

/// POST /api/update: run one update attempt and return its report.
///
/// A failed or rolled-back attempt is still a 200 with `success: false`;
/// only refused attempts are errors.
pub async fn perform_update(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<UpdateReport>, AppError> {
    let body: UpdateBody = if body.is_empty() {
        UpdateBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))?
    };
    let actor = body
        .initiated_by
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string());

    let report = app.orchestrator.perform_update(&actor).await?;
    Ok(Json(report))
}

/// GET /api/update/status: live phase and log of the current attempt
pub async fn get_status(State(app): State<AppState>) -> Json<UpdateStatus> {
    Json(app.orchestrator.status())
}
