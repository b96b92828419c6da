//! REST handlers for the plugin manager: install, reload, list, get,
//! uninstall. Each route maps 1:1 to a manager facade operation and returns
//! either the affected record or a structured error payload carrying the
//! error kind.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use logging::{EventLogger, LifecycleEvent};
use persona_core::{PluginError, PluginRecord};

use crate::server::GatewayState;

/// Structured error payload: `{ "kind": "...", "message": "..." }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

pub struct ApiError(PluginError);

impl From<PluginError> for ApiError {
    fn from(e: PluginError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(e: &PluginError) -> StatusCode {
    match e {
        PluginError::NotFound(_) => StatusCode::NOT_FOUND,
        PluginError::DuplicateName(_)
        | PluginError::DependencyViolation { .. }
        | PluginError::Busy(_) => StatusCode::CONFLICT,
        PluginError::CycleDetected { .. } | PluginError::MissingDependency { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PluginError::LoadFailure(_) | PluginError::UnloadFailure(_) => StatusCode::BAD_GATEWAY,
        PluginError::RollbackFailure { .. }
        | PluginError::Storage(_)
        | PluginError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
pub struct ReloadRequest {
    pub version: String,
}

pub async fn install(
    State(state): State<GatewayState>,
    Json(request): Json<persona_plugins::InstallRequest>,
) -> Result<(StatusCode, Json<PluginRecord>), ApiError> {
    let record = state.manager.install(request).await?;
    EventLogger::log_event(LifecycleEvent::Installed {
        plugin: record.name.clone(),
        version: record.version.clone(),
    });
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn reload(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Json(request): Json<ReloadRequest>,
) -> Result<Json<PluginRecord>, ApiError> {
    let from_version = state.manager.get(&name).map(|r| r.version).ok();

    match state.manager.reload(&name, &request.version).await {
        Ok(record) => {
            EventLogger::log_event(LifecycleEvent::Reloaded {
                plugin: record.name.clone(),
                from_version: from_version.unwrap_or_default(),
                to_version: record.version.clone(),
            });
            Ok(Json(record))
        }
        Err(e @ (PluginError::LoadFailure(_) | PluginError::UnloadFailure(_))) => {
            // Soft failure: the plugin was rolled back to its prior version.
            EventLogger::log_event(LifecycleEvent::RolledBack {
                plugin: name.clone(),
                version: from_version.unwrap_or_default(),
                cause: e.to_string(),
            });
            Err(e.into())
        }
        Err(e @ PluginError::RollbackFailure { .. }) => {
            warn!(plugin = %name, error = %e, "Reload left plugin in failed state");
            EventLogger::log_event(LifecycleEvent::Failed {
                plugin: name.clone(),
                cause: e.to_string(),
            });
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn list(State(state): State<GatewayState>) -> Json<Vec<PluginRecord>> {
    Json(state.manager.list())
}

pub async fn get(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    Ok(Json(state.manager.get(&name)?))
}

pub async fn uninstall(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.uninstall(&name).await?;
    EventLogger::log_event(LifecycleEvent::Uninstalled {
        plugin: name.clone(),
    });
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (
                PluginError::NotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                PluginError::DuplicateName("x".into()),
                StatusCode::CONFLICT,
            ),
            (PluginError::Busy("x".into()), StatusCode::CONFLICT),
            (
                PluginError::CycleDetected { path: vec![] },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                PluginError::LoadFailure("boom".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                PluginError::RollbackFailure {
                    name: "x".into(),
                    reason: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err:?}");
        }
    }

    #[test]
    fn error_body_carries_kind() {
        let e = PluginError::MissingDependency {
            name: "avatar".into(),
            missing: vec!["voice".into()],
        };
        assert_eq!(e.kind(), "MissingDependency");
        assert!(e.to_string().contains("voice"));
    }
}
