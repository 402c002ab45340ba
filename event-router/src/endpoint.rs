use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use tracing::{error, instrument};

use crate::api::{RouteResponse, RouteResponseCode, RouterError};
use crate::router::{self, FatalSignal};
use crate::sinks::publish_all;

#[instrument(skip_all, fields(content_type, bytes = body.len()))]
pub async fn event(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RouteResponse>, RouterError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .map_or("", |v| v.to_str().unwrap_or(""));
    tracing::Span::current().record("content_type", content_type);

    let instructions = match state.processor.process(content_type, &body) {
        Ok(instructions) => instructions,
        Err(err) => return Err(internal_error(&state.fatal, err)),
    };

    let summary = publish_all(state.publisher.as_ref(), &instructions).await;

    Ok(Json(RouteResponse {
        status: RouteResponseCode::Ok,
        published: summary.published,
        dead_lettered: summary.dead_lettered,
        failed: summary.failed,
    }))
}

/// The processor only fails when it cannot trust its own state. Nothing more
/// is accepted: the server drains and the process exits.
fn internal_error(fatal: &FatalSignal, err: RouterError) -> RouterError {
    error!("========== Unexpected Internal Error START ==========");
    error!("{:?}", err);
    error!("========== Unexpected Internal Error  END  ==========");
    error!("assuming inconsistent internal state, shutting down");
    fatal.raise();
    err
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn internal_error_raises_fatal_signal() {
        let fatal = FatalSignal::default();
        let err = internal_error(
            &fatal,
            RouterError::InternalInconsistency("failed to serialize dead letter".to_string()),
        );

        assert!(fatal.is_raised());
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
