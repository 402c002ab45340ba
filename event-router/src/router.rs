use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::endpoint;
use crate::processor::MessageProcessor;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::sinks::Publisher;

/// Raised by a request handler when the router can no longer trust its own
/// state. The server stops accepting requests and the process exits.
#[derive(Clone, Default)]
pub struct FatalSignal {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl FatalSignal {
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolves once [`FatalSignal::raise`] has been called.
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Clone)]
pub struct State {
    pub processor: Arc<MessageProcessor>,
    pub publisher: Arc<dyn Publisher + Send + Sync>,
    pub fatal: FatalSignal,
}

async fn index() -> &'static str {
    "event-router"
}

pub fn router<P: Publisher + Send + Sync + 'static>(
    processor: MessageProcessor,
    publisher: P,
    liveness: HealthRegistry,
    fatal: FatalSignal,
    metrics: bool,
) -> Router {
    let state = State {
        processor: Arc::new(processor),
        publisher: Arc::new(publisher),
        fatal,
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/event", post(endpoint::event))
        .route("/event/", post(endpoint::event))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when the router is used as a library (during tests etc)
    // does not work well.
    if metrics {
        match setup_metrics_recorder() {
            Ok(recorder_handle) => {
                router.route("/metrics", get(move || ready(recorder_handle.render())))
            }
            Err(err) => {
                error!("failed to install the prometheus recorder: {}", err);
                router
            }
        }
    } else {
        router
    }
}
