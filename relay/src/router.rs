use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::dedup::DedupStore;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::relay::{self, DispatchContext};
use crate::sinks;

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn sinks::QueueSink + Send + Sync>,
    pub dedup: Option<DedupStore>,
    pub context: Arc<DispatchContext>,
}

async fn index() -> &'static str {
    "relay"
}

pub fn router<S: sinks::QueueSink + Send + Sync + 'static>(
    sink: S,
    dedup: Option<DedupStore>,
    context: DispatchContext,
    metrics: bool,
) -> Router {
    let state = State {
        sink: Arc::new(sink),
        dedup,
        context: Arc::new(context),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/batch", post(relay::batch))
        .route("/batch/", post(relay::batch))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when relay is used as a library (during tests etc)
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
