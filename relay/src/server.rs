use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::redis::RedisClient;
use crate::relay::DispatchContext;
use crate::router;
use crate::sinks::sqs::SqsSink;
use crate::sinks::PrintSink;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let context = DispatchContext {
        key_path: config.key_path().expect("invalid DEDUP_KEY_PATH"),
        group_field: config.group_field().map(String::from),
    };

    // Dedup runs only when a cache host is configured; otherwise every
    // record is forwarded.
    let dedup = config.cache_url().map(|url| {
        let redis = RedisClient::new(url).expect("failed to create redis client");
        DedupStore::new(
            Arc::new(redis),
            config.dedup_cache_hash_namespace.clone(),
        )
    });

    let app = if config.print_sink {
        router::router(PrintSink {}, dedup, context, config.export_prometheus)
    } else {
        let sink = SqsSink::new(config.queue_endpoint.clone(), config.queue_is_ordered)
            .await
            .expect("failed to create sqs sink");
        router::router(sink, dedup, context, config.export_prometheus)
    };

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}
