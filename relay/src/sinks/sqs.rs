use async_trait::async_trait;
use aws_config::BehaviorVersion;
use metrics::counter;
use tracing::{info, instrument};

use crate::api::RelayError;
use crate::prometheus::report_dropped_records;
use crate::sinks::{OutboundMessage, QueueSink};

pub struct SqsSink {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    ordered: bool,
}

impl SqsSink {
    /// Ordered queues get the deduplication token and group id on every
    /// message; standard queues receive the body alone.
    pub async fn new(queue_url: String, ordered: bool) -> anyhow::Result<SqsSink> {
        info!("connecting to SQS queue at {}...", queue_url);
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = aws_sdk_sqs::Client::new(&config);

        // Resolve the queue once to make sure we can reach it
        client
            .get_queue_attributes()
            .queue_url(&queue_url)
            .send()
            .await?;
        info!("connected to SQS queue");

        Ok(SqsSink {
            client,
            queue_url,
            ordered,
        })
    }
}

#[async_trait]
impl QueueSink for SqsSink {
    #[instrument(skip_all)]
    async fn send(&self, message: OutboundMessage) -> Result<(), RelayError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message.body);

        if self.ordered {
            request = request
                .message_deduplication_id(message.deduplication_token)
                .message_group_id(message.group_id);
        }

        match request.send().await {
            Ok(_) => {
                counter!("relay_records_forwarded_total").increment(1);
                Ok(())
            }
            Err(e) => {
                if e.as_service_error()
                    .is_some_and(|err| err.is_invalid_message_contents())
                {
                    report_dropped_records("invalid_message", 1);
                    tracing::error!("queue rejected message contents: {}", e);
                    Err(RelayError::NonRetryableSinkError)
                } else {
                    report_dropped_records("sqs_write_error", 1);
                    tracing::error!("failed to submit message: {}", e);
                    Err(RelayError::RetryableSinkError)
                }
            }
        }
    }
}
