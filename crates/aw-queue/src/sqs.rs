//! Amazon SQS consumer
//!
//! Receives one message per call with long polling and deletes by receipt
//! handle. SDK failures are mapped onto `QueueError` so the consumer loop can
//! classify them without knowing about the SDK.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use aw_common::QueueMessage;

use crate::{QueueConsumer, QueueError, Result};

/// Build an SQS client for the given region, optionally pointed at a custom
/// endpoint (LocalStack).
pub async fn build_client(region: &str, endpoint_url: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;
    Client::new(&sdk_config)
}

pub struct SqsQueueConsumer {
    client: Client,
    queue_url: String,
}

impl SqsQueueConsumer {
    pub fn from_queue_url(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Resolve the queue URL from its name. A missing queue or bad credentials
    /// surface here, before the consumer loop ever starts.
    pub async fn from_queue_name(client: Client, queue_name: &str) -> Result<Self> {
        info!(queue_name = %queue_name, "Looking up queue URL");

        let output = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let queue_url = output
            .queue_url()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QueueError::QueueNotFound(format!("no URL returned for {}", queue_name)))?
            .to_string();

        info!(queue_url = %queue_url, "Queue URL resolved");
        Ok(Self::from_queue_url(client, queue_url))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueConsumer for SqsQueueConsumer {
    fn identifier(&self) -> &str {
        &self.queue_url
    }

    async fn receive_one(&self, wait_time_seconds: u32) -> Result<Option<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_time_seconds as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(map_sdk_error)?;

        match output.messages.unwrap_or_default().into_iter().next() {
            Some(message) => convert_message(message).map(Some),
            None => {
                debug!(wait_time_seconds = wait_time_seconds, "No messages received");
                Ok(None)
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }
}

/// Validate the required fields and flatten attribute maps to strings.
fn convert_message(message: Message) -> Result<QueueMessage> {
    let message_id = message
        .message_id
        .ok_or_else(|| QueueError::InvalidMessage("missing MessageId".to_string()))?;
    let body = message
        .body
        .ok_or_else(|| QueueError::InvalidMessage(format!("message {} has no body", message_id)))?;
    let receipt_handle = message.receipt_handle.ok_or_else(|| {
        QueueError::InvalidMessage(format!("message {} has no receipt handle", message_id))
    })?;

    let attributes = message.attributes.map(|attrs| {
        attrs
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect::<HashMap<_, _>>()
    });

    let message_attributes = message.message_attributes.map(|attrs| {
        attrs
            .into_iter()
            .filter_map(|(k, v)| v.string_value.map(|s| (k, s)))
            .collect::<HashMap<_, _>>()
    });

    Ok(QueueMessage {
        message_id,
        body,
        receipt_handle,
        attributes,
        message_attributes,
        md5_of_body: message.md5_of_body,
    })
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            let message = service_err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            match service_err.code() {
                Some(code) => QueueError::from_service_code(code, message),
                None => QueueError::Service {
                    code: "Unknown".to_string(),
                    message,
                },
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            QueueError::Transport(DisplayErrorContext(&err).to_string())
        }
        _ => QueueError::Service {
            code: "ClientError".to_string(),
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;
    use aws_sdk_sqs::error::ErrorMetadata;
    use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
    use aws_sdk_sqs::operation::receive_message::ReceiveMessageError;
    use aws_sdk_sqs::types::MessageAttributeValue;

    fn complete_message() -> aws_sdk_sqs::types::builders::MessageBuilder {
        Message::builder()
            .message_id("msg-1")
            .body("{\"assessment\":1}")
            .receipt_handle("rh-1")
    }

    fn service_error<E>(err: E) -> SdkError<E, ()> {
        SdkError::service_error(err, ())
    }

    // ========================================================================
    // Message conversion
    // ========================================================================

    #[test]
    fn test_convert_complete_message() {
        let message = complete_message().md5_of_body("abc123").build();

        let converted = convert_message(message).unwrap();

        assert_eq!(converted.message_id, "msg-1");
        assert_eq!(converted.body, "{\"assessment\":1}");
        assert_eq!(converted.receipt_handle, "rh-1");
        assert_eq!(converted.md5_of_body.as_deref(), Some("abc123"));
        assert!(converted.attributes.is_none());
        assert!(converted.message_attributes.is_none());
    }

    #[test]
    fn test_convert_rejects_missing_required_fields() {
        let cases = [
            Message::builder().body("b").receipt_handle("rh").build(),
            Message::builder().message_id("m").receipt_handle("rh").build(),
            Message::builder().message_id("m").body("b").build(),
        ];

        for message in cases {
            let err = convert_message(message).unwrap_err();
            assert!(matches!(err, QueueError::InvalidMessage(_)), "got {:?}", err);
            assert_eq!(err.classify(), ErrorClass::Unknown);
        }
    }

    #[test]
    fn test_convert_flattens_attributes() {
        let message = complete_message()
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
            .attributes(MessageSystemAttributeName::SentTimestamp, "1700000000000")
            .message_attributes(
                "tenant",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("acme")
                    .build()
                    .unwrap(),
            )
            .message_attributes(
                "blob",
                MessageAttributeValue::builder()
                    .data_type("Binary")
                    .binary_value(aws_sdk_sqs::primitives::Blob::new(vec![1, 2, 3]))
                    .build()
                    .unwrap(),
            )
            .build();

        let converted = convert_message(message).unwrap();

        let attributes = converted.attributes.as_ref().unwrap();
        assert_eq!(attributes.get("ApproximateReceiveCount").map(String::as_str), Some("3"));
        assert_eq!(attributes.get("SentTimestamp").map(String::as_str), Some("1700000000000"));
        assert_eq!(converted.receive_count(), Some(3));

        let user = converted.message_attributes.as_ref().unwrap();
        assert_eq!(user.len(), 1);
        assert_eq!(user.get("tenant").map(String::as_str), Some("acme"));
    }

    // ========================================================================
    // SDK error mapping
    // ========================================================================

    #[test]
    fn test_transport_failures_are_transient() {
        let timeout = map_sdk_error(SdkError::<ReceiveMessageError, ()>::timeout_error("read timed out"));
        assert!(matches!(timeout, QueueError::Transport(_)), "got {:?}", timeout);
        assert_eq!(timeout.classify(), ErrorClass::Transient);
    }

    #[test]
    fn test_construction_failure_is_unknown() {
        let err = map_sdk_error(SdkError::<ReceiveMessageError, ()>::construction_failure("missing queue url"));
        match &err {
            QueueError::Service { code, .. } => assert_eq!(code, "ClientError"),
            other => panic!("unexpected mapping: {:?}", other),
        }
        assert_eq!(err.classify(), ErrorClass::Unknown);
    }

    #[test]
    fn test_service_codes_go_through_classifier() {
        let missing = map_sdk_error(service_error(ReceiveMessageError::generic(
            ErrorMetadata::builder()
                .code("AWS.SimpleQueueService.NonExistentQueue")
                .message("The specified queue does not exist")
                .build(),
        )));
        assert!(matches!(&missing, QueueError::QueueNotFound(m) if m == "The specified queue does not exist"));
        assert_eq!(missing.classify(), ErrorClass::Fatal);

        let throttled = map_sdk_error(service_error(ReceiveMessageError::generic(
            ErrorMetadata::builder().code("ThrottlingException").build(),
        )));
        assert_eq!(throttled.classify(), ErrorClass::Transient);

        let expired = map_sdk_error(service_error(DeleteMessageError::generic(
            ErrorMetadata::builder()
                .code("ReceiptHandleIsInvalid")
                .message("expired")
                .build(),
        )));
        assert!(matches!(expired, QueueError::ReceiptHandleInvalid(_)));
    }

    #[test]
    fn test_service_error_without_code() {
        let err = map_sdk_error(service_error(ReceiveMessageError::generic(
            ErrorMetadata::builder().message("something odd").build(),
        )));
        match &err {
            QueueError::Service { code, message } => {
                assert_eq!(code, "Unknown");
                assert_eq!(message, "something odd");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
        assert_eq!(err.classify(), ErrorClass::Unknown);
    }
}
