//! Partial results for combine-policy requests.
//!
//! The LSP `$/progress` notification doubles as the partial result channel
//! when the client passed a `partialResultToken`. The value is whatever the
//! engine has merged so far.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_lsp_server::Client;
use tower_lsp_server::ls_types::ProgressToken;
use tower_lsp_server::ls_types::notification::Notification;

use crate::engine::ProgressReporter;

pub(crate) enum PartialResult {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PartialResultParams {
    pub token: ProgressToken,
    pub value: Value,
}

impl Notification for PartialResult {
    type Params = PartialResultParams;
    const METHOD: &'static str = "$/progress";
}

/// A reporter feeding an ordered channel.
pub(crate) fn channel_reporter() -> (ProgressReporter, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter: ProgressReporter = Arc::new(move |value| {
        // receiver gone means the request already finished
        let _ = tx.send(value);
    });
    (reporter, rx)
}

/// Reporter sending partial results to the client, or `None` when the
/// client did not ask for them.
///
/// Notifications go out in order from one forwarding task, which ends when
/// the request context holding the reporter is dropped.
pub(crate) fn partial_result_reporter(
    client: &Client,
    token: Option<ProgressToken>,
) -> Option<ProgressReporter> {
    let token = token?;
    let (reporter, mut rx) = channel_reporter();
    let client = client.clone();
    tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            let params = PartialResultParams {
                token: token.clone(),
                value,
            };
            client.send_notification::<PartialResult>(params).await;
        }
    });
    Some(reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tower_lsp_server::ls_types::NumberOrString;

    #[test]
    fn params_serialize_as_progress_payload() {
        let params = PartialResultParams {
            token: NumberOrString::String("yosegi/1".to_string()),
            value: json!([{"message": "a"}]),
        };

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"token": "yosegi/1", "value": [{"message": "a"}]})
        );
        assert_eq!(PartialResult::METHOD, "$/progress");
    }

    #[tokio::test]
    async fn channel_reporter_preserves_order_and_closes_with_the_reporter() {
        let (reporter, mut rx) = channel_reporter();
        reporter(json!(1));
        reporter(json!(2));
        drop(reporter);

        assert_eq!(rx.recv().await, Some(json!(1)));
        assert_eq!(rx.recv().await, Some(json!(2)));
        assert_eq!(rx.recv().await, None);
    }
}
