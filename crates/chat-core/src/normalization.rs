use crate::{
    error::ChatError,
    types::{ChatEvent, SendAck},
};

/// Send command result before it is turned into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was published under `message_id`.
    Published { message_id: String },
    Failed { error: ChatError },
}

/// Convert a send outcome to a stable `ChatEvent::SendAck`.
pub fn normalize_send_outcome(client_txn_id: impl Into<String>, outcome: SendOutcome) -> ChatEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Published { message_id } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: Some(message_id),
            error_code: None,
        }),
        SendOutcome::Failed { error } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert an error into a `ChatEvent::Error`.
pub fn normalize_error(error: ChatError) -> ChatEvent {
    let recoverable = error.is_recoverable();
    ChatEvent::Error {
        code: error.code,
        message: error.message,
        recoverable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatErrorCategory, TransportError, TransportErrorKind};

    #[test]
    fn maps_publish_to_send_ack() {
        let event = normalize_send_outcome(
            "txn-1",
            SendOutcome::Published {
                message_id: "peer-a1731000000000".into(),
            },
        );

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-1");
                assert_eq!(ack.message_id.as_deref(), Some("peer-a1731000000000"));
                assert_eq!(ack.error_code, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_failure_to_send_ack_with_stable_error_code() {
        let error: ChatError =
            TransportError::new(TransportErrorKind::Unavailable, "no lightpush peers").into();
        let event = normalize_send_outcome("txn-2", SendOutcome::Failed { error });

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("transport_unavailable"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn setup_errors_are_not_recoverable() {
        let event = normalize_error(ChatError::new(
            ChatErrorCategory::Config,
            "missing_channel",
            "channel name is empty",
        ));
        assert_eq!(
            event,
            ChatEvent::Error {
                code: "missing_channel".into(),
                message: "channel name is empty".into(),
                recoverable: false,
            }
        );
    }
}
