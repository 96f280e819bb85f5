//! Integration tests for events

#[cfg(test)]
mod tests {
    use leasehold_events::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_event_sender_emitter() {
        let (tx, mut rx) = channel();

        tx.emit_error("test error");
        tx.emit_warning_with_context("test warning", "resource #0");

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(
            event1,
            AppEvent::General(GeneralEvent::Error { .. })
        ));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(
            event2,
            AppEvent::General(GeneralEvent::Warning { ref context, .. }) if context == "resource #0"
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);

        // Should not panic when receiver is dropped
        tx.emit_error("ignored");
    }

    #[test]
    fn test_pool_event_levels() {
        let expired = AppEvent::Pool(PoolEvent::LeaseExpired {
            pool_id: "p".into(),
            resource: 0,
            generation: 3,
        });
        assert_eq!(expired.log_level(), tracing::Level::WARN);
        assert_eq!(expired.log_target(), "leasehold::events::pool");
        assert_eq!(expired.event_source(), EventSource::POOL);

        let granted = AppEvent::Pool(PoolEvent::LeaseGranted {
            pool_id: "p".into(),
            resource: 1,
            generation: 1,
            caller: "c".into(),
            lease: Duration::from_secs(1),
        });
        assert_eq!(granted.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_pool_event_serialization() {
        let event = AppEvent::Pool(PoolEvent::AcquireCancelled {
            pool_id: "p".into(),
            caller: "c".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "pool");
        assert_eq!(json["event"]["type"], "acquire_cancelled");
    }

    #[test]
    fn test_general_event_context() {
        let event = AppEvent::General(GeneralEvent::warning_with_context(
            "lease already reclaimed",
            "resource #2 generation 4",
        ));
        assert_eq!(event.log_level(), tracing::Level::WARN);
        assert_eq!(event.event_source(), EventSource::GENERAL);
        assert_eq!(
            AppEvent::General(GeneralEvent::error("holder panicked")).log_level(),
            tracing::Level::ERROR
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "general");
        assert_eq!(json["event"]["type"], "Warning");
        assert_eq!(json["event"]["context"], "resource #2 generation 4");
    }
}
