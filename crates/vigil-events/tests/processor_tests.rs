//! End-to-end processor behaviour: dispatch order, suppression, batching,
//! retries and lifecycle.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_test::traced_test;
use vigil_events::{
    CallbackActionHandler, CallbackHandler, ConditionOperator, Error, Event, EventPriority,
    EventProcessor, EventType, EventTypeFilter, HandlerRegistration, ProcessorConfig, RetryStatus,
    RuleAction, RuleBuilder,
};

type CallLog = Arc<Mutex<Vec<String>>>;

fn processor(config: ProcessorConfig) -> EventProcessor {
    EventProcessor::new(config).unwrap()
}

fn manual() -> EventProcessor {
    processor(ProcessorConfig {
        retry_delay: Duration::ZERO,
        ..Default::default()
    })
}

fn recording(log: &CallLog, name: &str) -> CallbackHandler {
    let log = Arc::clone(log);
    let name = name.to_string();
    CallbackHandler::from_fn(move |event| {
        log.lock()
            .unwrap()
            .push(format!("{}:{}", name, event.event_type));
        Ok(())
    })
}

fn failing(message: &'static str) -> CallbackHandler {
    CallbackHandler::from_fn(move |_| Err(anyhow::anyhow!(message)))
}

#[tokio::test]
async fn test_handler_priority_and_filtering() {
    let processor = manual();
    let log = CallLog::default();

    processor.register_handler(
        HandlerRegistration::new("B", recording(&log, "B")).with_priority(20),
    );
    processor.register_handler(
        HandlerRegistration::new("A", recording(&log, "A"))
            .for_types([EventType::RiskChanged])
            .with_priority(10),
    );

    processor.submit(Event::risk_changed(json!({"score": 40})), None);
    processor.submit(Event::person_updated(json!({"id": "p-1"})), None);

    let results = processor.process_all().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].handlers_invoked, vec!["A", "B"]);
    assert_eq!(results[1].handlers_invoked, vec!["B"]);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["A:RISK_CHANGED", "B:RISK_CHANGED", "B:PERSON_UPDATED"]
    );
}

#[tokio::test]
async fn test_unknown_type_reaches_only_match_all_handlers() {
    let processor = manual();
    let log = CallLog::default();
    processor.register_handler(
        HandlerRegistration::new("typed", recording(&log, "typed"))
            .for_types([EventType::RiskChanged]),
    );
    processor.register_handler(HandlerRegistration::new("all", recording(&log, "all")));

    processor.submit(Event::new("LEGACY_PING", json!({})), None);
    let results = processor.process_all().await;

    assert_eq!(results[0].priority, EventPriority::Normal);
    assert_eq!(results[0].handlers_invoked, vec!["all"]);
}

#[tokio::test]
async fn test_tier_order_across_submissions() {
    let processor = manual();
    processor.submit_low_priority(Event::new("SYNC_COMPLETED", json!({})));
    processor.submit(Event::person_updated(json!({})), None);
    processor.submit_critical(Event::person_updated(json!({})));
    processor.submit(Event::risk_changed(json!({})), None);

    let priorities: Vec<EventPriority> = processor
        .process_all()
        .await
        .into_iter()
        .map(|r| r.priority)
        .collect();

    assert_eq!(
        priorities,
        vec![
            EventPriority::Critical,
            EventPriority::High,
            EventPriority::Normal,
            EventPriority::Low,
        ]
    );
}

#[tokio::test]
async fn test_suppress_skips_dispatch_but_counts() {
    let processor = manual();
    let log = CallLog::default();
    processor.register_handler(HandlerRegistration::new("all", recording(&log, "all")));
    processor
        .add_rule(
            RuleBuilder::new("mute", "Mute sync", [EventType::SyncCompleted])
                .action(RuleAction::suppress())
                .build()
                .unwrap(),
        )
        .unwrap();

    processor.submit(Event::new(EventType::SyncCompleted, json!({})), None);
    processor.submit(Event::risk_changed(json!({})), None);
    let results = processor.process_all().await;

    let sync = results
        .iter()
        .find(|r| r.event_type == EventType::SyncCompleted)
        .unwrap();
    assert!(sync.suppressed);
    assert!(sync.handlers_invoked.is_empty());
    assert!(sync.is_success());

    assert_eq!(*log.lock().unwrap(), vec!["all:RISK_CHANGED"]);
    let stats = processor.stats();
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.events_failed, 0);
}

#[tokio::test]
async fn test_conditional_suppress_only_when_matched() {
    let processor = manual();
    processor.register_handler(HandlerRegistration::new(
        "sink",
        CallbackHandler::from_fn(|_| Ok(())),
    ));
    processor
        .add_rule(
            RuleBuilder::new("quiet-low", "Ignore low scores", [EventType::RiskChanged])
                .condition("payload.score", ConditionOperator::LessThan, 10)
                .action(RuleAction::suppress())
                .build()
                .unwrap(),
        )
        .unwrap();

    processor.submit(Event::risk_changed(json!({"score": 3})), None);
    processor.submit(Event::risk_changed(json!({"score": 60})), None);
    let results = processor.process_all().await;

    assert!(results[0].suppressed);
    assert!(!results[1].suppressed);
    assert_eq!(results[1].handlers_invoked, vec!["sink"]);
}

#[tokio::test]
async fn test_batch_size_respected() {
    let processor = processor(ProcessorConfig {
        batch_size: 2,
        ..Default::default()
    });
    for i in 0..5 {
        processor.submit(Event::person_updated(json!({"seq": i})), None);
    }

    assert_eq!(processor.process_tick().await.len(), 2);
    assert_eq!(processor.queue_size(), 3);
    assert_eq!(processor.process_tick().await.len(), 2);
    assert_eq!(processor.queue_size(), 1);
    assert_eq!(processor.process_tick().await.len(), 1);
    assert!(processor.process_tick().await.is_empty());
    assert_eq!(processor.stats().ticks, 4);
}

#[tokio::test]
async fn test_handler_failure_is_isolated_and_retried() {
    let processor = processor(ProcessorConfig {
        max_retries: 2,
        retry_delay: Duration::ZERO,
        ..Default::default()
    });
    let log = CallLog::default();
    processor.register_handler(
        HandlerRegistration::new("broken", failing("disk full")).with_priority(1),
    );
    processor.register_handler(
        HandlerRegistration::new("after", recording(&log, "after")).with_priority(2),
    );

    processor.submit(Event::risk_changed(json!({})), None);
    let results = processor.process_all().await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.iter().map(|r| r.retry).collect::<Vec<_>>(),
        vec![
            RetryStatus::Scheduled { attempt: 1, delay: Duration::ZERO },
            RetryStatus::Scheduled { attempt: 2, delay: Duration::ZERO },
            RetryStatus::Exhausted,
        ]
    );
    assert!(results.iter().all(|r| r.event_id == results[0].event_id));
    assert!(results[0].errors[0].contains("disk full"));
    assert_eq!(log.lock().unwrap().len(), 3);

    let stats = processor.stats();
    assert_eq!(stats.events_processed, 3);
    assert_eq!(stats.events_failed, 3);

    let queue = processor.queue_stats();
    assert_eq!(queue.total_requeued, 2);
    assert_eq!(queue.retries_exhausted, 1);
    assert_eq!(processor.queue_size(), 0);
}

#[tokio::test]
async fn test_panicking_handler_is_captured() {
    let processor = processor(ProcessorConfig {
        max_retries: 0,
        ..Default::default()
    });
    let log = CallLog::default();
    processor.register_handler(
        HandlerRegistration::new("panics", CallbackHandler::from_fn(|_| panic!("bad state")))
            .with_priority(1),
    );
    processor
        .register_handler(HandlerRegistration::new("ok", recording(&log, "ok")).with_priority(2));

    processor.submit(Event::alert_triggered(json!({})), None);
    let results = processor.process_all().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].handlers_invoked, vec!["panics", "ok"]);
    assert!(results[0].errors[0].contains("bad state"));
    assert_eq!(results[0].retry, RetryStatus::Exhausted);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rule_action_failure_marks_event_failed() {
    let processor = processor(ProcessorConfig {
        max_retries: 0,
        ..Default::default()
    });
    processor.register_action_handler(
        "notify",
        CallbackActionHandler::from_fn(|_| Err(anyhow::anyhow!("smtp down"))),
    );
    processor
        .add_rule(
            RuleBuilder::new("page", "Page on-call", EventTypeFilter::any())
                .action(RuleAction::new("notify", json!({"to": "oncall"})))
                .build()
                .unwrap(),
        )
        .unwrap();

    processor.submit(Event::connection_status(json!({"up": false})), None);
    let results = processor.process_all().await;

    assert_eq!(results.len(), 1);
    assert!(results[0].errors[0].starts_with("rule 'page'"));
    assert!(results[0].errors[0].contains("smtp down"));
    assert_eq!(processor.stats().events_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_retry_reenters_queue() {
    let processor = processor(ProcessorConfig {
        retry_delay: Duration::from_secs(1),
        ..Default::default()
    });
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    processor.register_handler(HandlerRegistration::new(
        "flaky",
        CallbackHandler::from_fn(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("first attempt fails");
            }
            Ok(())
        }),
    ));

    processor.submit(Event::risk_changed(json!({})), None);
    let first = processor.process_tick().await;
    assert_eq!(
        first[0].retry,
        RetryStatus::Scheduled { attempt: 1, delay: Duration::from_secs(1) }
    );
    assert_eq!(processor.queue_size(), 0);

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(processor.queue_size(), 1);

    let second = processor.process_tick().await;
    assert!(second[0].is_success());
    assert_eq!(second[0].event_id, first[0].event_id);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_cancels_pending_retry() {
    let processor = processor(ProcessorConfig {
        retry_delay: Duration::from_millis(500),
        ..Default::default()
    });
    processor.register_handler(HandlerRegistration::new("broken", failing("nope")));

    processor.submit(Event::risk_changed(json!({})), None);
    processor.process_tick().await;
    processor.clear_queue();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(processor.queue_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let processor = processor(ProcessorConfig {
        tick_interval: Duration::from_millis(100),
        ..Default::default()
    });

    processor.start().unwrap();
    processor.start().unwrap();
    assert!(processor.is_running());

    // Ticks at 0, 100, 200, 300, 400 and 500 ms.
    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(processor.stats().ticks, 6);

    processor.stop();
    assert!(!processor.is_running());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(processor.stats().ticks, 6);
}

#[tokio::test(start_paused = true)]
async fn test_auto_process_drains_submissions() {
    let processor = processor(ProcessorConfig {
        auto_process: true,
        tick_interval: Duration::from_millis(50),
        ..Default::default()
    });
    let log = CallLog::default();
    processor.register_handler(HandlerRegistration::new("all", recording(&log, "all")));
    assert!(processor.is_running());

    processor.submit(Event::timeline_updated(json!({"entry": 1})), None);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(*log.lock().unwrap(), vec!["all:TIMELINE_UPDATED"]);
    assert_eq!(processor.stats().events_processed, 1);
    processor.dispose();
}

#[tokio::test]
async fn test_handler_may_submit_follow_up_events() {
    let processor = manual();
    let log = CallLog::default();
    let inner = processor.clone();
    processor.register_handler(
        HandlerRegistration::new(
            "escalate",
            CallbackHandler::from_fn(move |event| {
                if event.payload["score"].as_i64().unwrap_or(0) > 90 {
                    inner.submit(Event::alert_triggered(json!({"source": "risk"})), None);
                }
                Ok(())
            }),
        )
        .for_types([EventType::RiskChanged]),
    );
    processor.register_handler(
        HandlerRegistration::new("alerts", recording(&log, "alerts"))
            .for_types([EventType::AlertTriggered]),
    );

    processor.submit(Event::risk_changed(json!({"score": 95})), None);
    let results = processor.process_all().await;

    assert_eq!(results.len(), 2);
    assert_eq!(*log.lock().unwrap(), vec!["alerts:ALERT_TRIGGERED"]);
    processor.dispose();
}

#[tokio::test]
async fn test_unsubscribe_and_unregister() {
    let processor = manual();
    let subscription = processor.register_handler(HandlerRegistration::new(
        "ui",
        CallbackHandler::from_fn(|_| Ok(())),
    ));
    processor.register_handler(HandlerRegistration::new(
        "audit",
        CallbackHandler::from_fn(|_| Ok(())),
    ));

    assert_eq!(subscription.id(), "ui");
    assert!(subscription.unsubscribe());
    assert!(!processor.unregister_handler("ui"));
    assert!(processor.unregister_handler("audit"));
    assert!(processor.handlers().is_empty());
}

#[tokio::test]
async fn test_dispose_tears_everything_down() {
    let processor = manual();
    processor.register_handler(HandlerRegistration::new("h", CallbackHandler::from_fn(|_| Ok(()))));
    processor
        .add_rule(
            RuleBuilder::new("r", "Log all", EventTypeFilter::any())
                .action(RuleAction::log())
                .build()
                .unwrap(),
        )
        .unwrap();
    processor.submit(Event::risk_changed(json!({})), None);
    processor.start().unwrap();

    processor.dispose();
    assert!(!processor.is_running());
    assert_eq!(processor.queue_size(), 0);
    assert!(processor.handlers().is_empty());
    assert!(processor.rules().is_empty());

    processor.dispose();
    assert!(!processor.is_running());
}

#[tokio::test]
async fn test_rule_management_through_processor() {
    let processor = manual();
    let rule = RuleBuilder::new("r1", "Mute", [EventType::RiskChanged])
        .action(RuleAction::suppress())
        .build()
        .unwrap();
    processor.add_rule(rule).unwrap();

    assert!(processor.set_rule_enabled("r1", false));
    processor.submit(Event::risk_changed(json!({})), None);
    assert!(!processor.process_all().await[0].suppressed);

    assert!(processor.remove_rule("r1"));
    assert!(!processor.remove_rule("r1"));
    assert!(!processor.set_rule_enabled("r1", true));
}

#[tokio::test]
async fn test_reset_stats() {
    let processor = manual();
    processor.submit(Event::risk_changed(json!({})), None);
    processor.process_all().await;
    assert_eq!(processor.stats().events_processed, 1);
    assert!(processor.stats().last_processed_at.is_some());

    processor.reset_stats();
    let stats = processor.stats();
    assert_eq!(stats.events_processed, 0);
    assert_eq!(stats.average_processing_time, Duration::ZERO);
    assert!(stats.last_processed_at.is_none());
}

#[tokio::test]
#[traced_test]
async fn test_handler_failure_is_logged() {
    let processor = processor(ProcessorConfig {
        max_retries: 0,
        ..Default::default()
    });
    processor.register_handler(HandlerRegistration::new("broken", failing("quota exceeded")));

    processor.submit(Event::risk_changed(json!({})), None);
    processor.process_all().await;

    assert!(logs_contain("Handler failed"));
    assert!(logs_contain("quota exceeded"));
    assert!(logs_contain("Retry budget exhausted"));
}

#[tokio::test]
async fn test_zero_tick_interval_is_rejected() {
    let config = ProcessorConfig {
        tick_interval: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(EventProcessor::new(config.clone()), Err(Error::Config(_))));

    let auto = ProcessorConfig {
        auto_process: true,
        ..config
    };
    assert!(matches!(EventProcessor::new(auto), Err(Error::Config(_))));
}
