//! End-to-end tests: bus → consumer → applier → repository → hub → viewer.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use flightfeed_core::environment::Clock;
use flightfeed_core::event::SerializedEvent;
use flightfeed_core::event_bus::EventBus;
use flightfeed_core::repository::FlightRepository;
use flightfeed_core::{EventType, FLIGHT_EVENTS_TOPIC, FlightEvent, FlightStatus};
use flightfeed_runtime::{
    ConsumerHandle, EventApplier, EventConsumer, EventGenerator, GeneratorLoop, SubscriberHub,
};
use flightfeed_testing::{InMemoryEventBus, InMemoryFlightRepository, fixtures, test_clock};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    bus: Arc<InMemoryEventBus>,
    repository: Arc<InMemoryFlightRepository>,
    hub: Arc<SubscriberHub>,
    consumer: ConsumerHandle,
}

async fn pipeline(bus: InMemoryEventBus, flights: Vec<flightfeed_core::Flight>) -> Pipeline {
    let bus = Arc::new(bus);
    let repository = Arc::new(InMemoryFlightRepository::with_flights(flights));
    let hub = Arc::new(SubscriberHub::new());
    let applier = Arc::new(EventApplier::new(
        repository.clone(),
        Arc::clone(&hub),
        Arc::new(test_clock()),
    ));

    let consumer = EventConsumer::builder()
        .name("flight-event-applier")
        .topics(vec![FLIGHT_EVENTS_TOPIC.to_string()])
        .event_bus(bus.clone())
        .handler(applier)
        .workers(4)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
        .start();

    for _ in 0..200 {
        if bus.member_count(FLIGHT_EVENTS_TOPIC, "flight-event-applier") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Pipeline {
        bus,
        repository,
        hub,
        consumer,
    }
}

async fn publish(bus: &InMemoryEventBus, event: &FlightEvent) {
    let serialized = SerializedEvent::from_event(event).unwrap();
    bus.publish(FLIGHT_EVENTS_TOPIC, &event.flight_number, &serialized)
        .await
        .unwrap();
}

#[tokio::test]
async fn cancellation_for_boarding_flight_reaches_viewer() {
    let p = pipeline(
        InMemoryEventBus::new(),
        vec![fixtures::flight("FF101", FlightStatus::Boarding)],
    )
    .await;
    let mut viewer = p.hub.register();

    let event = fixtures::status_event(
        "FF101",
        EventType::Cancellation,
        FlightStatus::Boarding,
        FlightStatus::Cancelled,
        test_clock().now(),
    );
    publish(&p.bus, &event).await;

    let payload = tokio::time::timeout(Duration::from_secs(2), viewer.next())
        .await
        .expect("notification within timeout")
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&payload.data).unwrap();
    assert_eq!(payload.event_name, "flight-update");
    assert_eq!(json["eventType"], "CANCELLATION");
    assert_eq!(json["flightNumber"], "FF101");
    assert_eq!(
        p.repository.get("FF101").unwrap().status,
        FlightStatus::Cancelled
    );

    p.consumer.stop().await;
}

#[tokio::test]
async fn duplicate_delivery_applies_once() {
    let p = pipeline(
        InMemoryEventBus::new().with_duplicate_delivery(),
        vec![fixtures::flight("FF101", FlightStatus::Scheduled)],
    )
    .await;
    let mut viewer = p.hub.register();
    let now = test_clock().now();

    let delay = FlightEvent::new("FF101", EventType::Delay, now)
        .with_previous_value("0")
        .with_new_value("45");
    let gate = FlightEvent::new("FF101", EventType::GateChange, now)
        .with_previous_value("B12")
        .with_new_value("C7");
    let boarding = fixtures::status_event(
        "FF101",
        EventType::BoardingStarted,
        FlightStatus::Delayed,
        FlightStatus::Boarding,
        now,
    );
    for event in [&delay, &gate, &boarding] {
        publish(&p.bus, event).await;
    }

    let mut types = Vec::new();
    while types.len() < 3 {
        let payload = tokio::time::timeout(Duration::from_secs(2), viewer.next())
            .await
            .expect("notification within timeout")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload.data).unwrap();
        types.push(json["eventType"].as_str().unwrap().to_string());
    }
    p.consumer.stop().await;

    assert_eq!(types, ["DELAY", "GATE_CHANGE", "BOARDING_STARTED"]);
    assert!(viewer.try_recv().is_none());
    assert_eq!(p.repository.events().len(), 3);

    let flight = p.repository.get("FF101").unwrap();
    assert_eq!(flight.status, FlightStatus::Boarding);
    assert_eq!(flight.delay_minutes, 45);
    assert_eq!(flight.gate.as_deref(), Some("C7"));
}

#[tokio::test]
async fn events_for_unknown_flights_do_not_stall_others() {
    let p = pipeline(
        InMemoryEventBus::with_partitions(1),
        vec![fixtures::flight("FF101", FlightStatus::Boarding)],
    )
    .await;
    let mut viewer = p.hub.register();
    let now = test_clock().now();

    publish(&p.bus, &FlightEvent::new("XX999", EventType::Departed, now)).await;
    publish(&p.bus, &FlightEvent::new("FF101", EventType::Departed, now)).await;

    let payload = tokio::time::timeout(Duration::from_secs(2), viewer.next())
        .await
        .expect("notification within timeout")
        .unwrap();
    assert!(payload.data.contains("FF101"));
    p.consumer.stop().await;
}

#[tokio::test]
async fn generated_events_keep_flights_consistent() {
    let p = pipeline(InMemoryEventBus::new(), fixtures::roster()).await;
    let generator = Arc::new(EventGenerator::with_seed(
        p.repository.clone(),
        Arc::new(test_clock()),
        42,
    ));
    let generator_loop = GeneratorLoop::new(
        generator,
        p.bus.clone(),
        FLIGHT_EVENTS_TOPIC,
        Duration::from_millis(1),
    );

    for _ in 0..100 {
        generator_loop.tick().await.ok();
        // Let the consumer catch up so the next draw sees applied state.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    p.consumer.stop().await;

    let events = p.repository.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.flight_number != "FF106"));
    assert_eq!(
        p.repository.get("FF106").unwrap().status,
        FlightStatus::Arrived
    );
    for flight in p.repository.find_all().await.unwrap() {
        if flight.actual_arrival.is_some() {
            assert_eq!(flight.status, FlightStatus::Arrived);
        }
    }
}
