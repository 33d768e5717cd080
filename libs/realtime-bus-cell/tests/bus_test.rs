use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use uuid::Uuid;

use realtime_bus_cell::{BusError, ChangeEvent, ChangeKind, EntityKind, EventBus, EventPublisher, Topic};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
}

#[tokio::test]
async fn publish_all_reaches_each_scope_once() {
    let bus = EventBus::open(32);
    let appointment = Uuid::new_v4();
    let clinician = Uuid::new_v4();
    let topics = [
        Topic::DailyQueue(today()),
        Topic::ClinicianQueue(clinician),
        Topic::Appointment(appointment),
    ];

    let mut cashier_dashboard = bus.subscribe(topics[0]).await.unwrap();
    let mut clinician_dashboard = bus.subscribe(topics[1]).await.unwrap();
    let mut unrelated = bus.subscribe(Topic::ClinicianQueue(Uuid::new_v4())).await.unwrap();

    let event = ChangeEvent::new(appointment, EntityKind::Invoice, ChangeKind::Created);
    let delivered = bus.publish_all(&topics, event).await.unwrap();
    assert_eq!(delivered, 2);

    let seen = cashier_dashboard.recv().await.unwrap();
    assert_eq!(seen.event(), event);
    assert_eq!(seen.topic, topics[0]);
    assert_eq!(clinician_dashboard.recv().await.unwrap().event(), event);

    let nothing = tokio::time::timeout(Duration::from_millis(50), unrelated.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn dropped_subscription_releases_topic() {
    let bus = EventBus::open(8);
    let topic = Topic::Appointment(Uuid::new_v4());

    {
        let _dashboard = bus.subscribe(topic).await.unwrap();
        assert_eq!(bus.subscriber_count(topic).await, 1);
    }

    // Release runs on a spawned task
    for _ in 0..20 {
        if bus.active_topics().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(bus.active_topics().await.is_empty());
    assert_eq!(bus.subscriber_count(topic).await, 0);
}

#[tokio::test]
async fn notifications_serialize_as_change_hints() {
    let bus = EventBus::open(8);
    let appointment = Uuid::new_v4();
    let topic = Topic::Appointment(appointment);
    let mut sub = bus.subscribe(topic).await.unwrap();

    bus.publish(topic, ChangeEvent::new(appointment, EntityKind::Appointment, ChangeKind::AccessGranted))
        .await
        .unwrap();

    let json = serde_json::to_value(sub.recv().await.unwrap().event()).unwrap();
    assert_eq!(json["entityId"], appointment.to_string());
    assert_eq!(json["entityKind"], "appointment");
    assert_eq!(json["changeKind"], "access_granted");
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let bus = EventBus::open(8);
    bus.close().await;
    bus.close().await;

    assert!(!bus.is_open());
    assert_matches!(bus.subscribe(Topic::DailyQueue(today())).await, Err(BusError::Closed));
}
