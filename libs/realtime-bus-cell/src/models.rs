use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::BusError;

/// Subscription scope. Dashboards subscribe to the narrowest topic they render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every appointment scheduled on the given day.
    DailyQueue(NaiveDate),
    /// Appointments assigned to one clinician.
    ClinicianQueue(Uuid),
    /// A single appointment and everything attached to it.
    Appointment(Uuid),
}

impl Topic {
    /// Id used for `Resync` notifications on this topic.
    pub fn scope_id(&self) -> Uuid {
        match self {
            Topic::DailyQueue(_) => Uuid::nil(),
            Topic::ClinicianQueue(id) | Topic::Appointment(id) => *id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::DailyQueue(date) => write!(f, "day:{}", date),
            Topic::ClinicianQueue(id) => write!(f, "clinician:{}", id),
            Topic::Appointment(id) => write!(f, "appointment:{}", id),
        }
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || BusError::InvalidTopic(raw.to_string());
        let (kind, key) = raw.split_once(':').ok_or_else(invalid)?;

        match kind {
            "day" => NaiveDate::parse_from_str(key, "%Y-%m-%d")
                .map(Topic::DailyQueue)
                .map_err(|_| invalid()),
            "clinician" => Uuid::parse_str(key)
                .map(Topic::ClinicianQueue)
                .map_err(|_| invalid()),
            "appointment" => Uuid::parse_str(key)
                .map(Topic::Appointment)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Appointment,
    ServiceRequest,
    Invoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    LedgerChanged,
    AccessGranted,
    ServiceRequested,
    ServiceFulfilled,
    ServiceRejected,
    Archived,
    /// Notifications were dropped for this subscriber; re-fetch everything.
    Resync,
}

/// What changed, without the new state. Consumers re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub change_kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(entity_id: Uuid, entity_kind: EntityKind, change_kind: ChangeKind) -> Self {
        Self {
            entity_id,
            entity_kind,
            change_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub change_kind: ChangeKind,
    pub topic: Topic,
    pub emitted_at: DateTime<Utc>,
    /// Bus instance that produced the notification.
    pub origin: Uuid,
}

impl ChangeNotification {
    pub fn new(topic: Topic, event: ChangeEvent, origin: Uuid) -> Self {
        Self {
            entity_id: event.entity_id,
            entity_kind: event.entity_kind,
            change_kind: event.change_kind,
            topic,
            emitted_at: Utc::now(),
            origin,
        }
    }

    pub fn resync(topic: Topic, origin: Uuid) -> Self {
        Self::new(
            topic,
            ChangeEvent::new(topic.scope_id(), EntityKind::Appointment, ChangeKind::Resync),
            origin,
        )
    }

    pub fn event(&self) -> ChangeEvent {
        ChangeEvent::new(self.entity_id, self.entity_kind, self.change_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn topic_string_form_roundtrips() {
        let id = Uuid::new_v4();
        let topics = [
            Topic::DailyQueue(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()),
            Topic::ClinicianQueue(id),
            Topic::Appointment(id),
        ];

        for topic in topics {
            let parsed: Topic = topic.to_string().parse().unwrap();
            assert_eq!(parsed, topic);
        }
        assert_eq!(topics[0].to_string(), "day:2024-03-05");
    }

    #[test]
    fn malformed_topics_rejected() {
        assert_matches!("day:yesterday".parse::<Topic>(), Err(BusError::InvalidTopic(_)));
        assert_matches!("clinician".parse::<Topic>(), Err(BusError::InvalidTopic(_)));
        assert_matches!("ward:3".parse::<Topic>(), Err(BusError::InvalidTopic(_)));
    }

    #[test]
    fn notification_wire_format_is_camel_case() {
        let id = Uuid::new_v4();
        let notification = ChangeNotification::new(
            Topic::Appointment(id),
            ChangeEvent::new(id, EntityKind::Invoice, ChangeKind::LedgerChanged),
            Uuid::nil(),
        );

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["entityKind"], "invoice");
        assert_eq!(json["changeKind"], "ledger_changed");
        assert_eq!(json["topic"], format!("appointment:{}", id));
    }
}
