use tracing::warn;
use uuid::Uuid;

use realtime_bus_cell::{ChangeEvent, ChangeKind, EntityKind, EventPublisher};

use crate::models::Appointment;

/// Fire-and-forget fan-out of a change on every topic the appointment is
/// visible on. A bus failure never fails the mutation that caused it.
pub async fn notify(
    publisher: &dyn EventPublisher,
    appointment: &Appointment,
    entity_id: Uuid,
    entity_kind: EntityKind,
    change_kind: ChangeKind,
) {
    let event = ChangeEvent::new(entity_id, entity_kind, change_kind);
    if let Err(e) = publisher.publish_all(&appointment.topics(), event).await {
        warn!(
            "Dropped {:?} notification for appointment {}: {}",
            change_kind, appointment.id, e
        );
    }
}
