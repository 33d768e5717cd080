pub mod collaborators;
pub mod front_desk;
pub mod gate;
pub mod ledger;
pub mod lifecycle;
pub mod notifier;
pub mod override_authority;
pub mod projector;
pub mod service_requests;
pub mod store;

pub use collaborators::{ClinicalRecords, PatientAccounts, ServiceCatalog, SupabaseCollaborators};
pub use front_desk::{FrontDeskDeps, FrontDeskService};
pub use gate::{AccessGateService, AccessStatus, GateDecision, UnlockBasis};
pub use ledger::LedgerAccumulator;
pub use lifecycle::VisitLifecycle;
pub use override_authority::{OverrideAuthority, OverrideOutcome};
pub use projector::{QueueRole, QueueView};
pub use service_requests::ServiceRequestChannel;
pub use store::{InMemoryLedgerStore, LedgerSnapshot, LedgerStore, StoreError};
