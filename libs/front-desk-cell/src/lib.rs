pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use models::*;
pub use router::front_desk_routes;
pub use handlers::FrontDeskState;
pub use services::front_desk::{FrontDeskDeps, FrontDeskService};
