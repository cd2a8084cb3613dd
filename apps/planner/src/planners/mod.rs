pub mod store;
pub mod types;

pub use store::{PlannerStore, PlannerStoreError};
pub use types::{PlanSections, PlannerRecord};
