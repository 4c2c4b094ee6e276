pub mod error;
pub mod service;

pub use error::{PurchaseError, PurchaseResult};
pub use service::{PurchaseService, PurchaseSettings};
