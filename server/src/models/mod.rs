pub mod purchase;
pub mod ticket_type;

pub use purchase::{NewPurchase, Purchase, PurchaseFilter, PurchaseRequest};
pub use ticket_type::TicketType;
