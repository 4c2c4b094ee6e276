//! Ticket-sales backend.
//!
//! The interesting part is [`purchases::PurchaseService::purchase`]: it locks
//! a ticket type's row in the [`ledger`], checks remaining capacity, charges
//! `price × quantity` and records the purchase in one transaction, so
//! concurrent buyers can never oversell a ticket type.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod purchases;
pub mod routes;
pub mod utils;
