//! Storefront order and payment service.
//!
//! Owns checkout (atomic stock reservation + order creation), payment intent
//! creation against an external gateway, and the reconciliation of payment
//! state from webhooks, client confirmations, and status polls.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod service;
pub mod store;

#[cfg(test)]
pub mod testutil;
