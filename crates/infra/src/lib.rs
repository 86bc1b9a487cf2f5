//! Infrastructure layer: event storage, projections, read-model storage and
//! the storefront catalog backends.

mod blocking;
pub mod catalog;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
