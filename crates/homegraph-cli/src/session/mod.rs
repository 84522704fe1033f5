//! Session management for the graph snapshot.

pub mod manager;

pub use manager::GraphSession;
