//! Library surface of the NameGnome server: router construction and shared
//! state, split out so integration tests can drive the router directly.

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;
