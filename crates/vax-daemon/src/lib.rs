//! Library surface of vax-daemon, exposed so scenario tests under `tests/`
//! can compose the router against an in-memory store.

pub mod api_types;
pub mod routes;
pub mod state;
