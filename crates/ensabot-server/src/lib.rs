//! ENSA Bot server: HTTP routes, shared state and index lifecycle.

pub mod indexing;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
