//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

pub use response::ApiResponse;
pub use routes::create_router;
pub use state::AppState;
