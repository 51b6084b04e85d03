//! Beacon HTTP API
//!
//! Exposes the raw data export as a streamed download whose completeness
//! is reported in the `X-Response-Complete` trailer, and CRUD for
//! notification routes. Requests authenticate with an HS256 bearer token
//! carrying the caller's `org_id`.
//!
//! Over HTTP/1.1 the trailer is only written when the request carries
//! `TE: trailers`; without it the body still ends with the final chunk but
//! no completeness signal follows. Clients that need to tell a complete
//! export from a truncated one must send that header (`curl` needs
//! `-H 'TE: trailers' --raw`).

pub mod auth;
pub mod error;
pub mod export;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthUser, Claims, JwtAuth};
pub use error::{ApiError, ErrorResponse};
pub use server::{router, serve};
pub use state::AppState;
