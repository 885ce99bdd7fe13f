//! Password reset by e-mailed, single-use, time-limited token.
//!
//! Request issues a token (revoking any older open one for the same user),
//! validate reports whether a token is still usable, confirm spends it and
//! sets the new password in the same transaction.

mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod token;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
