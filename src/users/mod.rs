use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
mod password;
pub mod repo;
pub mod repo_types;
mod services;

pub use repo::{PgUserRepository, UserRepository};

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
