use std::sync::Arc;

use crate::db::{Database, HealthProbe};
use crate::users::{PgUserRepository, UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub health: Arc<dyn HealthProbe>,
}

impl AppState {
    /// Wires the Postgres-backed repository and health probe to one pool.
    pub fn new(db: Database) -> Self {
        let users = Arc::new(PgUserRepository::new(db.clone())) as Arc<dyn UserRepository>;
        let health = Arc::new(db) as Arc<dyn HealthProbe>;
        Self { users, health }
    }

    #[cfg(test)]
    pub fn from_parts(users: Arc<dyn UserRepository>, health: Arc<dyn HealthProbe>) -> Self {
        Self { users, health }
    }
}
