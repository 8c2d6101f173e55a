use async_trait::async_trait;

use crate::db::Database;
use crate::error::RepoError;
use crate::users::repo_types::User;

/// Typed access to the `users` table.
///
/// Point lookups report a missing row as [`RepoError::NotFound`]; writes that
/// trip a unique constraint report [`RepoError::Conflict`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, username: &str, email: &str, password_hash: &str)
        -> Result<User, RepoError>;
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<User, RepoError>;
    async fn find_by_username(&self, username: &str) -> Result<User, RepoError>;
    /// All users, newest first.
    async fn list(&self) -> Result<Vec<User>, RepoError>;
    async fn update_profile(&self, id: i64, username: &str, email: &str)
        -> Result<User, RepoError>;
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), RepoError>;
    async fn delete(&self, id: i64) -> Result<(), RepoError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: Database,
}

impl PgUserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, RepoError> {
        let mut conn = self.db.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *conn)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
        let mut conn = self.db.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        user.ok_or(RepoError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<User, RepoError> {
        let mut conn = self.db.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
        user.ok_or(RepoError::NotFound)
    }

    async fn find_by_username(&self, username: &str) -> Result<User, RepoError> {
        let mut conn = self.db.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
        user.ok_or(RepoError::NotFound)
    }

    async fn list(&self) -> Result<Vec<User>, RepoError> {
        let mut conn = self.db.acquire().await?;
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(users)
    }

    async fn update_profile(
        &self,
        id: i64,
        username: &str,
        email: &str,
    ) -> Result<User, RepoError> {
        let mut conn = self.db.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET username = $1, email = $2, updated_at = clock_timestamp()
             WHERE id = $3
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        user.ok_or(RepoError::NotFound)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), RepoError> {
        let mut conn = self.db.acquire().await?;
        let result = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $1, updated_at = clock_timestamp()
             WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        let mut conn = self.db.acquire().await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

/// In-memory stand-in used by handler tests. Enforces the same uniqueness
/// rules as the table constraints.
#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;
    use crate::error::UniqueField;

    #[derive(Default)]
    pub struct InMemoryUsers {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        next_id: i64,
        rows: Vec<User>,
    }

    impl Inner {
        fn collision(&self, id: Option<i64>, username: &str, email: &str) -> Option<UniqueField> {
            let others = self.rows.iter().filter(|u| Some(u.id) != id);
            for u in others {
                if u.username == username {
                    return Some(UniqueField::Username);
                }
                if u.email == email {
                    return Some(UniqueField::Email);
                }
            }
            None
        }
    }

    impl InMemoryUsers {
        pub fn len(&self) -> usize {
            self.inner.lock().unwrap().rows.len()
        }

        /// Inserts a row bypassing any handler pre-checks.
        pub fn seed(&self, username: &str, email: &str) -> User {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: inner.next_id,
                username: username.into(),
                email: email.into(),
                password_hash: "seeded".into(),
                created_at: now,
                updated_at: now,
            };
            inner.rows.push(user.clone());
            user
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUsers {
        async fn create(
            &self,
            username: &str,
            email: &str,
            password_hash: &str,
        ) -> Result<User, RepoError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(field) = inner.collision(None, username, email) {
                return Err(RepoError::Conflict(field));
            }
            inner.next_id += 1;
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: inner.next_id,
                username: username.into(),
                email: email.into(),
                password_hash: password_hash.into(),
                created_at: now,
                updated_at: now,
            };
            inner.rows.push(user.clone());
            Ok(user)
        }

        async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
            let inner = self.inner.lock().unwrap();
            inner.rows.iter().find(|u| u.id == id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_by_email(&self, email: &str) -> Result<User, RepoError> {
            let inner = self.inner.lock().unwrap();
            inner.rows.iter().find(|u| u.email == email).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_by_username(&self, username: &str) -> Result<User, RepoError> {
            let inner = self.inner.lock().unwrap();
            inner
                .rows
                .iter()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn list(&self) -> Result<Vec<User>, RepoError> {
            let inner = self.inner.lock().unwrap();
            let mut users = inner.rows.clone();
            users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(users)
        }

        async fn update_profile(
            &self,
            id: i64,
            username: &str,
            email: &str,
        ) -> Result<User, RepoError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(field) = inner.collision(Some(id), username, email) {
                return Err(RepoError::Conflict(field));
            }
            let user = inner.rows.iter_mut().find(|u| u.id == id).ok_or(RepoError::NotFound)?;
            user.username = username.into();
            user.email = email.into();
            user.updated_at = OffsetDateTime::now_utc();
            Ok(user.clone())
        }

        async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), RepoError> {
            let mut inner = self.inner.lock().unwrap();
            let user = inner.rows.iter_mut().find(|u| u.id == id).ok_or(RepoError::NotFound)?;
            user.password_hash = password_hash.into();
            user.updated_at = OffsetDateTime::now_utc();
            Ok(())
        }

        async fn delete(&self, id: i64) -> Result<(), RepoError> {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.rows.len();
            inner.rows.retain(|u| u.id != id);
            if inner.rows.len() == before {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }
}
