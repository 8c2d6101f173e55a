use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    error::{ApiError, ApiResult, RepoError, UniqueField},
    state::AppState,
    users::{
        dto::{
            CreateUserRequest, MessageResponse, UpdatePasswordRequest, UpdateUserRequest,
            UserMessageResponse, UserResponse, UsersResponse,
        },
        password::hash_password,
        repo_types::User,
        services::{check_password, normalize_email, normalize_username, parse_user_id},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/", get(list_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/users/:id/password", patch(update_password))
}

/// Which operation hit a uniqueness conflict; the wording differs.
#[derive(Clone, Copy)]
enum Op {
    Create,
    Update,
}

fn conflict(op: Op, field: UniqueField) -> ApiError {
    let msg = match (op, field) {
        (Op::Create, UniqueField::Email) => "User with this email already exists",
        (Op::Create, UniqueField::Username) => "User with this username already exists",
        (Op::Update, UniqueField::Email) => "Email already taken by another user",
        (Op::Update, UniqueField::Username) => "Username already taken by another user",
    };
    ApiError::Conflict(msg)
}

fn internal(context: &str, e: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(format!("{context}: {e}"))
}

/// Returns the owner of a unique key, or `None` when nobody holds it.
fn owner(found: Result<User, RepoError>) -> ApiResult<Option<User>> {
    match found {
        Ok(user) => Ok(Some(user)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => {
            error!(error = %e, "uniqueness lookup failed");
            Err(internal("Failed to check uniqueness", e))
        }
    }
}

/// Loads a user by id, mapping absence to 404.
async fn load(state: &AppState, id: i64) -> ApiResult<User> {
    match state.users.find_by_id(id).await {
        Ok(user) => Ok(user),
        Err(RepoError::NotFound) => {
            warn!(user_id = id, "user not found");
            Err(ApiError::NotFound)
        }
        Err(e) => {
            error!(error = %e, user_id = id, "find_by_id failed");
            Err(internal("Failed to get user", e))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserMessageResponse>)> {
    let Json(payload) = payload.inspect_err(|e| warn!(error = %e, "rejected create body"))?;

    let username = normalize_username(&payload.username)?;
    let email = normalize_email(&payload.email)?;
    check_password(&payload.password)?;

    // Friendly pre-checks; the unique constraints still decide races below.
    if owner(state.users.find_by_email(&email).await)?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(conflict(Op::Create, UniqueField::Email));
    }
    if owner(state.users.find_by_username(&username).await)?.is_some() {
        warn!(username = %username, "username already registered");
        return Err(conflict(Op::Create, UniqueField::Username));
    }

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        internal("Failed to create user", e)
    })?;

    let user = match state.users.create(&username, &email, &hash).await {
        Ok(u) => u,
        Err(RepoError::Conflict(field)) => {
            warn!(?field, "create lost a uniqueness race");
            return Err(conflict(Op::Create, field));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(internal("Failed to create user", e));
        }
    };

    info!(user_id = user.id, username = %user.username, "user created");
    Ok((
        StatusCode::CREATED,
        Json(UserMessageResponse {
            message: "User created successfully",
            user,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let id = parse_user_id(&id)?;
    let user = load(&state, id).await?;
    Ok(Json(UserResponse { user }))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UsersResponse>> {
    let users = state.users.list().await.map_err(|e| {
        error!(error = %e, "list users failed");
        internal("Failed to get users", e)
    })?;
    Ok(Json(UsersResponse { users }))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserMessageResponse>> {
    let id = parse_user_id(&id)?;
    let Json(payload) = payload.inspect_err(|e| warn!(error = %e, "rejected update body"))?;
    let username = normalize_username(&payload.username)?;
    let email = normalize_email(&payload.email)?;

    let existing = load(&state, id).await?;

    if email != existing.email {
        if let Some(other) = owner(state.users.find_by_email(&email).await)? {
            if other.id != id {
                warn!(user_id = id, other_id = other.id, "email taken");
                return Err(conflict(Op::Update, UniqueField::Email));
            }
        }
    }
    if username != existing.username {
        if let Some(other) = owner(state.users.find_by_username(&username).await)? {
            if other.id != id {
                warn!(user_id = id, other_id = other.id, "username taken");
                return Err(conflict(Op::Update, UniqueField::Username));
            }
        }
    }

    let user = match state.users.update_profile(id, &username, &email).await {
        Ok(u) => u,
        // deleted between the load and the update
        Err(RepoError::NotFound) => return Err(ApiError::NotFound),
        Err(RepoError::Conflict(field)) => {
            warn!(user_id = id, ?field, "update lost a uniqueness race");
            return Err(conflict(Op::Update, field));
        }
        Err(e) => {
            error!(error = %e, user_id = id, "update user failed");
            return Err(internal("Failed to update user", e));
        }
    };

    info!(user_id = id, "user updated");
    Ok(Json(UserMessageResponse {
        message: "User updated successfully",
        user,
    }))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = parse_user_id(&id)?;
    let Json(payload) = payload.inspect_err(|e| warn!(error = %e, "rejected password body"))?;
    check_password(&payload.password)?;

    load(&state, id).await?;

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        internal("Failed to update password", e)
    })?;

    match state.users.update_password(id, &hash).await {
        Ok(()) => {}
        Err(RepoError::NotFound) => return Err(ApiError::NotFound),
        Err(e) => {
            error!(error = %e, user_id = id, "update password failed");
            return Err(internal("Failed to update password", e));
        }
    }

    info!(user_id = id, "password updated");
    Ok(Json(MessageResponse {
        message: "Password updated successfully",
    }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let id = parse_user_id(&id)?;

    match state.users.delete(id).await {
        Ok(()) => {}
        Err(RepoError::NotFound) => {
            warn!(user_id = id, "delete matched no rows");
            return Err(ApiError::NotFound);
        }
        Err(e) => {
            error!(error = %e, user_id = id, "delete user failed");
            return Err(internal("Failed to delete user", e));
        }
    }

    info!(user_id = id, "user deleted");
    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}
