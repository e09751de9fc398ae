//! Route handlers. Thin: parse, call [`AccountService`], wrap the result.

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::response::ApiResponse;
use super::server::AppState;
use crate::accounts::{ListQuery, Listing, PrincipalId, Profile, ProfileUpdate};
use crate::security::AuthContext;
use crate::session::CredentialPair;

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Raw listing parameters. Parsed leniently by [`ListQuery::from_params`].
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub your_id: PrincipalId,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Profile> {
    let req = body(payload)?;
    let profile = state
        .accounts
        .register(&req.email, &req.password, &req.full_name)
        .await?;
    Ok(ApiResponse::created("registration successful", profile))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<CredentialPair> {
    let req = body(payload)?;
    let pair = state.accounts.login(&req.email, &req.password).await?;
    Ok(ApiResponse::ok("login successful", pair))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<CredentialPair> {
    let req = body(payload)?;
    let pair = state.accounts.refresh(&req.refresh_token).await?;
    Ok(ApiResponse::ok("token refreshed", pair))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<()> {
    state.accounts.logout(ctx.principal_id).await?;
    Ok(ApiResponse::message("logged out from all devices"))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = body(payload)?;
    state.accounts.forgot_password(&req.email).await?;
    Ok(ApiResponse::message(
        "if the email is registered, a reset code has been sent",
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = body(payload)?;
    state
        .accounts
        .reset_password(&req.email, &req.otp, &req.new_password)
        .await?;
    Ok(ApiResponse::message("password has been reset"))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Profile> {
    let profile = state.accounts.profile(ctx.principal_id).await?;
    Ok(ApiResponse::ok("ok", profile))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<Profile> {
    let update = body(payload)?;
    let profile = state
        .accounts
        .update_profile(ctx.principal_id, update)
        .await?;
    Ok(ApiResponse::ok("profile updated", profile))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = body(payload)?;
    state
        .accounts
        .change_password(ctx.principal_id, &req.old_password, &req.new_password)
        .await?;
    Ok(ApiResponse::message("password changed"))
}

fn user_id(id: Result<Path<PrincipalId>, PathRejection>) -> Result<PrincipalId, ApiError> {
    id.map(|Path(id)| id)
        .map_err(|_| ApiError::BadRequest("invalid user id".into()))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Listing<Profile>> {
    let query = ListQuery::from_params(
        params.page.as_deref(),
        params.limit.as_deref(),
        params.sort.as_deref(),
        params.keyword.as_deref(),
    );
    let listing = state.accounts.list_users(&query).await?;
    Ok(ApiResponse::ok("ok", listing))
}

pub async fn get_user(
    State(state): State<AppState>,
    id: Result<Path<PrincipalId>, PathRejection>,
) -> ApiResult<Profile> {
    let profile = state.accounts.profile(user_id(id)?).await?;
    Ok(ApiResponse::ok("ok", profile))
}

/// `PUT /users/{id}` and `PUT /users/{id}/role`: assign a role.
pub async fn set_role(
    State(state): State<AppState>,
    id: Result<Path<PrincipalId>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> ApiResult<Profile> {
    let id = user_id(id)?;
    let req = body(payload)?;
    let profile = state.accounts.set_role(id, &req.role).await?;
    Ok(ApiResponse::ok("role updated", profile))
}

pub async fn delete_user(
    State(state): State<AppState>,
    id: Result<Path<PrincipalId>, PathRejection>,
) -> ApiResult<()> {
    state.accounts.delete_user(user_id(id)?).await?;
    Ok(ApiResponse::message("user deleted"))
}

pub async fn purge_user(
    State(state): State<AppState>,
    id: Result<Path<PrincipalId>, PathRejection>,
) -> ApiResult<()> {
    state.accounts.purge_user(user_id(id)?).await?;
    Ok(ApiResponse::message("user permanently deleted"))
}

pub async fn dashboard(Extension(ctx): Extension<AuthContext>) -> ApiResponse<Dashboard> {
    ApiResponse::ok(
        "welcome, admin",
        Dashboard {
            your_id: ctx.principal_id,
        },
    )
}

pub async fn health() -> ApiResponse<()> {
    ApiResponse::message("ok")
}
