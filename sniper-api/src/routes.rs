use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use sniper_common::error::AppError;
use sniper_common::models::{
    ImportWalletRequest, OpenPositionRequest, Position, SellFractionRequest, StrategyMode,
};
use sniper_common::settings::StrategySettings;
use uuid::Uuid;

use crate::AppState;

fn parse_mode(raw: &str) -> Result<StrategyMode, AppError> {
    match raw {
        "primary" => Ok(StrategyMode::Primary),
        "bundle" => Ok(StrategyMode::Bundle),
        other => Err(AppError::BadRequest(format!("unknown mode: {}", other))),
    }
}

pub async fn generate_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let public_key = state.service.generate_wallet(&user_id).await?;
    Ok(Json(json!({ "success": true, "public_key": public_key })))
}

pub async fn import_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<ImportWalletRequest>,
) -> Result<Json<Value>, AppError> {
    let public_key = state
        .service
        .import_wallet(&user_id, request.key_material.as_bytes())
        .await?;
    Ok(Json(json!({ "success": true, "public_key": public_key })))
}

pub async fn export_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let key_material = state.service.export_wallet(&user_id).await?;
    Ok(Json(json!({ "success": true, "key_material": key_material })))
}

pub async fn get_open_positions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Position>>, AppError> {
    Ok(Json(state.service.get_open_positions(&user_id).await?))
}

pub async fn open_position(
    State(state): State<AppState>,
    Json(request): Json<OpenPositionRequest>,
) -> Result<Json<Position>, AppError> {
    let position = state
        .service
        .open_position(&request.user_id, &request.token_address, request.mode, "manual")
        .await?;
    Ok(Json(position))
}

pub async fn sell_fraction(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
    Json(request): Json<SellFractionRequest>,
) -> Result<Json<Position>, AppError> {
    let position = state
        .service
        .sell_fraction(position_id, request.percent)
        .await?;
    Ok(Json(position))
}

pub async fn close_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
) -> Result<Json<Position>, AppError> {
    Ok(Json(state.service.close_position(position_id).await?))
}

pub async fn force_close_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
) -> Result<Json<Position>, AppError> {
    Ok(Json(state.service.force_close(position_id).await?))
}

pub async fn get_settings(
    State(state): State<AppState>,
    Path((user_id, mode)): Path<(String, String)>,
) -> Result<Json<StrategySettings>, AppError> {
    let mode = parse_mode(&mode)?;
    Ok(Json(state.service.get_settings(&user_id, mode).await?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Path((user_id, mode)): Path<(String, String)>,
    Json(mut settings): Json<StrategySettings>,
) -> Result<Json<Value>, AppError> {
    settings.mode = parse_mode(&mode)?;
    settings.user_id = Some(user_id);
    state.service.update_settings(&settings).await?;
    Ok(Json(json!({ "success": true })))
}
