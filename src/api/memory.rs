//! Memory CRUD handlers — the manual-entry and user-edit path.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::MemoirError;
use crate::store::{Memory, MemoryInput, MemoryKind};
use crate::{dedup, store_call, AppState};

pub(super) async fn create_memory(
    State(state): State<AppState>,
    Json(input): Json<MemoryInput>,
) -> Result<(StatusCode, Json<Memory>), MemoirError> {
    // Manual entries go through the semantic near-duplicate path unless the
    // caller opts out; pipeline memories never arrive here.
    let mem = store_call(&state.store, move |s| dedup::insert_manual(s, input)).await??;
    Ok((StatusCode::CREATED, Json(mem)))
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    owner: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub(super) async fn list_memories(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Memory>>, MemoirError> {
    let limit = q.limit.unwrap_or(50).min(500);
    let offset = q.offset.unwrap_or(0);
    let mems = store_call(&state.store, move |s| {
        s.list_memories(q.owner.as_deref(), limit, offset)
    })
    .await??;
    Ok(Json(mems))
}

pub(super) async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Memory>, MemoirError> {
    let mem = store_call(&state.store, move |s| s.get_memory(&id)).await??;
    mem.ok_or(MemoirError::NotFound).map(Json)
}

#[derive(Deserialize)]
pub(super) struct UpdateBody {
    content: Option<String>,
    kind: Option<String>,
    importance: Option<i64>,
}

pub(super) async fn update_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Memory>, MemoirError> {
    let kind = body.kind.as_deref().map(str::parse::<MemoryKind>).transpose()?;
    let mem = store_call(&state.store, move |s| {
        s.update_memory(&id, body.content.as_deref(), kind, body.importance)
    })
    .await??;
    mem.ok_or(MemoirError::NotFound).map(Json)
}

pub(super) async fn delete_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, MemoirError> {
    let deleted = store_call(&state.store, move |s| s.delete_memory(&id)).await??;
    if !deleted {
        return Err(MemoirError::NotFound);
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
