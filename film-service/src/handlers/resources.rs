use crate::dtos::ResourceQuery;
use crate::models::ResourceKind;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use service_core::error::AppError;

/// `GET /film/:film/export/:export?authorisation=<token>&download`
#[tracing::instrument(skip(state, params), fields(kind = "export"))]
pub async fn get_export(
    State(state): State<AppState>,
    Path((film, export)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let request = ResourceQuery::from_pairs(params).into_request(export);
    state
        .dispatcher
        .serve(ResourceKind::Export, &request)
        .await
}

/// `GET /film/:film/thumbnail/:thumbnail?download`
#[tracing::instrument(skip(state, params), fields(kind = "thumbnail"))]
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path((film, thumbnail)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let request = ResourceQuery::from_pairs(params).into_request(thumbnail);
    state
        .dispatcher
        .serve(ResourceKind::Thumbnail, &request)
        .await
}
