use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use tokio::task::block_in_place;
use uuid::Uuid;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::metrics;

/// 上传并入库图片
#[utoipa::path(
    post,
    path = "/index",
    request_body(content = IndexForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = IndexResponse),
    )
)]
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<IndexRequest>,
) -> Result<Json<IndexResponse>> {
    check_token(&state, &token)?;

    let mut tmp_paths = Vec::new();
    for file in &data.file {
        let path = save_upload(&state.tmp_dir, file.metadata.file_name.as_deref(), &file.contents)?;
        tmp_paths.push(path);
    }

    info!("正在入库 {} 张上传图片", tmp_paths.len());
    let report = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.add_images(&tmp_paths, |_, _, _| {}))
    };
    remove_uploads(&tmp_paths);
    let report = report?;

    let (success, message) = if report.processed == 0 && report.errors.is_empty() {
        (false, "未检测到有效人脸或文件已存在索引中".to_string())
    } else if report.processed > 0 {
        (true, "已入库".to_string())
    } else {
        (true, "处理完成".to_string())
    };
    Ok(Json(IndexResponse {
        success,
        processed_images: report.processed,
        total_faces: report.faces,
        errors: report.errors,
        message,
    }))
}

/// 上传图片并按人脸相似度搜索
#[utoipa::path(
    post,
    path = "/query",
    request_body(content = QueryForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = QueryResponse),
    )
)]
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let top_k = data.top_k.unwrap_or(state.search.count);
    let max_distance = data.max_distance.unwrap_or(state.search.max_distance);

    let path = save_upload(&state.tmp_dir, data.file.metadata.file_name.as_deref(), &data.file.contents)?;

    info!("正在搜索上传图片");
    let start = Instant::now();
    let result = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.search(&path, top_k, max_distance))
    };
    remove_uploads(std::slice::from_ref(&path));
    let ranked = result?;

    Ok(Json(QueryResponse {
        success: true,
        matches: ranked
            .into_iter()
            .map(|(path, distance)| QueryMatch { image_path: path, distance })
            .collect(),
        time: start.elapsed().as_millis() as u64,
    }))
}

/// 获取数据库统计信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>> {
    let stats = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.stats())
    }?;
    Ok(Json(StatsResponse {
        total_faces: stats.faces,
        total_images: stats.images,
        total_indexed_files: stats.ledger_size,
    }))
}

/// 清空整个数据库
#[utoipa::path(
    post,
    path = "/reset",
    request_body = ResetRequest,
    responses(
        (status = 200, body = MaintenanceResponse),
    )
)]
pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(req): Json<ResetRequest>,
) -> Result<Json<MaintenanceResponse>> {
    check_token(&state, &token)?;

    if !req.confirm {
        return Ok(Json(MaintenanceResponse {
            success: false,
            message: "请显式确认 confirm=true 以执行清空操作".to_string(),
            deleted: None,
            errors: Vec::new(),
        }));
    }

    let result = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.clear())
    };
    let response = match result {
        Ok(()) => MaintenanceResponse {
            success: true,
            message: "人脸数据库已清空".to_string(),
            deleted: None,
            errors: Vec::new(),
        },
        Err(err) => MaintenanceResponse {
            success: false,
            message: format!("清空数据库失败: {err}"),
            deleted: None,
            errors: Vec::new(),
        },
    };
    Ok(Json(response))
}

/// 删除指定图片的人脸记录
#[utoipa::path(
    post,
    path = "/delete-images",
    request_body = DeleteImagesRequest,
    responses(
        (status = 200, body = MaintenanceResponse),
    )
)]
pub async fn delete_images_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(req): Json<DeleteImagesRequest>,
) -> Result<Json<MaintenanceResponse>> {
    check_token(&state, &token)?;

    let paths: Vec<PathBuf> = req.image_paths.iter().map(PathBuf::from).collect();
    let report = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.delete_images(&paths))
    };

    let mut errors = report.errors;
    errors.extend(report.unremoved_files.into_iter().map(|path| format!("文件未能移除: {path}")));
    Ok(Json(MaintenanceResponse {
        success: true,
        message: "删除完成".to_string(),
        deleted: Some(report.deleted),
        errors,
    }))
}

/// 清理孤儿记录
#[utoipa::path(
    post,
    path = "/cleanup-orphans",
    responses(
        (status = 200, body = MaintenanceResponse),
    )
)]
pub async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<MaintenanceResponse>> {
    check_token(&state, &token)?;

    let (deleted, errors) = {
        let mut db = state.db.lock().expect("db 互斥锁中毒");
        block_in_place(|| db.cleanup_orphans())
    };
    Ok(Json(MaintenanceResponse {
        success: true,
        message: "孤儿记录清理完成".to_string(),
        deleted: Some(deleted),
        errors,
    }))
}

/// 导出 prometheus 指标
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(AppError::unauthorized());
    }
    Ok(())
}

/// 将上传内容写入临时文件，保留原始扩展名以便校验
fn save_upload(tmp_dir: &Path, file_name: Option<&str>, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(tmp_dir)?;
    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    let path = tmp_dir.join(format!("{}.{ext}", Uuid::new_v4().simple()));
    fs::write(&path, bytes)?;
    Ok(path)
}

/// 无论处理成败都移除临时文件
fn remove_uploads(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!("删除临时文件失败 {}: {err}", path.display());
        }
    }
}
