use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 入库请求参数
#[derive(TryFromMultipart)]
pub struct IndexRequest {
    pub file: Vec<FieldData<Bytes>>,
}

/// 入库表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct IndexForm {
    /// 上传的图片文件，可以是多张
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 入库响应
#[derive(Debug, Serialize, ToSchema)]
pub struct IndexResponse {
    pub success: bool,
    /// 成功入库的图片数量
    pub processed_images: usize,
    /// 新索引的人脸数量
    pub total_faces: usize,
    pub errors: Vec<String>,
    pub message: String,
}

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct QueryRequest {
    pub file: FieldData<Bytes>,
    pub top_k: Option<usize>,
    pub max_distance: Option<f32>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct QueryForm {
    /// 上传的查询图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的最大结果数量
    pub top_k: Option<usize>,
    /// 允许的最大余弦距离
    pub max_distance: Option<f32>,
}

/// 单条搜索命中
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryMatch {
    /// 存储目录内的图片路径
    pub image_path: String,
    /// 余弦距离，越小越相似
    pub distance: f32,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResponse {
    pub success: bool,
    pub matches: Vec<QueryMatch>,
    /// 搜索耗时，单位为毫秒
    pub time: u64,
}

/// 统计响应
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_faces: usize,
    pub total_images: usize,
    pub total_indexed_files: usize,
}

/// 清空请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetRequest {
    /// 必须显式置为 true 才会执行清空
    #[serde(default)]
    pub confirm: bool,
}

/// 删除请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteImagesRequest {
    pub image_paths: Vec<String>,
}

/// 维护操作响应
#[derive(Debug, Serialize, ToSchema)]
pub struct MaintenanceResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
    pub errors: Vec<String>,
}
