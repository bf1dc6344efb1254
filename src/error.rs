use thiserror::Error;

/// 搜索操作的错误分类
///
/// 输入类错误由调用方负责，不会自动重试；后端错误属于运行时故障。
#[derive(Debug, Error)]
pub enum SearchError {
    /// 查询图片本身无效
    #[error("查询图片无效: {0}")]
    InvalidQuery(String),
    /// 查询图片中没有检测到人脸
    #[error("查询图片中未检测到人脸")]
    NoFaceDetected,
    /// 向量索引或模型层故障
    #[error("向量索引错误: {0}")]
    Backend(#[from] anyhow::Error),
}
