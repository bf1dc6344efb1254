use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::FaceDB;
use crate::cli::ServerCommand;
use crate::config::SearchOptions;

/// 应用状态
pub struct AppState {
    /// 人脸数据库，互斥锁串行化全部操作
    pub db: Mutex<FaceDB>,
    /// 上传临时文件目录
    pub tmp_dir: PathBuf,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: FaceDB, tmp_dir: PathBuf, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState { db: Mutex::new(db), tmp_dir, search: opts.search, token: opts.token })
    }
}
