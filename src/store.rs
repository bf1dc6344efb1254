use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, warn};
use uuid::Uuid;

use crate::validate::SUPPORTED_IMAGE_EXTENSIONS;

/// 不支持的扩展名统一按该格式存储
const DEFAULT_EXTENSION: &str = "png";

/// 入库图片的持久化目录，目录内文件名唯一
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// 打开存储目录，不存在时创建
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// 将源图片复制进存储目录，返回新的存储路径
    ///
    /// 复制失败时返回 None，由调用方跳过该文件，不得写账本或排队向量。
    pub fn store(&self, src: &Path) -> Option<PathBuf> {
        match self.try_store(src) {
            Ok(dest) => Some(dest),
            Err(err) => {
                error!("复制文件到存储目录失败 {}: {err}", src.display());
                None
            }
        }
    }

    fn try_store(&self, src: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let ext = src
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| SUPPORTED_IMAGE_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        // 同名文件通过递增后缀避免覆盖
        let mut dest = self.dir.join(format!("{stem}.{ext}"));
        let mut counter = 1;
        while dest.exists() {
            dest = self.dir.join(format!("{stem}_{counter}.{ext}"));
            counter += 1;
        }

        fs::copy(src, &dest)?;
        Ok(dest)
    }

    /// 删除存储目录中的文件，失败只记录日志，返回是否已不存在
    pub fn remove(&self, path: &Path) -> bool {
        if !path.exists() {
            return true;
        }
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) => {
                warn!("删除文件失败 {}: {err}", path.display());
                false
            }
        }
    }

    /// 销毁并重建存储目录
    pub fn reset(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}
