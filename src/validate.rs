use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{DynamicImage, ImageReader};
use log::debug;
use thiserror::Error;

/// 支持的图片扩展名
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "bmp", "webp", "jfif", "tiff", "tif"];
/// 单个文件的大小上限
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
/// 图片短边的最小像素数
pub const MIN_IMAGE_SIZE: u32 = 32;

/// 校验失败的具体原因
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("无效的文件路径")]
    EmptyPath,
    #[error("文件不存在: {}", .0.display())]
    NotFound(PathBuf),
    #[error("不是文件: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("不支持的图片格式: .{0}，支持的格式: jpg, jpeg, png, bmp, webp, jfif, tiff, tif")]
    UnsupportedExtension(String),
    #[error("无法读取文件大小: {0}")]
    Unreadable(std::io::Error),
    #[error("文件过大: {0:.2}MB，最大支持 100MB")]
    TooLarge(f64),
    #[error("文件为空")]
    Empty,
    #[error("图片文件损坏或格式不正确")]
    Corrupt,
    #[error("图片尺寸过小: {0}x{1}，最小支持 {MIN_IMAGE_SIZE}x{MIN_IMAGE_SIZE}")]
    TooSmall(u32, u32),
}

/// 入库和查询前的统一校验，任何一项不通过立即返回具体原因
///
/// 校验过程没有副作用，解码出的图片随即丢弃。
pub fn validate_image_file(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if !path.exists() {
        return Err(ValidationError::NotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ValidationError::UnsupportedExtension(ext));
    }

    let size = path.metadata().map_err(ValidationError::Unreadable)?.len();
    if size > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge(size as f64 / 1024.0 / 1024.0));
    }
    if size == 0 {
        return Err(ValidationError::Empty);
    }

    let image = read_image(path).map_err(|_| ValidationError::Corrupt)?;
    let (w, h) = (image.width(), image.height());
    if w < MIN_IMAGE_SIZE || h < MIN_IMAGE_SIZE {
        return Err(ValidationError::TooSmall(w, h));
    }

    Ok(())
}

/// 读取图片，按扩展名解码失败时回退到按内容嗅探解码
pub fn read_image(path: &Path) -> Result<DynamicImage> {
    match ImageReader::open(path)?.decode() {
        Ok(image) => Ok(image),
        Err(err) => {
            debug!("按扩展名解码失败，改为按内容解码 {}: {err}", path.display());
            let bytes = fs::read(path)?;
            Ok(image::load_from_memory(&bytes)?)
        }
    }
}
