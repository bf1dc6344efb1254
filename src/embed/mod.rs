use anyhow::Result;
use image::DynamicImage;
use image::imageops::FilterType;
use log::debug;

#[cfg(feature = "onnx")]
pub mod onnx;

/// 单张人脸的特征向量，已归一化为单位 L2 范数
pub type Embedding = Vec<f32>;

/// 人脸特征提取器接口
///
/// 实现方对一张图片返回零或多张人脸的单位向量，维数由部署的模型决定，
/// 向量顺序与检测顺序一致。
pub trait FaceEmbedder: Send + Sync {
    /// 检测图片中的人脸并返回特征向量
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Embedding>>;
}

/// 检测前的预处理：长边超过 max_side 时等比缩放
pub fn shrink_to_max_side(image: DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    if max_side == 0 || w.max(h) <= max_side {
        return image;
    }
    let scale = max_side as f32 / w.max(h) as f32;
    let nw = ((w as f32 * scale) as u32).max(1);
    let nh = ((h as f32 * scale) as u32).max(1);
    debug!("图片已缩放: {w}x{h} -> {nw}x{nh}");
    image.resize_exact(nw, nh, FilterType::Triangle)
}
