mod add;
mod cleanup;
mod clear;
mod delete;
mod rename;
mod search;
pub mod server;
mod stats;

pub use add::*;
pub use cleanup::*;
pub use clear::*;
pub use delete::*;
pub use rename::*;
pub use search::*;
pub use server::*;
pub use stats::*;

use crate::config::{EmbedOptions, Opts};
use crate::facedb::EmbedderFactory;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 构建人脸特征提取器工厂，模型推迟到首次检测时加载
#[cfg(feature = "onnx")]
pub fn embedder_factory(embed: &EmbedOptions) -> EmbedderFactory {
    use crate::embed::FaceEmbedder;
    use crate::embed::onnx::OnnxEmbedder;

    let model_dir = embed.model_dir.clone();
    Box::new(move || {
        let dir = model_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("未指定模型目录，请使用 --model-dir"))?;
        Ok(Box::new(OnnxEmbedder::load(&dir)?) as Box<dyn FaceEmbedder>)
    })
}

#[cfg(not(feature = "onnx"))]
pub fn embedder_factory(_embed: &EmbedOptions) -> EmbedderFactory {
    Box::new(|| anyhow::bail!("本次构建未启用 onnx 特性，无法进行人脸检测"))
}
