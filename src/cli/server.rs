use anyhow::Result;
use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;

use crate::cli::{SubCommandExtend, embedder_factory};
use crate::config::{EmbedOptions, Opts, SearchOptions};
use crate::{FaceDBBuilder, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// 批量写入索引的批次大小
    #[arg(short, long, default_value_t = 1024)]
    pub batch_size: usize,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = FaceDBBuilder::new(opts.conf_dir.clone())
            .flush_batch_size(self.batch_size)
            .max_faces_per_image(self.embed.max_faces)
            .max_image_side(self.embed.max_image_side)
            .embedder(embedder_factory(&self.embed))
            .open()?;

        let mut self_clone = self.clone();
        if self_clone.token.is_empty() {
            self_clone.token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", self_clone.token);
        }

        let state = server::AppState::new(db, opts.conf_dir.tmp_dir(), self_clone);
        let app = server::create_app(state);

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
