use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open()?;
        let stats = block_in_place(|| db.stats())?;
        println!("人脸总数: {}", stats.faces);
        println!("图片总数: {}", stats.images);
        println!("账本大小: {}", stats.ledger_size);
        Ok(())
    }
}
