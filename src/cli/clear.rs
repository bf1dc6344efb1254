use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ClearCommand {
    /// 确认清空整个数据库
    #[arg(long)]
    pub yes: bool,
}

impl SubCommandExtend for ClearCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if !self.yes {
            anyhow::bail!("清空会删除全部记录、账本和已存储的图片，请加 --yes 确认");
        }
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open()?;
        block_in_place(|| db.clear())?;
        info!("清空完成");
        println!("数据库已清空");
        Ok(())
    }
}
