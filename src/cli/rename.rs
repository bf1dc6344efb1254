use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

/// 只改写数据库内的路径引用，不移动磁盘文件
#[derive(Parser, Debug, Clone)]
pub struct RenameCommand {
    /// 原存储路径
    pub old: PathBuf,
    /// 新存储路径
    pub new: PathBuf,
}

impl SubCommandExtend for RenameCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open()?;
        let (count, errors) = block_in_place(|| db.rename(&self.old, &self.new));
        println!("更新记录: {count}");
        for err in &errors {
            eprintln!("[ERR] {err}");
        }
        Ok(())
    }
}
