use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 要删除的图片路径，存储路径或入库时的源路径均可
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open()?;
        let report = block_in_place(|| db.delete_images(&self.paths));
        println!("删除记录: {}", report.deleted);
        for path in &report.unremoved_files {
            eprintln!("[WARN] 文件未能移除: {path}");
        }
        for err in &report.errors {
            eprintln!("[ERR] {err}");
        }
        Ok(())
    }
}
