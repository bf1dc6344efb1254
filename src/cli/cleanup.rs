use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct CleanupCommand {}

impl SubCommandExtend for CleanupCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open()?;
        let (count, errors) = block_in_place(|| db.cleanup_orphans());
        println!("清理孤儿记录: {count}");
        for err in &errors {
            eprintln!("[ERR] {err}");
        }
        Ok(())
    }
}
