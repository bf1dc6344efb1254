use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::FaceDBBuilder;
use crate::cli::{SubCommandExtend, embedder_factory};
use crate::config::{EmbedOptions, Opts};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 图片文件或所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,bmp,webp")]
    pub suffix: String,
    /// 批量写入索引的批次大小
    #[arg(short, long, default_value_t = 1024)]
    pub batch_size: usize,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = format!("(?i)^({})$", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");

        let entries = scan_images(&self.path, &re_suf);
        info!("扫描完成，共 {} 张图片", entries.len());

        let mut db = FaceDBBuilder::new(opts.conf_dir.clone())
            .flush_batch_size(self.batch_size)
            .max_faces_per_image(self.embed.max_faces)
            .max_image_side(self.embed.max_image_side)
            .embedder(embedder_factory(&self.embed))
            .open()?;

        let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());
        let report = block_in_place(|| {
            db.add_images(&entries, |_, _, path| {
                pb.set_message(path.display().to_string());
                pb.inc(1);
            })
        })?;
        pb.finish_with_message("图片添加完成");

        println!("入库图片: {}", report.processed);
        println!("索引人脸: {}", report.faces);
        if let Some(err) = &report.ledger_error {
            eprintln!("[WARN] 账本持久化失败: {err}");
        }
        for err in &report.errors {
            eprintln!("[ERR] {err}");
        }
        Ok(())
    }
}

fn scan_images(path: &Path, re_suf: &Regex) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let matched = path
                .extension()
                .map(|ext| re_suf.is_match(&ext.to_string_lossy()))
                .unwrap_or(false);
            matched.then_some(path)
        })
        .collect()
}
