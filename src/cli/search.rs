use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::FaceDBBuilder;
use crate::cli::{SubCommandExtend, embedder_factory};
use crate::config::{EmbedOptions, Opts, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone())
            .max_faces_per_image(self.embed.max_faces)
            .max_image_side(self.embed.max_image_side)
            .embedder(embedder_factory(&self.embed))
            .open()?;

        let result =
            block_in_place(|| db.search(&self.image, self.search.count, self.search.max_distance))?;
        print_result(&result, self)
    }
}

fn print_result(result: &[(String, f32)], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (path, distance) in result {
                println!("{distance:.4}\t{path}");
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
