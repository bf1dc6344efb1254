use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "", "facesearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_conf_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 每张图片最多处理的人脸数量
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub max_faces: usize,
    /// 检测前图片的最大边长，超过该尺寸的图片会等比缩放
    #[arg(short = 'S', long, value_name = "PIXELS", default_value_t = 1600)]
    pub max_image_side: u32,
    /// ONNX 模型所在目录，需包含 scrfd.onnx 和 arcface.onnx
    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 50)]
    pub count: usize,
    /// 两张人脸允许的最大余弦距离，超过该距离的结果会被过滤
    #[arg(long, value_name = "D", default_value_t = 0.75)]
    pub max_distance: f32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facesearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// facesearch 数据目录
    #[arg(short, long, default_value = default_conf_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加图片到人脸数据库
    Add(AddCommand),
    /// 按人脸相似度搜索图片
    Search(SearchCommand),
    /// 图片重命名后同步数据库中的路径
    Rename(RenameCommand),
    /// 删除图片对应的全部人脸记录
    Delete(DeleteCommand),
    /// 清理指向不存在文件的孤儿记录
    Cleanup(CleanupCommand),
    /// 清空整个人脸数据库
    Clear(ClearCommand),
    /// 查看数据库统计信息
    Stats(StatsCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回去重账本文件的路径
    pub fn ledger(&self) -> PathBuf {
        self.path.join("md5_index.json")
    }

    /// 返回入库图片存储目录的路径
    pub fn images_dir(&self) -> PathBuf {
        self.path.join("images")
    }

    /// 返回向量集合文件的路径
    pub fn collection(&self) -> PathBuf {
        self.path.join("faces.db")
    }

    /// 返回上传临时文件目录的路径
    pub fn tmp_dir(&self) -> PathBuf {
        self.path.join("tmp")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
