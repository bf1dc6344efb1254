use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use log::warn;

/// 内容去重账本：所有成功入库文件的 MD5 集合
///
/// 账本在打开数据库时一次性加载，文件缺失或损坏都按空集处理，从不致命。
/// 只有成功提取并排队了至少一张人脸的文件才会进入账本，没有人脸的图片
/// 允许日后（例如模型升级后）重新处理。
pub struct ContentLedger {
    path: PathBuf,
    hashes: HashSet<String>,
}

impl ContentLedger {
    /// 从磁盘加载账本
    pub fn load(path: PathBuf) -> Self {
        let hashes = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Vec<String>>(&data) {
                Ok(list) => list.into_iter().collect(),
                Err(err) => {
                    warn!("账本文件解析失败，按空账本处理: {err}");
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };
        Self { path, hashes }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn add(&mut self, hash: String) {
        self.hashes.insert(hash);
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
    }

    /// 将账本整体覆盖写回磁盘
    pub fn persist(&self) -> Result<()> {
        let list: Vec<&String> = self.hashes.iter().collect();
        fs::write(&self.path, serde_json::to_vec(&list)?)?;
        Ok(())
    }
}
