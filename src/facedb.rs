use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConfDir;
use crate::embed::{self, Embedding, FaceEmbedder};
use crate::error::SearchError;
use crate::index::{FaceMeta, FlatIndex, NewFace, VectorIndex};
use crate::ledger::ContentLedger;
use crate::metrics;
use crate::store::ImageStore;
use crate::utils::{hash_file, normalize_path};
use crate::validate::{self, validate_image_file};

/// 人脸特征提取器的构造工厂，模型在首次使用时才真正加载
pub type EmbedderFactory = Box<dyn Fn() -> Result<Box<dyn FaceEmbedder>> + Send + Sync>;

/// 批量入库结果
#[derive(Debug, Default)]
pub struct IngestReport {
    /// 成功入库的图片数量
    pub processed: usize,
    /// 新索引的人脸数量
    pub faces: usize,
    /// 逐文件错误信息
    pub errors: Vec<String>,
    /// 账本持久化失败信息，主流程不受其影响
    pub ledger_error: Option<String>,
}

/// 删除结果
#[derive(Debug, Default)]
pub struct DeleteReport {
    /// 删除的人脸记录数量
    pub deleted: usize,
    /// 逐项错误信息
    pub errors: Vec<String>,
    /// 索引删除成功但磁盘文件未能移除的路径
    pub unremoved_files: Vec<String>,
}

/// 数据库统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// 人脸记录总数
    pub faces: usize,
    /// 去重后的图片数量
    pub images: usize,
    /// 账本内的哈希数量
    pub ledger_size: usize,
}

/// 入库写缓冲：累积待写入的人脸记录，定量整批冲刷到索引
///
/// 冲刷失败的批次直接丢弃、不重试，后续文件继续处理。
struct WriteBuffer {
    pending: Vec<NewFace>,
    limit: usize,
}

impl WriteBuffer {
    fn new(limit: usize) -> Self {
        Self { pending: Vec::new(), limit }
    }

    fn push(&mut self, face: NewFace) {
        self.pending.push(face);
    }

    fn is_full(&self) -> bool {
        self.pending.len() >= self.limit
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 将缓冲整批写入索引，返回写入数量；无论成败缓冲都被清空
    fn flush(&mut self, index: &mut dyn VectorIndex) -> Result<usize> {
        let batch = std::mem::take(&mut self.pending);
        let n = batch.len();
        index.add(batch)?;
        Ok(n)
    }
}

pub struct FaceDBBuilder {
    conf_dir: ConfDir,
    flush_batch_size: usize,
    max_faces_per_image: usize,
    max_image_side: u32,
    embedder_factory: Option<EmbedderFactory>,
    index: Option<Box<dyn VectorIndex>>,
}

impl FaceDBBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self {
            conf_dir,
            flush_batch_size: 1024,
            max_faces_per_image: 100,
            max_image_side: 1600,
            embedder_factory: None,
            index: None,
        }
    }

    /// 批量写入索引的批次大小，下限 64
    pub fn flush_batch_size(mut self, n: usize) -> Self {
        self.flush_batch_size = n.max(64);
        self
    }

    /// 每张图片最多保留的人脸数量，0 表示不限制
    pub fn max_faces_per_image(mut self, n: usize) -> Self {
        self.max_faces_per_image = n;
        self
    }

    /// 检测前图片的最大边长，0 表示不缩放
    pub fn max_image_side(mut self, n: u32) -> Self {
        self.max_image_side = n;
        self
    }

    /// 注入人脸特征提取器工厂
    pub fn embedder(mut self, factory: EmbedderFactory) -> Self {
        self.embedder_factory = Some(factory);
        self
    }

    /// 注入向量索引后端，默认使用数据目录下的平铺索引
    pub fn index(mut self, index: Box<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn open(self) -> Result<FaceDB> {
        fs::create_dir_all(self.conf_dir.path())
            .with_context(|| format!("创建数据目录失败: {}", self.conf_dir.path().display()))?;
        let store = ImageStore::new(self.conf_dir.images_dir())?;
        let ledger = ContentLedger::load(self.conf_dir.ledger());
        let index = match self.index {
            Some(index) => index,
            None => Box::new(FlatIndex::open(self.conf_dir.collection())?),
        };
        let embedder_factory = self
            .embedder_factory
            .unwrap_or_else(|| Box::new(|| anyhow::bail!("未配置人脸特征提取器")));

        Ok(FaceDB {
            ledger,
            store,
            index,
            embedder: None,
            embedder_factory,
            flush_batch_size: self.flush_batch_size,
            max_faces_per_image: self.max_faces_per_image,
            max_image_side: self.max_image_side,
        })
    }
}

/// 人脸搜索数据库
///
/// 由三个相互关联的存储组成：去重账本、入库图片目录和向量索引。
/// 所有操作都要求独占访问，调用方负责串行化并发调用。
pub struct FaceDB {
    ledger: ContentLedger,
    store: ImageStore,
    index: Box<dyn VectorIndex>,
    embedder: Option<Box<dyn FaceEmbedder>>,
    embedder_factory: EmbedderFactory,
    flush_batch_size: usize,
    max_faces_per_image: usize,
    max_image_side: u32,
}

impl FaceDB {
    /// 批量添加图片，每张检测到的人脸都成为一条向量记录
    ///
    /// 逐文件的失败只会累积进错误列表，整个调用只在模型初始化失败时返回
    /// 错误。账本在调用结束时整体持久化一次。
    pub fn add_images(
        &mut self,
        paths: &[PathBuf],
        mut progress: impl FnMut(usize, usize, &Path),
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        if paths.is_empty() {
            return Ok(report);
        }

        self.ensure_embedder().context("人脸模型初始化失败")?;

        let mut buffer = WriteBuffer::new(self.flush_batch_size);
        let total = paths.len();
        for (idx, path) in paths.iter().enumerate() {
            progress(idx + 1, total, path.as_path());

            if let Err(err) = validate_image_file(path) {
                warn!("跳过无效文件 {}: {err}", path.display());
                report.errors.push(format!("{}: {err}", path.display()));
                continue;
            }

            // 相同字节内容只入库一次，哈希失败时跳过去重但继续入库
            let hash = match hash_file(path) {
                Ok(hash) => Some(hash),
                Err(err) => {
                    warn!("计算 MD5 失败 {}: {err}", path.display());
                    None
                }
            };
            if let Some(hash) = &hash {
                if self.ledger.contains(hash) {
                    debug!("跳过重复文件: {}", path.display());
                    continue;
                }
            }

            let Some(stored_path) = self.store.store(path) else {
                report.errors.push(format!("{}: 无法复制到存储目录", path.display()));
                continue;
            };

            let embeddings = self.extract_embeddings(&stored_path);
            if embeddings.is_empty() {
                debug!("未检测到人脸: {}", path.display());
                report.errors.push(format!("{}: 未检测到人脸", path.display()));
                self.store.remove(&stored_path);
                continue;
            }

            report.processed += 1;
            for embedding in embeddings {
                report.faces += 1;
                buffer.push(NewFace {
                    id: Uuid::new_v4().to_string(),
                    meta: FaceMeta {
                        stored_path: stored_path.to_string_lossy().to_string(),
                        original_path: path.to_string_lossy().to_string(),
                        content_hash: hash.clone().unwrap_or_default(),
                    },
                    embedding,
                });
            }

            // 产生了特征向量才记账，无人脸的图片允许重新处理
            if let Some(hash) = hash {
                self.ledger.add(hash);
            }

            if buffer.is_full() {
                match buffer.flush(self.index.as_mut()) {
                    Ok(n) => metrics::add_faces_indexed(n as u64),
                    Err(err) => {
                        error!("批量写入索引失败: {err}");
                        report.errors.push(format!("批量写入失败: {err}"));
                    }
                }
            }
        }

        if !buffer.is_empty() {
            match buffer.flush(self.index.as_mut()) {
                Ok(n) => metrics::add_faces_indexed(n as u64),
                Err(err) => {
                    error!("最终批量写入失败: {err}");
                    report.errors.push(format!("最终批量写入失败: {err}"));
                }
            }
        }

        if let Err(err) = self.ledger.persist() {
            warn!("账本持久化失败: {err}");
            report.ledger_error = Some(err.to_string());
        }

        Ok(report)
    }

    /// 按人脸相似度搜索，返回 (存储路径, 距离) 列表，距离升序
    ///
    /// max_distance 为闭区间上界。查询图片的每张人脸各查询一次，
    /// 同一张图片只保留所有人脸中的最小距离。
    pub fn search(
        &mut self,
        query: &Path,
        top_k: usize,
        max_distance: f32,
    ) -> Result<Vec<(String, f32)>, SearchError> {
        validate_image_file(query).map_err(|err| SearchError::InvalidQuery(err.to_string()))?;

        let indexed = self.index.count().map_err(SearchError::Backend)?;
        if indexed == 0 {
            warn!("索引为空，无法搜索");
            return Ok(Vec::new());
        }

        self.ensure_embedder().map_err(SearchError::Backend)?;
        let embeddings = self.extract_embeddings(query);
        if embeddings.is_empty() {
            return Err(SearchError::NoFaceDetected);
        }

        let start = Instant::now();
        // 每张人脸多查一些候选，合并去重后再截断，降低漏掉真实 top-k 的概率
        let per_face_k = 10.max((top_k * 2).min(100));
        let mut best: HashMap<String, f32> = HashMap::new();
        for embedding in &embeddings {
            let hits = self.index.query(embedding, per_face_k).map_err(SearchError::Backend)?;
            for hit in hits {
                // 指向已消失文件的陈旧记录直接跳过
                if !Path::new(&hit.meta.stored_path).exists() {
                    continue;
                }
                if hit.distance > max_distance {
                    continue;
                }
                let entry = best.entry(hit.meta.stored_path).or_insert(f32::INFINITY);
                if hit.distance < *entry {
                    *entry = hit.distance;
                }
            }
        }

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(top_k);

        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_search(elapsed);
        info!("搜索完成: {} 张人脸，{} 条结果，耗时 {elapsed:.2}s", embeddings.len(), ranked.len());
        Ok(ranked)
    }

    /// 将索引中引用 old_path 的记录改写为 new_path，用于文件重命名后的同步
    ///
    /// 特征向量原样回写、从不重新计算；任何一条向量取不到时整批退化为
    /// 仅更新元数据，避免写入错位的向量。
    pub fn rename(&mut self, old_path: &Path, new_path: &Path) -> (usize, Vec<String>) {
        let records = match self.index.get(true) {
            Ok(records) => records,
            Err(err) => {
                let msg = format!("获取索引记录失败: {err}");
                error!("{msg}");
                return (0, vec![msg]);
            }
        };

        let normalized_old = normalize_path(old_path);
        let mut ids = Vec::new();
        let mut metas = Vec::new();
        let mut embeddings = Some(Vec::new());
        for record in records {
            if normalize_path(Path::new(&record.meta.stored_path)) != normalized_old {
                continue;
            }
            ids.push(record.id);
            let mut meta = record.meta;
            meta.stored_path = new_path.to_string_lossy().to_string();
            metas.push(meta);
            match record.embedding {
                Some(embedding) => {
                    if let Some(list) = embeddings.as_mut() {
                        list.push(embedding);
                    }
                }
                None => embeddings = None,
            }
        }

        if ids.is_empty() {
            return (0, Vec::new());
        }

        match self.index.update(&ids, &metas, embeddings.as_deref()) {
            Ok(count) => {
                info!("更新了 {count} 条与 {} 相关的记录路径", old_path.display());
                (count, Vec::new())
            }
            Err(err) => {
                let msg = format!("更新索引记录失败: {err}");
                error!("{msg}");
                (0, vec![msg])
            }
        }
    }

    /// 删除指定图片的全部人脸记录，路径同时匹配存储路径和原始路径
    ///
    /// 索引状态为准：索引删除成功后才移除磁盘文件，文件删除失败只会
    /// 留下孤儿文件，不回滚索引。账本有意保持不变。
    pub fn delete_images(&mut self, paths: &[PathBuf]) -> DeleteReport {
        let mut report = DeleteReport::default();
        if paths.is_empty() {
            return report;
        }

        let records = match self.index.get(false) {
            Ok(records) => records,
            Err(err) => {
                let msg = format!("获取索引记录失败: {err}");
                error!("{msg}");
                report.errors.push(msg);
                return report;
            }
        };

        let targets: HashSet<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        let mut ids = Vec::new();
        let mut files: HashSet<PathBuf> = HashSet::new();
        for record in records {
            let stored = normalize_path(Path::new(&record.meta.stored_path));
            let matched = targets.contains(&stored)
                || (!record.meta.original_path.is_empty()
                    && targets.contains(&normalize_path(Path::new(&record.meta.original_path))));
            if matched {
                ids.push(record.id);
                files.insert(stored);
            }
        }

        if ids.is_empty() {
            return report;
        }

        match self.index.delete(&ids) {
            Ok(count) => {
                report.deleted = count;
                info!("删除了 {count} 条人脸记录");
                for file in files {
                    if !self.store.remove(&file) {
                        report.unremoved_files.push(file.to_string_lossy().to_string());
                    }
                }
            }
            Err(err) => {
                let msg = format!("删除操作失败: {err}");
                error!("{msg}");
                report.errors.push(msg);
            }
        }
        report
    }

    /// 删除指向不存在文件的孤儿记录
    ///
    /// 账本有意保持不变：哈希一旦见过就继续压制相同内容的重复提交。
    pub fn cleanup_orphans(&mut self) -> (usize, Vec<String>) {
        let records = match self.index.get(false) {
            Ok(records) => records,
            Err(err) => {
                let msg = format!("获取索引记录失败: {err}");
                error!("{msg}");
                return (0, vec![msg]);
            }
        };

        let ids: Vec<String> = records
            .into_iter()
            .filter(|record| !Path::new(&record.meta.stored_path).exists())
            .map(|record| record.id)
            .collect();
        if ids.is_empty() {
            return (0, Vec::new());
        }

        match self.index.delete(&ids) {
            Ok(count) => {
                info!("删除了 {count} 条孤儿记录");
                (count, Vec::new())
            }
            Err(err) => {
                let msg = format!("删除孤儿记录失败: {err}");
                error!("{msg}");
                (0, vec![msg])
            }
        }
    }

    /// 清空向量集合、账本与图片存储，唯一一个让三个存储同时归零的操作
    pub fn clear(&mut self) -> Result<()> {
        self.index.reset().context("重建向量集合失败")?;
        self.ledger.clear();
        self.ledger.persist().context("账本持久化失败")?;
        self.store.reset().context("重置图片存储失败")?;
        info!("人脸数据库已清空");
        Ok(())
    }

    /// 数据库统计信息
    pub fn stats(&mut self) -> Result<Stats> {
        let faces = self.index.count().context("获取记录总数失败")?;
        let images = if faces == 0 {
            0
        } else {
            match self.index.get(false) {
                Ok(records) => records
                    .iter()
                    .map(|record| record.meta.stored_path.as_str())
                    .collect::<HashSet<_>>()
                    .len(),
                Err(err) => {
                    // 全量扫描失败时粗略估计：平均每张图 1~2 张人脸
                    warn!("获取图片统计失败，使用估算值: {err}");
                    1.max(faces / 2)
                }
            }
        };
        Ok(Stats { faces, images, ledger_size: self.ledger.len() })
    }

    /// 首次使用时初始化人脸模型，整个生命周期只初始化一次
    fn ensure_embedder(&mut self) -> Result<()> {
        if self.embedder.is_none() {
            self.embedder = Some((self.embedder_factory)()?);
            info!("人脸特征提取器已初始化");
        }
        Ok(())
    }

    /// 提取一张图片的人脸特征向量，读取或检测失败都按零人脸处理
    fn extract_embeddings(&self, path: &Path) -> Vec<Embedding> {
        let image = match validate::read_image(path) {
            Ok(image) => image,
            Err(err) => {
                error!("无法读取图片 {}: {err}", path.display());
                return Vec::new();
            }
        };
        let image = embed::shrink_to_max_side(image, self.max_image_side);

        let embedder = self.embedder.as_ref().expect("特征提取器已在调用前初始化");
        match embedder.detect(&image) {
            Ok(mut embeddings) => {
                if self.max_faces_per_image > 0 && embeddings.len() > self.max_faces_per_image {
                    embeddings.truncate(self.max_faces_per_image);
                }
                embeddings
            }
            Err(err) => {
                error!("人脸检测失败 {}: {err}", path.display());
                Vec::new()
            }
        }
    }
}
