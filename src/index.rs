use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// 一条人脸记录的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceMeta {
    /// 存储目录内的图片路径
    pub stored_path: String,
    /// 入库时调用方提供的源路径，仅用于诊断
    pub original_path: String,
    /// 入库时源文件的 MD5，哈希失败时为空
    pub content_hash: String,
}

/// 待写入索引的人脸记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFace {
    pub id: String,
    pub meta: FaceMeta,
    pub embedding: Vec<f32>,
}

/// 从索引读出的人脸记录，特征向量按需携带
#[derive(Debug, Clone)]
pub struct StoredFace {
    pub id: String,
    pub meta: FaceMeta,
    pub embedding: Option<Vec<f32>>,
}

/// 一次最近邻查询的命中
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub meta: FaceMeta,
    pub distance: f32,
}

/// 向量索引后端接口
///
/// 单一逻辑集合，按 id 寻址，余弦距离。实现方保证每个方法原子生效，
/// 调用方负责串行化并发访问。
pub trait VectorIndex: Send {
    /// 批量写入人脸记录
    fn add(&mut self, faces: Vec<NewFace>) -> Result<()>;
    /// 查询与 vector 最相近的 k 条记录，按距离升序
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;
    /// 读取全部记录
    fn get(&self, with_embeddings: bool) -> Result<Vec<StoredFace>>;
    /// 按 id 更新记录元数据，embeddings 提供时一并重写特征向量
    fn update(
        &mut self,
        ids: &[String],
        metas: &[FaceMeta],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize>;
    /// 按 id 删除记录，返回实际删除数量
    fn delete(&mut self, ids: &[String]) -> Result<usize>;
    /// 记录总数
    fn count(&self) -> Result<usize>;
    /// 销毁并重建集合
    fn reset(&mut self) -> Result<()>;
}

/// 余弦距离，1 - 余弦相似度，越小越相似
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// 暴力扫描的余弦向量索引，整个集合持久化在单个文件中
///
/// 十万条以内的规模线性扫描已经足够快，接口与外部向量库对齐，
/// 方便以后替换成 ANN 实现。每次变更整体重写集合文件。
pub struct FlatIndex {
    path: PathBuf,
    faces: Vec<NewFace>,
}

impl FlatIndex {
    /// 打开或创建索引文件
    pub fn open(path: PathBuf) -> Result<Self> {
        let faces = if path.exists() {
            let data = fs::read(&path)?;
            bincode::deserialize(&data).context("集合文件解析失败")?
        } else {
            Vec::new()
        };
        Ok(Self { path, faces })
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, bincode::serialize(&self.faces)?)?;
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn add(&mut self, mut faces: Vec<NewFace>) -> Result<()> {
        self.faces.append(&mut faces);
        self.persist()
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .faces
            .iter()
            .map(|face| SearchHit {
                id: face.id.clone(),
                meta: face.meta.clone(),
                distance: cosine_distance(vector, &face.embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, with_embeddings: bool) -> Result<Vec<StoredFace>> {
        Ok(self
            .faces
            .iter()
            .map(|face| StoredFace {
                id: face.id.clone(),
                meta: face.meta.clone(),
                embedding: with_embeddings.then(|| face.embedding.clone()),
            })
            .collect())
    }

    fn update(
        &mut self,
        ids: &[String],
        metas: &[FaceMeta],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        ensure!(ids.len() == metas.len(), "ids 与 metas 数量不一致");
        if let Some(embeddings) = embeddings {
            ensure!(ids.len() == embeddings.len(), "ids 与 embeddings 数量不一致");
        }

        let mut updated = 0;
        for (idx, id) in ids.iter().enumerate() {
            if let Some(face) = self.faces.iter_mut().find(|face| &face.id == id) {
                face.meta = metas[idx].clone();
                if let Some(embeddings) = embeddings {
                    face.embedding = embeddings[idx].clone();
                }
                updated += 1;
            }
        }
        self.persist()?;
        Ok(updated)
    }

    fn delete(&mut self, ids: &[String]) -> Result<usize> {
        let ids: HashSet<&String> = ids.iter().collect();
        let before = self.faces.len();
        self.faces.retain(|face| !ids.contains(&face.id));
        self.persist()?;
        Ok(before - self.faces.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.faces.len())
    }

    fn reset(&mut self) -> Result<()> {
        self.faces.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(id: &str, path: &str, embedding: Vec<f32>) -> NewFace {
        NewFace {
            id: id.to_string(),
            meta: FaceMeta {
                stored_path: path.to_string(),
                original_path: format!("/src/{path}"),
                content_hash: format!("hash-{id}"),
            },
            embedding,
        }
    }

    fn open_index(dir: &std::path::Path) -> FlatIndex {
        FlatIndex::open(dir.join("faces.db")).unwrap()
    }

    #[test]
    fn test_query_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .add(vec![
                face("a", "a.png", vec![1.0, 0.0]),
                face("b", "b.png", vec![0.0, 1.0]),
                face("c", "c.png", vec![0.7, 0.7]),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits[1].id, "c");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_update_metadata_only_keeps_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open_index(dir.path());
        index.add(vec![face("a", "a.png", vec![1.0, 0.0])]).unwrap();

        let mut meta = index.get(false).unwrap()[0].meta.clone();
        meta.stored_path = "moved.png".to_string();
        let updated = index.update(&["a".to_string()], &[meta], None).unwrap();
        assert_eq!(updated, 1);

        let records = index.get(true).unwrap();
        assert_eq!(records[0].meta.stored_path, "moved.png");
        assert_eq!(records[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn test_update_unknown_id_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open_index(dir.path());
        index.add(vec![face("a", "a.png", vec![1.0, 0.0])]).unwrap();

        let meta = index.get(false).unwrap()[0].meta.clone();
        let updated = index.update(&["missing".to_string()], &[meta], None).unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn test_delete_returns_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open_index(dir.path());
        index
            .add(vec![
                face("a", "a.png", vec![1.0, 0.0]),
                face("b", "b.png", vec![0.0, 1.0]),
            ])
            .unwrap();

        let deleted =
            index.delete(&["a".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut index = open_index(dir.path());
            index.add(vec![face("a", "a.png", vec![0.5, 0.5])]).unwrap();
        }
        let index = open_index(dir.path());
        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.get(false).unwrap()[0].id, "a");
    }

    #[test]
    fn test_reset_empties_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open_index(dir.path());
        index.add(vec![face("a", "a.png", vec![1.0, 0.0])]).unwrap();
        index.reset().unwrap();
        assert_eq!(index.count().unwrap(), 0);

        let reopened = open_index(dir.path());
        assert_eq!(reopened.count().unwrap(), 0);
    }

    #[test]
    fn test_cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        // 维数不一致或零向量按最大可比距离处理
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
