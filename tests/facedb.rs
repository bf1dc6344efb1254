use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use facesearch::config::ConfDir;
use facesearch::embed::{Embedding, FaceEmbedder};
use facesearch::error::SearchError;
use facesearch::facedb::EmbedderFactory;
use facesearch::index::{FaceMeta, NewFace, SearchHit, StoredFace, VectorIndex};
use facesearch::{FaceDB, FaceDBBuilder};

/// 测试用提取器：把图片左右两半的平均颜色归一化成特征向量
///
/// 接近纯黑的半边视为没有人脸，两个半边颜色一致时只算一张人脸，
/// 这样纯色图片是单人脸、左右双色图片是双人脸、纯黑图片没有人脸。
struct StubEmbedder;

fn half_embedding(image: &DynamicImage, left: bool) -> Option<Embedding> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let (x0, x1) = if left { (0, w / 2) } else { (w / 2, w) };
    let mut sum = [0f64; 3];
    let mut count = 0f64;
    for x in x0..x1 {
        for y in 0..h {
            let p = rgb.get_pixel(x, y);
            for c in 0..3 {
                sum[c] += p[c] as f64;
            }
            count += 1.0;
        }
    }
    if count == 0.0 {
        return None;
    }
    let mean = [sum[0] / count / 255.0, sum[1] / count / 255.0, sum[2] / count / 255.0];
    if mean.iter().sum::<f64>() < 0.05 {
        return None;
    }
    let mut v = vec![mean[0] as f32, mean[1] as f32, mean[2] as f32, 0.1];
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    Some(v)
}

impl FaceEmbedder for StubEmbedder {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Embedding>> {
        let left = half_embedding(image, true);
        let right = half_embedding(image, false);
        Ok(match (left, right) {
            (Some(a), Some(b)) => {
                if a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-3) {
                    vec![a]
                } else {
                    vec![a, b]
                }
            }
            (Some(a), None) => vec![a],
            (None, Some(b)) => vec![b],
            (None, None) => Vec::new(),
        })
    }
}

fn stub_factory() -> EmbedderFactory {
    Box::new(|| Ok(Box::new(StubEmbedder) as Box<dyn FaceEmbedder>))
}

fn open_db(dir: &TempDir) -> Result<FaceDB> {
    Ok(FaceDBBuilder::new(ConfDir::new(dir.path().to_path_buf()))
        .embedder(stub_factory())
        .open()?)
}

fn conf(dir: &TempDir) -> ConfDir {
    ConfDir::new(dir.path().to_path_buf())
}

fn solid_image(path: &Path, color: [u8; 3]) -> PathBuf {
    RgbImage::from_pixel(64, 64, Rgb(color)).save(path).unwrap();
    path.to_path_buf()
}

fn split_image(path: &Path, left: [u8; 3], right: [u8; 3]) -> PathBuf {
    let mut image = RgbImage::from_pixel(64, 64, Rgb(left));
    for x in 32..64 {
        for y in 0..64 {
            image.put_pixel(x, y, Rgb(right));
        }
    }
    image.save(path).unwrap();
    path.to_path_buf()
}

const RED: [u8; 3] = [200, 30, 30];
const GREEN: [u8; 3] = [30, 200, 30];
const BLUE: [u8; 3] = [30, 30, 200];
const ORANGE: [u8; 3] = [200, 120, 30];

fn add(db: &mut FaceDB, paths: &[PathBuf]) -> facesearch::facedb::IngestReport {
    db.add_images(paths, |_, _, _| {}).unwrap()
}

#[test]
fn round_trip_single_face() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let red = solid_image(&dir.path().join("red.png"), RED);

    let report = add(&mut db, &[red.clone()]);
    assert_eq!(report.processed, 1);
    assert_eq!(report.faces, 1);
    assert!(report.errors.is_empty());

    let result = db.search(&red, 1, 1.0).unwrap();
    assert_eq!(result.len(), 1);
    let stored = conf(&dir).images_dir().join("red.png");
    assert_eq!(result[0].0, stored.to_string_lossy());
    assert!(Path::new(&result[0].0).exists());
    assert!(result[0].1.abs() < 1e-3);
    Ok(())
}

#[test]
fn duplicate_content_is_indexed_once() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let red = solid_image(&dir.path().join("red.png"), RED);

    let first = add(&mut db, &[red.clone()]);
    assert_eq!((first.processed, first.faces), (1, 1));

    // 相同字节内容换个文件名重新提交
    let copy = dir.path().join("red_copy.png");
    fs::copy(&red, &copy)?;
    let second = add(&mut db, &[copy]);
    assert_eq!((second.processed, second.faces), (0, 0));
    assert!(second.errors.is_empty());

    let stats = db.stats()?;
    assert_eq!(stats.faces, 1);
    assert_eq!(stats.images, 1);
    assert_eq!(stats.ledger_size, 1);
    Ok(())
}

#[test]
fn no_face_image_is_not_ledgered_and_copy_is_removed() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let black = solid_image(&dir.path().join("black.png"), [0, 0, 0]);

    let report = add(&mut db, &[black]);
    assert_eq!(report.processed, 0);
    assert_eq!(report.faces, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("未检测到人脸"));

    let stats = db.stats()?;
    assert_eq!(stats.ledger_size, 0);
    assert_eq!(fs::read_dir(conf(&dir).images_dir())?.count(), 0);
    Ok(())
}

#[test]
fn invalid_files_accumulate_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;

    let missing = dir.path().join("missing.png");
    let text = dir.path().join("note.txt");
    fs::write(&text, b"not an image")?;
    let empty = dir.path().join("empty.png");
    fs::write(&empty, b"")?;

    let report = add(&mut db, &[missing, text, empty]);
    assert_eq!(report.processed, 0);
    assert_eq!(report.errors.len(), 3);

    let stats = db.stats()?;
    assert_eq!(stats.faces, 0);
    assert_eq!(stats.ledger_size, 0);
    Ok(())
}

#[test]
fn results_are_ranked_and_threshold_is_inclusive_upper_bound() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let red = solid_image(&dir.path().join("red.png"), RED);
    let green = solid_image(&dir.path().join("green.png"), GREEN);
    let orange = solid_image(&dir.path().join("orange.png"), ORANGE);
    add(&mut db, &[red, green]);

    let all = db.search(&orange, 10, 1.0).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].1 <= all[1].1);
    assert!(all[0].0.ends_with("red.png"));

    // 阈值取两个距离之间，远的那条必须被过滤
    let cutoff = (all[0].1 + all[1].1) / 2.0;
    let filtered = db.search(&orange, 10, cutoff).unwrap();
    assert_eq!(filtered.len(), 1);
    assert!(filtered.iter().all(|(_, d)| *d <= cutoff));

    // top_k 截断
    let top1 = db.search(&orange, 1, 1.0).unwrap();
    assert_eq!(top1.len(), 1);
    assert!(top1[0].0.ends_with("red.png"));
    Ok(())
}

#[test]
fn multi_face_image_merges_to_minimum_distance() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let split = split_image(&dir.path().join("split.png"), RED, GREEN);

    let report = add(&mut db, &[split]);
    assert_eq!(report.processed, 1);
    assert_eq!(report.faces, 2);
    let stats = db.stats()?;
    assert_eq!(stats.faces, 2);
    assert_eq!(stats.images, 1);

    // 查询图与红色人脸几乎重合，与绿色人脸相距较远，合并后取最小距离
    let red = solid_image(&dir.path().join("red.png"), RED);
    let result = db.search(&red, 10, 1.0).unwrap();
    assert_eq!(result.len(), 1);
    assert!(result[0].0.ends_with("split.png"));
    assert!(result[0].1.abs() < 1e-3);
    Ok(())
}

#[test]
fn cleanup_removes_orphans_but_keeps_ledger() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let red = solid_image(&dir.path().join("red.png"), RED);
    add(&mut db, &[red]);

    // 外部直接删掉存储文件，记录变成孤儿
    let stored = conf(&dir).images_dir().join("red.png");
    fs::remove_file(&stored)?;

    let (deleted, errors) = db.cleanup_orphans();
    assert_eq!(deleted, 1);
    assert!(errors.is_empty());

    let stats = db.stats()?;
    assert_eq!(stats.faces, 0);
    assert_eq!(stats.images, 0);
    assert_eq!(stats.ledger_size, 1);

    let (deleted, errors) = db.cleanup_orphans();
    assert_eq!(deleted, 0);
    assert!(errors.is_empty());
    Ok(())
}

#[test]
fn rename_propagates_to_search_results() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let red = solid_image(&dir.path().join("red.png"), RED);
    add(&mut db, &[red.clone()]);

    let stored = conf(&dir).images_dir().join("red.png");
    let moved = dir.path().join("moved.png");
    fs::rename(&stored, &moved)?;

    let (count, errors) = db.rename(&stored, &moved);
    assert_eq!(count, 1);
    assert!(errors.is_empty());

    let result = db.search(&red, 10, 1.0).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].0, moved.to_string_lossy());

    // 未命中的路径不产生更新
    let (count, errors) = db.rename(&stored, &moved);
    assert_eq!(count, 0);
    assert!(errors.is_empty());
    Ok(())
}

#[test]
fn delete_then_clear_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;
    let a = solid_image(&dir.path().join("a.png"), RED);
    let b = solid_image(&dir.path().join("b.png"), GREEN);
    let c = solid_image(&dir.path().join("c.png"), BLUE);
    add(&mut db, &[a, b.clone(), c]);

    let stats = db.stats()?;
    assert_eq!((stats.faces, stats.images, stats.ledger_size), (3, 3, 3));

    // 按入库时的源路径删除 B
    let report = db.delete_images(&[b]);
    assert_eq!(report.deleted, 1);
    assert!(report.errors.is_empty());
    assert!(report.unremoved_files.is_empty());
    assert!(!conf(&dir).images_dir().join("b.png").exists());

    let stats = db.stats()?;
    assert_eq!((stats.faces, stats.images), (2, 2));
    // 删除单张图片不会从账本中移除哈希
    assert_eq!(stats.ledger_size, 3);

    db.clear()?;
    let stats = db.stats()?;
    assert_eq!((stats.faces, stats.images, stats.ledger_size), (0, 0, 0));
    let ledger: Vec<String> = serde_json::from_slice(&fs::read(conf(&dir).ledger())?)?;
    assert!(ledger.is_empty());
    assert_eq!(fs::read_dir(conf(&dir).images_dir())?.count(), 0);
    Ok(())
}

#[test]
fn search_on_empty_index_short_circuits_without_model() -> Result<()> {
    let dir = TempDir::new()?;
    // 工厂一旦被调用就失败，空索引短路时不应触发模型初始化
    let mut db = FaceDBBuilder::new(ConfDir::new(dir.path().to_path_buf()))
        .embedder(Box::new(|| anyhow::bail!("不应初始化模型")))
        .open()?;

    let red = solid_image(&dir.path().join("red.png"), RED);
    let result = db.search(&red, 10, 1.0).unwrap();
    assert!(result.is_empty());
    Ok(())
}

#[test]
fn search_input_errors_are_typed() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = open_db(&dir)?;

    let err = db.search(&dir.path().join("missing.png"), 10, 1.0).unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery(_)));

    let red = solid_image(&dir.path().join("red.png"), RED);
    add(&mut db, &[red]);
    let black = solid_image(&dir.path().join("black.png"), [0, 0, 0]);
    let err = db.search(&black, 10, 1.0).unwrap_err();
    assert!(matches!(err, SearchError::NoFaceDetected));
    Ok(())
}

/// 写入永远失败的索引，用来验证冲刷失败只影响当前批次
struct FailingIndex;

impl VectorIndex for FailingIndex {
    fn add(&mut self, _faces: Vec<NewFace>) -> Result<()> {
        anyhow::bail!("写入失败")
    }

    fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn get(&self, _with_embeddings: bool) -> Result<Vec<StoredFace>> {
        Ok(Vec::new())
    }

    fn update(
        &mut self,
        _ids: &[String],
        _metas: &[FaceMeta],
        _embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        Ok(0)
    }

    fn delete(&mut self, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }

    fn count(&self) -> Result<usize> {
        Ok(0)
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn flush_failure_is_batch_scoped_not_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let mut db = FaceDBBuilder::new(ConfDir::new(dir.path().to_path_buf()))
        .embedder(stub_factory())
        .index(Box::new(FailingIndex))
        .open()?;

    let red = solid_image(&dir.path().join("red.png"), RED);
    let report = add(&mut db, &[red]);

    // 提取和排队成功，只有批量写入失败
    assert_eq!(report.processed, 1);
    assert_eq!(report.faces, 1);
    assert!(report.errors.iter().any(|err| err.contains("批量写入失败")));

    // 排队成功即记账，账本照常持久化
    let stats = db.stats()?;
    assert_eq!(stats.faces, 0);
    assert_eq!(stats.ledger_size, 1);
    Ok(())
}
