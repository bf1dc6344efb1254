use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::DynamicImage;
use image::imageops::FilterType;
use log::debug;
use ort::session::Session;
use ort::value::Value;

use super::{Embedding, FaceEmbedder};

/// 检测模型的输入边长
const DET_SIZE: u32 = 640;
/// 识别模型的输入边长
const REC_SIZE: u32 = 112;
/// 人脸置信度阈值
const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// NMS 的 IoU 阈值
const NMS_IOU_THRESHOLD: f32 = 0.4;

/// 基于 ONNX 的人脸特征提取器：SCRFD 检测人脸框，ArcFace 提取特征
pub struct OnnxEmbedder {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
}

struct Bbox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

impl OnnxEmbedder {
    /// 从模型目录加载 scrfd.onnx 与 arcface.onnx
    pub fn load(model_dir: &Path) -> Result<Self> {
        let det_path = model_dir.join("scrfd.onnx");
        let rec_path = model_dir.join("arcface.onnx");
        anyhow::ensure!(det_path.exists(), "检测模型不存在: {}", det_path.display());
        anyhow::ensure!(rec_path.exists(), "识别模型不存在: {}", rec_path.display());

        let detector =
            Session::builder()?.commit_from_file(&det_path).context("加载 SCRFD 模型失败")?;
        let recognizer =
            Session::builder()?.commit_from_file(&rec_path).context("加载 ArcFace 模型失败")?;
        Ok(Self { detector: Mutex::new(detector), recognizer: Mutex::new(recognizer) })
    }

    fn detect_bboxes(&self, image: &DynamicImage) -> Result<Vec<Bbox>> {
        // 等比缩放后右下填充到 640x640
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = DET_SIZE as f32 / ow.max(oh);
        let nw = ((ow * scale) as u32).max(1);
        let nh = ((oh * scale) as u32).max(1);
        let resized = image.resize_exact(nw, nh, FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(DET_SIZE, DET_SIZE);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        let data = to_chw_bgr(&padded);

        let mut session = self.detector.lock().expect("检测模型互斥锁中毒");
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((vec![1i64, 3, DET_SIZE as i64, DET_SIZE as i64], data))
            .context("构造 SCRFD 输入张量失败")?;
        let outputs =
            session.run(ort::inputs![input_name => input]).context("SCRFD 推理失败")?;

        // SCRFD 按 stride 8/16/32 三个尺度输出 score 与 bbox，逐尺度解码
        let mut raw: Vec<Bbox> = Vec::new();
        for stride in [8usize, 16, 32] {
            let (Some(sv), Some(bv)) =
                (outputs.get(&format!("score_{stride}")), outputs.get(&format!("bbox_{stride}")))
            else {
                continue;
            };
            let (_, scores) = sv.try_extract_tensor::<f32>()?;
            let (_, boxes) = bv.try_extract_tensor::<f32>()?;

            let side = DET_SIZE as usize / stride;
            let grid = side * side;
            if grid == 0 || scores.len() % grid != 0 {
                debug!("score_{stride} 数量 {} 与网格 {side}x{side} 不匹配", scores.len());
                continue;
            }
            let anchors = scores.len() / grid;

            for i in 0..grid {
                let cy = (i / side) as f32 * stride as f32;
                let cx = (i % side) as f32 * stride as f32;
                for a in 0..anchors {
                    let idx = i * anchors + a;
                    let conf = scores[idx];
                    if conf < CONFIDENCE_THRESHOLD {
                        continue;
                    }
                    let b = idx * 4;
                    if b + 3 >= boxes.len() {
                        continue;
                    }
                    // 输出是相对锚点中心的 (左, 上, 右, 下) 偏移，换算回原图坐标
                    let x1 = ((cx - boxes[b] * stride as f32) / scale).clamp(0.0, ow);
                    let y1 = ((cy - boxes[b + 1] * stride as f32) / scale).clamp(0.0, oh);
                    let x2 = ((cx + boxes[b + 2] * stride as f32) / scale).clamp(0.0, ow);
                    let y2 = ((cy + boxes[b + 3] * stride as f32) / scale).clamp(0.0, oh);
                    if x2 - x1 >= 8.0 && y2 - y1 >= 8.0 {
                        raw.push(Bbox { x1, y1, x2, y2, confidence: conf });
                    }
                }
            }
        }

        Ok(nms(raw, NMS_IOU_THRESHOLD))
    }

    fn embed_face(&self, crop: &DynamicImage) -> Result<Option<Embedding>> {
        let resized = crop.resize_exact(REC_SIZE, REC_SIZE, FilterType::Triangle);
        let data = to_chw_rgb(&resized);

        let mut session = self.recognizer.lock().expect("识别模型互斥锁中毒");
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((vec![1i64, 3, REC_SIZE as i64, REC_SIZE as i64], data))
            .context("构造 ArcFace 输入张量失败")?;
        let outputs =
            session.run(ort::inputs![input_name => input]).context("ArcFace 推理失败")?;

        let Some(key) = outputs.keys().next().map(str::to_string) else {
            return Ok(None);
        };
        let Some(value) = outputs.get(&key) else {
            return Ok(None);
        };
        let (_, slice) = value.try_extract_tensor::<f32>()?;
        let mut v = slice.to_vec();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            debug!("ArcFace 输出为零向量，丢弃该人脸");
            return Ok(None);
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(Some(v))
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Embedding>> {
        let bboxes = self.detect_bboxes(image)?;
        let mut embeddings = Vec::with_capacity(bboxes.len());
        for bbox in bboxes {
            let x1 = bbox.x1.max(0.0) as u32;
            let y1 = bbox.y1.max(0.0) as u32;
            let x2 = (bbox.x2 as u32).min(image.width());
            let y2 = (bbox.y2 as u32).min(image.height());
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let crop = image.crop_imm(x1, y1, x2 - x1, y2 - y1);
            if let Some(embedding) = self.embed_face(&crop)? {
                embeddings.push(embedding);
            }
        }
        Ok(embeddings)
    }
}

/// HWC RGB 图片转 CHW BGR 张量，像素归一化到 [-1, 1]
fn to_chw_bgr(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut data = Vec::with_capacity(3 * (w * h) as usize);
    for c in [2usize, 1, 0] {
        for y in 0..h {
            for x in 0..w {
                data.push((rgb.get_pixel(x, y)[c] as f32 - 127.5) / 128.0);
            }
        }
    }
    data
}

/// HWC RGB 图片转 CHW RGB 张量，像素归一化到 [-1, 1]
fn to_chw_rgb(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut data = Vec::with_capacity(3 * (w * h) as usize);
    for c in 0..3usize {
        for y in 0..h {
            for x in 0..w {
                data.push((rgb.get_pixel(x, y)[c] as f32 - 127.5) / 128.0);
            }
        }
    }
    data
}

fn nms(boxes: Vec<Bbox>, iou_threshold: f32) -> Vec<Bbox> {
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| boxes[b].confidence.total_cmp(&boxes[a].confidence));

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for (pos, &ia) in indices.iter().enumerate() {
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(pos + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }

    let mut kept: Vec<Option<Bbox>> = boxes.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| kept[i].take()).collect()
}

fn iou(a: &Bbox, b: &Bbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - intersection;
    if union <= 0.0 { 0.0 } else { intersection / union }
}
