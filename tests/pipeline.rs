// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 检测流程集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::cell::Cell;

use image::{Rgb, RgbImage};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use shanan_scrfd::{
  FromUrl,
  frame::RgbNhwcFrame,
  input::ImageFileInput,
  model::{
    BoundingBox, ImageSize, InferenceEngine, Model, Point, Scrfd, ScrfdConfig, ScrfdError,
    ScrfdModelError, ScrfdOutputs, TensorKind, detect,
  },
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

const GRIDS: [(u32, usize); 3] = [(8, 80), (16, 40), (32, 20)];
const ANCHORS: usize = 4;

#[derive(Error, Debug)]
#[error("推理失败")]
struct EngineFailed;

/// 返回固定输出的推理后端，同时记录收到的帧
struct FakeEngine {
  tensors: Vec<Vec<f32>>,
  fail: bool,
  /// (首行像素, 中间行像素) 的 R 通道
  seen: Cell<Option<(u8, u8)>>,
  /// 浮点输入中 (首个像素 R, 中间像素 R)，模拟浮点后端的输入准备
  blob_seen: Cell<Option<(f32, f32)>>,
}

impl InferenceEngine<640, 640> for FakeEngine {
  type Error = EngineFailed;

  fn forward(&self, frame: &RgbNhwcFrame<640, 640>) -> Result<ScrfdOutputs, Self::Error> {
    let data = frame.as_nhwc();
    let middle = (320 * 640 + 320) * 3;
    self.seen.set(Some((data[0], data[middle])));
    let blob = frame.to_nchw_blob();
    self.blob_seen.set(Some((blob[0], blob[320 * 640 + 320])));
    if self.fail {
      return Err(EngineFailed);
    }
    Ok(ScrfdOutputs::new(self.tensors.clone()))
  }
}

/// 按步长优先顺序生成全零输出
fn blank_outputs() -> Vec<Vec<f32>> {
  GRIDS
    .iter()
    .flat_map(|&(_, grid)| {
      let anchors = grid * grid * ANCHORS;
      [
        vec![0.0; anchors],
        vec![0.0; anchors * 4],
        vec![0.0; anchors * 8],
      ]
    })
    .collect()
}

fn put(
  outputs: &mut [Vec<f32>],
  level: usize,
  (row, col, anchor): (usize, usize, usize),
  score: f32,
  bbox: [f32; 4],
  landmarks: [f32; 8],
) {
  let grid = GRIDS[level].1;
  let idx = (row * grid + col) * ANCHORS + anchor;
  outputs[level * 3][idx] = score;
  outputs[level * 3 + 1][idx * 4..idx * 4 + 4].copy_from_slice(&bbox);
  outputs[level * 3 + 2][idx * 8..idx * 8 + 8].copy_from_slice(&landmarks);
}

/// 三个候选：步长 8 的目标，步长 16 上与之重合的低分框，步长 32 上另一个目标
fn scene_outputs() -> Vec<Vec<f32>> {
  let mut outputs = blank_outputs();
  put(
    &mut outputs,
    0,
    (30, 40, 0),
    0.9,
    [2.0; 4],
    [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
  );
  put(&mut outputs, 1, (15, 20, 2), 0.7, [1.0; 4], [0.0; 8]);
  put(&mut outputs, 2, (10, 5, 1), 0.6, [1.0; 4], [0.0; 8]);
  put(&mut outputs, 2, (0, 0, 0), 0.5, [1.0; 4], [0.0; 8]);
  outputs
}

fn engine(tensors: Vec<Vec<f32>>) -> FakeEngine {
  FakeEngine {
    tensors,
    fail: false,
    seen: Cell::new(None),
    blob_seen: Cell::new(None),
  }
}

fn wide_image() -> RgbImage {
  RgbImage::from_pixel(1280, 640, Rgb([200, 100, 50]))
}

#[test]
fn detects_in_original_coordinates() {
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), ScrfdConfig::default());
  let result = model.infer(&wide_image()).unwrap();

  assert_eq!(result.len(), 2);
  let first = &result.items[0];
  assert_eq!(first.score, 0.9);
  assert_eq!(first.bbox, BoundingBox::new(608, 128, 64, 64));
  assert_eq!(
    first.landmarks,
    [
      Point::new(640, 160),
      Point::new(656, 160),
      Point::new(640, 176),
      Point::new(656, 176),
    ]
  );

  let second = &result.items[1];
  assert_eq!(second.score, 0.6);
  assert_eq!(second.bbox, BoundingBox::new(256, 256, 128, 128));
  assert_eq!(second.landmarks, [Point::new(320, 320); 4]);
}

#[test]
fn engine_receives_letterboxed_frame() {
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), ScrfdConfig::default());
  model.infer(&wide_image()).unwrap();
  // 上方 160 行为填充，中间行来自原图
  assert_eq!(model.engine().seen.get(), Some((0, 200)));

  let (pad, content) = model.engine().blob_seen.get().unwrap();
  assert!((pad - (0.0 - 127.5) / 128.0).abs() < 1e-6);
  assert!((content - (200.0 - 127.5) / 128.0).abs() < 1e-6);
}

#[test]
fn pure_detect_matches_model() {
  let outputs = ScrfdOutputs::new(scene_outputs());
  let config = ScrfdConfig::default();
  let triples = outputs.triples(&config).unwrap();
  let result = detect(ImageSize::new(1280, 640), &triples, &config).unwrap();
  assert_eq!(result.len(), 2);
  assert_eq!(result.items[0].bbox, BoundingBox::new(608, 128, 64, 64));
}

#[test]
fn raised_threshold_drops_weak_candidates() {
  let config = ScrfdConfig::default().with_confidence_threshold(0.65);
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), config);
  let result = model.infer(&wide_image()).unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(result.items[0].score, 0.9);
}

#[test]
fn stretch_mode_scales_axes_independently() {
  let config = ScrfdConfig::default().with_keep_ratio(false);
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), config);
  let result = model.infer(&wide_image()).unwrap();
  // 304x224 处的 32x32 框, 横向放大 2 倍, 纵向不变
  assert_eq!(result.items[0].bbox, BoundingBox::new(608, 224, 64, 32));
}

#[test]
fn short_tensor_is_reported_with_stride() {
  let mut outputs = scene_outputs();
  outputs[3].pop();
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(outputs), ScrfdConfig::default());
  let err = model.infer(&wide_image()).unwrap_err();
  assert!(matches!(
    err,
    ScrfdModelError::Pipeline(ScrfdError::TensorShapeMismatch {
      stride: 16,
      kind: TensorKind::Score,
      expected: 6400,
      actual: 6399,
    })
  ));
}

#[test]
fn missing_outputs_are_rejected() {
  let mut outputs = scene_outputs();
  outputs.truncate(6);
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(outputs), ScrfdConfig::default());
  let err = model.infer(&wide_image()).unwrap_err();
  assert!(matches!(
    err,
    ScrfdModelError::Pipeline(ScrfdError::OutputCountMismatch {
      expected: 9,
      actual: 6
    })
  ));
}

#[test]
fn engine_failure_is_propagated() {
  let mut fake = engine(scene_outputs());
  fake.fail = true;
  let model: Scrfd<_, 640, 640> = Scrfd::new(fake, ScrfdConfig::default());
  let err = model.infer(&wide_image()).unwrap_err();
  assert!(matches!(err, ScrfdModelError::Engine(EngineFailed)));
}

#[test]
fn empty_image_is_rejected_before_inference() {
  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), ScrfdConfig::default());
  let err = model.infer(&RgbImage::new(0, 10)).unwrap_err();
  assert!(matches!(
    err,
    ScrfdModelError::Pipeline(ScrfdError::InvalidImage {
      width: 0,
      height: 10
    })
  ));
  assert_eq!(model.engine().seen.get(), None);
}

#[test]
fn one_shot_task_writes_record() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("out").join("faces.json");
  let url = Url::parse(&format!("record://{}", path.display())).unwrap();

  let model: Scrfd<_, 640, 640> = Scrfd::new(engine(scene_outputs()), ScrfdConfig::default());
  let output = OutputWrapper::from_url(&url).unwrap();
  OneShotTask
    .run_task(ImageFileInput::from(wide_image()), model, output)
    .unwrap();

  let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  assert_eq!(value["image"]["width"], 1280);
  let detections = value["detections"].as_array().unwrap();
  assert_eq!(detections.len(), 2);
  assert_eq!(detections[0]["bbox"], serde_json::json!([608, 128, 64, 64]));
}
