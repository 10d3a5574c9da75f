// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 每个检测结果的关键点数量
pub const LANDMARK_POINTS: usize = 4;

/// 原图像素空间中的轴对齐边框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BoundingBox {
  pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn area(&self) -> f32 {
    self.width.max(0) as f32 * self.height.max(0) as f32
  }

  /// 右下角坐标（不含），在 i64 中计算避免溢出
  fn far_corner(&self) -> (i64, i64) {
    (
      self.x as i64 + self.width as i64,
      self.y as i64 + self.height as i64,
    )
  }

  /// 交并比；任一边框面积为零时返回 0
  pub fn iou(&self, other: &Self) -> f32 {
    let x1 = self.x.max(other.x) as i64;
    let y1 = self.y.max(other.y) as i64;
    let (ax2, ay2) = self.far_corner();
    let (bx2, by2) = other.far_corner();
    let x2 = ax2.min(bx2);
    let y2 = ay2.min(by2);

    let intersection = (x2 - x1).max(0) as f32 * (y2 - y1).max(0) as f32;
    if intersection <= 0.0 {
      return 0.0;
    }

    let union = self.area() + other.area() - intersection;
    if union <= 0.0 {
      0.0
    } else {
      intersection / union
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub const fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }
}

/// 单个检测结果，坐标均位于原图像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub score: f32,
  pub bbox: BoundingBox,
  pub landmarks: [Point; LANDMARK_POINTS],
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 每个步长输出的三类张量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
  Score,
  BoundingBox,
  Landmark,
}

impl TensorKind {
  /// 每个 cell-anchor 占用的数值个数
  pub const fn values_per_anchor(self) -> usize {
    match self {
      TensorKind::Score => 1,
      TensorKind::BoundingBox => 4,
      TensorKind::Landmark => LANDMARK_POINTS * 2,
    }
  }
}

impl fmt::Display for TensorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TensorKind::Score => "分数",
      TensorKind::BoundingBox => "边框",
      TensorKind::Landmark => "关键点",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrfdError {
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImage { width: u32, height: u32 },
  #[error("步长 {stride} 的{kind}张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  TensorShapeMismatch {
    stride: u32,
    kind: TensorKind,
    expected: usize,
    actual: usize,
  },
  #[error("步长无效: {stride}")]
  InvalidStride { stride: u32 },
  #[error("步长输出组数不匹配: 期望 {expected} 组, 实际 {actual} 组")]
  StrideCountMismatch { expected: usize, actual: usize },
  #[error("输出张量个数不匹配: 期望 {expected} 个, 实际 {actual} 个")]
  OutputCountMismatch { expected: usize, actual: usize },
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("帧数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  FrameLength { expected: usize, actual: usize },
  #[error("图像缩放错误: {0}")]
  Resize(String),
}

mod config;
pub mod decode;
pub mod letterbox;
pub mod nms;
#[cfg(feature = "rknpu")]
mod rknn;
mod scrfd;

pub use self::config::{ConfigError, OutputLayout, ScrfdConfig};
pub use self::letterbox::{ImageSize, InputSize, LetterboxPlan};
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnEngineError, RknnScrfd};
pub use self::scrfd::{InferenceEngine, Scrfd, ScrfdModelError, ScrfdOutputs, detect};
