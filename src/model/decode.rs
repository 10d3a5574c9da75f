// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 多步长网格解码
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

use std::cmp::Ordering;

use tracing::{debug, error};

use crate::model::{
  BoundingBox, Detection, InputSize, LANDMARK_POINTS, LetterboxPlan, Point, ScrfdConfig,
  ScrfdError, TensorKind,
};

/// 单个步长的网格尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideLevel {
  pub stride: u32,
  pub grid_width: usize,
  pub grid_height: usize,
  pub anchors_per_cell: usize,
}

impl StrideLevel {
  pub fn new(stride: u32, input: InputSize, anchors_per_cell: usize) -> Self {
    Self {
      stride,
      grid_width: (input.width / stride) as usize,
      grid_height: (input.height / stride) as usize,
      anchors_per_cell,
    }
  }

  /// cell-anchor 总数
  pub fn anchors(&self) -> usize {
    self.grid_width * self.grid_height * self.anchors_per_cell
  }

  pub fn expected_len(&self, kind: TensorKind) -> usize {
    self.anchors() * kind.values_per_anchor()
  }
}

/// 推理后端给出的单个步长的原始输出，行优先 (行, 列, anchor) 排列
#[derive(Debug, Clone, Copy)]
pub struct RawTensorTriple<'a> {
  pub score: &'a [f32],
  pub bbox: &'a [f32],
  pub landmarks: &'a [f32],
}

/// 校验过长度的单步长张量视图，按 (行, 列, anchor) 取值
#[derive(Debug, Clone, Copy)]
pub struct StrideView<'a> {
  level: StrideLevel,
  tensors: RawTensorTriple<'a>,
}

impl<'a> StrideView<'a> {
  pub fn new(level: StrideLevel, tensors: RawTensorTriple<'a>) -> Result<Self, ScrfdError> {
    let checks = [
      (TensorKind::Score, tensors.score.len()),
      (TensorKind::BoundingBox, tensors.bbox.len()),
      (TensorKind::Landmark, tensors.landmarks.len()),
    ];
    for (kind, actual) in checks {
      let expected = level.expected_len(kind);
      if actual != expected {
        error!(
          "步长 {}: {}张量长度 {} 与网格 {}x{}x{} 不符, 期望 {}",
          level.stride,
          kind,
          actual,
          level.grid_height,
          level.grid_width,
          level.anchors_per_cell,
          expected
        );
        return Err(ScrfdError::TensorShapeMismatch {
          stride: level.stride,
          kind,
          expected,
          actual,
        });
      }
    }

    Ok(Self { level, tensors })
  }

  pub fn level(&self) -> StrideLevel {
    self.level
  }

  fn index(&self, row: usize, col: usize, anchor: usize) -> usize {
    (row * self.level.grid_width + col) * self.level.anchors_per_cell + anchor
  }

  pub fn score(&self, row: usize, col: usize, anchor: usize) -> f32 {
    self.tensors.score[self.index(row, col, anchor)]
  }

  /// 到 cell 中心的 (左, 上, 右, 下) 距离，单位为步长
  pub fn bbox(&self, row: usize, col: usize, anchor: usize) -> [f32; 4] {
    let base = self.index(row, col, anchor) * 4;
    std::array::from_fn(|k| self.tensors.bbox[base + k])
  }

  /// 关键点相对 cell 的 (x, y) 偏移，单位为步长
  pub fn landmarks(&self, row: usize, col: usize, anchor: usize) -> [f32; LANDMARK_POINTS * 2] {
    let base = self.index(row, col, anchor) * LANDMARK_POINTS * 2;
    std::array::from_fn(|k| self.tensors.landmarks[base + k])
  }
}

/// 解码所有步长，返回分数超过阈值的候选。
///
/// 所有步长的张量都先校验，任何一个长度不符都不会产生候选。
/// 候选按 步长 -> 行 -> 列 -> anchor 的顺序追加。
pub fn decode_candidates(
  plan: &LetterboxPlan,
  outputs: &[RawTensorTriple<'_>],
  config: &ScrfdConfig,
) -> Result<Vec<Detection>, ScrfdError> {
  if outputs.len() != config.strides.len() {
    error!(
      "输出组数 {} 与步长数 {} 不符",
      outputs.len(),
      config.strides.len()
    );
    return Err(ScrfdError::StrideCountMismatch {
      expected: config.strides.len(),
      actual: outputs.len(),
    });
  }

  if let Some(&stride) = config.strides.iter().find(|&&s| s == 0) {
    error!("步长必须为正数");
    return Err(ScrfdError::InvalidStride { stride });
  }

  let views = config
    .strides
    .iter()
    .zip(outputs)
    .map(|(&stride, &tensors)| {
      let level = StrideLevel::new(stride, config.input_size, config.anchors_per_cell);
      StrideView::new(level, tensors)
    })
    .collect::<Result<Vec<_>, _>>()?;

  let mut candidates = Vec::new();
  for view in &views {
    let before = candidates.len();
    decode_level(view, plan, config.confidence_threshold, &mut candidates);
    debug!(
      "步长 {}: 网格 {}x{}, 候选 {} 个",
      view.level.stride,
      view.level.grid_height,
      view.level.grid_width,
      candidates.len() - before
    );
  }

  Ok(candidates)
}

fn decode_level(
  view: &StrideView<'_>,
  plan: &LetterboxPlan,
  confidence_threshold: f32,
  candidates: &mut Vec<Detection>,
) {
  let level = view.level;
  let stride = level.stride as f32;

  for i in 0..level.grid_height {
    for j in 0..level.grid_width {
      for k in 0..level.anchors_per_cell {
        // NaN 与任何阈值都不构成“大于”
        let score = view.score(i, j, k);
        if score.partial_cmp(&confidence_threshold) != Some(Ordering::Greater) {
          continue;
        }

        let (cell_x, cell_y) = (j as f32, i as f32);
        let [l, t, r, b] = view.bbox(i, j, k);
        let (x, y) = plan.unmap_point((cell_x - l) * stride, (cell_y - t) * stride);
        let (w, h) = plan.unmap_extent((r + l) * stride, (b + t) * stride);
        let bbox = BoundingBox::new(
          x.round() as i32,
          y.round() as i32,
          w.round() as i32,
          h.round() as i32,
        );

        let kps = view.landmarks(i, j, k);
        let landmarks = std::array::from_fn(|p| {
          let (px, py) = plan.unmap_point(
            (cell_x + kps[2 * p]) * stride,
            (cell_y + kps[2 * p + 1]) * stride,
          );
          Point::new(px.round() as i32, py.round() as i32)
        });

        candidates.push(Detection {
          score,
          bbox,
          landmarks,
        });
      }
    }
  }
}
