// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/config.rs - SCRFD 解码参数
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

use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::model::InputSize;

const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 4;
const SCRFD_CONF_THRESH: f32 = 0.5;
const SCRFD_NMS_THRESH: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("参数 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
}

/// 推理后端输出张量的排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
  /// `[score8, box8, kps8, score16, box16, kps16, ...]`
  #[default]
  StrideMajor,
  /// `[score8, score16, score32, box8, box16, box32, ...]`
  KindMajor,
}

impl OutputLayout {
  /// 第 `level` 个步长的 (分数, 边框, 关键点) 输出下标
  pub fn indices(self, level: usize, levels: usize) -> [usize; 3] {
    match self {
      OutputLayout::StrideMajor => [level * 3, level * 3 + 1, level * 3 + 2],
      OutputLayout::KindMajor => [level, levels + level, 2 * levels + level],
    }
  }
}

impl FromStr for OutputLayout {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "stride" => Ok(OutputLayout::StrideMajor),
      "kind" => Ok(OutputLayout::KindMajor),
      other => Err(ConfigError::InvalidValue {
        key: "layout".to_string(),
        value: other.to_string(),
      }),
    }
  }
}

/// 一次检测调用的全部参数，只读传入，不依赖进程级状态
#[derive(Debug, Clone, PartialEq)]
pub struct ScrfdConfig {
  pub input_size: InputSize,
  pub strides: Vec<u32>,
  pub anchors_per_cell: usize,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub keep_ratio: bool,
  /// NMS 后最多保留的结果数，0 表示不限制
  pub top_k: usize,
  pub output_layout: OutputLayout,
}

impl Default for ScrfdConfig {
  fn default() -> Self {
    Self {
      input_size: InputSize::default(),
      strides: SCRFD_STRIDES.to_vec(),
      anchors_per_cell: SCRFD_ANCHORS_PER_CELL,
      confidence_threshold: SCRFD_CONF_THRESH,
      nms_threshold: SCRFD_NMS_THRESH,
      keep_ratio: true,
      top_k: 0,
      output_layout: OutputLayout::default(),
    }
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

impl ScrfdConfig {
  pub fn with_input_size(mut self, input_size: InputSize) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn with_keep_ratio(mut self, keep_ratio: bool) -> Self {
    self.keep_ratio = keep_ratio;
    self
  }

  /// 用 URL 查询参数覆盖配置，例如 `scrfd:///model.rknn?conf=0.6&nms=0.4`
  pub fn with_query(mut self, url: &Url) -> Result<Self, ConfigError> {
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "conf" => self.confidence_threshold = parse_value(&key, &value)?,
        "nms" => self.nms_threshold = parse_value(&key, &value)?,
        "keep_ratio" => self.keep_ratio = parse_value(&key, &value)?,
        "top_k" => self.top_k = parse_value(&key, &value)?,
        "layout" => self.output_layout = value.parse()?,
        other => warn!("忽略未知的模型参数: {}={}", other, value),
      }
    }
    debug!("模型参数: {:?}", self);
    Ok(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_scrfd() {
    let config = ScrfdConfig::default();
    assert_eq!(config.input_size, InputSize::new(640, 640));
    assert_eq!(config.strides, vec![8, 16, 32]);
    assert_eq!(config.anchors_per_cell, 4);
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.nms_threshold, 0.5);
    assert!(config.keep_ratio);
    assert_eq!(config.top_k, 0);
    assert_eq!(config.output_layout, OutputLayout::StrideMajor);
  }

  #[test]
  fn query_overrides_fields() {
    let url = Url::parse("scrfd:///opt/model.rknn?conf=0.7&nms=0.3&keep_ratio=false&top_k=5&layout=kind&foo=bar").unwrap();
    let config = ScrfdConfig::default().with_query(&url).unwrap();
    assert_eq!(config.confidence_threshold, 0.7);
    assert_eq!(config.nms_threshold, 0.3);
    assert!(!config.keep_ratio);
    assert_eq!(config.top_k, 5);
    assert_eq!(config.output_layout, OutputLayout::KindMajor);
  }

  #[test]
  fn malformed_query_value_fails() {
    let url = Url::parse("scrfd:///opt/model.rknn?conf=high").unwrap();
    let err = ScrfdConfig::default().with_query(&url).unwrap_err();
    assert_eq!(
      err,
      ConfigError::InvalidValue {
        key: "conf".to_string(),
        value: "high".to_string()
      }
    );
  }

  #[test]
  fn layout_indices() {
    assert_eq!(OutputLayout::StrideMajor.indices(1, 3), [3, 4, 5]);
    assert_eq!(OutputLayout::KindMajor.indices(1, 3), [1, 4, 7]);
  }
}
