// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/record.rs - 检测结果记录
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

use std::path::Path;

use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, Detection},
  output::Render,
};

/// 把检测结果以 JSON 写入文件，坐标均为原图像素坐标
pub struct RecordOutput {
  path: String,
}

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch(uri.scheme().to_string()));
    }

    Ok(RecordOutput {
      path: uri.path().to_string(),
    })
  }
}

fn detection_json(item: &Detection) -> Value {
  json!({
    "score": item.score,
    "bbox": [item.bbox.x, item.bbox.y, item.bbox.width, item.bbox.height],
    "landmarks": item
      .landmarks
      .iter()
      .map(|p| [p.x, p.y])
      .collect::<Vec<_>>(),
  })
}

/// 生成一帧检测结果的 JSON 记录
pub fn record_json(frame: &RgbImage, result: &DetectResult) -> Value {
  json!({
    "image": { "width": frame.width(), "height": frame.height() },
    "detections": result.iter().map(detection_json).collect::<Vec<_>>(),
  })
}

impl Render<RgbImage, DetectResult> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let text = serde_json::to_string_pretty(&record_json(frame, result))?;
    std::fs::write(&self.path, text)?;
    info!("记录 {} 个检测结果到文件: {}", result.len(), self.path);

    Ok(())
  }
}
