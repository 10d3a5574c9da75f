// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::{BoundingBox, DetectResult, Detection};

const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const BOX_THICKNESS: i32 = 2;
const LANDMARK_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const LANDMARK_RADIUS: i32 = 1;
const LABEL_COLOR: [u8; 3] = [0, 255, 0];
const LABEL_FONT_SIZE: f32 = 18.0;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("读取字体文件错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  box_color: [u8; 3],
  box_thickness: i32,
  landmark_color: [u8; 3],
  landmark_radius: i32,
  label_color: [u8; 3],
  font_scale: PxScale,
  /// 没有字体时只画边框与关键点
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      box_thickness: BOX_THICKNESS,
      landmark_color: LANDMARK_COLOR,
      landmark_radius: LANDMARK_RADIUS,
      label_color: LABEL_COLOR,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      font: None,
    }
  }
}

/// 分数标签，保留两位小数
pub fn score_label(score: f32) -> String {
  format!("{:.2}", score)
}

/// 标签左上角位置：文字底边贴在边框上沿，边框贴近图像顶部时下移到图内
pub fn label_origin(bbox: &BoundingBox, text_height: i32) -> (i32, i32) {
  let baseline = bbox.y.max(text_height);
  (bbox.x, baseline - text_height)
}

impl Draw {
  pub fn with_box_color(mut self, color: [u8; 3]) -> Self {
    self.box_color = color;
    self
  }

  pub fn with_landmark_color(mut self, color: [u8; 3]) -> Self {
    self.landmark_color = color;
    self
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  /// 从 TTF/OTF 文件加载标签字体
  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, FontError> {
    let path = path.as_ref();
    let font = FontArc::try_from_vec(std::fs::read(path)?)?;
    info!("加载标签字体: {}", path.display());
    Ok(self.with_font(font))
  }

  // 边框向内加粗；边缘在 i64 中计算并收拢到图像外一像素以内，由 imageproc 裁剪
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BoundingBox) {
    let (iw, ih) = (image.width() as i64, image.height() as i64);
    for t in 0..self.box_thickness as i64 {
      let left = (bbox.x as i64 + t).max(-1);
      let top = (bbox.y as i64 + t).max(-1);
      let right = (bbox.x as i64 + bbox.width as i64 - t).min(iw + 1);
      let bottom = (bbox.y as i64 + bbox.height as i64 - t).min(ih + 1);
      if right <= left || bottom <= top {
        break;
      }
      let rect =
        Rect::at(left as i32, top as i32).of_size((right - left) as u32, (bottom - top) as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }
  }

  fn draw_label(&self, image: &mut RgbImage, item: &Detection) {
    let Some(font) = &self.font else {
      return;
    };
    let label = score_label(item.score);
    let (_, text_height) = text_size(self.font_scale, font, &label);
    let (x, y) = label_origin(&item.bbox, text_height as i32);
    let (w, h) = (image.width() as i32, image.height() as i32);
    if x >= w || y >= h || x < -w {
      return;
    }
    draw_text_mut(
      image,
      Rgb(self.label_color),
      x,
      y,
      self.font_scale,
      font,
      &label,
    );
  }

  /// 在原图的副本上绘制边框、关键点与分数标签，原图保持不变
  pub fn draw_detections(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.clone();
    for item in result.iter() {
      self.draw_bbox(&mut canvas, &item.bbox);
      for point in &item.landmarks {
        draw_filled_circle_mut(
          &mut canvas,
          (point.x, point.y),
          self.landmark_radius,
          Rgb(self.landmark_color),
        );
      }
      self.draw_label(&mut canvas, item);
    }
    canvas
  }
}
