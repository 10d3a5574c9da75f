// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/letterbox.rs - 保持宽高比的缩放与填充
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

use fast_image_resize::{self as fir, FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbImage;
use tracing::debug;

use crate::{frame::RgbNhwcFrame, model::ScrfdError};

const RGB_CHANNELS: usize = 3;
/// 填充区域的像素值
const PAD_VALUE: u8 = 0;

/// 原始图像尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

impl ImageSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl From<&RgbImage> for ImageSize {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self { width, height }
  }
}

/// 网络输入尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
  pub width: u32,
  pub height: u32,
}

impl InputSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl Default for InputSize {
  fn default() -> Self {
    Self::new(640, 640)
  }
}

/// 一次检测调用的缩放/填充方案。
///
/// 由原图尺寸计算得到，之后只读；解码阶段用它把网络输入空间的坐标
/// 映射回原图像素空间。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxPlan {
  pub source: ImageSize,
  pub resized_width: u32,
  pub resized_height: u32,
  pub pad_top: u32,
  pub pad_left: u32,
  pub input_width: u32,
  pub input_height: u32,
}

impl LetterboxPlan {
  /// 计算缩放方案。
  ///
  /// `keep_ratio` 为 `false` 或原图为正方形时直接拉伸到输入尺寸，不做填充。
  /// 所有取整都使用 `f32::round`，两个分支保持一致。
  pub fn new(source: ImageSize, input: InputSize, keep_ratio: bool) -> Result<Self, ScrfdError> {
    if source.width == 0 || source.height == 0 {
      return Err(ScrfdError::InvalidImage {
        width: source.width,
        height: source.height,
      });
    }
    if input.width == 0 || input.height == 0 {
      return Err(ScrfdError::InvalidImage {
        width: input.width,
        height: input.height,
      });
    }

    let mut plan = LetterboxPlan {
      source,
      resized_width: input.width,
      resized_height: input.height,
      pad_top: 0,
      pad_left: 0,
      input_width: input.width,
      input_height: input.height,
    };

    if keep_ratio && source.width != source.height {
      let hw_scale = source.height as f32 / source.width as f32;
      if hw_scale > 1.0 {
        // 竖图：高度撑满，水平居中
        let resized_width = ((input.width as f32 / hw_scale).round() as u32).clamp(1, input.width);
        plan.resized_width = resized_width;
        plan.pad_left = ((input.width - resized_width) as f32 * 0.5).round() as u32;
      } else {
        // 横图：宽度撑满，垂直居中
        let resized_height =
          ((input.height as f32 * hw_scale).round() as u32).clamp(1, input.height);
        plan.resized_height = resized_height;
        plan.pad_top = ((input.height - resized_height) as f32 * 0.5).round() as u32;
      }
    }

    debug!(
      "缩放方案: 原图 {}x{} -> {}x{}, 上填充 {}, 左填充 {}",
      source.width,
      source.height,
      plan.resized_width,
      plan.resized_height,
      plan.pad_top,
      plan.pad_left
    );

    Ok(plan)
  }

  /// 右侧填充，吸收取整余量
  pub fn pad_right(&self) -> u32 {
    self.input_width - self.resized_width - self.pad_left
  }

  /// 底部填充，吸收取整余量
  pub fn pad_bottom(&self) -> u32 {
    self.input_height - self.resized_height - self.pad_top
  }

  pub fn ratio_x(&self) -> f32 {
    self.source.width as f32 / self.resized_width as f32
  }

  pub fn ratio_y(&self) -> f32 {
    self.source.height as f32 / self.resized_height as f32
  }

  /// 网络输入空间的点映射回原图空间
  pub fn unmap_point(&self, gx: f32, gy: f32) -> (f32, f32) {
    (
      (gx - self.pad_left as f32) * self.ratio_x(),
      (gy - self.pad_top as f32) * self.ratio_y(),
    )
  }

  /// 网络输入空间的长度映射回原图空间，不涉及填充偏移
  pub fn unmap_extent(&self, width: f32, height: f32) -> (f32, f32) {
    (width * self.ratio_x(), height * self.ratio_y())
  }

  /// 按方案缩放并填充图像，生成网络输入帧。
  ///
  /// 缩放使用区域平均（盒式卷积），填充区域为常量。
  pub fn apply<const W: u32, const H: u32>(
    &self,
    image: &RgbImage,
  ) -> Result<RgbNhwcFrame<W, H>, ScrfdError> {
    if ImageSize::from(image) != self.source {
      return Err(ScrfdError::InvalidImage {
        width: image.width(),
        height: image.height(),
      });
    }
    if (W, H) != (self.input_width, self.input_height) {
      return Err(ScrfdError::FrameSize {
        expected: (self.input_width, self.input_height),
        actual: (W, H),
      });
    }

    let resized = resize_area(image, self.resized_width, self.resized_height)?;

    let input_w = self.input_width as usize;
    let row_len = self.resized_width as usize * RGB_CHANNELS;
    let mut data = vec![PAD_VALUE; input_w * self.input_height as usize * RGB_CHANNELS];
    for (y, src_row) in resized.chunks_exact(row_len).enumerate() {
      let start = ((y + self.pad_top as usize) * input_w + self.pad_left as usize) * RGB_CHANNELS;
      data[start..start + row_len].copy_from_slice(src_row);
    }

    RgbNhwcFrame::try_from(data)
  }
}

fn resize_area(image: &RgbImage, width: u32, height: u32) -> Result<Vec<u8>, ScrfdError> {
  if image.dimensions() == (width, height) {
    return Ok(image.as_raw().clone());
  }

  let src_image = fir::images::ImageRef::new(
    image.width(),
    image.height(),
    image.as_raw(),
    fir::PixelType::U8x3,
  )
  .map_err(|e| ScrfdError::Resize(e.to_string()))?;
  let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8x3);

  let mut resizer = Resizer::new();
  resizer
    .resize(
      &src_image,
      &mut dst_image,
      &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Box)),
    )
    .map_err(|e| ScrfdError::Resize(e.to_string()))?;

  Ok(dst_image.into_vec())
}
