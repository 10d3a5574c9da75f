// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - NHWC 网络输入帧定义
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

use crate::model::ScrfdError;

const RGB_CHANNELS: usize = 3;

/// SCRFD 预处理均值
pub const BLOB_MEAN: f32 = 127.5;
/// SCRFD 预处理缩放
pub const BLOB_SCALE: f32 = 1.0 / 128.0;

/// 已经缩放填充到网络输入尺寸的 RGB 帧，按 NHWC 排列
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = ScrfdError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    let expected = RGB_CHANNELS * W as usize * H as usize;
    if data.len() != expected {
      return Err(ScrfdError::FrameLength {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0u8; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 生成浮点推理后端使用的 NCHW 输入：`(x - 127.5) / 128`，RGB 通道顺序
  pub fn to_nchw_blob(&self) -> Vec<f32> {
    let plane = W as usize * H as usize;
    let mut blob = vec![0.0f32; plane * RGB_CHANNELS];
    for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for (c, &value) in pixel.iter().enumerate() {
        blob[c * plane + idx] = (value as f32 - BLOB_MEAN) * BLOB_SCALE;
      }
    }
    blob
  }
}

impl<const W: u32, const H: u32> AsRef<[u8]> for RgbNhwcFrame<W, H> {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}
