// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/scrfd.rs - SCRFD 检测流程
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  frame::RgbNhwcFrame,
  model::{
    DetectResult, ImageSize, InputSize, LetterboxPlan, Model, ScrfdConfig, ScrfdError,
    decode::{RawTensorTriple, decode_candidates},
    nms::non_max_suppression,
  },
};

/// 推理后端一次前向得到的全部输出，按后端给出的顺序保存
#[derive(Debug, Clone, Default)]
pub struct ScrfdOutputs {
  tensors: Vec<Vec<f32>>,
}

impl ScrfdOutputs {
  pub fn new(tensors: Vec<Vec<f32>>) -> Self {
    Self { tensors }
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  /// 按配置的输出顺序，把扁平的输出列表整理成每个步长的三元组
  pub fn triples(&self, config: &ScrfdConfig) -> Result<Vec<RawTensorTriple<'_>>, ScrfdError> {
    let levels = config.strides.len();
    if self.tensors.len() != levels * 3 {
      error!(
        "推理输出个数 {} 与步长数 {} 不符",
        self.tensors.len(),
        levels
      );
      return Err(ScrfdError::OutputCountMismatch {
        expected: levels * 3,
        actual: self.tensors.len(),
      });
    }

    Ok(
      (0..levels)
        .map(|level| {
          let [score, bbox, landmarks] = config.output_layout.indices(level, levels);
          RawTensorTriple {
            score: &self.tensors[score],
            bbox: &self.tensors[bbox],
            landmarks: &self.tensors[landmarks],
          }
        })
        .collect(),
    )
  }
}

impl From<Vec<Vec<f32>>> for ScrfdOutputs {
  fn from(tensors: Vec<Vec<f32>>) -> Self {
    Self::new(tensors)
  }
}

/// 执行网络前向的外部推理后端
pub trait InferenceEngine<const W: u32, const H: u32> {
  type Error;

  fn forward(&self, frame: &RgbNhwcFrame<W, H>) -> Result<ScrfdOutputs, Self::Error>;
}

/// 由原图尺寸与网络原始输出得到检测结果：缩放方案 -> 网格解码 -> NMS
pub fn detect(
  image: ImageSize,
  outputs: &[RawTensorTriple<'_>],
  config: &ScrfdConfig,
) -> Result<DetectResult, ScrfdError> {
  let plan = LetterboxPlan::new(image, config.input_size, config.keep_ratio)?;
  detect_with_plan(&plan, outputs, config)
}

fn detect_with_plan(
  plan: &LetterboxPlan,
  outputs: &[RawTensorTriple<'_>],
  config: &ScrfdConfig,
) -> Result<DetectResult, ScrfdError> {
  let candidates = decode_candidates(plan, outputs, config)?;
  let kept = non_max_suppression(&candidates, config.nms_threshold, config.top_k);
  let items: Vec<_> = kept.into_iter().map(|i| candidates[i].clone()).collect();
  debug!("检测到 {} 个目标", items.len());
  Ok(DetectResult::from(items))
}

#[derive(Error, Debug)]
pub enum ScrfdModelError<E> {
  #[error("检测流程错误: {0}")]
  Pipeline(#[from] ScrfdError),
  #[error("推理后端错误: {0}")]
  Engine(E),
}

/// SCRFD 检测模型：缩放填充原图，交给推理后端，再解码输出
pub struct Scrfd<E, const W: u32, const H: u32> {
  engine: E,
  config: ScrfdConfig,
}

impl<E: InferenceEngine<W, H>, const W: u32, const H: u32> Scrfd<E, W, H> {
  /// 输入尺寸总是取帧的 `W`x`H`，覆盖配置中的值
  pub fn new(engine: E, config: ScrfdConfig) -> Self {
    let config = config.with_input_size(InputSize::new(W, H));
    Self { engine, config }
  }

  pub fn config(&self) -> &ScrfdConfig {
    &self.config
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }
}

impl<E: InferenceEngine<W, H>, const W: u32, const H: u32> Model for Scrfd<E, W, H> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ScrfdModelError<E::Error>;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let plan = LetterboxPlan::new(
      ImageSize::from(input),
      self.config.input_size,
      self.config.keep_ratio,
    )?;

    debug!("缩放填充输入图像");
    let frame: RgbNhwcFrame<W, H> = plan.apply(input)?;

    debug!("执行模型推理");
    let outputs = self.engine.forward(&frame).map_err(ScrfdModelError::Engine)?;

    debug!("后处理模型输出");
    let triples = outputs.triples(&self.config)?;
    Ok(detect_with_plan(&plan, &triples, &self.config)?)
  }
}
