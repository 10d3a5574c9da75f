// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknn.rs - RKNN 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{ConfigError, InferenceEngine, Scrfd, ScrfdConfig, ScrfdOutputs},
};

const SCRFD_NUM_INPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数错误: {0}")]
  ConfigError(#[from] ConfigError),
}

impl From<std::io::Error> for RknnEngineError {
  fn from(err: std::io::Error) -> Self {
    RknnEngineError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnEngineError {
  fn from(err: rknpu::Error) -> Self {
    RknnEngineError::RknnError(err)
  }
}

impl RknnEngineError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnEngineError::ModelInvalid(msg.to_string(), e)
  }
}

/// 运行在 Rockchip NPU 上的 SCRFD 前向
pub struct RknnEngine {
  context: Context,
  num_outputs: usize,
}

/// 以 RKNN 为后端的 SCRFD 模型
pub type RknnScrfd<const W: u32, const H: u32> = Scrfd<RknnEngine, W, H>;

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
  config: ScrfdConfig,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "scrfd";
}

impl FromUrl for RknnEngineBuilder {
  type Error = RknnEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnEngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnEngineBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      config: ScrfdConfig::default().with_query(url)?,
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn config(mut self, config: ScrfdConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<RknnEngine, RknnEngineError> {
    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;
    info!("模型加载完成");

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!(" 查询 SDK 版本失败: {}", e);
        return Err(RknnEngineError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输出数量", e))?;

    let expected_outputs = self.config.strides.len() * 3;
    if num_inputs != SCRFD_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        SCRFD_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(RknnEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }
    if num_outputs as usize != expected_outputs {
      let msg = format!(
        "预期模型输出数量为 {}, 实际为 {}",
        expected_outputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    Ok(RknnEngine {
      context,
      num_outputs: num_outputs as usize,
    })
  }

  /// 加载模型并连同 URL 中的参数一起组装成检测模型
  pub fn build_scrfd<const W: u32, const H: u32>(
    self,
  ) -> Result<RknnScrfd<W, H>, RknnEngineError> {
    let config = self.config.clone();
    let engine = self.build()?;
    Ok(Scrfd::new(engine, config))
  }
}

impl<const W: u32, const H: u32> InferenceEngine<W, H> for RknnEngine {
  type Error = RknnEngineError;

  fn forward(&self, frame: &RgbNhwcFrame<W, H>) -> Result<ScrfdOutputs, Self::Error> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, frame.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let mut tensors = Vec::with_capacity(self.num_outputs);
    for idx in 0..self.num_outputs {
      let data = output.get_f32(idx).map_err(|e| {
        error!("获取第 {} 个输出失败: {}", idx, e);
        RknnEngineError::RknnError(e)
      })?;
      debug!("输出 {}: 长度 {}", idx, data.len());
      tensors.push(data.to_vec());
    }

    Ok(ScrfdOutputs::new(tensors))
  }
}
