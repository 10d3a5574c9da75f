// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, FontError},
  },
};

/// 把检测结果画在原图上并保存为图像文件
pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
}

/// 解析 `r,g,b` 形式的颜色
fn parse_color(key: &str, value: &str) -> Result<[u8; 3], SaveImageFileError> {
  let invalid = || SaveImageFileError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  };
  let channels = value
    .split(',')
    .map(|c| c.trim().parse::<u8>().map_err(|_| invalid()))
    .collect::<Result<Vec<_>, _>>()?;
  channels.try_into().map_err(|_| invalid())
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    // 例如 image:///out/face.png?font=/usr/share/fonts/DejaVuSans.ttf&box_color=0,0,255
    let mut draw = Draw::default();
    for (key, value) in uri.query_pairs() {
      match key.as_ref() {
        "font" => draw = draw.with_font_file(&*value)?,
        "box_color" => draw = draw.with_box_color(parse_color(&key, &value)?),
        "landmark_color" => draw = draw.with_landmark_color(parse_color(&key, &value)?),
        other => warn!("忽略未知的输出参数: {}={}", other, value),
      }
    }

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    warn!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl Render<RgbImage, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_detections(frame, result);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Detection, Point};
  use image::Rgb;

  #[test]
  fn saves_annotated_image_into_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = RgbImage::new(40, 30);
    let result = DetectResult::from(vec![Detection {
      score: 0.8,
      bbox: BoundingBox::new(5, 5, 20, 10),
      landmarks: [Point::new(10, 10); 4],
    }]);
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (40, 30));
    assert_eq!(saved.get_pixel(5, 8), &Rgb([255, 0, 0]));
  }

  #[test]
  fn query_sets_colors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.png");
    let url = Url::parse(&format!(
      "image://{}?box_color=0,0,255&landmark_color=255,255,0",
      path.display()
    ))
    .unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let result = DetectResult::from(vec![Detection {
      score: 0.8,
      bbox: BoundingBox::new(5, 5, 20, 10),
      landmarks: [Point::new(30, 20); 4],
    }]);
    output.render_result(&RgbImage::new(40, 30), &result).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.get_pixel(5, 8), &Rgb([0, 0, 255]));
    assert_eq!(saved.get_pixel(30, 20), &Rgb([255, 255, 0]));
  }

  #[test]
  fn malformed_query_is_rejected() {
    let url = Url::parse("image:///tmp/out.png?box_color=red").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::InvalidValue { key, .. }) if key == "box_color"
    ));

    let url = Url::parse("image:///tmp/out.png?box_color=1,2").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::InvalidValue { .. })
    ));

    let url = Url::parse("image:///tmp/out.png?font=/nonexistent/font.ttf").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::FontError(FontError::IoError(_)))
    ));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("record:///tmp/out.json").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
