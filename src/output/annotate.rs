// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/output/annotate.rs - 检测结果标注与编码
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

use std::sync::Arc;

use image::{ExtendedColorType, ImageEncoder, RgbImage, codecs::jpeg::JpegEncoder};

use crate::{
  frame::Frame,
  model::{DetectResult, LabelMap},
  output::draw::Draw,
  report::{CONFIDENCE_THRESHOLD, Report},
};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// 一帧的分析结果：标注后的图像与报告
#[derive(Debug, Clone)]
pub struct Analysis {
  pub index: u64,
  pub image: RgbImage,
  pub report: Report,
}

impl Analysis {
  pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    encode_jpeg(&self.image, quality)
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
    image.as_raw(),
    image.width(),
    image.height(),
    ExtendedColorType::Rgb8,
  )?;
  Ok(buffer)
}

/// 绘制工具、类别标签与显示阈值的组合，可在线程间共享
#[derive(Clone)]
pub struct Annotator {
  draw: Arc<Draw>,
  labels: Arc<LabelMap>,
  threshold: f32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new(Draw::default(), LabelMap::default(), CONFIDENCE_THRESHOLD)
  }
}

impl Annotator {
  pub fn new(draw: Draw, labels: LabelMap, threshold: f32) -> Self {
    Self {
      draw: Arc::new(draw),
      labels: Arc::new(labels),
      threshold,
    }
  }

  pub fn labels(&self) -> &LabelMap {
    &self.labels
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn report(&self, result: &DetectResult) -> Report {
    Report::from_result(result, &self.labels, self.threshold)
  }

  pub fn annotate(&self, frame: &Frame, result: &DetectResult) -> Analysis {
    let report = self.report(result);
    let mut image = frame.image.clone();
    self.draw.draw_findings(&mut image, &report.findings);
    Analysis {
      index: frame.index,
      image,
      report,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use image::Rgb;

  fn annotator() -> Annotator {
    Annotator::new(
      Draw::new(None),
      LabelMap::new(vec!["Caries".into()]),
      CONFIDENCE_THRESHOLD,
    )
  }

  #[test]
  fn low_confidence_is_not_drawn() {
    let frame = Frame::from(RgbImage::new(40, 40));
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.3,
      bbox: [0.1, 0.1, 0.6, 0.6],
    }]);
    let analysis = annotator().annotate(&frame, &result);
    assert!(analysis.report.is_empty());
    assert!(analysis.image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn confident_detection_is_drawn_and_reported() {
    let frame = Frame::new(RgbImage::new(40, 40), 7, 0);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.8,
      bbox: [0.1, 0.1, 0.6, 0.6],
    }]);
    let analysis = annotator().annotate(&frame, &result);
    assert_eq!(analysis.index, 7);
    assert_eq!(analysis.report.findings[0].disease, "Caries");
    assert_eq!(analysis.image.get_pixel(4, 10), &Rgb(crate::output::draw::LABEL_COLOR));
    // 原帧保持不变
    assert!(frame.image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn jpeg_has_soi_marker() {
    let bytes = encode_jpeg(&RgbImage::new(8, 8), DEFAULT_JPEG_QUALITY).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
  }
}
