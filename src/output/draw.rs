// 该文件是 Kouqiang （口腔） 项目的一部分。
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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::report::Finding;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 18;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 无字体时每字符平均宽度（粗略估计）
const LABEL_BASELINE: i32 = 4;
const BOX_THICKNESS: i32 = 2;
/// 主题蓝 #4361ee
pub const LABEL_COLOR: [u8; 3] = [67, 97, 238];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 未配置字体时依次尝试的系统字体
const SYSTEM_FONTS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("字体文件无效: {0}")]
  Invalid(String),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_color: [u8; 3],
  warned_no_font: AtomicBool,
}

impl Default for Draw {
  fn default() -> Self {
    let font = SYSTEM_FONTS
      .iter()
      .map(PathBuf::from)
      .filter(|path| path.exists())
      .find_map(|path| load_font(&path).ok());
    Self::new(font)
  }
}

pub fn load_font(path: &Path) -> Result<FontArc, FontError> {
  let data = std::fs::read(path).map_err(|e| FontError::Io(path.display().to_string(), e))?;
  let font =
    FontArc::try_from_vec(data).map_err(|_| FontError::Invalid(path.display().to_string()))?;
  info!("加载标签字体: {}", path.display());
  Ok(font)
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_color: LABEL_COLOR,
      warned_no_font: AtomicBool::new(false),
    }
  }

  /// 优先使用配置的字体，否则回退到系统字体
  pub fn with_font_file(path: Option<&Path>) -> Result<Self, FontError> {
    match path {
      Some(path) => Ok(Self::new(Some(load_font(path)?))),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在图像上绘制所有发现的边框与标签
  pub fn draw_findings(&self, image: &mut RgbImage, findings: &[Finding]) {
    for finding in findings {
      self.draw_bbox_with_label(image, &finding.bbox, &finding.label());
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = ((bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.label_color);

    // 绘制边框（加粗为2像素）
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 标签放在边框下方，超出图像时移入框内
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (tw, th) = text_size(scale, font, label);
        (tw as i32, th as i32)
      }
      None => (
        (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32,
        LABEL_TEXT_HEIGHT,
      ),
    };
    let label_height = text_height + LABEL_BASELINE;
    let label_y = if y_max + label_height <= h {
      y_max
    } else {
      (y_max - label_height).max(0)
    };
    let label_width = text_width.min(w - x_min);

    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(x_min, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);

    match &self.font {
      Some(font) => {
        draw_text_mut(image, Rgb(TEXT_COLOR), x_min, label_y, scale, font, label);
      }
      None => {
        if !self.warned_no_font.swap(true, Ordering::Relaxed) {
          warn!("未找到可用字体，标签文字将不会被绘制");
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn finding(bbox: [f32; 4]) -> Finding {
    Finding {
      disease: "Caries".to_string(),
      confidence: 90.0,
      score: 0.9,
      bbox,
    }
  }

  #[test]
  fn draws_box_and_label_background() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(100, 100);
    draw.draw_findings(&mut image, &[finding([0.1, 0.1, 0.5, 0.5])]);

    let color = Rgb(LABEL_COLOR);
    // 外框与内框
    assert_eq!(image.get_pixel(10, 30), &color);
    assert_eq!(image.get_pixel(11, 30), &color);
    assert_eq!(image.get_pixel(30, 10), &color);
    assert_eq!(image.get_pixel(50, 30), &color);
    // 框内部不被填充
    assert_eq!(image.get_pixel(30, 30), &Rgb([0, 0, 0]));
    // 标签背景位于框下方
    assert_eq!(image.get_pixel(12, 55), &color);
  }

  #[test]
  fn label_moves_inside_near_bottom_edge() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(100, 100);
    draw.draw_findings(&mut image, &[finding([0.1, 0.1, 0.9, 0.99])]);
    // 99 + 22 > 100，标签上移到框内
    assert_eq!(image.get_pixel(20, 90), &Rgb(LABEL_COLOR));
  }

  #[test]
  fn degenerate_box_is_skipped() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(50, 50);
    draw.draw_findings(&mut image, &[finding([0.5, 0.5, 0.5, 0.5])]);
    assert!(image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::with_font_file(Some(Path::new("/nonexistent/font.ttf"))),
      Err(FontError::Io(_, _))
    ));
  }
}
