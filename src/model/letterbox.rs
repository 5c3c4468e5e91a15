// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/model/letterbox.rs - 等比缩放与填充
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

use image::{Rgb, RgbImage, imageops::FilterType};

const PAD_VALUE: u8 = 114;

/// 原图到模型输入的几何变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  /// 缩放比例
  pub scale: f32,
  /// 水平方向左侧填充像素
  pub pad_x: f32,
  /// 垂直方向上侧填充像素
  pub pad_y: f32,
  /// 原图宽度
  pub src_width: u32,
  /// 原图高度
  pub src_height: u32,
}

impl Letterbox {
  pub fn new(src_width: u32, src_height: u32, size: u32) -> Self {
    let scale = (size as f32 / src_width as f32).min(size as f32 / src_height as f32);
    let (new_w, new_h) = Self::scaled_dims(src_width, src_height, scale, size);
    Self {
      scale,
      pad_x: ((size - new_w) / 2) as f32,
      pad_y: ((size - new_h) / 2) as f32,
      src_width,
      src_height,
    }
  }

  fn scaled_dims(src_width: u32, src_height: u32, scale: f32, size: u32) -> (u32, u32) {
    let new_w = ((src_width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((src_height as f32 * scale).round() as u32).clamp(1, size);
    (new_w, new_h)
  }

  /// 缩放并填充到 `size x size`
  pub fn apply(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let letterbox = Letterbox::new(image.width(), image.height(), size);
    let (new_w, new_h) =
      Self::scaled_dims(image.width(), image.height(), letterbox.scale, size);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    image::imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    (canvas, letterbox)
  }

  /// 将模型输入坐标系中的 xyxy 框映射回原图归一化坐标
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.src_width as f32;
    let h = self.src_height as f32;
    let x_min = ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w);
    let y_min = ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h);
    let x_max = ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w);
    let y_max = ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h);
    [x_min / w, y_min / h, x_max / w, y_max / h]
  }
}
