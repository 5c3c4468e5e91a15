// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui/widgets.rs - 公共界面组件
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

use iced::{
  Color, Element, Length,
  widget::{button, column, container, image::Handle, mouse_area, progress_bar, row, text},
};

use crate::{output::draw::LABEL_COLOR, report::Finding};

pub fn accent() -> Color {
  Color::from_rgb8(LABEL_COLOR[0], LABEL_COLOR[1], LABEL_COLOR[2])
}

fn muted() -> Color {
  Color::from_rgb8(0x7f, 0x8c, 0x8d)
}

/// RGB 图像转换为 iced 图像句柄
pub fn image_handle(image: &::image::RgbImage) -> Handle {
  let mut rgba = Vec::with_capacity(image.as_raw().len() / 3 * 4);
  for pixel in image.as_raw().chunks_exact(3) {
    rgba.extend_from_slice(pixel);
    rgba.push(u8::MAX);
  }
  Handle::from_rgba(image.width(), image.height(), rgba)
}

/// 单条检测结果：病症名称、百分比与进度条
pub fn detection_card<'a, M: 'a>(finding: &Finding) -> Element<'a, M> {
  let percent = (finding.score * 100.0) as u32;
  container(
    column![
      row![
        text(finding.disease.clone()).size(16).width(Length::Fill),
        text(format!("{percent}%")).size(16).color(accent()),
      ],
      progress_bar(0.0..=100.0, percent as f32),
    ]
    .spacing(6),
  )
  .padding(12)
  .width(Length::Fill)
  .style(container::bordered_box)
  .into()
}

/// 首页上的可点击选项卡片
pub fn option_card<'a, M: Clone + 'a>(
  title: &'a str,
  description: &'a str,
  on_press: M,
) -> Element<'a, M> {
  let card = container(
    column![
      text(title).size(20),
      text(description).color(muted()),
      button(text(title)).on_press(on_press.clone()),
    ]
    .spacing(10),
  )
  .padding(20)
  .width(Length::Fixed(280.0))
  .style(container::bordered_box);

  mouse_area(card).on_press(on_press).into()
}

pub fn results_panel<'a, M: 'a>(title: &'a str, findings: &[Finding]) -> Element<'a, M> {
  let mut panel = column![text(title).size(20)].spacing(10);
  if findings.is_empty() {
    panel = panel.push(text("No disease detected").color(muted()));
  }
  for finding in findings {
    panel = panel.push(detection_card(finding));
  }
  container(panel).width(Length::Fixed(320.0)).padding(10).into()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accent_matches_label_color() {
    assert_eq!(accent(), Color::from_rgb8(0x43, 0x61, 0xee));
  }
}
