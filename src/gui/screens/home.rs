// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui/screens/home.rs - 首页
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

use std::convert::Infallible;

use iced::{
  Alignment::Center,
  Element, Task,
  widget::{column, container, row, text},
};

use crate::gui::{
  AppState,
  screens::{Page, Screen, ScreenMessage},
  widgets::{accent, option_card},
};

#[derive(Debug, Clone)]
pub struct HomeScreen;

impl Screen for HomeScreen {
  type Message = Infallible;
  type ParentMessage = Page;

  fn view(&self) -> Element<'_, ScreenMessage<Self>> {
    let content = column![
      text("AI-Powered Oral Disease Detection")
        .size(32)
        .color(accent()),
      text("Detect oral diseases using advanced AI technology").size(18),
      row![
        option_card(
          "Image Detection",
          "Upload and analyze dental images",
          ScreenMessage::ParentMessage(Page::ImageAnalysis),
        ),
        option_card(
          "Webcam Detection",
          "Real-time detection using webcam",
          ScreenMessage::ParentMessage(Page::Webcam),
        ),
      ]
      .spacing(20),
    ]
    .spacing(20)
    .padding(20)
    .align_x(Center);

    container(content)
      .center_x(iced::Length::Fill)
      .center_y(iced::Length::Fill)
      .into()
  }

  fn update(&mut self, message: Self::Message, _state: &mut AppState) -> Task<ScreenMessage<Self>> {
    match message {}
  }
}
