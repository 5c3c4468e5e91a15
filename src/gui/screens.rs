// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui/screens.rs - 页面定义
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

use iced::{Element, Subscription, Task};

use crate::gui::AppState;

pub mod home;
pub mod image_analysis;
pub mod webcam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
  Home,
  ImageAnalysis,
  Webcam,
}

/// 页面内部消息，或交给上层处理的消息
#[derive(Debug, Clone)]
pub enum ScreenMessage<S: Screen> {
  ScreenMessage(S::Message),
  ParentMessage(S::ParentMessage),
}

pub trait Screen: Sized {
  type Message: std::fmt::Debug + Clone;
  type ParentMessage: std::fmt::Debug + Clone;

  fn view(&self) -> Element<'_, ScreenMessage<Self>>;

  fn update(&mut self, message: Self::Message, state: &mut AppState)
  -> Task<ScreenMessage<Self>>;

  fn subscription(&self, _state: &AppState) -> Subscription<ScreenMessage<Self>> {
    Subscription::none()
  }
}
