// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui/screens/webcam.rs - 摄像头实时检测页
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

use iced::{
  Element, Length, Subscription, Task,
  widget::{button, column, container, image, image::Handle, row, text},
};
use tracing::{info, warn};

use crate::{
  FromUrl,
  camera::{FeedFrame, FrameFeed},
  gui::{
    AppState,
    screens::{Page, Screen, ScreenMessage},
    widgets::{accent, image_handle, results_panel},
  },
  input::InputWrapper,
  report::Finding,
};

#[derive(Debug, Clone)]
pub struct WebcamScreen {
  seq: u64,
  frame: Option<Handle>,
  findings: Vec<Finding>,
  status: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WebcamMessage {
  Poll,
}

impl WebcamScreen {
  /// 进入页面时打开摄像头；失败只记录在状态栏
  pub fn enter(state: &AppState) -> Self {
    let url = state.camera_url.clone();
    info!("打开摄像头: {}", url);
    let started = state.camera.start(
      move || InputWrapper::from_url(&url),
      state.detector.clone(),
      state.annotator.clone(),
      state.jpeg_quality,
    );

    let status = match started {
      Ok(_) => None,
      Err(e) => {
        warn!("摄像头启动失败: {}", e);
        Some(format!("Could not open webcam: {e}"))
      }
    };
    Self {
      seq: 0,
      frame: None,
      findings: Vec::new(),
      status,
    }
  }

  fn show(&mut self, seq: u64, frame: &FeedFrame) {
    self.seq = seq;
    self.frame = Some(image_handle(&frame.analysis.image));
    self.findings = frame.analysis.report.findings.clone();
  }

  fn poll(&mut self, feed: &FrameFeed) {
    if let Some((seq, frame)) = feed.latest()
      && seq != self.seq
    {
      self.show(seq, &frame);
    }
    if feed.is_closed() && self.status.is_none() {
      self.status = Some("Webcam stopped".to_string());
    }
  }
}

impl Screen for WebcamScreen {
  type Message = WebcamMessage;
  type ParentMessage = Page;

  fn view(&self) -> Element<'_, ScreenMessage<Self>> {
    let mut main = column![text("Real-time Detection").size(28).color(accent())].spacing(16);

    main = match &self.frame {
      Some(handle) => main.push(
        image(handle.clone())
          .width(Length::Fill)
          .height(Length::Fill),
      ),
      None => main.push(
        container(text("Waiting for webcam..."))
          .center_x(Length::Fill)
          .center_y(Length::Fill),
      ),
    };
    if let Some(status) = &self.status {
      main = main.push(text(status.clone()));
    }
    main = main.push(button("Stop Webcam").on_press(ScreenMessage::ParentMessage(Page::Home)));

    row![
      container(main).width(Length::Fill).height(Length::Fill),
      results_panel("Live Detection Results", &self.findings),
    ]
    .spacing(20)
    .padding(30)
    .into()
  }

  fn update(&mut self, message: Self::Message, state: &mut AppState) -> Task<ScreenMessage<Self>> {
    match message {
      WebcamMessage::Poll => {
        let feed: Arc<FrameFeed> = state.camera.feed();
        self.poll(&feed);
        Task::none()
      }
    }
  }

  fn subscription(&self, state: &AppState) -> Subscription<ScreenMessage<Self>> {
    iced::time::every(state.poll_interval)
      .map(|_| ScreenMessage::ScreenMessage(WebcamMessage::Poll))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{DetectItem, DetectResult, LabelMap},
    output::{Annotator, draw::Draw},
    report::CONFIDENCE_THRESHOLD,
  };
  use ::image::RgbImage;

  fn screen() -> WebcamScreen {
    WebcamScreen {
      seq: 0,
      frame: None,
      findings: Vec::new(),
      status: None,
    }
  }

  fn publish(feed: &FrameFeed, score: f32) -> u64 {
    let annotator = Annotator::new(
      Draw::new(None),
      LabelMap::new(vec!["Caries".into()]),
      CONFIDENCE_THRESHOLD,
    );
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score,
      bbox: [0.1, 0.1, 0.6, 0.6],
    }]);
    let analysis = annotator.annotate(&RgbImage::new(16, 16).into(), &result);
    feed.publish(FeedFrame {
      analysis,
      jpeg: Vec::new(),
    })
  }

  #[test]
  fn poll_picks_up_new_frames() {
    let feed = FrameFeed::default();
    feed.reopen();
    let mut screen = screen();

    screen.poll(&feed);
    assert!(screen.frame.is_none());

    let seq = publish(&feed, 0.9);
    screen.poll(&feed);
    assert_eq!(screen.seq, seq);
    assert_eq!(screen.findings.len(), 1);
    assert!(screen.status.is_none());

    publish(&feed, 0.3);
    screen.poll(&feed);
    assert!(screen.findings.is_empty());
  }

  #[test]
  fn poll_reports_closed_feed() {
    let feed = FrameFeed::default();
    let mut screen = screen();
    screen.poll(&feed);
    assert_eq!(screen.status.as_deref(), Some("Webcam stopped"));
  }
}
