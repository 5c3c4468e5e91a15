// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui/screens/image_analysis.rs - 图像分析页
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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use iced::{
  Element, Length, Subscription, Task,
  widget::{button, column, container, image, image::Handle, progress_bar, row, text},
};
use rfd::AsyncFileDialog;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  gui::{
    AppState, analyze_frame,
    screens::{Page, Screen, ScreenMessage},
    widgets::{accent, image_handle, results_panel},
  },
  input::{ALLOWED_EXTENSIONS, ImageFileInput},
  output::Analysis,
};

const PROGRESS_STEP: Duration = Duration::from_millis(20);
const PROGRESS_MAX: f32 = 100.0;

#[derive(Debug, Clone, Default)]
pub struct ImageAnalysisScreen {
  preview: Option<Handle>,
  progress: f32,
  analyzing: bool,
  outcome: Option<Arc<Analysis>>,
  annotated: Option<Handle>,
  shown: bool,
  error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ImageAnalysisMessage {
  SelectImage,
  Picked(Option<PathBuf>),
  Decoded(Result<Arc<Frame>, String>),
  Analyzed(Result<Arc<Analysis>, String>),
  Tick,
}

fn screen_message(message: ImageAnalysisMessage) -> ScreenMessage<ImageAnalysisScreen> {
  ScreenMessage::ScreenMessage(message)
}

fn decode(path: PathBuf) -> Result<Arc<Frame>, String> {
  let mut input = ImageFileInput::open(&path).map_err(|e| e.to_string())?;
  input
    .next()
    .map(Arc::new)
    .ok_or_else(|| format!("无法读取图像 {}", path.display()))
}

impl ImageAnalysisScreen {
  /// 进度走完且结果就绪后才展示结果
  fn try_show(&mut self) {
    if self.progress >= PROGRESS_MAX && self.outcome.is_some() {
      self.shown = true;
      self.analyzing = false;
    }
  }

  fn reset(&mut self) {
    *self = Self::default();
  }
}

impl Screen for ImageAnalysisScreen {
  type Message = ImageAnalysisMessage;
  type ParentMessage = Page;

  fn view(&self) -> Element<'_, ScreenMessage<Self>> {
    let mut main = column![text("Image Analysis").size(28).color(accent())].spacing(16);

    let shown_image = if self.shown {
      self.annotated.as_ref()
    } else {
      self.preview.as_ref()
    };
    main = match shown_image {
      Some(handle) => main.push(
        image(handle.clone())
          .width(Length::Fill)
          .height(Length::Fill),
      ),
      None => main.push(
        container(text("Select an image to start"))
          .center_x(Length::Fill)
          .center_y(Length::Fill),
      ),
    };

    if self.analyzing {
      main = main.push(progress_bar(0.0..=PROGRESS_MAX, self.progress));
    }
    if let Some(error) = &self.error {
      main = main.push(text(error.clone()));
    }

    let mut select = button("Select Image");
    if !self.analyzing {
      select = select.on_press(screen_message(ImageAnalysisMessage::SelectImage));
    }
    main = main.push(
      row![
        select,
        button("Back").on_press(ScreenMessage::ParentMessage(Page::Home)),
      ]
      .spacing(10),
    );

    let findings = match (&self.outcome, self.shown) {
      (Some(analysis), true) => analysis.report.findings.as_slice(),
      _ => &[],
    };

    row![
      container(main).width(Length::Fill).height(Length::Fill),
      results_panel("Detection Results", findings),
    ]
    .spacing(20)
    .padding(30)
    .into()
  }

  fn update(&mut self, message: Self::Message, state: &mut AppState) -> Task<ScreenMessage<Self>> {
    match message {
      ImageAnalysisMessage::SelectImage => Task::perform(
        AsyncFileDialog::new()
          .set_title("Select Image")
          .add_filter("Image Files", &ALLOWED_EXTENSIONS[..])
          .pick_file(),
        |handle| {
          screen_message(ImageAnalysisMessage::Picked(
            handle.map(|h| h.path().to_path_buf()),
          ))
        },
      ),
      ImageAnalysisMessage::Picked(None) => Task::none(),
      ImageAnalysisMessage::Picked(Some(path)) => {
        info!("选择图像: {}", path.display());
        self.reset();
        Task::perform(
          async move {
            tokio::task::spawn_blocking(move || decode(path))
              .await
              .map_err(|e| e.to_string())
              .and_then(|decoded| decoded)
          },
          |decoded| screen_message(ImageAnalysisMessage::Decoded(decoded)),
        )
      }
      ImageAnalysisMessage::Decoded(Err(e)) => {
        warn!("图像读取失败: {}", e);
        self.error = Some(e);
        Task::none()
      }
      ImageAnalysisMessage::Decoded(Ok(frame)) => {
        self.preview = Some(image_handle(&frame.image));
        self.analyzing = true;
        self.progress = 0.0;

        let detector = state.detector.clone();
        let annotator = state.annotator.clone();
        Task::perform(
          async move {
            tokio::task::spawn_blocking(move || {
              analyze_frame(&detector, &annotator, &frame)
                .map(Arc::new)
                .map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| e.to_string())
            .and_then(|analysis| analysis)
          },
          |analysis| screen_message(ImageAnalysisMessage::Analyzed(analysis)),
        )
      }
      ImageAnalysisMessage::Analyzed(Ok(analysis)) => {
        info!("分析完成，发现 {} 处病症", analysis.report.findings.len());
        self.annotated = Some(image_handle(&analysis.image));
        self.outcome = Some(analysis);
        self.try_show();
        Task::none()
      }
      ImageAnalysisMessage::Analyzed(Err(e)) => {
        warn!("分析失败: {}", e);
        self.analyzing = false;
        self.error = Some(e);
        Task::none()
      }
      ImageAnalysisMessage::Tick => {
        self.progress = (self.progress + 1.0).min(PROGRESS_MAX);
        self.try_show();
        Task::none()
      }
    }
  }

  fn subscription(&self, _state: &AppState) -> Subscription<ScreenMessage<Self>> {
    if self.analyzing && self.progress < PROGRESS_MAX {
      iced::time::every(PROGRESS_STEP).map(|_| ScreenMessage::ScreenMessage(ImageAnalysisMessage::Tick))
    } else {
      Subscription::none()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ::image::RgbImage;

  fn analysis() -> Arc<Analysis> {
    Arc::new(Analysis {
      index: 0,
      image: RgbImage::new(4, 4),
      report: crate::report::Report::from_result(
        &Default::default(),
        &Default::default(),
        0.6,
      ),
    })
  }

  #[test]
  fn result_waits_for_progress() {
    let mut screen = ImageAnalysisScreen {
      analyzing: true,
      ..Default::default()
    };
    screen.outcome = Some(analysis());
    screen.try_show();
    assert!(!screen.shown);

    screen.progress = 99.0;
    screen.progress = (screen.progress + 1.0).min(PROGRESS_MAX);
    screen.try_show();
    assert!(screen.shown);
    assert!(!screen.analyzing);
  }

  #[test]
  fn progress_alone_does_not_show() {
    let mut screen = ImageAnalysisScreen {
      analyzing: true,
      progress: PROGRESS_MAX,
      ..Default::default()
    };
    screen.try_show();
    assert!(!screen.shown);
    assert!(screen.analyzing);
  }

  #[test]
  fn decode_reports_missing_file() {
    assert!(decode(PathBuf::from("/nonexistent/mouth.png")).is_err());
  }
}
