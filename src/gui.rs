// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/gui.rs - 桌面前端
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

//! 基于 iced 的桌面应用：首页、图像分析页与摄像头页

use std::sync::Arc;
use std::time::Duration;

use iced::{Element, Size, Subscription, Task, window};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  camera::CameraSession,
  config::AppConfig,
  frame::Frame,
  model::{DetectResult, Model},
  output::{Analysis, Annotator},
};

mod screens;
mod widgets;

use self::screens::{
  Page, Screen, ScreenMessage, home::HomeScreen, image_analysis::ImageAnalysisScreen,
  webcam::WebcamScreen,
};

#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct DetectorError(String);

type InferFn = dyn Fn(&Frame) -> Result<DetectResult, DetectorError> + Send + Sync;

/// 类型擦除后的检测模型，可在界面线程与后台任务之间共享
#[derive(Clone)]
pub struct Detector {
  infer: Arc<InferFn>,
}

impl Detector {
  pub fn new<M>(model: M) -> Self
  where
    M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
    M::Error: std::fmt::Display,
  {
    Self {
      infer: Arc::new(move |frame| {
        model
          .infer(frame)
          .map_err(|e| DetectorError(e.to_string()))
      }),
    }
  }
}

impl Model for Detector {
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, DetectorError> {
    (self.infer)(input)
  }
}

/// 推理并标注一帧
pub fn analyze_frame(
  detector: &Detector,
  annotator: &Annotator,
  frame: &Frame,
) -> Result<Analysis, DetectorError> {
  let result = detector.infer(frame)?;
  Ok(annotator.annotate(frame, &result))
}

/// 各页面共享的状态
pub struct AppState {
  pub detector: Detector,
  pub annotator: Annotator,
  pub camera: CameraSession,
  pub camera_url: Url,
  pub poll_interval: Duration,
  pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub enum Message {
  Home(ScreenMessage<HomeScreen>),
  ImageAnalysis(ScreenMessage<ImageAnalysisScreen>),
  Webcam(ScreenMessage<WebcamScreen>),
  CloseRequested,
}

enum ScreenData {
  Home(HomeScreen),
  ImageAnalysis(ImageAnalysisScreen),
  Webcam(WebcamScreen),
}

enum Outcome {
  Task(Task<Message>),
  Navigate(Page),
}

fn route<S>(
  screen: &mut S,
  message: ScreenMessage<S>,
  state: &mut AppState,
  wrap: fn(ScreenMessage<S>) -> Message,
) -> Outcome
where
  S: Screen<ParentMessage = Page>,
  ScreenMessage<S>: Send + 'static,
{
  match message {
    ScreenMessage::ScreenMessage(message) => Outcome::Task(screen.update(message, state).map(wrap)),
    ScreenMessage::ParentMessage(page) => Outcome::Navigate(page),
  }
}

pub struct KouqiangApp {
  state: AppState,
  screen: ScreenData,
}

impl KouqiangApp {
  pub fn new(config: &AppConfig, detector: Detector, annotator: Annotator) -> Self {
    Self {
      state: AppState {
        detector,
        annotator,
        camera: CameraSession::new(),
        camera_url: config.camera.url.clone(),
        poll_interval: config.camera.poll_interval,
        jpeg_quality: config.display.jpeg_quality,
      },
      screen: ScreenData::Home(HomeScreen),
    }
  }

  fn navigate(&mut self, page: Page) -> Task<Message> {
    if matches!(self.screen, ScreenData::Webcam(_)) && page != Page::Webcam {
      self.state.camera.stop();
    }
    info!("切换页面: {:?}", page);
    self.screen = match page {
      Page::Home => ScreenData::Home(HomeScreen),
      Page::ImageAnalysis => ScreenData::ImageAnalysis(ImageAnalysisScreen::default()),
      Page::Webcam => ScreenData::Webcam(WebcamScreen::enter(&self.state)),
    };
    Task::none()
  }

  pub fn update(&mut self, message: Message) -> Task<Message> {
    let outcome = match (&mut self.screen, message) {
      (_, Message::CloseRequested) => {
        self.state.camera.stop();
        info!("窗口关闭，退出应用");
        return iced::exit();
      }
      (ScreenData::Home(screen), Message::Home(message)) => {
        route(screen, message, &mut self.state, Message::Home)
      }
      (ScreenData::ImageAnalysis(screen), Message::ImageAnalysis(message)) => {
        route(screen, message, &mut self.state, Message::ImageAnalysis)
      }
      (ScreenData::Webcam(screen), Message::Webcam(message)) => {
        route(screen, message, &mut self.state, Message::Webcam)
      }
      // 页面已切换后到达的旧消息
      _ => Outcome::Task(Task::none()),
    };

    match outcome {
      Outcome::Task(task) => task,
      Outcome::Navigate(page) => self.navigate(page),
    }
  }

  pub fn view(&self) -> Element<'_, Message> {
    match &self.screen {
      ScreenData::Home(screen) => screen.view().map(Message::Home),
      ScreenData::ImageAnalysis(screen) => screen.view().map(Message::ImageAnalysis),
      ScreenData::Webcam(screen) => screen.view().map(Message::Webcam),
    }
  }

  pub fn subscription(&self) -> Subscription<Message> {
    let screen = match &self.screen {
      ScreenData::Home(screen) => screen.subscription(&self.state).map(Message::Home),
      ScreenData::ImageAnalysis(screen) => screen
        .subscription(&self.state)
        .map(Message::ImageAnalysis),
      ScreenData::Webcam(screen) => screen.subscription(&self.state).map(Message::Webcam),
    };
    Subscription::batch([
      screen,
      window::close_requests().map(|_| Message::CloseRequested),
    ])
  }
}

/// 启动桌面应用，阻塞直到窗口关闭
pub fn run(config: AppConfig, detector: Detector, annotator: Annotator) -> iced::Result {
  iced::application(
    move || KouqiangApp::new(&config, detector.clone(), annotator.clone()),
    KouqiangApp::update,
    KouqiangApp::view,
  )
  .title("Oral Disease Detection")
  .subscription(KouqiangApp::subscription)
  .window(window::Settings {
    size: Size::new(1200.0, 800.0),
    exit_on_close_request: false,
    ..Default::default()
  })
  .run()
}
