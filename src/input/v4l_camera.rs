// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头输入源
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

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, frame::yuyv_to_rgb};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lCameraInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开设备 {0}: {1}")]
  OpenDevice(String, std::io::Error),
  #[error("设备不支持 YUYV 格式，实际格式: {0}")]
  UnsupportedFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// V4L2 摄像头输入源
///
/// 释放摄像头即 drop 本结构：先释放捕获流，再关闭设备。
pub struct V4lCameraInput {
  /// 捕获流（持有设备句柄的引用计数）
  stream: Option<Stream<'static>>,
  /// V4L2 设备
  _device: Device,
  /// 设备路径
  path: String,
  /// 帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl FromUrlWithScheme for V4lCameraInput {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4lCameraInput {
  type Error = V4lCameraInputError;

  /// `v4l2:///dev/video0?width=640&height=480`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4lCameraInputError::SchemeMismatch);
    }

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => width = v.parse().unwrap_or(DEFAULT_WIDTH),
        "height" => height = v.parse().unwrap_or(DEFAULT_HEIGHT),
        _ => warn!("忽略未知摄像头参数: {}={}", k, v),
      }
    }

    Self::open(url.path(), width, height)
  }
}

impl V4lCameraInput {
  /// 打开摄像头并开始采集
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lCameraInputError> {
    info!("打开摄像头: {}", device_path);
    let device = Device::with_path(device_path)
      .map_err(|e| V4lCameraInputError::OpenDevice(device_path.to_string(), e))?;

    // 设置视频格式
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lCameraInputError::UnsupportedFormat(
        format.fourcc.to_string(),
      ));
    }

    info!(
      "摄像头格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;

    Ok(Self {
      stream: Some(stream),
      _device: device,
      path: device_path.to_string(),
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

impl Drop for V4lCameraInput {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    info!("摄像头已释放: {}", self.path);
  }
}

impl Iterator for V4lCameraInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb = yuyv_to_rgb(buffer, self.width, self.height);
        let image = RgbImage::from_raw(self.width, self.height, rgb)?;

        let frame = Frame::new(
          image,
          self.frame_index,
          self.start_time.elapsed().as_millis() as u64,
        );
        self.frame_index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("无法捕获帧: {}", e);
        None
      }
    }
  }
}
