// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/input.rs - 图像/摄像头输入
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

use std::path::Path;

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_camera")]
mod v4l_camera;
#[cfg(feature = "v4l_camera")]
pub use self::v4l_camera::{V4lCameraInput, V4lCameraInputError};

/// 允许上传的图像扩展名
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 判断文件名的扩展名是否在允许列表中（不区分大小写）
pub fn allowed_file(filename: &str) -> bool {
  Path::new(filename)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      ALLOWED_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 当前构建能否打开该方案的输入
pub fn supports_scheme(scheme: &str) -> bool {
  #[cfg(feature = "v4l_camera")]
  {
    if scheme == V4lCameraInput::SCHEME {
      return true;
    }
  }
  scheme == ImageFileInput::SCHEME
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_camera")]
  #[error("V4L2 摄像头输入错误: {0}")]
  V4lCameraInputError(#[from] V4lCameraInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_camera")]
  V4lCamera(V4lCameraInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_camera")]
    {
      if url.scheme() == V4lCameraInput::SCHEME {
        let input = V4lCameraInput::from_url(url)?;
        return Ok(InputWrapper::V4lCamera(input));
      }
    }

    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }

    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "v4l_camera")]
      InputWrapper::V4lCamera(input) => input.next(),
    }
  }
}
