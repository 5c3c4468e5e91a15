// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/config.rs - 配置文件加载
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

//! TOML 配置
//!
//! 所有字段均可省略，省略时使用默认值。配置文件路径来自命令行
//! `--config`，否则读取环境变量 `KOUQIANG_CONFIG`，两者都没有时全部使用默认值。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  model::{LabelError, LabelMap},
  output::{
    Annotator, DEFAULT_JPEG_QUALITY,
    draw::{Draw, FontError},
  },
  report::CONFIDENCE_THRESHOLD,
};

pub const CONFIG_ENV: &str = "KOUQIANG_CONFIG";

const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.7;
const DEFAULT_CAMERA_URL: &str = "v4l2:///dev/video0";
const DEFAULT_POLL_INTERVAL_MS: u64 = 30;
const DEFAULT_WEB_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
const DEFAULT_RESULT_DIR: &str = "static/results";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  Read(String, std::io::Error),
  #[error("配置文件格式错误 {0}: {1}")]
  Parse(String, toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
  #[error("标签文件错误: {0}")]
  Labels(#[from] LabelError),
  #[error("字体错误: {0}")]
  Font(#[from] FontError),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
  model: Option<ModelSection>,
  display: Option<DisplaySection>,
  camera: Option<CameraSection>,
  web: Option<WebSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
  path: Option<PathBuf>,
  labels: Option<PathBuf>,
  input_size: Option<u32>,
  confidence: Option<f32>,
  iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplaySection {
  threshold: Option<f32>,
  font: Option<PathBuf>,
  jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraSection {
  url: Option<String>,
  poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WebSection {
  addr: Option<String>,
  upload_dir: Option<PathBuf>,
  result_dir: Option<PathBuf>,
  max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
  pub path: PathBuf,
  pub labels: Option<PathBuf>,
  pub input_size: u32,
  pub confidence: f32,
  pub iou: f32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
  /// 低于该置信度的检测不显示
  pub threshold: f32,
  pub font: Option<PathBuf>,
  pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
  pub url: Url,
  pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSettings {
  pub addr: String,
  pub upload_dir: PathBuf,
  pub result_dir: PathBuf,
  pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub model: ModelSettings,
  pub display: DisplaySettings,
  pub camera: CameraSettings,
  pub web: WebSettings,
}

impl AppConfig {
  /// 按 `--config`、`KOUQIANG_CONFIG` 的顺序查找配置文件
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let path = path.map(Path::to_path_buf).or(env_path);

    let file = match &path {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        read_config_file(path)?
      }
      None => {
        debug!("未指定配置文件，使用默认配置");
        ConfigFile::default()
      }
    };
    Self::from_file(file)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let file = toml::from_str(content).map_err(|e| ConfigError::Parse("<内联>".into(), e))?;
    Self::from_file(file)
  }

  fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
    let model = file.model.unwrap_or_default();
    let display = file.display.unwrap_or_default();
    let camera = file.camera.unwrap_or_default();
    let web = file.web.unwrap_or_default();

    let camera_url = camera
      .url
      .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string());
    let camera_url = Url::parse(&camera_url)
      .map_err(|e| ConfigError::Invalid(format!("摄像头地址 {camera_url}: {e}")))?;
    if !crate::input::supports_scheme(camera_url.scheme()) {
      warn!("当前构建不支持摄像头地址方案 {}", camera_url.scheme());
    }

    let cfg = Self {
      model: ModelSettings {
        path: model
          .path
          .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
        labels: model.labels,
        input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        confidence: model.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
        iou: model.iou.unwrap_or(DEFAULT_NMS_IOU),
      },
      display: DisplaySettings {
        threshold: display.threshold.unwrap_or(CONFIDENCE_THRESHOLD),
        font: display.font,
        jpeg_quality: display.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
      },
      camera: CameraSettings {
        url: camera_url,
        poll_interval: Duration::from_millis(
          camera.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        ),
      },
      web: WebSettings {
        addr: web.addr.unwrap_or_else(|| DEFAULT_WEB_ADDR.to_string()),
        upload_dir: web
          .upload_dir
          .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
        result_dir: web
          .result_dir
          .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULT_DIR)),
        max_upload_bytes: web.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
      },
    };
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("model.confidence", self.model.confidence),
      ("model.iou", self.model.iou),
      ("display.threshold", self.display.threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
          "{name} 必须在 0 到 1 之间，实际为 {value}"
        )));
      }
    }
    if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
      return Err(ConfigError::Invalid(format!(
        "model.input_size 必须是 32 的正整数倍，实际为 {}",
        self.model.input_size
      )));
    }
    if !(1..=100).contains(&self.display.jpeg_quality) {
      return Err(ConfigError::Invalid(format!(
        "display.jpeg_quality 必须在 1 到 100 之间，实际为 {}",
        self.display.jpeg_quality
      )));
    }
    if self.camera.poll_interval.is_zero() {
      return Err(ConfigError::Invalid(
        "camera.poll_interval_ms 必须大于 0".into(),
      ));
    }
    if self.web.max_upload_bytes == 0 {
      return Err(ConfigError::Invalid("web.max_upload_bytes 必须大于 0".into()));
    }
    Ok(())
  }

  /// 读取标签文件与字体，组装标注器
  pub fn annotator(&self) -> Result<Annotator, ConfigError> {
    let labels = match &self.model.labels {
      Some(path) => LabelMap::from_file(path)?,
      None => LabelMap::default(),
    };
    let draw = Draw::with_font_file(self.display.font.as_deref())?;
    Ok(Annotator::new(draw, labels, self.display.threshold))
  }

  #[cfg(feature = "model_yolo")]
  pub fn model_builder(&self) -> crate::model::YoloBuilder {
    crate::model::YoloBuilder::new(&self.model.path)
      .input_size(self.model.input_size)
      .confidence(self.model.confidence)
      .iou(self.model.iou)
  }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
  let raw = std::fs::read_to_string(path)
    .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
  toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = AppConfig::from_toml_str("").unwrap();
    assert_eq!(cfg.model.path, PathBuf::from("models/best.onnx"));
    assert_eq!(cfg.model.confidence, 0.25);
    assert_eq!(cfg.model.iou, 0.7);
    assert_eq!(cfg.display.threshold, 0.60);
    assert_eq!(cfg.display.jpeg_quality, DEFAULT_JPEG_QUALITY);
    assert_eq!(cfg.camera.url.as_str(), "v4l2:///dev/video0");
    assert_eq!(cfg.camera.poll_interval, Duration::from_millis(30));
    assert_eq!(cfg.web.addr, "127.0.0.1:5000");
    assert_eq!(cfg.web.upload_dir, PathBuf::from("static/uploads"));
    assert_eq!(cfg.web.result_dir, PathBuf::from("static/results"));
    assert_eq!(cfg.web.max_upload_bytes, 16 * 1024 * 1024);
  }

  #[test]
  fn sections_override_defaults() {
    let cfg = AppConfig::from_toml_str(
      r#"
        [model]
        path = "/opt/oral/best.onnx"
        input_size = 320

        [display]
        threshold = 0.75

        [web]
        addr = "0.0.0.0:8080"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.model.path, PathBuf::from("/opt/oral/best.onnx"));
    assert_eq!(cfg.model.input_size, 320);
    assert_eq!(cfg.display.threshold, 0.75);
    assert_eq!(cfg.web.addr, "0.0.0.0:8080");
    assert_eq!(cfg.model.confidence, 0.25);
  }

  #[test]
  fn bundled_sample_config_parses() {
    let cfg = AppConfig::from_toml_str(include_str!("../kouqiang.toml")).unwrap();
    assert_eq!(cfg.model.labels, Some(PathBuf::from("labels/oral.toml")));
    assert_eq!(cfg.display.threshold, CONFIDENCE_THRESHOLD);

    let labels = LabelMap::from_toml_str(include_str!("../labels/oral.toml")).unwrap();
    assert_eq!(labels.name(0), "Caries");
  }

  #[cfg(feature = "v4l_camera")]
  #[test]
  fn default_camera_url_is_supported() {
    let cfg = AppConfig::from_toml_str("").unwrap();
    assert!(crate::input::supports_scheme(cfg.camera.url.scheme()));
  }

  #[test]
  fn threshold_out_of_range_is_rejected() {
    let err = AppConfig::from_toml_str("[display]\nthreshold = 60.0").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
  }

  #[test]
  fn unknown_field_is_rejected() {
    let err = AppConfig::from_toml_str("[web]\nport = 5000").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
  }

  #[test]
  fn load_reads_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kouqiang.toml");
    std::fs::write(&path, "[camera]\npoll_interval_ms = 50\n").unwrap();
    let cfg = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.camera.poll_interval, Duration::from_millis(50));
  }

  #[test]
  fn missing_file_is_a_read_error() {
    let err = AppConfig::load(Some(Path::new("/nonexistent/kouqiang.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read(..)));
  }

  #[test]
  fn annotator_loads_labels() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.toml");
    std::fs::write(&labels, "names = [\"Caries\", \"Ulcer\"]\n").unwrap();
    let cfg = AppConfig::from_toml_str(&format!(
      "[model]\nlabels = {:?}\n",
      labels.display().to_string()
    ))
    .unwrap();
    let annotator = cfg.annotator().unwrap();
    assert_eq!(annotator.labels().name(1), "Ulcer");
    assert_eq!(annotator.threshold(), 0.60);
  }
}
