// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/model.rs - 模型
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
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model> Model for Arc<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.as_ref().infer(input)
  }
}

impl<M: Model> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (*self).infer(input)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对原图归一化
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("标签文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 类别编号到病症名称的映射
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  names: Vec<String>,
}

impl LabelMap {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 标签文件格式: `names = ["Caries", "Gingivitis", ...]`
  pub fn from_toml_str(content: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(content)?;
    Ok(Self::new(file.names))
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
      .map_err(|e| LabelError::Io(path.display().to_string(), e))?;
    let labels = Self::from_toml_str(&content)?;
    info!("加载 {} 个类别标签: {}", labels.len(), path.display());
    Ok(labels)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> String {
    self
      .names
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

mod letterbox;
mod postprocess;
pub use self::letterbox::Letterbox;
pub use self::postprocess::{decode_predictions, non_max_suppression};

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn labels_from_toml() {
    let labels = LabelMap::from_toml_str(r#"names = ["Caries", "Gingivitis"]"#).unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(0), "Caries");
    assert_eq!(labels.name(1), "Gingivitis");
  }

  #[test]
  fn unknown_class_falls_back_to_id() {
    let labels = LabelMap::new(vec!["Caries".to_string()]);
    assert_eq!(labels.name(7), "class_7");
  }

  #[test]
  fn malformed_label_file_is_an_error() {
    assert!(matches!(
      LabelMap::from_toml_str("names = 3"),
      Err(LabelError::Parse(_))
    ));
  }

  struct Constant;

  impl Model for Constant {
    type Input = u32;
    type Output = u32;
    type Error = std::convert::Infallible;

    fn infer(&self, input: &u32) -> Result<u32, Self::Error> {
      Ok(input + 1)
    }
  }

  #[test]
  fn shared_model_delegates() {
    let model = Arc::new(Constant);
    assert_eq!(model.infer(&1).unwrap(), 2);
    assert_eq!((&Constant).infer(&2).unwrap(), 3);
  }
}
