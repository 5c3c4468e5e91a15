// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/model/yolo.rs - 基于 tract 的 YOLO 检测模型
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

use thiserror::Error;
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, DetectResult, Letterbox, Model, decode_predictions, non_max_suppression},
};

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_CONFIDENCE: f32 = 0.25;
const YOLO_IOU: f32 = 0.7;
const YOLO_MAX_DETECTIONS: usize = 300;

type YoloPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// YOLOv8 风格的 ONNX 检测模型（由 Ultralytics 导出）
pub struct Yolo {
  plan: YoloPlan,
  input_size: u32,
  confidence: f32,
  iou: f32,
  max_detections: usize,
}

pub struct YoloBuilder {
  model_path: PathBuf,
  input_size: u32,
  confidence: f32,
  iou: f32,
  max_detections: usize,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  /// `yolo:///models/best.onnx?size=640&conf=0.25&iou=0.7`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| YoloError::ModelPathError(format!("模型路径不是合法的 UTF-8: {}", e)))?;
    let mut builder = YoloBuilder::new(path.into_owned());
    for (k, v) in url.query_pairs() {
      let parsed = match k.as_ref() {
        "size" => v.parse().map(|size| builder.input_size = size).is_ok(),
        "conf" => v.parse().map(|conf| builder.confidence = conf).is_ok(),
        "iou" => v.parse().map(|iou| builder.iou = iou).is_ok(),
        "max_det" => v.parse().map(|n| builder.max_detections = n).is_ok(),
        _ => {
          warn!("忽略未知模型参数: {}={}", k, v);
          true
        }
      };
      if !parsed {
        return Err(YoloError::ModelPathError(format!(
          "无法解析模型参数 {}={}",
          k, v
        )));
      }
    }

    builder.validate()?;
    Ok(builder)
  }
}

impl YoloBuilder {
  pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
    Self {
      model_path: model_path.into(),
      input_size: YOLO_INPUT_SIZE,
      confidence: YOLO_CONFIDENCE,
      iou: YOLO_IOU,
      max_detections: YOLO_MAX_DETECTIONS,
    }
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  /// 输入尺寸须为 32 的正整数倍，阈值须在 0 到 1 之间
  fn validate(&self) -> Result<(), YoloError> {
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(YoloError::ModelPathError(format!(
        "输入尺寸必须是 32 的正整数倍，实际为 {}",
        self.input_size
      )));
    }
    for (name, value) in [("conf", self.confidence), ("iou", self.iou)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(YoloError::ModelPathError(format!(
          "{name} 必须在 0 到 1 之间，实际为 {value}"
        )));
      }
    }
    if self.max_detections == 0 {
      return Err(YoloError::ModelPathError("max_det 必须大于 0".to_string()));
    }
    Ok(())
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    self.validate()?;
    if !self.model_path.exists() {
      return Err(YoloError::ModelNotFound(
        self.model_path.display().to_string(),
      ));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| YoloError::ModelLoadError(format!("{:#}", e)))?;
    info!("模型加载完成");

    debug!(
      "输入尺寸: {}, 置信度阈值: {}, NMS 阈值: {}",
      self.input_size, self.confidence, self.iou
    );

    Ok(Yolo {
      plan,
      input_size: self.input_size,
      confidence: self.confidence,
      iou: self.iou,
      max_detections: self.max_detections,
    })
  }
}

impl Yolo {
  fn build_input(&self, frame: &Frame) -> (Tensor, Letterbox) {
    let (canvas, letterbox) = Letterbox::apply(&frame.image, self.input_size);
    let size = self.input_size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    (input.into_tensor(), letterbox)
  }
}

impl Model for Yolo {
  type Input = Frame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let (tensor, letterbox) = self.build_input(input);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| YoloError::InferenceError(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| YoloError::InvalidOutput("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| YoloError::InvalidOutput(format!("{:#}", e)))?;

    let items = decode_output(
      view,
      &letterbox,
      self.confidence,
      self.iou,
      self.max_detections,
    )?;
    debug!("检测到 {} 个目标", items.len());
    Ok(DetectResult::from(items))
  }
}

/// 将 `[1, C, N]`（或转置后的 `[1, N, C]`）输出解码为原图归一化坐标的检测结果
pub(crate) fn decode_output(
  view: tract_ndarray::ArrayViewD<'_, f32>,
  letterbox: &Letterbox,
  confidence: f32,
  iou: f32,
  max_detections: usize,
) -> Result<Vec<DetectItem>, YoloError> {
  let shape = view.shape().to_vec();
  if shape.len() != 3 || shape[0] != 1 {
    return Err(YoloError::InvalidOutput(format!(
      "期望输出形状为 [1, C, N]，实际为 {:?}",
      shape
    )));
  }

  // 通道数远小于锚点数，据此判断是否需要转置
  let plane = view.index_axis(tract_ndarray::Axis(0), 0);
  let (channels, anchors, data): (usize, usize, Vec<f32>) = if shape[1] <= shape[2] {
    (shape[1], shape[2], plane.iter().copied().collect())
  } else {
    (shape[2], shape[1], plane.t().iter().copied().collect())
  };

  let candidates = decode_predictions(&data, channels, anchors, confidence);
  debug!("候选框数量: {}", candidates.len());

  let mut items = non_max_suppression(candidates, iou, max_detections);
  for item in items.iter_mut() {
    item.bbox = letterbox.restore(item.bbox);
  }
  Ok(items)
}
