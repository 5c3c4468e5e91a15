// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/model/postprocess.rs - YOLO 输出解码与非极大值抑制
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

use tracing::debug;

use crate::model::DetectItem;

/// 解码 YOLOv8 风格的输出张量
///
/// `data` 是形如 `[4 + classes, anchors]` 的行主序数据，每一列为
/// `cx, cy, w, h, score_0 .. score_n`（分数已经过 sigmoid）。
/// 返回的 bbox 处于模型输入坐标系，格式为 xyxy。
pub fn decode_predictions(
  data: &[f32],
  channels: usize,
  anchors: usize,
  confidence: f32,
) -> Vec<DetectItem> {
  if channels <= 4 || data.len() < channels * anchors {
    debug!(
      "输出张量尺寸异常: 长度 {}, 通道 {}, 锚点 {}",
      data.len(),
      channels,
      anchors
    );
    return Vec::new();
  }

  let num_classes = channels - 4;
  let at = |c: usize, i: usize| data[c * anchors + i];

  let mut items = Vec::new();
  for i in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(4 + c, i)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score < confidence {
      continue;
    }

    let cx = at(0, i);
    let cy = at(1, i);
    let w = at(2, i);
    let h = at(3, i);

    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  items
}

fn area(b: &[f32; 4]) -> f32 {
  (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix1 = a[0].max(b[0]);
  let iy1 = a[1].max(b[1]);
  let ix2 = a[2].min(b[2]);
  let iy2 = a[3].min(b[3]);
  let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
  if inter <= 0.0 {
    return 0.0;
  }
  inter / (area(a) + area(b) - inter)
}

/// 按类别进行非极大值抑制，结果按分数从高到低排列
pub fn non_max_suppression(
  mut items: Vec<DetectItem>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::new();
  for item in items {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}
