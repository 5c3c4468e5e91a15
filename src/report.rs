// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/report.rs - 检测报告
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

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{DetectItem, DetectResult, LabelMap};

/// 显示阈值：低于 60% 的检测结果不显示
pub const CONFIDENCE_THRESHOLD: f32 = 0.60;

/// 单个病症发现
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
  /// 病症名称
  pub disease: String,
  /// 置信度百分比，保留两位小数
  pub confidence: f32,
  /// 模型原始分数 (0.0 - 1.0)
  pub score: f32,
  /// 归一化边框 [x_min, y_min, x_max, y_max]
  pub bbox: [f32; 4],
}

impl Finding {
  pub fn new(item: &DetectItem, labels: &LabelMap) -> Self {
    Self {
      disease: labels.name(item.class_id),
      confidence: to_percentage(item.score),
      score: item.score,
      bbox: item.bbox,
    }
  }

  /// 标签文本，如 `Caries: 87.50%`
  pub fn label(&self) -> String {
    format!("{}: {:.2}%", self.disease, self.confidence)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
  pub analyzed_at: DateTime<Utc>,
  pub threshold: f32,
  pub findings: Vec<Finding>,
}

impl Report {
  /// 保留分数不低于阈值的检测结果，保持模型输出顺序
  pub fn from_result(result: &DetectResult, labels: &LabelMap, threshold: f32) -> Self {
    let findings = result
      .items
      .iter()
      .filter(|item| passes(item, threshold))
      .map(|item| Finding::new(item, labels))
      .collect();

    Self {
      analyzed_at: Utc::now(),
      threshold,
      findings,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.findings.is_empty()
  }
}

pub fn passes(item: &DetectItem, threshold: f32) -> bool {
  item.score >= threshold
}

fn to_percentage(score: f32) -> f32 {
  (score * 100.0 * 100.0).round() / 100.0
}
