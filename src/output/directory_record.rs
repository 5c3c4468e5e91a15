// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{Render, annotate::Annotator},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("路径不是合法的 UTF-8: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
  /// 保存标注后的图像
  Draw,
  /// 保存原始图像与 JSON 报告
  Record,
}

/// 按日期分目录保存帧：`<dir>/<yyyy>/<mm>/<dd>/<HH-MM-SS>-<id>.jpg`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  /// 未显式设置时在首次渲染时创建默认标注器
  annotator: OnceLock<Annotator>,
  mode: RecordMode,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  /// `folder:///var/kouqiang/records?record&always`
  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = if uri.query_pairs().any(|(k, _)| k == "record") {
      RecordMode::Record
    } else {
      RecordMode::Draw
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory = urlencoding::decode(uri.path())?;
    Ok(Self {
      directory: PathBuf::from(&*directory),
      annotator: OnceLock::new(),
      mode,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: Into<PathBuf>>(
    directory: P,
    annotator: Annotator,
    mode: RecordMode,
    always: bool,
  ) -> Self {
    Self {
      directory: directory.into(),
      annotator: OnceLock::from(annotator),
      mode,
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = OnceLock::from(annotator);
    self
  }

  fn annotator(&self) -> &Annotator {
    self.annotator.get_or_init(Annotator::default)
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.jpg",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let analysis = self.annotator().annotate(frame, result);
    if !self.always && analysis.report.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(analysis.report.analyzed_at)?;
    match self.mode {
      RecordMode::Draw => analysis.image.save(&path)?,
      RecordMode::Record => {
        frame.image.save(&path)?;
        let report = serde_json::to_vec_pretty(&analysis.report)?;
        std::fs::write(path.with_extension("json"), report)?;
      }
    }
    debug!("记录帧 {} 到 {}", frame.index, path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{DetectItem, LabelMap},
    output::draw::Draw,
    report::CONFIDENCE_THRESHOLD,
  };
  use image::RgbImage;

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        out.extend(files(&path));
      } else {
        out.push(path);
      }
    }
    out.sort();
    out
  }

  fn annotator() -> Annotator {
    Annotator::new(
      Draw::new(None),
      LabelMap::new(vec!["Caries".into()]),
      CONFIDENCE_THRESHOLD,
    )
  }

  fn finding_result() -> DetectResult {
    DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.2, 0.2, 0.8, 0.8],
    }])
  }

  #[test]
  fn skips_frames_without_findings() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), annotator(), RecordMode::Draw, false);
    let frame = Frame::from(RgbImage::new(16, 16));

    output.render_result(&frame, &DetectResult::default()).unwrap();
    assert!(files(dir.path()).is_empty());

    output.render_result(&frame, &finding_result()).unwrap();
    let saved = files(dir.path());
    assert_eq!(saved.len(), 1);
    assert!(saved[0].to_string_lossy().ends_with("-0001.jpg"));
  }

  #[test]
  fn record_mode_writes_json_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), annotator(), RecordMode::Record, true);
    let frame = Frame::from(RgbImage::new(16, 16));

    output.render_result(&frame, &finding_result()).unwrap();
    let saved = files(dir.path());
    assert_eq!(saved.len(), 2);

    let json = saved.iter().find(|p| p.extension().unwrap() == "json").unwrap();
    let report: serde_json::Value =
      serde_json::from_slice(&std::fs::read(json).unwrap()).unwrap();
    assert_eq!(report["findings"][0]["disease"], "Caries");
  }

  #[test]
  fn url_query_selects_mode() {
    let url = url::Url::parse("folder:///tmp/records?record&always").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.mode, RecordMode::Record);
    assert!(output.always);
    assert_eq!(output.directory(), Path::new("/tmp/records"));
    assert!(output.annotator.get().is_none());
  }

  #[test]
  fn escaped_directory_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("patient records");
    let url = url::Url::from_directory_path(&target).unwrap();
    let url = url::Url::parse(&url.as_str().replacen("file", "folder", 1)).unwrap();
    assert!(url.path().contains("%20"));

    let output = DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .with_annotator(annotator());
    output
      .render_result(&Frame::from(RgbImage::new(16, 16)), &finding_result())
      .unwrap();

    let saved = files(&target);
    assert_eq!(saved.len(), 1);
  }
}
