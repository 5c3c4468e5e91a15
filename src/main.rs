// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/main.rs - 命令行检测程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kouqiang::{
  FromUrl,
  config::AppConfig,
  input::InputWrapper,
  model::YoloBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

/// Kouqiang 口腔病症检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，如 yolo:///models/best.onnx?size=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，如 image:///tmp/mouth.jpg 或 v4l2:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 image:///tmp/result.jpg 或 folder:///tmp/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 配置文件，提供标签、字体与显示阈值
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 连续处理输入帧，直到输入结束或收到 Ctrl-C
  #[arg(long)]
  pub continuous: bool,
  /// 连续模式下最多处理的帧数
  #[arg(long, value_name = "FRAME_NUMBER", requires = "continuous")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = AppConfig::load(args.config.as_deref())?;
  let annotator = config.annotator()?;

  let input = InputWrapper::from_url(&args.input)?;
  let model = YoloBuilder::from_url(&args.model)?.build()?;
  let output = OutputWrapper::from_url(&args.output)?.with_annotator(annotator);

  if args.continuous {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_ctrlc()?
      .run_task(input, model, output)?;
  } else {
    OneShotTask.run_task(input, model, output)?;
  }

  Ok(())
}
