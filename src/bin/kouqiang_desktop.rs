// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/bin/kouqiang_desktop.rs - 桌面前端入口
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

use kouqiang::{
  config::AppConfig,
  gui::{self, Detector},
};

/// Kouqiang 桌面前端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径，缺省时读取 KOUQIANG_CONFIG
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = AppConfig::load(args.config.as_deref())?;

  let annotator = config.annotator()?;
  info!("加载模型: {}", config.model.path.display());
  let model = config.model_builder().build()?;
  info!("模型加载完成");

  gui::run(config, Detector::new(model), annotator)?;
  Ok(())
}
