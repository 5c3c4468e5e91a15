// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/bin/kouqiang_web.rs - 网页前端入口
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
use std::sync::{Arc, mpsc};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use kouqiang::{
  config::AppConfig,
  web::{WebConfig, WebServer},
};

/// Kouqiang 网页前端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径，缺省时读取 KOUQIANG_CONFIG
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 覆盖配置中的监听地址
  #[arg(long, value_name = "ADDR")]
  pub addr: Option<String>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut config = AppConfig::load(args.config.as_deref())?;
  if let Some(addr) = args.addr {
    config.web.addr = addr;
  }

  let annotator = config.annotator()?;
  info!("加载模型: {}", config.model.path.display());
  let model = config.model_builder().build()?;
  info!("模型加载完成");

  let handle = WebServer::new(WebConfig::from_app(&config), Arc::new(model), annotator).spawn()?;
  info!("网页服务运行于 http://{}", handle.addr);

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    let _ = tx.send(());
  })?;
  let _ = rx.recv();

  info!("收到中断信号，正在关闭网页服务...");
  handle.stop()?;
  Ok(())
}
