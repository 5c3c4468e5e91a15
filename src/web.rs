// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/web.rs - 网页前端服务
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

//! 单进程 HTTP 服务
//!
//! 接受循环运行在独立线程上，每个连接再交给一个线程处理。
//! 上传检测的结果保存在内存中，同时写入结果目录。

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  camera::{CameraError, CameraSession, FeedEvent},
  config::AppConfig,
  frame::Frame,
  input::{ImageFileInput, ImageFileInputError, InputError, InputWrapper, allowed_file},
  model::{DetectResult, Model},
  output::{Annotator, Render, encode_jpeg},
  report::Report,
  task::{OneShotTask, Task},
};

pub mod http;
pub mod multipart;
pub mod pages;

use self::http::{HttpError, Request, Response};

const STREAM_BOUNDARY: &str = "frame";
const RESULT_IMAGE_PATH: &str = "/static/results/result_image.jpg";
const ROUTES: [&str; 9] = [
  "/",
  "/detect",
  "/result",
  RESULT_IMAGE_PATH,
  "/api/result",
  "/webcam",
  "/video_feed",
  "/stop_webcam",
  "/health",
];

#[derive(Error, Debug)]
pub enum WebError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("HTTP 错误: {0}")]
  Http(#[from] HttpError),
  #[error("监听地址无效 {0}: {1}")]
  Addr(String, std::net::AddrParseError),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("摄像头错误: {0}")]
  Camera(#[from] CameraError),
  #[error("服务线程发生 panic")]
  ThreadPanicked,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
  pub addr: String,
  pub upload_dir: PathBuf,
  pub result_dir: PathBuf,
  pub max_upload_bytes: usize,
  pub jpeg_quality: u8,
  pub camera_url: Url,
}

impl WebConfig {
  pub fn from_app(cfg: &AppConfig) -> Self {
    Self {
      addr: cfg.web.addr.clone(),
      upload_dir: cfg.web.upload_dir.clone(),
      result_dir: cfg.web.result_dir.clone(),
      max_upload_bytes: cfg.web.max_upload_bytes,
      jpeg_quality: cfg.display.jpeg_quality,
      camera_url: cfg.camera.url.clone(),
    }
  }
}

type CameraSource =
  Arc<dyn Fn() -> Result<Box<dyn Iterator<Item = Frame>>, InputError> + Send + Sync>;

/// 最近一次上传检测的结果
struct LastResult {
  report: Report,
  jpeg: Vec<u8>,
}

struct WebState<M> {
  config: WebConfig,
  model: Arc<M>,
  annotator: Annotator,
  camera: Arc<CameraSession>,
  camera_source: CameraSource,
  last: Mutex<Option<Arc<LastResult>>>,
  shutdown: Arc<AtomicBool>,
}

impl<M> WebState<M> {
  fn last(&self) -> Option<Arc<LastResult>> {
    self
      .last
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

pub struct WebServer<M> {
  config: WebConfig,
  model: Arc<M>,
  annotator: Annotator,
  camera_source: Option<CameraSource>,
}

#[derive(Debug)]
pub struct WebHandle {
  pub addr: SocketAddr,
  shutdown: Arc<AtomicBool>,
  camera: Arc<CameraSession>,
  join: Option<JoinHandle<()>>,
}

impl WebHandle {
  /// 停止接受连接并释放摄像头
  pub fn stop(mut self) -> Result<(), WebError> {
    self.shutdown.store(true, Ordering::SeqCst);
    self.camera.stop();
    if let Some(join) = self.join.take() {
      join.join().map_err(|_| WebError::ThreadPanicked)?;
    }
    info!("网页服务已停止");
    Ok(())
  }
}

impl<M> WebServer<M>
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(config: WebConfig, model: Arc<M>, annotator: Annotator) -> Self {
    Self {
      config,
      model,
      annotator,
      camera_source: None,
    }
  }

  /// 替换摄像头来源，默认按 `camera_url` 打开
  pub fn with_camera_source<F, I>(mut self, source: F) -> Self
  where
    F: Fn() -> Result<I, InputError> + Send + Sync + 'static,
    I: Iterator<Item = Frame> + 'static,
  {
    self.camera_source = Some(Arc::new(move || {
      source().map(|input| Box::new(input) as Box<dyn Iterator<Item = Frame>>)
    }));
    self
  }

  pub fn spawn(self) -> Result<WebHandle, WebError> {
    let configured: SocketAddr = self
      .config
      .addr
      .parse()
      .map_err(|e| WebError::Addr(self.config.addr.clone(), e))?;
    let listener = TcpListener::bind(configured)?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    std::fs::create_dir_all(&self.config.upload_dir)?;
    std::fs::create_dir_all(&self.config.result_dir)?;

    let camera_source: CameraSource = match self.camera_source {
      Some(source) => source,
      None => {
        let url = self.config.camera_url.clone();
        Arc::new(move || {
          InputWrapper::from_url(&url)
            .map(|input| Box::new(input) as Box<dyn Iterator<Item = Frame>>)
        })
      }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let camera = Arc::new(CameraSession::new());
    let state = Arc::new(WebState {
      config: self.config,
      model: self.model,
      annotator: self.annotator,
      camera: camera.clone(),
      camera_source,
      last: Mutex::new(None),
      shutdown: shutdown.clone(),
    });

    let join = std::thread::Builder::new()
      .name("kouqiang-web".to_string())
      .spawn(move || run_server(listener, state))?;
    info!("网页服务监听于 http://{}", addr);

    Ok(WebHandle {
      addr,
      shutdown,
      camera,
      join: Some(join),
    })
  }
}

fn run_server<M>(listener: TcpListener, state: Arc<WebState<M>>)
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  loop {
    if state.shutdown.load(Ordering::SeqCst) {
      break;
    }
    match listener.accept() {
      Ok((stream, peer)) => {
        debug!("接受连接: {}", peer);
        let state = state.clone();
        std::thread::spawn(move || {
          if let Err(e) = handle_connection(stream, &state) {
            warn!("请求处理失败 {}: {}", peer, e);
          }
        });
      }
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
        std::thread::sleep(Duration::from_millis(50));
      }
      Err(e) => {
        error!("接受连接失败: {}", e);
        break;
      }
    }
  }
}

fn handle_connection<M>(mut stream: TcpStream, state: &WebState<M>) -> Result<(), WebError>
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  stream.set_nonblocking(false)?;
  stream.set_read_timeout(Some(Duration::from_secs(10)))?;

  let request = match http::read_request(&mut stream, state.config.max_upload_bytes) {
    Ok(request) => request,
    Err(HttpError::TooLarge(length)) => {
      warn!("上传过大: {} 字节", length);
      Response::html(
        413,
        pages::error_page("File Too Large", "The uploaded file exceeds the size limit."),
      )
      .write_to(&mut stream)?;
      return Ok(());
    }
    Err(e) => {
      Response::html(400, pages::error_page("Bad Request", &e.to_string())).write_to(&mut stream)?;
      return Err(e.into());
    }
  };
  info!("{} {}", request.method, request.path);

  if request.method == "GET" && request.path == "/video_feed" {
    return stream_video(stream, state);
  }

  let response = route(&request, state).unwrap_or_else(|e| {
    error!("处理 {} {} 失败: {}", request.method, request.path, e);
    Response::html(500, pages::error_page("Server Error", &e.to_string()))
  });
  response.write_to(&mut stream)?;
  Ok(())
}

fn route<M>(request: &Request, state: &WebState<M>) -> Result<Response, WebError>
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let response = match (request.method.as_str(), request.path.as_str()) {
    ("GET", "/") => Response::html(200, pages::landing()),
    ("GET", "/detect") => Response::html(200, pages::upload_form(None)),
    ("POST", "/detect") => upload(request, state)?,
    ("GET", "/result") => match state.last() {
      Some(last) => Response::html(
        200,
        pages::result(&last.report, last.report.analyzed_at.timestamp_millis()),
      ),
      None => Response::redirect("/detect"),
    },
    ("GET", RESULT_IMAGE_PATH) => match state.last() {
      Some(last) => Response::jpeg(last.jpeg.clone()),
      None => not_found(),
    },
    ("GET", "/api/result") => match state.last() {
      Some(last) => Response::json(200, serde_json::to_vec(&last.report)?),
      None => Response::json(404, br#"{"error":"no_result"}"#.to_vec()),
    },
    ("GET", "/webcam") => Response::html(200, pages::webcam()),
    ("GET", "/stop_webcam") => {
      if state.camera.stop() {
        info!("摄像头已关闭");
      }
      Response::redirect("/detect")
    }
    ("GET", "/health") => Response::json(200, br#"{"status":"ok"}"#.to_vec()),
    (_, path) if ROUTES.contains(&path) => Response::html(
      405,
      pages::error_page("Method Not Allowed", "This method is not supported here."),
    ),
    _ => not_found(),
  };
  Ok(response)
}

fn not_found() -> Response {
  Response::html(404, pages::error_page("Not Found", "The page does not exist."))
}

fn upload<M>(request: &Request, state: &WebState<M>) -> Result<Response, WebError>
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let Some(boundary) = request.header("content-type").and_then(multipart::boundary) else {
    debug!("上传请求不是 multipart 表单");
    return Ok(Response::redirect("/detect"));
  };
  let part = match multipart::find_file(&request.body, &boundary, "file") {
    Ok(Some(part)) if !part.filename.is_empty() => part,
    Ok(_) => {
      debug!("上传请求没有选择文件");
      return Ok(Response::redirect("/detect"));
    }
    Err(e) => {
      warn!("无法解析上传表单: {}", e);
      return Ok(Response::html(
        400,
        pages::upload_form(Some("The upload could not be read.")),
      ));
    }
  };

  if !allowed_file(&part.filename) {
    warn!("拒绝上传文件: {}", part.filename);
    return Ok(Response::html(
      200,
      pages::upload_form(Some("Allowed image types are png, jpg and jpeg.")),
    ));
  }

  let extension = std::path::Path::new(&part.filename)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase)
    .unwrap_or_else(|| "jpg".to_string());
  let upload_path = state.config.upload_dir.join(format!("input_image.{extension}"));
  std::fs::create_dir_all(&state.config.upload_dir)?;
  std::fs::write(&upload_path, &part.data)?;
  info!("保存上传图像: {} ({} 字节)", upload_path.display(), part.data.len());

  let input = match ImageFileInput::from_bytes(&part.data) {
    Ok(input) => input,
    Err(ImageFileInputError::ImageLoadError(e)) => {
      warn!("无法解码上传图像: {}", e);
      return Ok(Response::html(
        400,
        pages::upload_form(Some("The file is not a valid image.")),
      ));
    }
    Err(e) => {
      return Ok(Response::html(
        500,
        pages::error_page("Server Error", &e.to_string()),
      ));
    }
  };

  let sink = ResultSink { state };
  if let Err(e) = OneShotTask.run_task(input, state.model.as_ref(), &sink) {
    error!("检测失败: {:#}", e);
    return Ok(Response::html(
      500,
      pages::error_page("Detection Failed", &format!("{e:#}")),
    ));
  }

  Ok(Response::redirect("/result"))
}

/// 将上传检测结果写入结果目录并保存在内存中
struct ResultSink<'a, M> {
  state: &'a WebState<M>,
}

impl<M> Render<Frame, DetectResult> for &ResultSink<'_, M> {
  type Error = WebError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let analysis = self.state.annotator.annotate(frame, result);
    let jpeg = encode_jpeg(&analysis.image, self.state.config.jpeg_quality)?;

    std::fs::create_dir_all(&self.state.config.result_dir)?;
    let result_path = self.state.config.result_dir.join("result_image.jpg");
    std::fs::write(&result_path, &jpeg)?;
    for finding in &analysis.report.findings {
      info!("  - {}", finding.label());
    }
    info!("保存检测结果: {}", result_path.display());

    let last = LastResult {
      report: analysis.report,
      jpeg,
    };
    *self
      .state
      .last
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(last));
    Ok(())
  }
}

fn stream_video<M>(mut stream: TcpStream, state: &WebState<M>) -> Result<(), WebError>
where
  M: Model<Input = Frame, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let source = state.camera_source.clone();
  let started = state.camera.start(
    move || source(),
    state.model.clone(),
    state.annotator.clone(),
    state.config.jpeg_quality,
  );
  match started {
    Ok(true) => info!("摄像头已开启"),
    Ok(false) => debug!("摄像头已在运行"),
    Err(e) => {
      error!("无法开启摄像头: {}", e);
      Response::html(503, pages::error_page("Camera Unavailable", &e.to_string()))
        .write_to(&mut stream)?;
      return Ok(());
    }
  }

  http::write_stream_header(&mut stream, STREAM_BOUNDARY)?;
  let feed = state.camera.feed();
  let mut seq = 0;
  loop {
    match feed.wait_newer(seq, Duration::from_secs(1)) {
      FeedEvent::Frame(next, frame) => {
        seq = next;
        if let Err(e) = http::write_stream_part(&mut stream, STREAM_BOUNDARY, &frame.jpeg) {
          debug!("视频流客户端断开: {}", e);
          break;
        }
      }
      FeedEvent::Closed => {
        debug!("摄像头已关闭，结束视频流");
        break;
      }
      FeedEvent::Timeout => {
        if state.shutdown.load(Ordering::SeqCst) {
          break;
        }
      }
    }
  }
  Ok(())
}
