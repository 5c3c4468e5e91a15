// 该文件是 Kouqiang （口腔） 项目的一部分。
// tests/web_routes.rs - 网页服务路由测试
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

#![cfg(feature = "web")]

use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use url::Url;

use kouqiang::{
  frame::Frame,
  model::{DetectItem, DetectResult, LabelMap, Model},
  output::{Annotator, draw::Draw},
  report::CONFIDENCE_THRESHOLD,
  web::{WebConfig, WebHandle, WebServer},
};

/// 固定输出两个检测框，其中一个低于显示阈值
struct StubDetector;

impl Model for StubDetector {
  type Input = Frame;
  type Output = DetectResult;
  type Error = std::convert::Infallible;

  fn infer(&self, _input: &Frame) -> Result<DetectResult, Self::Error> {
    Ok(DetectResult::from(vec![
      DetectItem {
        class_id: 0,
        score: 0.875,
        bbox: [0.1, 0.1, 0.6, 0.6],
      },
      DetectItem {
        class_id: 1,
        score: 0.4,
        bbox: [0.5, 0.5, 0.9, 0.9],
      },
    ]))
  }
}

struct TestServer {
  dir: TempDir,
  handle: Option<WebHandle>,
}

impl TestServer {
  fn new() -> Result<Self> {
    let dir = tempfile::tempdir()?;
    let config = WebConfig {
      addr: "127.0.0.1:0".to_string(),
      upload_dir: dir.path().join("uploads"),
      result_dir: dir.path().join("results"),
      max_upload_bytes: 1024 * 1024,
      jpeg_quality: 80,
      camera_url: Url::parse("v4l2:///dev/null-camera")?,
    };
    let annotator = Annotator::new(
      Draw::new(None),
      LabelMap::new(vec!["Caries".into(), "Gingivitis".into()]),
      CONFIDENCE_THRESHOLD,
    );
    let handle = WebServer::new(config, Arc::new(StubDetector), annotator)
      .with_camera_source(|| {
        Ok(std::iter::repeat_with(|| {
          std::thread::sleep(Duration::from_millis(10));
          Frame::from(RgbImage::from_pixel(32, 24, Rgb([200, 120, 120])))
        }))
      })
      .spawn()?;
    Ok(Self {
      dir,
      handle: Some(handle),
    })
  }

  fn handle(&self) -> &WebHandle {
    self.handle.as_ref().expect("server handle should be initialized")
  }

  fn send(&self, request: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(self.handle().addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.write_all(request)?;
    read_response(&mut stream)
  }

  fn get(&self, path: &str) -> Result<(String, Vec<u8>)> {
    self.send(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
  }

  fn upload(&self, filename: &str, data: &[u8]) -> Result<(String, Vec<u8>)> {
    let boundary = "----kouqiang-test";
    let mut body = format!(
      "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let mut request = format!(
      "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={boundary}\r\nContent-Length: {}\r\n\r\n",
      body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    self.send(&request)
  }
}

impl Drop for TestServer {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.stop().expect("failed to stop web server");
    }
  }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
  let mut response = Vec::new();
  stream.read_to_end(&mut response)?;
  let split = response
    .windows(4)
    .position(|w| w == b"\r\n\r\n")
    .unwrap_or(response.len());
  let headers = String::from_utf8_lossy(&response[..split]).to_string();
  let body = response.get(split + 4..).unwrap_or_default().to_vec();
  Ok((headers, body))
}

fn png_bytes() -> Vec<u8> {
  let image = RgbImage::from_pixel(64, 48, Rgb([230, 180, 170]));
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

#[test]
fn landing_and_form_pages() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, body) = server.get("/")?;
  assert!(headers.starts_with("HTTP/1.1 200 OK"));
  assert!(String::from_utf8(body)?.contains("Oral Disease Detection"));

  let (headers, body) = server.get("/detect")?;
  assert!(headers.starts_with("HTTP/1.1 200 OK"));
  assert!(String::from_utf8(body)?.contains("multipart/form-data"));
  Ok(())
}

#[test]
fn result_redirects_before_any_upload() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, _) = server.get("/result")?;
  assert!(headers.starts_with("HTTP/1.1 303 See Other"));
  assert!(headers.contains("Location: /detect"));

  let (headers, body) = server.get("/api/result")?;
  assert!(headers.starts_with("HTTP/1.1 404 Not Found"));
  let value: Value = serde_json::from_slice(&body)?;
  assert_eq!(value["error"], "no_result");
  Ok(())
}

#[test]
fn upload_runs_detection_and_shows_result() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, _) = server.upload("mouth.PNG", &png_bytes())?;
  assert!(headers.starts_with("HTTP/1.1 303 See Other"));
  assert!(headers.contains("Location: /result"));
  assert!(server.dir.path().join("uploads/input_image.png").exists());
  assert!(server.dir.path().join("results/result_image.jpg").exists());

  let (headers, body) = server.get("/result")?;
  assert!(headers.starts_with("HTTP/1.1 200 OK"));
  let page = String::from_utf8(body)?;
  assert!(page.contains("<strong>Caries</strong>: 87.50%"));
  assert!(!page.contains("Gingivitis"));

  let (headers, body) = server.get("/api/result")?;
  assert!(headers.contains("application/json"));
  let value: Value = serde_json::from_slice(&body)?;
  let findings = value["findings"].as_array().expect("findings array");
  assert_eq!(findings.len(), 1);
  assert_eq!(findings[0]["disease"], "Caries");

  let (headers, body) = server.get("/static/results/result_image.jpg?v=1")?;
  assert!(headers.contains("image/jpeg"));
  assert_eq!(&body[..2], &[0xFF, 0xD8]);
  Ok(())
}

#[test]
fn upload_without_file_returns_to_form() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, _) = server.upload("", b"")?;
  assert!(headers.starts_with("HTTP/1.1 303 See Other"));
  assert!(headers.contains("Location: /detect"));

  let (headers, _) = server.send(
    b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 3\r\n\r\na=b",
  )?;
  assert!(headers.contains("Location: /detect"));
  Ok(())
}

#[test]
fn disallowed_extension_shows_error() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, body) = server.upload("mouth.gif", &png_bytes())?;
  assert!(headers.starts_with("HTTP/1.1 200 OK"));
  assert!(String::from_utf8(body)?.contains("class=\"error\""));
  assert!(!server.dir.path().join("results/result_image.jpg").exists());
  Ok(())
}

#[test]
fn corrupt_image_is_rejected() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, _) = server.upload("mouth.jpg", b"not really a jpeg")?;
  assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
  let (headers, _) = server.get("/result")?;
  assert!(headers.contains("Location: /detect"));
  Ok(())
}

#[test]
fn video_feed_streams_annotated_frames() -> Result<()> {
  let server = TestServer::new()?;

  let mut stream = TcpStream::connect(server.handle().addr)?;
  stream.set_read_timeout(Some(Duration::from_secs(10)))?;
  stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

  let mut received = Vec::new();
  let mut buf = [0u8; 4096];
  while received
    .windows(7)
    .filter(|w| *w == b"--frame")
    .count()
    < 2
  {
    let n = stream.read(&mut buf)?;
    assert!(n > 0, "stream ended early");
    received.extend_from_slice(&buf[..n]);
  }
  let text = String::from_utf8_lossy(&received);
  assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
  assert!(text.contains("Content-Type: image/jpeg"));
  drop(stream);

  let (headers, _) = server.get("/stop_webcam")?;
  assert!(headers.starts_with("HTTP/1.1 303 See Other"));
  assert!(headers.contains("Location: /detect"));
  Ok(())
}

#[test]
fn health_and_unknown_routes() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, body) = server.get("/health")?;
  assert!(headers.starts_with("HTTP/1.1 200 OK"));
  let value: Value = serde_json::from_slice(&body)?;
  assert_eq!(value["status"], "ok");

  let (headers, _) = server.get("/nope")?;
  assert!(headers.starts_with("HTTP/1.1 404 Not Found"));

  let (headers, _) = server.send(b"POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n")?;
  assert!(headers.starts_with("HTTP/1.1 405 Method Not Allowed"));
  Ok(())
}

#[test]
fn oversized_upload_is_refused() -> Result<()> {
  let server = TestServer::new()?;

  let (headers, _) = server.send(
    b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=x\r\nContent-Length: 99999999\r\n\r\n",
  )?;
  assert!(headers.starts_with("HTTP/1.1 413 Payload Too Large"));
  Ok(())
}
