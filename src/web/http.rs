// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/web/http.rs - 最小 HTTP/1.1 请求解析与响应
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

use std::collections::HashMap;
use std::io::{Read, Write};

use thiserror::Error;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Error, Debug)]
pub enum HttpError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("请求格式错误: {0}")]
  Malformed(String),
  #[error("请求体过大: {0} 字节")]
  TooLarge(usize),
}

#[derive(Debug)]
pub struct Request {
  pub method: String,
  pub path: String,
  pub query: Option<String>,
  headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl Request {
  /// 头部名称不区分大小写
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn content_length(&self) -> Option<usize> {
    self.header("content-length").and_then(|v| v.parse().ok())
  }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
  if from > haystack.len() {
    return None;
  }
  haystack[from..]
    .windows(needle.len())
    .position(|w| w == needle)
    .map(|pos| pos + from)
}

/// 读取一个完整请求，请求体按 `Content-Length` 读取
pub fn read_request<R: Read>(stream: &mut R, max_body: usize) -> Result<Request, HttpError> {
  let mut buf = [0u8; 4096];
  let mut data = Vec::new();
  let header_end = loop {
    let n = stream.read(&mut buf)?;
    if n == 0 {
      return Err(HttpError::Malformed("连接在请求头结束前关闭".into()));
    }
    data.extend_from_slice(&buf[..n]);
    if let Some(pos) = find(&data, HEADER_END, 0) {
      break pos;
    }
    if data.len() > MAX_HEADER_BYTES {
      return Err(HttpError::Malformed("请求头过长".into()));
    }
  };

  let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
  let mut lines = head.split("\r\n");
  let request_line = lines
    .next()
    .ok_or_else(|| HttpError::Malformed("空请求".into()))?;
  let mut parts = request_line.split_whitespace();
  let method = parts
    .next()
    .ok_or_else(|| HttpError::Malformed("缺少请求方法".into()))?;
  let target = parts
    .next()
    .ok_or_else(|| HttpError::Malformed("缺少请求路径".into()))?;

  let mut headers = HashMap::new();
  for line in lines {
    if let Some((k, v)) = line.split_once(':') {
      headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
    }
  }

  let (path, query) = match target.split_once('?') {
    Some((path, query)) => (path.to_string(), Some(query.to_string())),
    None => (target.to_string(), None),
  };

  let mut request = Request {
    method: method.to_ascii_uppercase(),
    path,
    query,
    headers,
    body: Vec::new(),
  };

  if request
    .header("transfer-encoding")
    .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
  {
    return Err(HttpError::Malformed("不支持分块传输".into()));
  }

  let length = request.content_length().unwrap_or(0);
  if length > max_body {
    return Err(HttpError::TooLarge(length));
  }

  let mut body = data.split_off(header_end + HEADER_END.len());
  if body.len() < length {
    let start = body.len();
    body.resize(length, 0);
    stream.read_exact(&mut body[start..])?;
  }
  body.truncate(length);
  request.body = body;

  Ok(request)
}

pub fn status_line(status: u16) -> &'static str {
  match status {
    200 => "HTTP/1.1 200 OK",
    303 => "HTTP/1.1 303 See Other",
    400 => "HTTP/1.1 400 Bad Request",
    404 => "HTTP/1.1 404 Not Found",
    405 => "HTTP/1.1 405 Method Not Allowed",
    413 => "HTTP/1.1 413 Payload Too Large",
    503 => "HTTP/1.1 503 Service Unavailable",
    _ => "HTTP/1.1 500 Internal Server Error",
  }
}

#[derive(Debug)]
pub struct Response {
  pub status: u16,
  pub content_type: &'static str,
  pub location: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      location: None,
      body,
    }
  }

  pub fn html(status: u16, body: String) -> Self {
    Self::new(status, "text/html; charset=utf-8", body.into_bytes())
  }

  pub fn json(status: u16, body: Vec<u8>) -> Self {
    Self::new(status, "application/json", body)
  }

  pub fn jpeg(body: Vec<u8>) -> Self {
    Self::new(200, "image/jpeg", body)
  }

  pub fn redirect(location: &str) -> Self {
    Self {
      status: 303,
      content_type: "text/plain; charset=utf-8",
      location: Some(location.to_string()),
      body: Vec::new(),
    }
  }

  pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), std::io::Error> {
    let mut header = format!(
      "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
      status_line(self.status),
      self.content_type,
      self.body.len()
    );
    if let Some(location) = &self.location {
      header.push_str(&format!("Location: {location}\r\n"));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(&self.body)?;
    stream.flush()
  }
}

/// MJPEG 流的响应头，之后逐个写入 [`write_stream_part`]
pub fn write_stream_header<W: Write>(stream: &mut W, boundary: &str) -> Result<(), std::io::Error> {
  let header = format!(
    "{}\r\nContent-Type: multipart/x-mixed-replace; boundary={boundary}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
    status_line(200)
  );
  stream.write_all(header.as_bytes())?;
  stream.flush()
}

pub fn write_stream_part<W: Write>(
  stream: &mut W,
  boundary: &str,
  jpeg: &[u8],
) -> Result<(), std::io::Error> {
  let header = format!(
    "--{boundary}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
    jpeg.len()
  );
  stream.write_all(header.as_bytes())?;
  stream.write_all(jpeg)?;
  stream.write_all(b"\r\n")?;
  stream.flush()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn parses_request_line_and_headers() {
    let raw = b"GET /result?v=3 HTTP/1.1\r\nHost: localhost\r\nX-Trace: abc\r\n\r\n";
    let req = read_request(&mut Cursor::new(&raw[..]), 1024).unwrap();
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/result");
    assert_eq!(req.query.as_deref(), Some("v=3"));
    assert_eq!(req.header("x-trace"), Some("abc"));
    assert_eq!(req.header("HOST"), Some("localhost"));
    assert!(req.body.is_empty());
  }

  #[test]
  fn reads_body_by_content_length() {
    let raw = b"POST /detect HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
    let req = read_request(&mut Cursor::new(&raw[..]), 1024).unwrap();
    assert_eq!(req.body, b"hello");
  }

  #[test]
  fn oversized_body_is_rejected() {
    let raw = b"POST /detect HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
    let err = read_request(&mut Cursor::new(&raw[..]), 1024).unwrap_err();
    assert!(matches!(err, HttpError::TooLarge(4096)));
  }

  #[test]
  fn truncated_body_is_an_io_error() {
    let raw = b"POST /detect HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
    let err = read_request(&mut Cursor::new(&raw[..]), 1024).unwrap_err();
    assert!(matches!(err, HttpError::Io(_)));
  }

  #[test]
  fn redirect_has_location() {
    let mut out = Vec::new();
    Response::redirect("/detect").write_to(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 303 See Other\r\n"));
    assert!(text.contains("Location: /detect\r\n"));
    assert!(text.contains("Content-Length: 0\r\n"));
  }

  #[test]
  fn stream_part_framing() {
    let mut out = Vec::new();
    write_stream_part(&mut out, "frame", b"JPEG").unwrap();
    assert_eq!(
      out,
      b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
    );
  }
}
