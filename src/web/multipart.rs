// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/web/multipart.rs - multipart/form-data 文件字段解析
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

use thiserror::Error;

use crate::web::http::find;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MultipartError {
  #[error("缺少分隔符")]
  MissingBoundary,
  #[error("分段格式错误: {0}")]
  Malformed(&'static str),
}

/// 上传的文件字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
  pub filename: String,
  pub content_type: Option<String>,
  pub data: Vec<u8>,
}

/// 从 `Content-Type` 中取出 `boundary` 参数
pub fn boundary(content_type: &str) -> Option<String> {
  let mut params = content_type.split(';');
  let mime = params.next()?.trim();
  if !mime.eq_ignore_ascii_case("multipart/form-data") {
    return None;
  }
  params
    .filter_map(|param| param.trim().split_once('='))
    .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
    .map(|(_, v)| v.trim().trim_matches('"').to_string())
    .filter(|v| !v.is_empty())
}

fn disposition_param<'a>(disposition: &'a str, name: &str) -> Option<&'a str> {
  disposition
    .split(';')
    .filter_map(|param| param.trim().split_once('='))
    .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
    .map(|(_, v)| v.trim().trim_matches('"'))
}

/// 查找名为 `field` 的文件字段；字段不存在时返回 `None`
pub fn find_file(body: &[u8], boundary: &str, field: &str) -> Result<Option<FilePart>, MultipartError> {
  if boundary.is_empty() {
    return Err(MultipartError::MissingBoundary);
  }
  let delimiter = format!("--{boundary}");
  let delimiter = delimiter.as_bytes();
  let next_delimiter = format!("\r\n--{boundary}");
  let next_delimiter = next_delimiter.as_bytes();

  let mut cursor = find(body, delimiter, 0).ok_or(MultipartError::MissingBoundary)? + delimiter.len();
  loop {
    if body[cursor..].starts_with(b"--") {
      return Ok(None);
    }
    if !body[cursor..].starts_with(b"\r\n") {
      return Err(MultipartError::Malformed("分隔符后缺少换行"));
    }
    cursor += 2;

    let header_end =
      find(body, b"\r\n\r\n", cursor).ok_or(MultipartError::Malformed("分段头未结束"))?;
    let content_start = header_end + 4;
    let content_end =
      find(body, next_delimiter, content_start).ok_or(MultipartError::Malformed("分段未结束"))?;

    let headers = String::from_utf8_lossy(&body[cursor..header_end]);
    let mut disposition = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
      if let Some((k, v)) = line.split_once(':') {
        if k.trim().eq_ignore_ascii_case("content-disposition") {
          disposition = Some(v.trim().to_string());
        } else if k.trim().eq_ignore_ascii_case("content-type") {
          content_type = Some(v.trim().to_string());
        }
      }
    }

    if let Some(disposition) = &disposition
      && disposition_param(disposition, "name") == Some(field)
    {
      let filename = disposition_param(disposition, "filename")
        .unwrap_or_default()
        .to_string();
      return Ok(Some(FilePart {
        filename,
        content_type,
        data: body[content_start..content_end].to_vec(),
      }));
    }

    cursor = content_end + next_delimiter.len();
  }
}
