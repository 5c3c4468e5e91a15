// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/web/pages.rs - 网页模板
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

use crate::report::Report;

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 0; background: #f5f7ff; color: #1f2937; }
header { background: #4361ee; color: #fff; padding: 1rem 2rem; }
header a { color: #fff; text-decoration: none; margin-right: 1rem; }
main { max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
.card { background: #fff; border-radius: 8px; padding: 1.5rem; margin-bottom: 1rem; box-shadow: 0 1px 4px rgba(0,0,0,.08); }
.button { display: inline-block; background: #4361ee; color: #fff; border: 0; border-radius: 6px; padding: .6rem 1.2rem; text-decoration: none; cursor: pointer; }
.error { color: #c0392b; }
.bar { background: #e5e7eb; border-radius: 4px; height: 8px; }
.bar > div { background: #4361ee; border-radius: 4px; height: 8px; }
img { max-width: 100%; border-radius: 6px; }
"#;

/// 转义 HTML 特殊字符
pub fn escape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

fn layout(title: &str, content: &str) -> String {
  format!(
    r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
<header><a href="/"><strong>Oral Disease Detection</strong></a><a href="/detect">Image Detection</a><a href="/webcam">Webcam Detection</a></header>
<main>
{content}
</main>
</body>
</html>
"#,
    title = escape(title),
  )
}

pub fn landing() -> String {
  layout(
    "Oral Disease Detection",
    r#"<div class="card">
<h1>Oral Disease Detection</h1>
<p>Upload a photo of the oral cavity or use a webcam to detect common oral diseases with a pretrained detection model.</p>
</div>
<div class="card">
<h2>Image Detection</h2>
<p>Analyze a single PNG or JPEG image.</p>
<a class="button" href="/detect">Upload Image</a>
</div>
<div class="card">
<h2>Webcam Detection</h2>
<p>Run detection on a live camera stream.</p>
<a class="button" href="/webcam">Start Webcam</a>
</div>"#,
  )
}

pub fn upload_form(error: Option<&str>) -> String {
  let error = error
    .map(|e| format!(r#"<p class="error">{}</p>"#, escape(e)))
    .unwrap_or_default();
  layout(
    "Upload Image",
    &format!(
      r#"<div class="card">
<h1>Upload Image</h1>
{error}
<form method="post" action="/detect" enctype="multipart/form-data">
<input type="file" name="file" accept=".png,.jpg,.jpeg">
<button class="button" type="submit">Detect</button>
</form>
</div>"#
    ),
  )
}

pub fn result(report: &Report, image_version: i64) -> String {
  let findings = if report.findings.is_empty() {
    format!(
      "<p>No disease detected above {:.0}% confidence.</p>",
      report.threshold * 100.0
    )
  } else {
    report
      .findings
      .iter()
      .map(|finding| {
        format!(
          r#"<div class="finding"><p><strong>{}</strong>: {:.2}%</p><div class="bar"><div style="width: {:.0}%"></div></div></div>"#,
          escape(&finding.disease),
          finding.confidence,
          finding.confidence.clamp(0.0, 100.0)
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  };

  layout(
    "Detection Result",
    &format!(
      r#"<div class="card">
<h1>Detection Result</h1>
<img src="/static/results/result_image.jpg?v={image_version}" alt="Detection result">
</div>
<div class="card">
<h2>Findings</h2>
{findings}
</div>
<a class="button" href="/detect">Analyze Another Image</a>"#
    ),
  )
}

pub fn webcam() -> String {
  layout(
    "Webcam Detection",
    r#"<div class="card">
<h1>Webcam Detection</h1>
<img src="/video_feed" alt="Live detection">
</div>
<a class="button" href="/stop_webcam">Stop Webcam</a>"#,
  )
}

pub fn error_page(title: &str, message: &str) -> String {
  layout(
    title,
    &format!(
      r#"<div class="card"><h1>{}</h1><p>{}</p><a class="button" href="/">Home</a></div>"#,
      escape(title),
      escape(message)
    ),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, DetectResult, LabelMap};

  #[test]
  fn escape_special_characters() {
    assert_eq!(
      escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
      "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
    );
  }

  #[test]
  fn result_lists_findings() {
    let detections = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.8765,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }]);
    let report = Report::from_result(&detections, &LabelMap::new(vec!["<Caries>".into()]), 0.6);
    let html = result(&report, 1);
    assert!(html.contains("&lt;Caries&gt;</strong>: 87.65%"));
    assert!(html.contains("result_image.jpg?v=1"));
  }

  #[test]
  fn empty_result_mentions_threshold() {
    let report = Report::from_result(&DetectResult::default(), &LabelMap::default(), 0.6);
    assert!(result(&report, 0).contains("above 60% confidence"));
  }

  #[test]
  fn form_shows_error() {
    assert!(upload_form(Some("bad <type>")).contains("bad &lt;type&gt;"));
    assert!(!upload_form(None).contains("class=\"error\""));
  }
}
