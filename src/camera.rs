// 该文件是 Kouqiang （口腔） 项目的一部分。
// src/camera.rs - 摄像头会话与最新帧发布
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

//! 摄像头会话
//!
//! 会话只有关闭和运行两种状态。运行时由一个后台线程执行帧循环，
//! 每一帧标注后编码为 JPEG 发布到 [`FrameFeed`]，网页端和桌面端都从这里读取。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  input::InputError,
  model::{DetectResult, Model},
  output::{Analysis, Annotator, Render},
  task::{ContinuousTask, Task},
};

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("打开摄像头失败: {0}")]
  Open(#[from] InputError),
  #[error("创建摄像头线程失败: {0}")]
  Spawn(std::io::Error),
  #[error("摄像头线程意外退出")]
  ThreadGone,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 已发布的一帧
#[derive(Debug)]
pub struct FeedFrame {
  pub analysis: Analysis,
  pub jpeg: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
  Frame(u64, Arc<FeedFrame>),
  Closed,
  Timeout,
}

#[derive(Debug)]
struct FeedState {
  seq: u64,
  latest: Option<Arc<FeedFrame>>,
  closed: bool,
}

/// 保存最新一帧，序号单调递增
#[derive(Debug)]
pub struct FrameFeed {
  state: Mutex<FeedState>,
  ready: Condvar,
}

impl Default for FrameFeed {
  fn default() -> Self {
    Self {
      state: Mutex::new(FeedState {
        seq: 0,
        latest: None,
        closed: true,
      }),
      ready: Condvar::new(),
    }
  }
}

impl FrameFeed {
  pub fn publish(&self, frame: FeedFrame) -> u64 {
    let mut state = lock(&self.state);
    state.seq += 1;
    state.latest = Some(Arc::new(frame));
    self.ready.notify_all();
    state.seq
  }

  pub fn close(&self) {
    let mut state = lock(&self.state);
    state.closed = true;
    self.ready.notify_all();
  }

  /// 重新打开时清除旧帧，避免显示上一次会话的画面
  pub fn reopen(&self) {
    let mut state = lock(&self.state);
    state.closed = false;
    state.latest = None;
  }

  pub fn is_closed(&self) -> bool {
    lock(&self.state).closed
  }

  pub fn latest(&self) -> Option<(u64, Arc<FeedFrame>)> {
    let state = lock(&self.state);
    state.latest.clone().map(|frame| (state.seq, frame))
  }

  /// 等待序号大于 `seq` 的帧
  pub fn wait_newer(&self, seq: u64, timeout: Duration) -> FeedEvent {
    let guard = lock(&self.state);
    let (state, _) = self
      .ready
      .wait_timeout_while(guard, timeout, |s| {
        (s.seq <= seq || s.latest.is_none()) && !s.closed
      })
      .unwrap_or_else(PoisonError::into_inner);

    if state.seq > seq
      && let Some(frame) = &state.latest
    {
      return FeedEvent::Frame(state.seq, frame.clone());
    }
    if state.closed {
      FeedEvent::Closed
    } else {
      FeedEvent::Timeout
    }
  }
}

/// 帧循环的输出端：标注、编码并发布
pub struct FeedOutput {
  feed: Arc<FrameFeed>,
  annotator: Annotator,
  jpeg_quality: u8,
}

impl FeedOutput {
  pub fn new(feed: Arc<FrameFeed>, annotator: Annotator, jpeg_quality: u8) -> Self {
    Self {
      feed,
      annotator,
      jpeg_quality,
    }
  }
}

impl Render<Frame, DetectResult> for FeedOutput {
  type Error = image::ImageError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let analysis = self.annotator.annotate(frame, result);
    let jpeg = analysis.to_jpeg(self.jpeg_quality)?;
    let seq = self.feed.publish(FeedFrame { analysis, jpeg });
    debug!("发布第 {} 帧", seq);
    Ok(())
  }
}

struct Running {
  stop: Arc<AtomicBool>,
  handle: JoinHandle<()>,
}

impl Running {
  fn shutdown(self) {
    self.stop.store(true, Ordering::SeqCst);
    if self.handle.join().is_err() {
      error!("摄像头线程发生 panic");
    }
  }
}

#[derive(Default)]
pub struct CameraSession {
  running: Mutex<Option<Running>>,
  feed: Arc<FrameFeed>,
}

impl CameraSession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn feed(&self) -> Arc<FrameFeed> {
    self.feed.clone()
  }

  pub fn is_running(&self) -> bool {
    lock(&self.running)
      .as_ref()
      .map(|r| !r.handle.is_finished() && !self.feed.is_closed())
      .unwrap_or(false)
  }

  /// 启动摄像头帧循环
  ///
  /// `open` 在后台线程中调用，打开结果会同步返回给调用方。
  /// 已在运行或正在打开时不做任何事并返回 `false`。
  pub fn start<I, M, F>(
    &self,
    open: F,
    model: M,
    annotator: Annotator,
    jpeg_quality: u8,
  ) -> Result<bool, CameraError>
  where
    F: FnOnce() -> Result<I, InputError> + Send + 'static,
    I: Iterator<Item = Frame>,
    M: Model<Input = Frame, Output = DetectResult> + Send + 'static,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut running = lock(&self.running);
    if let Some(current) = running.take() {
      if !current.handle.is_finished() && !self.feed.is_closed() {
        *running = Some(current);
        return Ok(false);
      }
      // 帧循环已自行结束（读帧失败），回收后重新启动
      current.shutdown();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let feed = self.feed.clone();
    feed.reopen();

    let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<(), InputError>>(1);
    let task = ContinuousTask::default().with_stop_flag(stop.clone());
    let handle = thread::Builder::new()
      .name("kouqiang-camera".to_string())
      .spawn(move || {
        let input = match open() {
          Ok(input) => {
            let _ = opened_tx.send(Ok(()));
            input
          }
          Err(e) => {
            feed.close();
            let _ = opened_tx.send(Err(e));
            return;
          }
        };
        info!("摄像头已打开，开始帧循环");

        let output = FeedOutput::new(feed.clone(), annotator, jpeg_quality);
        if let Err(e) = task.run_task(input, model, output) {
          error!("摄像头帧循环异常结束: {:#}", e);
        }
        feed.close();
        info!("摄像头已释放");
      })
      .map_err(CameraError::Spawn)?;

    let thread_id = handle.thread().id();
    *running = Some(Running { stop, handle });
    drop(running);

    // 等待打开结果期间不持有锁，打开中的会话视为运行中
    let error = match opened_rx.recv() {
      Ok(Ok(())) => {
        info!("摄像头会话已启动");
        return Ok(true);
      }
      Ok(Err(e)) => {
        warn!("摄像头打开失败: {}", e);
        CameraError::Open(e)
      }
      Err(_) => {
        self.feed.close();
        CameraError::ThreadGone
      }
    };

    let failed = {
      let mut running = lock(&self.running);
      let ours = running
        .as_ref()
        .is_some_and(|r| r.handle.thread().id() == thread_id);
      if ours { running.take() } else { None }
    };
    if let Some(failed) = failed {
      failed.shutdown();
    }
    Err(error)
  }

  /// 停止帧循环并释放设备；未运行时返回 `false`
  pub fn stop(&self) -> bool {
    let running = lock(&self.running).take();
    match running {
      Some(running) => {
        running.shutdown();
        self.feed.close();
        info!("摄像头会话已停止");
        true
      }
      None => false,
    }
  }
}

impl std::fmt::Debug for CameraSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CameraSession")
      .field("running", &self.is_running())
      .finish()
  }
}

impl Drop for CameraSession {
  fn drop(&mut self) {
    self.stop();
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

  struct OneBox;

  impl Model for OneBox {
    type Input = Frame;
    type Output = DetectResult;
    type Error = std::convert::Infallible;

    fn infer(&self, _input: &Frame) -> Result<DetectResult, Self::Error> {
      Ok(DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [0.25, 0.25, 0.75, 0.75],
      }]))
    }
  }

  fn annotator() -> Annotator {
    Annotator::new(
      Draw::new(None),
      LabelMap::new(vec!["Gingivitis".into()]),
      CONFIDENCE_THRESHOLD,
    )
  }

  fn endless() -> impl Iterator<Item = Frame> {
    let mut index = 0;
    std::iter::repeat_with(move || {
      thread::sleep(Duration::from_millis(5));
      index += 1;
      Frame::new(RgbImage::new(32, 24), index, 0)
    })
  }

  const WAIT: Duration = Duration::from_secs(5);

  #[test]
  fn start_publishes_and_stop_closes() {
    let session = CameraSession::new();
    let feed = session.feed();
    assert!(feed.is_closed());

    let started = session
      .start(|| Ok(endless()), OneBox, annotator(), 80)
      .unwrap();
    assert!(started);
    assert!(session.is_running());

    let FeedEvent::Frame(seq, frame) = feed.wait_newer(0, WAIT) else {
      panic!("预期收到一帧");
    };
    assert!(seq >= 1);
    assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(frame.analysis.report.findings[0].disease, "Gingivitis");

    // 运行中再次启动不做任何事
    assert!(!session.start(|| Ok(endless()), OneBox, annotator(), 80).unwrap());

    assert!(session.stop());
    assert!(!session.is_running());
    assert!(matches!(feed.wait_newer(u64::MAX, WAIT), FeedEvent::Closed));
    assert!(!session.stop());
  }

  #[test]
  fn open_failure_leaves_session_off() {
    let session = CameraSession::new();
    let result = session.start(
      || Err::<std::vec::IntoIter<Frame>, _>(InputError::SchemeMismatch("none".into())),
      OneBox,
      annotator(),
      80,
    );
    assert!(matches!(result, Err(CameraError::Open(_))));
    assert!(!session.is_running());
    assert!(session.feed().is_closed());
  }

  #[test]
  fn finished_loop_closes_feed_and_can_restart() {
    let session = CameraSession::new();
    let feed = session.feed();
    let frames = || Ok(vec![Frame::from(RgbImage::new(8, 8))].into_iter());

    assert!(session.start(frames, OneBox, annotator(), 80).unwrap());
    let mut seq = 0;
    loop {
      match feed.wait_newer(seq, WAIT) {
        FeedEvent::Frame(next, _) => seq = next,
        FeedEvent::Closed => break,
        FeedEvent::Timeout => panic!("等待超时"),
      }
    }
    assert_eq!(seq, 1);

    assert!(session.start(frames, OneBox, annotator(), 80).unwrap());
    session.stop();
  }

  #[test]
  fn slow_open_does_not_block_session() {
    let session = Arc::new(CameraSession::new());
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let starter = {
      let session = session.clone();
      thread::spawn(move || {
        session.start(
          move || {
            let _ = release_rx.recv();
            Ok(endless())
          },
          OneBox,
          annotator(),
          80,
        )
      })
    };

    let deadline = std::time::Instant::now() + WAIT;
    while !session.is_running() {
      assert!(std::time::Instant::now() < deadline, "会话未进入打开状态");
      thread::sleep(Duration::from_millis(5));
    }
    // 打开尚未完成时再次启动立即返回
    assert!(!session.start(|| Ok(endless()), OneBox, annotator(), 80).unwrap());

    release_tx.send(()).unwrap();
    assert!(starter.join().unwrap().unwrap());
    assert!(session.stop());
  }

  #[test]
  fn wait_times_out_without_frames() {
    let feed = FrameFeed::default();
    feed.reopen();
    assert!(matches!(
      feed.wait_newer(0, Duration::from_millis(20)),
      FeedEvent::Timeout
    ));
    assert!(feed.latest().is_none());
  }

  #[test]
  fn reopened_feed_waits_for_fresh_frame() {
    let feed = FrameFeed::default();
    feed.reopen();
    feed.publish(FeedFrame {
      analysis: annotator().annotate(&Frame::from(RgbImage::new(4, 4)), &DetectResult::default()),
      jpeg: Vec::new(),
    });
    feed.reopen();

    let started = std::time::Instant::now();
    assert!(matches!(
      feed.wait_newer(0, Duration::from_millis(30)),
      FeedEvent::Timeout
    ));
    assert!(started.elapsed() >= Duration::from_millis(25));
  }
}
