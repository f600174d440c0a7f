// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/task.rs - 任务调度
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

use std::{thread, time::Duration};
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::{RegionDetector, TextRecognizer},
  output::FrameSink,
  pipeline::{DetectionPipeline, ShutdownHandle},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 安装 Ctrl-C 处理：通知流水线停止，超时仍未退出则强制结束进程
pub fn install_interrupt_handler(shutdown: ShutdownHandle) -> anyhow::Result<()> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    shutdown.shutdown();
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(())
}

/// 持续拉取编码帧并推送给所有输出，直到输入结束、达到帧数或收到中断
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  shutdown: Option<ShutdownHandle>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 使用外部停止信号，例如 [`install_interrupt_handler`] 安装的那一个
  pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
    self.shutdown = Some(shutdown);
    self
  }
}

impl<I, D, R, O> Task<I, DetectionPipeline<D, R>, Vec<O>> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  D: RegionDetector,
  R: TextRecognizer,
  O: FrameSink,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: DetectionPipeline<D, R>,
    mut outputs: Vec<O>,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut stream = pipeline.into_stream(input);
    if let Some(shutdown) = self.shutdown {
      stream = stream.with_shutdown(shutdown);
    }
    let shutdown = stream.shutdown_handle();

    let mut frame_count = 0usize;
    let mut plate_count = 0usize;
    let mut now = std::time::Instant::now();
    while let Some(frame) = stream.next() {
      frame_count += 1;
      plate_count += frame.plates.len();

      for (i, output) in outputs.iter_mut().enumerate() {
        if let Err(e) = output.write_frame(&frame) {
          warn!("输出 {} 写入第 {} 帧失败: {}", i, frame.index, e);
        }
      }
      debug!("第 {} 帧处理完成，耗时: {:.2?}", frame.index, now.elapsed());
      now = std::time::Instant::now();

      if self.frame_number.map(|n| frame_count >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        shutdown.shutdown();
      }
    }

    for (i, output) in outputs.iter_mut().enumerate() {
      if let Err(e) = output.finish() {
        warn!("输出 {} 关闭失败: {}", i, e);
      }
    }

    info!(
      "任务完成，共处理 {} 帧，新记录 {} 个车牌，累计 {} 个",
      frame_count,
      plate_count,
      stream.pipeline().registry().len()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::evidence::EvidenceStore;
  use crate::frame::Region;
  use crate::model::{CandidateText, DetectParams, ModelError};
  use crate::plate::PlateFormat;
  use crate::stream::EncodedFrame;
  use image::{GrayImage, RgbImage};
  use std::cell::RefCell;
  use std::rc::Rc;
  use tempfile::TempDir;

  struct FixedDetector(Vec<Region>);

  impl RegionDetector for FixedDetector {
    fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<Region>, ModelError> {
      Ok(self.0.clone())
    }
  }

  struct FixedRecognizer(&'static str);

  impl TextRecognizer for FixedRecognizer {
    fn read(&self, _: &GrayImage) -> Result<Vec<CandidateText>, ModelError> {
      Ok(vec![CandidateText::new(self.0, None)])
    }
  }

  #[derive(Clone, Default)]
  struct RecordingSink {
    frames: Rc<RefCell<Vec<u64>>>,
    finished: Rc<RefCell<bool>>,
    fail: bool,
  }

  impl FrameSink for RecordingSink {
    type Error = String;

    fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
      if self.fail {
        return Err("写入失败".to_string());
      }
      self.frames.borrow_mut().push(frame.index);
      Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
      *self.finished.borrow_mut() = true;
      Ok(())
    }
  }

  fn frames(count: u64) -> impl Iterator<Item = Frame> {
    (0..count).map(|i| Frame::new(RgbImage::new(160, 80), i, i * 40))
  }

  fn pipeline(dir: &TempDir) -> DetectionPipeline<FixedDetector, FixedRecognizer> {
    let store = EvidenceStore::open(dir.path()).unwrap();
    DetectionPipeline::new(
      FixedDetector(vec![Region::new(10, 10, 100, 50)]),
      FixedRecognizer("KA01AB1234"),
      store,
      PlateFormat::default(),
    )
    .unwrap()
  }

  #[test]
  fn test_every_frame_reaches_every_output() {
    let dir = TempDir::new().unwrap();
    let a = RecordingSink::default();
    let b = RecordingSink::default();

    ContinuousTask::default()
      .run_task(frames(4), pipeline(&dir), vec![a.clone(), b.clone()])
      .unwrap();

    assert_eq!(*a.frames.borrow(), vec![0, 1, 2, 3]);
    assert_eq!(*b.frames.borrow(), vec![0, 1, 2, 3]);
    assert!(*a.finished.borrow());

    let store = EvidenceStore::open(dir.path()).unwrap();
    assert_eq!(store.list_images().unwrap().len(), 1);
  }

  #[test]
  fn test_frame_number_limits_the_run() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();

    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(frames(10), pipeline(&dir), vec![sink.clone()])
      .unwrap();

    assert_eq!(*sink.frames.borrow(), vec![0, 1, 2]);
  }

  #[test]
  fn test_failing_output_does_not_stop_the_others() {
    let dir = TempDir::new().unwrap();
    let broken = RecordingSink {
      fail: true,
      ..Default::default()
    };
    let healthy = RecordingSink::default();

    ContinuousTask::default()
      .run_task(frames(3), pipeline(&dir), vec![broken, healthy.clone()])
      .unwrap();

    assert_eq!(*healthy.frames.borrow(), vec![0, 1, 2]);
  }

  #[test]
  fn test_external_shutdown_stops_before_first_frame() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let shutdown = ShutdownHandle::default();
    shutdown.shutdown();

    ContinuousTask::default()
      .with_shutdown(shutdown)
      .run_task(frames(5), pipeline(&dir), vec![sink.clone()])
      .unwrap();

    assert!(sink.frames.borrow().is_empty());
    assert!(*sink.finished.borrow());
  }
}
