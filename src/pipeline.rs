// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/pipeline.rs - 车牌检测流水线
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

//! # 检测流水线
//!
//! 每一帧依次经过：区域检测 → 绘制边框 → 逐区域截取、识别、校验、去重、存证 → JPEG 编码。
//!
//! [`DetectionPipeline`] 持有去重表与证据存储，是两者唯一的写入者；
//! [`PipelineStream`] 把输入源包装成惰性的编码帧序列，每处理一帧产出一帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, RgbImage};
use tracing::{debug, info, warn};

use crate::{
  annotate::Annotator,
  evidence::{EvidenceRecord, EvidenceStore, StoreError},
  frame::{Frame, Region},
  model::{DetectParams, RegionDetector, TextRecognizer},
  plate::{PlateFormat, PlateNumber},
  recognition::RecognitionAdapter,
  registry::DedupRegistry,
  stream::{DEFAULT_JPEG_QUALITY, EncodedFrame, encode_jpeg},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  pub detect: DetectParams,
  pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      detect: DetectParams::default(),
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

/// 单个区域的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
  /// 区域落在画面之外
  OutOfFrame,
  /// 两阶段识别均无结果
  NoText,
  /// 所有候选都不符合车牌格式
  Rejected,
  /// 车牌已记录过
  Duplicate(PlateNumber),
  /// 新车牌，证据已保存
  Accepted(EvidenceRecord),
  /// 证据保存失败，车牌未登记，后续帧可重试
  StoreFailed(PlateNumber),
}

/// 处理完成、尚未编码的帧
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
  pub index: u64,
  /// 已绘制边框的整帧图像
  pub image: RgbImage,
  pub regions: Vec<Region>,
  /// 与 `regions` 一一对应
  pub outcomes: Vec<RegionOutcome>,
}

impl ProcessedFrame {
  pub fn accepted(&self) -> impl Iterator<Item = &EvidenceRecord> {
    self.outcomes.iter().filter_map(|outcome| match outcome {
      RegionOutcome::Accepted(record) => Some(record),
      _ => None,
    })
  }
}

/// 流水线上下文，启动时构造一次
pub struct DetectionPipeline<D, R> {
  detector: D,
  recognition: RecognitionAdapter<R>,
  format: PlateFormat,
  registry: DedupRegistry,
  store: EvidenceStore,
  annotator: Annotator,
  config: PipelineConfig,
}

impl<D: RegionDetector, R: TextRecognizer> DetectionPipeline<D, R> {
  /// 构造流水线，并用证据日志中已有的车牌初始化去重表
  pub fn new(
    detector: D,
    recognizer: R,
    store: EvidenceStore,
    format: PlateFormat,
  ) -> Result<Self, StoreError> {
    let registry: DedupRegistry = store.load_plates(&format)?.into_iter().collect();
    info!("从日志恢复 {} 个已记录车牌", registry.len());

    Ok(Self {
      detector,
      recognition: RecognitionAdapter::new(recognizer),
      format,
      registry,
      store,
      annotator: Annotator::default(),
      config: PipelineConfig::default(),
    })
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_recognition(mut self, recognition: RecognitionAdapter<R>) -> Self {
    self.recognition = recognition;
    self
  }

  pub fn registry(&self) -> &DedupRegistry {
    &self.registry
  }

  pub fn store(&self) -> &EvidenceStore {
    &self.store
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 处理一帧，任何区域的失败都不会中断处理
  pub fn process_frame(&mut self, frame: Frame) -> ProcessedFrame {
    let gray = frame.to_gray();
    let Frame {
      mut image, index, ..
    } = frame;

    let regions = match self.detector.detect(&gray, &self.config.detect) {
      Ok(regions) => regions,
      Err(e) => {
        warn!("第 {} 帧区域检测失败: {}", index, e);
        Vec::new()
      }
    };
    if !regions.is_empty() {
      debug!("第 {} 帧检测到 {} 个区域", index, regions.len());
    }

    // 无论识别结果如何，每个区域都绘制边框
    for region in &regions {
      self.annotator.draw_region(&mut image, region);
    }

    let mut outcomes = Vec::with_capacity(regions.len());
    for region in &regions {
      let outcome = self.process_region(&gray, &image, region);
      if let RegionOutcome::Accepted(record) = &outcome {
        self
          .annotator
          .draw_label(&mut image, region, record.plate.as_str());
      }
      outcomes.push(outcome);
    }

    ProcessedFrame {
      index,
      image,
      regions,
      outcomes,
    }
  }

  fn process_region(&mut self, gray: &GrayImage, image: &RgbImage, region: &Region) -> RegionOutcome {
    let Some(crop) = region.crop(gray) else {
      debug!("区域 {:?} 不在画面内", region);
      return RegionOutcome::OutOfFrame;
    };

    let candidates = self.recognition.recognize(&crop);
    if candidates.is_empty() {
      return RegionOutcome::NoText;
    }

    // 每个区域只取第一个合格的候选
    let plate = candidates
      .iter()
      .find_map(|candidate| match self.format.validate(&candidate.text) {
        Ok(plate) => Some(plate),
        Err(rejected) => {
          debug!("丢弃候选文本 {:?}", rejected.normalized);
          None
        }
      });
    let Some(plate) = plate else {
      return RegionOutcome::Rejected;
    };

    if self.registry.seen(&plate) {
      debug!("车牌 {} 已记录，跳过", plate);
      return RegionOutcome::Duplicate(plate);
    }

    // 图像与日志都写入成功后才登记
    match self.store.persist(image, &plate) {
      Ok(record) => {
        info!("记录新车牌 {} -> {}", plate, record.image_path.display());
        self.registry.record(plate);
        RegionOutcome::Accepted(record)
      }
      Err(e) => {
        warn!("保存车牌 {} 的证据失败: {}", plate, e);
        RegionOutcome::StoreFailed(plate)
      }
    }
  }

  /// 把输入源包装成编码帧序列
  pub fn into_stream<I: Iterator<Item = Frame>>(self, source: I) -> PipelineStream<I, D, R> {
    PipelineStream {
      source: Some(source),
      pipeline: self,
      shutdown: ShutdownHandle::default(),
    }
  }
}

/// 外部停止信号
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
  pub fn shutdown(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_shutdown(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 惰性的编码帧序列
///
/// 输入源结束或收到停止信号后不再拉取新帧，并立即释放输入源；
/// 正在处理的帧会完整处理完。编码失败的帧被跳过。
pub struct PipelineStream<I, D, R> {
  source: Option<I>,
  pipeline: DetectionPipeline<D, R>,
  shutdown: ShutdownHandle,
}

impl<I, D, R> PipelineStream<I, D, R> {
  pub fn shutdown_handle(&self) -> ShutdownHandle {
    self.shutdown.clone()
  }

  pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
    self.shutdown = shutdown;
    self
  }

  pub fn pipeline(&self) -> &DetectionPipeline<D, R> {
    &self.pipeline
  }

  pub fn into_pipeline(self) -> DetectionPipeline<D, R> {
    self.pipeline
  }

  fn release_source(&mut self) {
    if self.source.take().is_some() {
      info!("释放输入源");
    }
  }
}

impl<I, D, R> Iterator for PipelineStream<I, D, R>
where
  I: Iterator<Item = Frame>,
  D: RegionDetector,
  R: TextRecognizer,
{
  type Item = EncodedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.shutdown.is_shutdown() {
        self.release_source();
        return None;
      }

      let Some(frame) = self.source.as_mut()?.next() else {
        info!("输入源已结束");
        self.release_source();
        return None;
      };

      let processed = self.pipeline.process_frame(frame);
      match encode_jpeg(&processed.image, self.pipeline.config.jpeg_quality) {
        Ok(jpeg) => {
          return Some(EncodedFrame {
            index: processed.index,
            jpeg,
            plates: processed.accepted().map(|r| r.plate.clone()).collect(),
          });
        }
        Err(e) => warn!("第 {} 帧编码失败，跳过: {}", processed.index, e),
      }
    }
  }
}
