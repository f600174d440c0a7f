// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/model.rs - 区域检测与文字识别接口
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

use std::time::Duration;

use image::GrayImage;
use thiserror::Error;

use crate::frame::Region;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("模型输出解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("模型输出格式错误: {0}")]
  Protocol(String),
  #[error("模型进程异常退出: {0}")]
  ExitStatus(std::process::ExitStatus),
  #[error("模型调用超时: {0:?}")]
  Timeout(Duration),
  #[error("模型内部错误: {0}")]
  Backend(String),
}

/// 区域检测参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  pub scale_factor: f64,
  pub min_neighbors: u32,
  /// 最小区域尺寸 (宽, 高)
  pub min_size: (u32, u32),
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      scale_factor: 1.1,
      min_neighbors: 5,
      min_size: (100, 50),
    }
  }
}

/// 识别得到的候选文本
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateText {
  pub text: String,
  pub confidence: Option<f32>,
}

impl CandidateText {
  pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
    Self {
      text: text.into(),
      confidence,
    }
  }
}

/// 车牌区域检测器，输入为整帧灰度图
pub trait RegionDetector {
  fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Result<Vec<Region>, ModelError>;
}

/// 文字识别器，输入为截取后的区域图像，候选顺序即识别器给出的顺序
pub trait TextRecognizer {
  fn read(&self, image: &GrayImage) -> Result<Vec<CandidateText>, ModelError>;
}

impl<T: RegionDetector + ?Sized> RegionDetector for Box<T> {
  fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Result<Vec<Region>, ModelError> {
    (**self).detect(gray, params)
  }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
  fn read(&self, image: &GrayImage) -> Result<Vec<CandidateText>, ModelError> {
    (**self).read(image)
  }
}

mod exec;
pub use self::exec::{ExecCommand, ExecDetector, ExecRecognizer};
