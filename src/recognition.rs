// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/recognition.rs - 两阶段文字识别
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

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, warn};

use crate::model::{CandidateText, TextRecognizer};

/// 自适应阈值邻域边长（像素，奇数）
pub const ADAPTIVE_BLOCK_SIZE: u32 = 11;
/// 从邻域加权均值中减去的常数
pub const ADAPTIVE_OFFSET: i16 = 2;

/// 高斯加权的局部自适应二值化
///
/// 像素大于邻域高斯均值减去 `offset` 时置为 255，否则为 0。
/// 高斯核标准差按邻域大小取 `0.3 * ((block - 1) / 2 - 1) + 0.8`。
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, offset: i16) -> GrayImage {
  let sigma = 0.3 * ((block_size.max(3) as f32 - 1.0) * 0.5 - 1.0) + 0.8;
  let mean = gaussian_blur_f32(image, sigma);

  GrayImage::from_fn(image.width(), image.height(), |x, y| {
    let value = i16::from(image.get_pixel(x, y)[0]);
    let threshold = i16::from(mean.get_pixel(x, y)[0]) - offset;
    if value > threshold {
      Luma([255])
    } else {
      Luma([0])
    }
  })
}

/// 识别适配器：先识别原始区域，无结果时对区域做自适应二值化后再识别一次
pub struct RecognitionAdapter<R> {
  recognizer: R,
  block_size: u32,
  offset: i16,
}

impl<R: TextRecognizer> RecognitionAdapter<R> {
  pub fn new(recognizer: R) -> Self {
    Self {
      recognizer,
      block_size: ADAPTIVE_BLOCK_SIZE,
      offset: ADAPTIVE_OFFSET,
    }
  }

  pub fn with_threshold(mut self, block_size: u32, offset: i16) -> Self {
    self.block_size = block_size;
    self.offset = offset;
    self
  }

  pub fn recognizer(&self) -> &R {
    &self.recognizer
  }

  /// 识别失败与无结果同样处理，两阶段都为空时返回空列表
  pub fn recognize(&self, region: &GrayImage) -> Vec<CandidateText> {
    match self.recognizer.read(region) {
      Ok(candidates) if !candidates.is_empty() => return candidates,
      Ok(_) => debug!("原始区域未识别到文字，尝试预处理"),
      Err(e) => warn!("原始区域识别失败: {}，尝试预处理", e),
    }

    let processed = adaptive_threshold(region, self.block_size, self.offset);
    match self.recognizer.read(&processed) {
      Ok(candidates) => {
        if candidates.is_empty() {
          debug!("预处理后仍未识别到文字");
        }
        candidates
      }
      Err(e) => {
        warn!("预处理区域识别失败: {}", e);
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ModelError;
  use std::cell::RefCell;

  /// 按顺序返回预设结果，并记录每次调用收到的图像
  struct Scripted {
    replies: RefCell<Vec<Result<Vec<CandidateText>, ModelError>>>,
    seen: RefCell<Vec<GrayImage>>,
  }

  impl Scripted {
    fn new(mut replies: Vec<Result<Vec<CandidateText>, ModelError>>) -> Self {
      replies.reverse();
      Self {
        replies: RefCell::new(replies),
        seen: RefCell::new(Vec::new()),
      }
    }
  }

  impl TextRecognizer for Scripted {
    fn read(&self, image: &GrayImage) -> Result<Vec<CandidateText>, ModelError> {
      self.seen.borrow_mut().push(image.clone());
      self.replies.borrow_mut().pop().unwrap_or(Ok(Vec::new()))
    }
  }

  fn gradient() -> GrayImage {
    GrayImage::from_fn(32, 16, |x, _| Luma([(x * 8) as u8]))
  }

  #[test]
  fn test_first_stage_result_skips_fallback() {
    let adapter = RecognitionAdapter::new(Scripted::new(vec![Ok(vec![
      CandidateText::new("KA01AB1234", Some(0.9)),
      CandidateText::new("KA01", Some(0.4)),
    ])]));
    let candidates = adapter.recognize(&gradient());
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].text, "KA01AB1234");
    assert_eq!(adapter.recognizer().seen.borrow().len(), 1);
  }

  #[test]
  fn test_empty_first_stage_uses_thresholded_image() {
    let adapter = RecognitionAdapter::new(Scripted::new(vec![
      Ok(Vec::new()),
      Ok(vec![CandidateText::new("MH12DE1433", None)]),
    ]));
    let region = gradient();
    let candidates = adapter.recognize(&region);
    assert_eq!(candidates, vec![CandidateText::new("MH12DE1433", None)]);

    let seen = adapter.recognizer().seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], region);
    assert!(seen[1].pixels().all(|p| p[0] == 0 || p[0] == 255));
  }

  #[test]
  fn test_first_stage_error_falls_back() {
    let adapter = RecognitionAdapter::new(Scripted::new(vec![
      Err(ModelError::Backend("boom".to_string())),
      Ok(vec![CandidateText::new("DL04CZ9999", Some(0.7))]),
    ]));
    assert_eq!(adapter.recognize(&gradient()).len(), 1);
  }

  #[test]
  fn test_both_stages_empty_or_failing_yield_nothing() {
    let adapter = RecognitionAdapter::new(Scripted::new(vec![
      Ok(Vec::new()),
      Err(ModelError::Backend("boom".to_string())),
    ]));
    assert!(adapter.recognize(&gradient()).is_empty());
    assert_eq!(adapter.recognizer().seen.borrow().len(), 2);
  }

  #[test]
  fn test_adaptive_threshold_follows_local_illumination() {
    // 左暗右亮的背景上各有一条更暗的竖线
    let image = GrayImage::from_fn(40, 20, |x, _| {
      let background = if x < 20 { 60 } else { 200 };
      let stroke = x == 10 || x == 30;
      Luma([if stroke { background - 40 } else { background }])
    });
    let binary = adaptive_threshold(&image, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
    assert_eq!(binary.get_pixel(10, 10)[0], 0);
    assert_eq!(binary.get_pixel(30, 10)[0], 0);
    assert_eq!(binary.get_pixel(5, 10)[0], 255);
    assert_eq!(binary.get_pixel(35, 10)[0], 255);
  }
}
