// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/frame.rs - 帧与区域定义
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

use image::{GrayImage, RgbImage, imageops};

/// 帧数据
///
/// 只在一次循环迭代内存活，处理完成后即被丢弃。
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn to_gray(&self) -> GrayImage {
    imageops::grayscale(&self.image)
  }
}

/// 候选区域，帧坐标系下的轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

impl Region {
  pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 将区域裁剪到 `width` x `height` 的画面内，面积为零时返回 `None`
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
    let x_min = i64::from(self.x).clamp(0, i64::from(width));
    let y_min = i64::from(self.y).clamp(0, i64::from(height));
    let x_max = (i64::from(self.x) + i64::from(self.width)).clamp(0, i64::from(width));
    let y_max = (i64::from(self.y) + i64::from(self.height)).clamp(0, i64::from(height));

    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    Some(Region {
      x: x_min as i32,
      y: y_min as i32,
      width: (x_max - x_min) as u32,
      height: (y_max - y_min) as u32,
    })
  }

  /// 从灰度图中截取该区域
  pub fn crop(&self, gray: &GrayImage) -> Option<GrayImage> {
    let region = self.clamp_to(gray.width(), gray.height())?;
    Some(
      imageops::crop_imm(
        gray,
        region.x as u32,
        region.y as u32,
        region.width,
        region.height,
      )
      .to_image(),
    )
  }
}
