// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/annotate.rs - 检测区域可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::frame::Region;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Annotator {
  color: [u8; 3],
  thickness: u32,
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self {
      color: BOX_COLOR,
      thickness: BOX_THICKNESS,
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Annotator {
  /// 加载字体后，已记录的车牌会在边框上方标注文本
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, AnnotateError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn color(&self) -> [u8; 3] {
    self.color
  }

  /// 绘制区域边框，边框向内加粗，区域超出画面的部分被裁掉
  pub fn draw_region(&self, image: &mut RgbImage, region: &Region) {
    let Some(region) = region.clamp_to(image.width(), image.height()) else {
      return;
    };

    for t in 0..self.thickness {
      let inset = t as i32;
      let width = region.width.saturating_sub(2 * t);
      let height = region.height.saturating_sub(2 * t);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at(region.x + inset, region.y + inset).of_size(width, height);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
  }

  /// 在区域上方绘制车牌文本，未加载字体时不绘制
  pub fn draw_label(&self, image: &mut RgbImage, region: &Region, text: &str) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    let Some(region) = region.clamp_to(image.width(), image.height()) else {
      return;
    };

    let text_width = (text.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = region.x;
    let label_y = (region.y - LABEL_TEXT_HEIGHT).max(0);

    let max_width = (image.width() as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    if label_width == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, Rgb(self.color));
    draw_text_mut(
      image,
      Rgb([0u8, 0u8, 0u8]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      PxScale::from(self.font_size),
      font,
      text,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_draw_region_outlines_box() {
    let mut image = RgbImage::new(100, 60);
    let annotator = Annotator::default();
    annotator.draw_region(&mut image, &Region::new(10, 10, 40, 20));

    let green = Rgb(BOX_COLOR);
    // 外圈与内圈
    assert_eq!(image.get_pixel(10, 10), &green);
    assert_eq!(image.get_pixel(49, 29), &green);
    assert_eq!(image.get_pixel(11, 20), &green);
    assert_eq!(image.get_pixel(48, 20), &green);
    // 内部与外部保持不变
    assert_eq!(image.get_pixel(30, 20), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(5, 5), &Rgb([0, 0, 0]));
  }

  #[test]
  fn test_draw_region_clips_to_image() {
    let mut image = RgbImage::new(50, 30);
    let annotator = Annotator::default();
    annotator.draw_region(&mut image, &Region::new(40, 20, 40, 40));
    assert_eq!(image.get_pixel(40, 20), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(49, 29), &Rgb(BOX_COLOR));

    // 完全在画面外的区域不绘制
    let mut blank = RgbImage::new(50, 30);
    annotator.draw_region(&mut blank, &Region::new(80, 80, 10, 10));
    assert!(blank.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn test_label_without_font_is_noop() {
    let mut image = RgbImage::new(100, 60);
    Annotator::default().draw_label(&mut image, &Region::new(10, 30, 40, 20), "KA01AB1234");
    assert!(image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn test_missing_font_file_is_error() {
    let result = Annotator::default().with_font_file("/nonexistent/font.ttf");
    assert!(matches!(result, Err(AnnotateError::IoError(_))));
  }
}
