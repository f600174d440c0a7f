// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/stream.rs - MJPEG 推流帧编码
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

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

use crate::plate::PlateNumber;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("JPEG 编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("编码结果为空")]
  Empty,
}

/// 已编码、可直接推送的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
  /// 帧索引
  pub index: u64,
  /// JPEG 数据
  pub jpeg: Vec<u8>,
  /// 本帧新记录的车牌
  pub plates: Vec<PlateNumber>,
}

impl EncodedFrame {
  /// 带边界分隔的 multipart 片段
  pub fn multipart_part(&self) -> Vec<u8> {
    multipart_part(&self.jpeg)
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(EncodeError::Empty);
  }
  let mut buffer = Vec::new();
  image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)))?;
  if buffer.is_empty() {
    return Err(EncodeError::Empty);
  }
  Ok(buffer)
}

pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
  let head = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
  let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
  part.extend_from_slice(head.as_bytes());
  part.extend_from_slice(jpeg);
  part.extend_from_slice(b"\r\n");
  part
}
