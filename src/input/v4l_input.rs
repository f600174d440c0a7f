// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

/// V4L2 摄像头输入
///
/// Stream 需要引用 Device，Device 用 Pin<Box> 固定在堆上，
/// 捕获流在 Drop 时先于设备释放。
pub struct V4lInput {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  // v4l2:///dev/video0?width=1280&height=720
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (k, v) in url.query_pairs() {
      let parsed = || {
        v.parse::<u32>()
          .map_err(|_| V4lInputError::InvalidParameter(format!("{}={}", k, v)))
      };
      match k.as_ref() {
        "width" => width = parsed()?,
        "height" => height = parsed()?,
        _ => warn!("忽略未知参数 {}={}", k, v),
      }
    }

    Self::open(&device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    let device = Box::pin(Device::with_path(device_path)?);

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat(format!("{:?}", format.fourcc)));
    }
    info!(
      "打开摄像头 {} ({}x{})",
      device_path, format.width, format.height
    );

    let mut input = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // SAFETY: device 固定在堆上不会移动，stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)?
    };
    input.stream = Some(stream);
    Ok(input)
  }
}

/// YUYV 转 RGB，每 4 字节对应两个像素
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Option<RgbImage> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }
  rgb.truncate((width * height * 3) as usize);
  RgbImage::from_raw(width, height, rgb)
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  /// 捕获失败视为输入源结束
  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;
    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => {
        error!("无法捕获帧: {}", e);
        self.stream.take();
        return None;
      }
    };

    let Some(image) = yuyv_to_rgb(buffer, self.width, self.height) else {
      error!("帧数据长度不足: {} 字节", buffer.len());
      self.stream.take();
      return None;
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(frame)
  }
}
