// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "mjpeg_output", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::stream::EncodedFrame;

/// 编码帧的消费端
pub trait FrameSink {
  type Error;
  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error>;
  fn finish(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[cfg(feature = "mjpeg_output")]
mod mjpeg_http;
#[cfg(feature = "mjpeg_output")]
pub use self::mjpeg_http::{MjpegHttpOutput, MjpegHttpOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "mjpeg_output")]
  #[error("MJPEG 推流输出错误: {0}")]
  MjpegHttpOutputError(#[from] MjpegHttpOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "mjpeg_output")]
  MjpegHttpOutput(MjpegHttpOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "mjpeg_output")]
      MjpegHttpOutput::SCHEME => {
        let output = MjpegHttpOutput::from_url(url)?;
        Ok(OutputWrapper::MjpegHttpOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl FrameSink for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "mjpeg_output")]
      OutputWrapper::MjpegHttpOutput(output) => output.write_frame(frame).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.write_frame(frame).map_err(OutputError::from)
      }
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "mjpeg_output")]
      OutputWrapper::MjpegHttpOutput(output) => output.finish().map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.finish().map_err(OutputError::from),
    }
  }
}
