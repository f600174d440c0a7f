// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{FromUrl, FromUrlWithScheme, output::FrameSink, stream::EncodedFrame};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把标注后的帧按日期目录写入磁盘
///
/// 默认只保存有新车牌记录的帧，`?always` 保存每一帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let path = urlencoding::decode(uri.path())
      .map_err(|e| DirectoryRecordOutputError::InvalidPath(e.to_string()))?;

    Ok(DirectoryRecordOutput::new(PathBuf::from(path.as_ref()), always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf, always: bool) -> Self {
    Self { directory, always }
  }

  fn frame_path(&self, frame: &EncodedFrame) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let mut filename = format!("{}-{:06}", now.format("%H-%M-%S"), frame.index);
    for plate in &frame.plates {
      filename.push('_');
      filename.push_str(plate.as_str());
    }
    filename.push_str(".jpg");

    Ok(directory.join(filename))
  }
}

impl FrameSink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    if !self.always && frame.plates.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(frame)?;
    std::fs::write(&path, &frame.jpeg)?;
    debug!("第 {} 帧已保存到 {}", frame.index, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plate::PlateFormat;
  use tempfile::TempDir;

  fn saved_files(root: &std::path::Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          files.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
      }
    }
    files.sort();
    files
  }

  fn encoded(index: u64, plates: &[&str]) -> EncodedFrame {
    let format = PlateFormat::default();
    EncodedFrame {
      index,
      jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
      plates: plates.iter().map(|p| format.validate(p).unwrap()).collect(),
    }
  }

  #[test]
  fn test_only_frames_with_plates_are_saved() {
    let dir = TempDir::new().unwrap();
    let mut output = DirectoryRecordOutput::new(dir.path().to_path_buf(), false);

    output.write_frame(&encoded(0, &[])).unwrap();
    output.write_frame(&encoded(1, &["KA01AB1234"])).unwrap();

    let files = saved_files(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("-000001_KA01AB1234.jpg"));
  }

  #[test]
  fn test_always_saves_every_frame() {
    let dir = TempDir::new().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();

    for index in 0..3 {
      output.write_frame(&encoded(index, &[])).unwrap();
    }
    assert_eq!(saved_files(dir.path()).len(), 3);
  }
}
