// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
}

fn load_rgb(path: &std::path::Path) -> Result<RgbImage, ImageFileInputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

fn elapsed_ms(start: &Instant) -> u64 {
  start.elapsed().as_millis() as u64
}

/// 单张图片输入，`repeat` 指定重复次数，0 表示无限重复
pub struct ImageFileInput {
  image: RgbImage,
  repeat: u64,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut repeat = 1;
    for (k, v) in url.query_pairs() {
      if k == "repeat" {
        repeat = v
          .parse()
          .map_err(|_| ImageFileInputError::InvalidParameter(format!("repeat={}", v)))?;
      }
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::InvalidParameter(e.to_string()))?;
    let image = load_rgb(std::path::Path::new(path.as_ref()))?;
    info!(
      "打开图片 {} ({}x{})，重复 {} 次",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(Self::new(image, repeat))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: u64) -> Self {
    Self {
      image,
      repeat,
      frame_index: 0,
      start_time: Instant::now(),
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat != 0 && self.frame_index >= self.repeat {
      return None;
    }
    let frame = Frame::new(
      self.image.clone(),
      self.frame_index,
      elapsed_ms(&self.start_time),
    );
    self.frame_index += 1;
    Some(frame)
  }
}

/// 目录输入，按文件名顺序逐张读取图片，无法解码的文件被跳过
pub struct DirectoryInput {
  files: VecDeque<PathBuf>,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::InvalidParameter(e.to_string()))?;
    Self::open(PathBuf::from(path.as_ref()))
  }
}

impl DirectoryInput {
  pub fn open(directory: PathBuf) -> Result<Self, ImageFileInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 中共有 {} 张图片", directory.display(), files.len());

    Ok(Self {
      files: files.into(),
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.files.pop_front() {
      match load_rgb(&path) {
        Ok(image) => {
          let frame = Frame::new(image, self.frame_index, elapsed_ms(&self.start_time));
          self.frame_index += 1;
          return Some(frame);
        }
        Err(e) => warn!("跳过无法读取的图片 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use tempfile::TempDir;

  fn write_image(dir: &TempDir, name: &str, shade: u8) -> PathBuf {
    let path = dir.path().join(name);
    RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
      .save(&path)
      .unwrap();
    path
  }

  #[test]
  fn test_image_file_repeats() {
    let dir = TempDir::new().unwrap();
    let path = write_image(&dir, "car.png", 10);
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}?repeat=3", url.path())).unwrap();

    let frames: Vec<_> = ImageFileInput::from_url(&url).unwrap().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(
      frames.iter().map(|f| f.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );
    assert_eq!(frames[0].image.dimensions(), (8, 6));
  }

  #[test]
  fn test_image_file_zero_repeat_is_endless() {
    let input = ImageFileInput::new(RgbImage::new(2, 2), 0);
    assert_eq!(input.take(100).count(), 100);
  }

  #[test]
  fn test_directory_reads_sorted_and_skips_broken() {
    let dir = TempDir::new().unwrap();
    write_image(&dir, "b.png", 20);
    write_image(&dir, "a.png", 10);
    std::fs::write(dir.path().join("c.jpg"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    write_image(&dir, "d.png", 30);

    let input = DirectoryInput::open(dir.path().to_path_buf()).unwrap();
    let shades: Vec<_> = input.map(|f| f.image.get_pixel(0, 0)[0]).collect();
    assert_eq!(shades, vec![10, 20, 30]);
  }

  #[test]
  fn test_scheme_mismatch() {
    let url = Url::parse("video:///tmp/a.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
