// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/evidence.rs - 车牌证据存储
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

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{info, warn};

use crate::plate::{PlateFormat, PlateNumber};

pub const LOG_HEADER: &str = "License Plate";
pub const LOG_FILE_NAME: &str = "plates.csv";
pub const IMAGE_DIR_NAME: &str = "plates_img";
const SUFFIX_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("写入日志失败，已撤销图像 {}: {source}", path.display())]
  LogAppend {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 一次车牌记录的证据
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
  pub plate: PlateNumber,
  pub image_path: PathBuf,
  pub file_name: String,
  pub recorded_at: DateTime<Utc>,
}

/// 证据存储：整帧图像目录 + 追加写的车牌日志
///
/// 假定只有一个写入者，不做内部加锁。
#[derive(Debug, Clone)]
pub struct EvidenceStore {
  image_dir: PathBuf,
  log_path: PathBuf,
}

impl EvidenceStore {
  /// 在 `data_dir` 下打开存储，缺失的目录与日志表头会被创建
  pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
    let data_dir = data_dir.as_ref();
    Self::with_paths(data_dir.join(IMAGE_DIR_NAME), data_dir.join(LOG_FILE_NAME))
  }

  /// 以只读方式打开已有存储，不创建任何目录或文件
  ///
  /// 缺失的日志或图像目录视为空。
  pub fn existing(data_dir: impl AsRef<Path>) -> Self {
    let data_dir = data_dir.as_ref();
    Self {
      image_dir: data_dir.join(IMAGE_DIR_NAME),
      log_path: data_dir.join(LOG_FILE_NAME),
    }
  }

  pub fn with_paths(image_dir: PathBuf, log_path: PathBuf) -> Result<Self, StoreError> {
    fs::create_dir_all(&image_dir)?;
    if let Some(parent) = log_path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)?;
    }

    if !log_path.exists() || fs::metadata(&log_path)?.len() == 0 {
      info!("创建车牌日志: {}", log_path.display());
      let mut file = fs::File::create(&log_path)?;
      file.write_all(format!("{}\n", LOG_HEADER).as_bytes())?;
      file.sync_all()?;
    }

    Ok(Self {
      image_dir,
      log_path,
    })
  }

  pub fn image_dir(&self) -> &Path {
    &self.image_dir
  }

  pub fn log_path(&self) -> &Path {
    &self.log_path
  }

  /// 读取日志中已记录的车牌，跳过表头与不合格的行
  pub fn load_plates(&self, format: &PlateFormat) -> Result<Vec<PlateNumber>, StoreError> {
    let file = match fs::File::open(&self.log_path) {
      Ok(file) => file,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };
    let mut plates = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
      let line = line?;
      let line = line.trim();
      if line.is_empty() || (index == 0 && line == LOG_HEADER) {
        continue;
      }
      match format.parse_recorded(line) {
        Some(plate) => plates.push(plate),
        None => warn!("日志第 {} 行不是有效车牌: {:?}", index + 1, line),
      }
    }
    Ok(plates)
  }

  /// 列出证据图像文件名，按名称排序
  pub fn list_images(&self) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(&self.image_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }
      let name = entry.file_name().to_string_lossy().into_owned();
      if name.ends_with(".jpg") && !name.starts_with('.') {
        names.push(name);
      }
    }
    names.sort();
    Ok(names)
  }

  /// 保存整帧图像并追加日志，两者作为一个整体
  ///
  /// 图像先写入临时文件再重命名；日志追加失败时删除已保存的图像。
  pub fn persist(&self, frame: &RgbImage, plate: &PlateNumber) -> Result<EvidenceRecord, StoreError> {
    let file_name = evidence_file_name(plate);
    let image_path = self.image_dir.join(&file_name);
    let temp_path = self.image_dir.join(format!(".{}.tmp", file_name));

    if let Err(e) = write_image(&temp_path, frame) {
      let _ = fs::remove_file(&temp_path);
      return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, &image_path) {
      let _ = fs::remove_file(&temp_path);
      return Err(e.into());
    }

    if let Err(source) = self.append_log(plate) {
      if let Err(e) = fs::remove_file(&image_path) {
        warn!("撤销图像 {} 失败: {}", image_path.display(), e);
      }
      return Err(StoreError::LogAppend {
        path: image_path,
        source,
      });
    }

    Ok(EvidenceRecord {
      plate: plate.clone(),
      image_path,
      file_name,
      recorded_at: Utc::now(),
    })
  }

  fn append_log(&self, plate: &PlateNumber) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
      .read(true)
      .append(true)
      .open(&self.log_path)?;

    // 上一行可能缺少换行符（手工编辑或写入中断）
    let mut line = String::new();
    if !ends_with_newline(&mut file)? {
      line.push('\n');
    }
    line.push_str(plate.as_str());
    line.push('\n');

    // 单次写入整行
    file.write_all(line.as_bytes())?;
    file.sync_data()
  }
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
  let len = file.metadata()?.len();
  if len == 0 {
    return Ok(true);
  }
  file.seek(SeekFrom::Start(len - 1))?;
  let mut last = [0u8; 1];
  file.read_exact(&mut last)?;
  Ok(last[0] == b'\n')
}

/// 写入 JPEG 并落盘
fn write_image(path: &Path, frame: &RgbImage) -> Result<(), StoreError> {
  let mut writer = BufWriter::new(fs::File::create(path)?);
  frame.write_to(&mut writer, ImageFormat::Jpeg)?;
  let file = writer.into_inner().map_err(|e| e.into_error())?;
  file.sync_all()?;
  Ok(())
}

/// `{PLATE}_{6 位十六进制}.jpg`
pub fn evidence_file_name(plate: &PlateNumber) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("{}_{}.jpg", plate, &suffix[..SUFFIX_LEN])
}
