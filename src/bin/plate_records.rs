// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/bin/plate_records.rs - 已记录车牌查询
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chepai::{
  evidence::EvidenceStore,
  plate::{DEFAULT_PLATE_PATTERN, PlateFormat},
};

/// 列出日志中的车牌与证据图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 证据目录
  #[arg(long, default_value = "data", value_name = "DIR")]
  pub data_dir: PathBuf,

  /// 车牌格式正则
  #[arg(long, default_value = DEFAULT_PLATE_PATTERN, value_name = "REGEX")]
  pub plate_pattern: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("证据目录: {}", args.data_dir.display());

  let format = PlateFormat::new(&args.plate_pattern)?;
  let store = EvidenceStore::existing(&args.data_dir);

  let plates = store.load_plates(&format)?;
  println!("已记录车牌 ({}):", plates.len());
  for plate in &plates {
    println!("  {}", plate);
  }

  let images = store.list_images()?;
  println!("证据图像 ({}):", images.len());
  for image in &images {
    println!("  {}", store.image_dir().join(image).display());
  }

  Ok(())
}
