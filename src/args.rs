// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use chepai::plate::DEFAULT_PLATE_PATTERN;

/// Chepai 车牌记录参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/car.jpg?repeat=N
  /// - 目录: folder:///path/to/frames
  /// - V4L2: v4l2:///dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 车牌区域检测程序，例如 exec:///usr/local/bin/plate-detect?arg=cascade.xml
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,

  /// 文字识别程序，例如 exec:///usr/local/bin/plate-ocr
  #[arg(long, value_name = "RECOGNIZER")]
  pub recognizer: Url,

  /// 输出，可重复指定
  /// - MJPEG 推流: mjpeg://0.0.0.0:5000
  /// - 目录记录: folder:///path/to/record?always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Vec<Url>,

  /// 证据目录，图片保存在 plates_img，日志为 plates.csv
  #[arg(long, default_value = "data", value_name = "DIR")]
  pub data_dir: PathBuf,

  /// 车牌格式正则
  #[arg(long, default_value = DEFAULT_PLATE_PATTERN, value_name = "REGEX")]
  pub plate_pattern: String,

  /// 识别语言
  #[arg(long, default_value = "en", value_name = "LANG")]
  pub lang: String,

  #[arg(long, default_value = "1.1", value_name = "FACTOR")]
  pub scale_factor: f64,

  #[arg(long, default_value = "5", value_name = "COUNT")]
  pub min_neighbors: u32,

  /// 最小区域尺寸，格式为 宽x高
  #[arg(long, default_value = "100x50", value_name = "WxH", value_parser = parse_size)]
  pub min_size: (u32, u32),

  /// 单次检测/识别的超时时间（URL 中的 timeout_ms 优先）
  #[arg(long, default_value = "5000", value_name = "MS")]
  pub recognition_timeout_ms: u64,

  #[arg(long, default_value = "80", value_name = "QUALITY", value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,

  /// 车牌标注字体 (TTF/OTF)，不指定时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
  let (width, height) = value
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("尺寸格式应为 宽x高: {}", value))?;
  let width = width.trim().parse().map_err(|_| format!("无效的宽度: {}", width))?;
  let height = height
    .trim()
    .parse()
    .map_err(|_| format!("无效的高度: {}", height))?;
  Ok((width, height))
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case("100x50", Ok((100, 50)))]
  #[case("64X32", Ok((64, 32)))]
  #[case("100", Err(()))]
  #[case("ax50", Err(()))]
  fn test_parse_size(#[case] input: &str, #[case] expected: Result<(u32, u32), ()>) {
    assert_eq!(parse_size(input).map_err(|_| ()), expected);
  }

  #[test]
  fn test_defaults() {
    let args = Args::try_parse_from([
      "chepai",
      "--input",
      "image:///tmp/car.jpg",
      "--detector",
      "exec:///bin/detect",
      "--recognizer",
      "exec:///bin/ocr",
    ])
    .unwrap();

    assert!(args.output.is_empty());
    assert_eq!(args.data_dir, PathBuf::from("data"));
    assert_eq!(args.plate_pattern, DEFAULT_PLATE_PATTERN);
    assert_eq!(args.lang, "en");
    assert_eq!(args.min_size, (100, 50));
    assert_eq!(args.min_neighbors, 5);
    assert_eq!(args.recognition_timeout_ms, 5000);
    assert_eq!(args.jpeg_quality, 80);
    assert!(args.font.is_none());
  }

  #[test]
  fn test_repeated_outputs() {
    let args = Args::try_parse_from([
      "chepai",
      "--input",
      "folder:///frames",
      "--detector",
      "exec:///bin/detect",
      "--recognizer",
      "exec:///bin/ocr",
      "--output",
      "mjpeg://0.0.0.0:5000",
      "--output",
      "folder:///record",
    ])
    .unwrap();
    assert_eq!(args.output.len(), 2);
  }
}
