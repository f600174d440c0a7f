// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use chepai::{
  FromUrl,
  annotate::Annotator,
  evidence::EvidenceStore,
  input::InputWrapper,
  model::{DetectParams, ExecCommand, ExecDetector, ExecRecognizer},
  output::OutputWrapper,
  pipeline::{DetectionPipeline, PipelineConfig, ShutdownHandle},
  plate::PlateFormat,
  task::{ContinuousTask, Task, install_interrupt_handler},
};

/// URL 未指定 timeout_ms 时使用命令行给出的超时
fn exec_command(url: &Url, timeout_ms: u64) -> Result<ExecCommand> {
  let command = ExecCommand::from_url(url).with_context(|| format!("无法解析外部程序: {}", url))?;
  if url.query_pairs().any(|(k, _)| k == "timeout_ms") {
    Ok(command)
  } else {
    Ok(command.with_timeout(Duration::from_millis(timeout_ms)))
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("输入来源: {}", args.input);
  info!("区域检测: {}", args.detector);
  info!("文字识别: {}", args.recognizer);
  for output in &args.output {
    info!("输出: {}", output);
  }
  info!("证据目录: {}", args.data_dir.display());

  let format = PlateFormat::new(&args.plate_pattern)?;
  let store = EvidenceStore::open(&args.data_dir)?;

  let detector = ExecDetector::new(exec_command(&args.detector, args.recognition_timeout_ms)?);
  let recognizer = ExecRecognizer::new(
    exec_command(&args.recognizer, args.recognition_timeout_ms)?,
    &args.lang,
  );

  let mut annotator = Annotator::default();
  if let Some(font) = &args.font {
    annotator = annotator
      .with_font_file(font)
      .with_context(|| format!("无法加载字体: {}", font.display()))?;
  }

  let config = PipelineConfig {
    detect: DetectParams {
      scale_factor: args.scale_factor,
      min_neighbors: args.min_neighbors,
      min_size: args.min_size,
    },
    jpeg_quality: args.jpeg_quality,
  };
  let pipeline = DetectionPipeline::new(detector, recognizer, store, format)?
    .with_config(config)
    .with_annotator(annotator);
  info!("已记录车牌: {} 个", pipeline.registry().len());

  let input = InputWrapper::from_url(&args.input)?;
  let outputs = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()?;

  let shutdown = ShutdownHandle::default();
  install_interrupt_handler(shutdown.clone())?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_shutdown(shutdown)
    .run_task(input, pipeline, outputs)?;

  Ok(())
}
