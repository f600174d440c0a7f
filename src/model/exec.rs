// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/model/exec.rs - 外部进程模型适配
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

//! # 外部进程模型
//!
//! 区域检测器与文字识别器都以外部程序的形式接入，每次调用启动一个进程：
//!
//! - 图像以 PNG 格式写入进程的标准输入
//! - 进程在标准输出打印 JSON 结果后退出
//! - 超过 `timeout_ms` 未退出的进程会被强制结束，连同它启动的子进程
//!
//! 检测器会额外收到 `--scale-factor`、`--min-neighbors`、`--min-width`、
//! `--min-height` 参数，输出 `[[x, y, w, h], ...]`。
//!
//! 识别器会额外收到 `--lang` 参数，输出数组中的每一项可以是 `"text"`、
//! `["text", conf]`、`{"text": ..., "confidence": ...}`，
//! 或 EasyOCR `readtext` 返回的 `[bbox, "text", conf]`。
//!
//! ```no_run
//! use chepai::{FromUrl, model::{ExecCommand, ExecRecognizer}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("exec:///usr/local/bin/plate-ocr?timeout_ms=3000")?;
//! let recognizer = ExecRecognizer::new(ExecCommand::from_url(&url)?, "en");
//! # Ok(())
//! # }
//! ```

use std::io::{Cursor, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, ImageFormat};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Region,
  model::{CandidateText, DetectParams, ModelError, RegionDetector, TextRecognizer},
};

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ExecCommand {
  program: String,
  args: Vec<String>,
  timeout: Duration,
}

impl FromUrlWithScheme for ExecCommand {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for ExecCommand {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let program = urlencoding::decode(url.path())
      .map_err(|e| ModelError::ModelPathError(e.to_string()))?
      .into_owned();
    if program.is_empty() {
      return Err(ModelError::ModelPathError("缺少程序路径".to_string()));
    }

    let mut args = Vec::new();
    let mut timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "arg" => args.push(v.into_owned()),
        "timeout_ms" => {
          let ms = v
            .parse()
            .map_err(|_| ModelError::ModelPathError(format!("无效的超时时间: {}", v)))?;
          timeout = Duration::from_millis(ms);
        }
        other => warn!("忽略未知参数: {}", other),
      }
    }

    Ok(ExecCommand {
      program,
      args,
      timeout,
    })
  }
}

impl ExecCommand {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// 启动进程，写入 `input`，在超时前收集标准输出
  pub fn run(&self, extra_args: &[String], input: Vec<u8>) -> Result<Vec<u8>, ModelError> {
    let deadline = Instant::now() + self.timeout;
    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .args(extra_args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit());
    // 独立进程组，超时时整组结束
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut command, 0);
    let mut child = command.spawn()?;

    let mut stdin = child
      .stdin
      .take()
      .ok_or_else(|| ModelError::Protocol("无法获取进程标准输入".to_string()))?;
    let mut stdout = child
      .stdout
      .take()
      .ok_or_else(|| ModelError::Protocol("无法获取进程标准输出".to_string()))?;

    // 进程不读取输入时写入会失败，这里不关心
    thread::spawn(move || {
      let _ = stdin.write_all(&input);
    });

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
      let mut buffer = Vec::new();
      let result = stdout.read_to_end(&mut buffer).map(|_| buffer);
      let _ = tx.send(result);
    });

    let output = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
      Ok(result) => result?,
      Err(_) => {
        warn!("进程 {} 超时，强制结束", self.program);
        terminate(&mut child);
        return Err(ModelError::Timeout(self.timeout));
      }
    };

    let status = loop {
      if let Some(status) = child.try_wait()? {
        break status;
      }
      if Instant::now() >= deadline {
        warn!("进程 {} 关闭输出后未退出，强制结束", self.program);
        terminate(&mut child);
        return Err(ModelError::Timeout(self.timeout));
      }
      thread::sleep(WAIT_POLL_INTERVAL);
    };

    if !status.success() {
      return Err(ModelError::ExitStatus(status));
    }

    debug!("进程 {} 输出 {} 字节", self.program, output.len());
    Ok(output)
  }
}

/// 结束进程及其进程组，孙进程可能仍持有标准输出
fn terminate(child: &mut Child) {
  #[cfg(unix)]
  {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
      .args(["-s", "KILL", "--", group.as_str()])
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status();
    if let Err(e) = killed {
      warn!("无法结束进程组 {}: {}", group, e);
    }
  }
  let _ = child.kill();
  let _ = child.wait();
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>, ModelError> {
  let mut buffer = Vec::new();
  image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
  Ok(buffer)
}

/// 以外部进程实现的区域检测器
#[derive(Debug, Clone)]
pub struct ExecDetector {
  command: ExecCommand,
}

impl ExecDetector {
  pub fn new(command: ExecCommand) -> Self {
    Self { command }
  }
}

impl RegionDetector for ExecDetector {
  fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Result<Vec<Region>, ModelError> {
    let args = vec![
      "--scale-factor".to_string(),
      params.scale_factor.to_string(),
      "--min-neighbors".to_string(),
      params.min_neighbors.to_string(),
      "--min-width".to_string(),
      params.min_size.0.to_string(),
      "--min-height".to_string(),
      params.min_size.1.to_string(),
    ];
    let output = self.command.run(&args, encode_png(gray)?)?;
    parse_regions(&output)
  }
}

/// 以外部进程实现的文字识别器
#[derive(Debug, Clone)]
pub struct ExecRecognizer {
  command: ExecCommand,
  lang: String,
}

impl ExecRecognizer {
  pub fn new(command: ExecCommand, lang: impl Into<String>) -> Self {
    Self {
      command,
      lang: lang.into(),
    }
  }
}

impl TextRecognizer for ExecRecognizer {
  fn read(&self, image: &GrayImage) -> Result<Vec<CandidateText>, ModelError> {
    let args = vec!["--lang".to_string(), self.lang.clone()];
    let output = self.command.run(&args, encode_png(image)?)?;
    parse_candidates(&output)
  }
}

fn parse_regions(output: &[u8]) -> Result<Vec<Region>, ModelError> {
  let boxes: Vec<[f64; 4]> = serde_json::from_slice(output)?;
  Ok(
    boxes
      .into_iter()
      .map(|[x, y, w, h]| {
        Region::new(
          x.round() as i32,
          y.round() as i32,
          w.max(0.0).round() as u32,
          h.max(0.0).round() as u32,
        )
      })
      .collect(),
  )
}

fn parse_candidates(output: &[u8]) -> Result<Vec<CandidateText>, ModelError> {
  let value: Value = serde_json::from_slice(output)?;
  let items = value
    .as_array()
    .ok_or_else(|| ModelError::Protocol("识别结果必须是数组".to_string()))?;
  let candidates = items
    .iter()
    .filter_map(|item| match parse_candidate(item) {
      Ok(candidate) => Some(candidate),
      Err(e) => {
        warn!("忽略无法解析的识别结果: {}", e);
        None
      }
    })
    .collect();
  Ok(candidates)
}

fn parse_candidate(item: &Value) -> Result<CandidateText, ModelError> {
  match item {
    Value::String(text) => Ok(CandidateText::new(text.clone(), None)),
    Value::Array(fields) => {
      // EasyOCR 的结果以坐标数组开头
      let fields = match fields.first() {
        Some(Value::Array(_)) => &fields[1..],
        _ => &fields[..],
      };
      let text = fields
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Protocol(format!("缺少文本字段: {}", item)))?;
      let confidence = fields.get(1).and_then(Value::as_f64).map(|c| c as f32);
      Ok(CandidateText::new(text, confidence))
    }
    Value::Object(map) => {
      let text = map
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Protocol(format!("缺少文本字段: {}", item)))?;
      let confidence = map
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32);
      Ok(CandidateText::new(text, confidence))
    }
    _ => Err(ModelError::Protocol(format!("无法识别的结果项: {}", item))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_candidates_accepts_all_shapes() {
    let output = br#"[
      "KA 01",
      ["MH12DE1433", 0.91],
      [[[0, 0], [10, 0], [10, 5], [0, 5]], "dl 04 cz 9999", 0.5],
      {"text": "AB", "confidence": 0.2},
      {"text": "CD"}
    ]"#;
    let candidates = parse_candidates(output).unwrap();
    assert_eq!(
      candidates,
      vec![
        CandidateText::new("KA 01", None),
        CandidateText::new("MH12DE1433", Some(0.91)),
        CandidateText::new("dl 04 cz 9999", Some(0.5)),
        CandidateText::new("AB", Some(0.2)),
        CandidateText::new("CD", None),
      ]
    );
  }

  #[test]
  fn test_parse_candidates_skips_bad_items() {
    let output = br#"[["MH12DE1433", 0.9], 42, [0.5], {"confidence": 0.1}]"#;
    let candidates = parse_candidates(output).unwrap();
    assert_eq!(candidates, vec![CandidateText::new("MH12DE1433", Some(0.9))]);
  }

  #[test]
  fn test_parse_candidates_rejects_non_array() {
    assert!(matches!(
      parse_candidates(br#"{"text": "AB"}"#),
      Err(ModelError::Protocol(_))
    ));
    assert!(matches!(
      parse_candidates(b"not json"),
      Err(ModelError::JsonError(_))
    ));
  }

  #[test]
  fn test_parse_regions() {
    let regions = parse_regions(b"[[10, 20, 100.4, 50], [-3, 4.6, 120, -1]]").unwrap();
    assert_eq!(
      regions,
      vec![Region::new(10, 20, 100, 50), Region::new(-3, 5, 120, 0)]
    );
  }

  #[test]
  fn test_command_from_url() {
    let url = Url::parse("exec:///opt/plate%20ocr/run?arg=--gpu&arg=0&timeout_ms=250").unwrap();
    let command = ExecCommand::from_url(&url).unwrap();
    assert_eq!(command.program, "/opt/plate ocr/run");
    assert_eq!(command.args, vec!["--gpu".to_string(), "0".to_string()]);
    assert_eq!(command.timeout(), Duration::from_millis(250));
  }

  #[test]
  fn test_command_from_url_scheme_mismatch() {
    let url = Url::parse("file:///bin/true").unwrap();
    assert!(matches!(
      ExecCommand::from_url(&url),
      Err(ModelError::SchemeMismatch(_))
    ));
  }

  #[cfg(unix)]
  #[test]
  fn test_recognizer_runs_process() {
    let command = ExecCommand::new("/bin/sh")
      .arg("-c")
      .arg(r#"cat > /dev/null; echo '[["mh 12 de 1433", 0.8]]'"#);
    let recognizer = ExecRecognizer::new(command, "en");
    let candidates = recognizer.read(&GrayImage::new(8, 4)).unwrap();
    assert_eq!(
      candidates,
      vec![CandidateText::new("mh 12 de 1433", Some(0.8))]
    );
  }

  #[cfg(unix)]
  #[test]
  fn test_detector_receives_params() {
    // $4/$5 为 --min-width 及其取值，$6/$7 为 --min-height 及其取值
    let command = ExecCommand::new("/bin/sh")
      .arg("-c")
      .arg(r#"cat > /dev/null; echo "[[0, 0, $5, $7]]""#);
    let detector = ExecDetector::new(command);
    let regions = detector
      .detect(&GrayImage::new(8, 4), &DetectParams::default())
      .unwrap();
    assert_eq!(regions, vec![Region::new(0, 0, 100, 50)]);
  }

  #[cfg(unix)]
  #[test]
  fn test_run_times_out() {
    let command = ExecCommand::new("/bin/sh")
      .arg("-c")
      .arg("sleep 5")
      .with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let result = command.run(&[], Vec::new());
    assert!(matches!(result, Err(ModelError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_timeout_kills_background_children() {
    let dir = tempfile::TempDir::new().unwrap();
    let pid_file = dir.path().join("pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
    let command = ExecCommand::new("/bin/sh")
      .arg("-c")
      .arg(script)
      .with_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let result = command.run(&[], Vec::new());
    assert!(matches!(result, Err(ModelError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(2));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let stat = format!("/proc/{}/stat", pid.trim());
    // 已结束的孙进程要么消失，要么是等待回收的僵尸
    let gone = || match std::fs::read_to_string(&stat) {
      Err(_) => true,
      Ok(line) => line.split_whitespace().nth(2) == Some("Z"),
    };
    let waited = Instant::now();
    while !gone() && waited.elapsed() < Duration::from_secs(2) {
      thread::sleep(Duration::from_millis(20));
    }
    assert!(gone());
  }

  #[cfg(unix)]
  #[test]
  fn test_run_reports_exit_status() {
    let command = ExecCommand::new("/bin/sh").arg("-c").arg("exit 3");
    assert!(matches!(
      command.run(&[], Vec::new()),
      Err(ModelError::ExitStatus(_))
    ));
  }
}
