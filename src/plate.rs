// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/plate.rs - 车牌格式校验
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

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// 印度车牌格式：两位字母、两位数字、两位字母、四位数字
pub const DEFAULT_PLATE_PATTERN: &str = r"^[A-Z]{2}\s?[0-9]{2}\s?[A-Z]{2}\s?[0-9]{4}$";

#[derive(Error, Debug)]
pub enum PlateFormatError {
  #[error("车牌格式正则无效: {0}")]
  InvalidPattern(#[from] regex::Error),
}

/// 文本未通过格式校验
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("文本 {normalized:?} 不符合车牌格式")]
pub struct Rejected {
  pub normalized: String,
}

/// 规范化后的车牌号：全大写、无空白、完整匹配格式
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlateNumber(String);

impl PlateNumber {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PlateNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for PlateNumber {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// 去除所有空白并转为大写
pub fn normalize(raw: &str) -> String {
  raw
    .chars()
    .filter(|c| !c.is_whitespace())
    .flat_map(char::to_uppercase)
    .collect()
}

#[derive(Debug, Clone)]
pub struct PlateFormat {
  regex: Regex,
}

impl Default for PlateFormat {
  fn default() -> Self {
    // 内置格式必定可以编译
    Self::new(DEFAULT_PLATE_PATTERN).expect("内置车牌格式无效")
  }
}

impl PlateFormat {
  /// 编译车牌格式，整体包裹锚点以保证完整匹配
  pub fn new(pattern: &str) -> Result<Self, PlateFormatError> {
    let regex = Regex::new(&format!("^(?:{})$", pattern))?;
    Ok(Self { regex })
  }

  pub fn validate(&self, raw: &str) -> Result<PlateNumber, Rejected> {
    let normalized = normalize(raw);
    if !normalized.is_empty() && self.regex.is_match(&normalized) {
      Ok(PlateNumber(normalized))
    } else {
      Err(Rejected { normalized })
    }
  }

  /// 从日志中读回的车牌同样需要通过校验
  pub fn parse_recorded(&self, line: &str) -> Option<PlateNumber> {
    self.validate(line).ok()
  }
}
