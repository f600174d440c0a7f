// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/registry.rs - 车牌去重登记表
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

use std::collections::HashSet;

use crate::plate::PlateNumber;

/// 已记录车牌集合
///
/// 只有单个流水线写入，不做内部加锁；条目不会被删除。
#[derive(Debug, Default, Clone)]
pub struct DedupRegistry {
  plates: HashSet<PlateNumber>,
}

impl DedupRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seen(&self, plate: &PlateNumber) -> bool {
    self.plates.contains(plate)
  }

  /// 登记车牌，返回此前是否未登记
  pub fn record(&mut self, plate: PlateNumber) -> bool {
    self.plates.insert(plate)
  }

  pub fn len(&self) -> usize {
    self.plates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.plates.is_empty()
  }
}

impl FromIterator<PlateNumber> for DedupRegistry {
  fn from_iter<I: IntoIterator<Item = PlateNumber>>(iter: I) -> Self {
    Self {
      plates: iter.into_iter().collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plate::PlateFormat;

  fn plate(raw: &str) -> PlateNumber {
    PlateFormat::default().validate(raw).unwrap()
  }

  #[test]
  fn test_record_then_seen() {
    let mut registry = DedupRegistry::new();
    let p = plate("MH12DE1433");
    assert!(!registry.seen(&p));
    assert!(registry.record(p.clone()));
    assert!(registry.seen(&p));
    assert!(!registry.record(p));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_from_iterator_collapses_duplicates() {
    let registry: DedupRegistry = ["KA01AB1234", "ka 01 ab 1234", "MH12DE1433"]
      .into_iter()
      .map(plate)
      .collect();
    assert_eq!(registry.len(), 2);
    assert!(registry.seen(&plate("KA01AB1234")));
  }
}
