// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::model::Detection;

/// 贪心非极大值抑制，返回保留下来的候选下标（按保留顺序）。
///
/// 候选按分数降序稳定排序，同分时原始下标小者优先；
/// 与任一已保留边框的 IoU 超过 `iou_threshold` 即被丢弃。
/// `top_k` 为 0 时不限制保留数量。
pub fn non_max_suppression(candidates: &[Detection], iou_threshold: f32, top_k: usize) -> Vec<usize> {
  let mut order: Vec<usize> = (0..candidates.len()).collect();
  order.sort_by(|&a, &b| candidates[b].score.total_cmp(&candidates[a].score));

  let mut kept: Vec<usize> = Vec::with_capacity(order.len());
  for idx in order {
    if top_k > 0 && kept.len() >= top_k {
      break;
    }

    let bbox = &candidates[idx].bbox;
    let suppressed = kept
      .iter()
      .any(|&k| bbox.iou(&candidates[k].bbox) > iou_threshold);
    if !suppressed {
      kept.push(idx);
    }
  }

  debug!("NMS: {} 个候选, 保留 {} 个", candidates.len(), kept.len());
  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Point};

  fn candidate(score: f32, x: i32, y: i32, w: i32, h: i32) -> Detection {
    Detection {
      score,
      bbox: BoundingBox::new(x, y, w, h),
      landmarks: [Point::default(); 4],
    }
  }

  #[test]
  fn suppresses_overlapping_lower_score() {
    let candidates = vec![
      candidate(0.8, 15, 15, 50, 50),
      candidate(0.9, 10, 10, 50, 50),
    ];
    assert_eq!(non_max_suppression(&candidates, 0.5, 0), vec![1]);
  }

  #[test]
  fn disjoint_boxes_survive_any_threshold() {
    let candidates = vec![candidate(0.3, 0, 0, 10, 10), candidate(0.99, 100, 100, 10, 10)];
    for threshold in [0.0, 0.1, 0.5, 1.0] {
      let kept = non_max_suppression(&candidates, threshold, 0);
      assert_eq!(kept, vec![1, 0]);
    }
  }

  #[test]
  fn equal_scores_prefer_earlier_candidate() {
    let candidates = vec![
      candidate(0.7, 0, 0, 10, 10),
      candidate(0.9, 200, 200, 10, 10),
      candidate(0.7, 1, 1, 10, 10),
    ];
    assert_eq!(non_max_suppression(&candidates, 0.3, 0), vec![1, 0]);
  }

  #[test]
  fn second_pass_keeps_the_same_set() {
    let candidates = vec![
      candidate(0.9, 10, 10, 50, 50),
      candidate(0.85, 12, 12, 50, 50),
      candidate(0.8, 40, 40, 50, 50),
      candidate(0.75, 300, 300, 20, 20),
      candidate(0.7, 305, 302, 20, 20),
      candidate(0.6, 0, 0, 0, 0),
    ];
    let first = non_max_suppression(&candidates, 0.4, 0);
    let survivors: Vec<Detection> = first.iter().map(|&i| candidates[i].clone()).collect();
    let second = non_max_suppression(&survivors, 0.4, 0);

    let again: Vec<Detection> = second.iter().map(|&i| survivors[i].clone()).collect();
    assert_eq!(again, survivors);
  }

  #[test]
  fn zero_area_boxes_never_suppress() {
    let candidates = vec![candidate(0.9, 10, 10, 0, 0), candidate(0.8, 10, 10, 0, 0)];
    assert_eq!(non_max_suppression(&candidates, 0.0, 0), vec![0, 1]);
  }

  #[test]
  fn top_k_caps_survivors() {
    let candidates = vec![
      candidate(0.5, 0, 0, 10, 10),
      candidate(0.9, 100, 0, 10, 10),
      candidate(0.7, 200, 0, 10, 10),
    ];
    assert_eq!(non_max_suppression(&candidates, 0.5, 2), vec![1, 2]);
  }

  #[test]
  fn saturated_box_extents_are_compared_safely() {
    let candidates = vec![
      candidate(0.9, 10, 10, i32::MAX, 50),
      candidate(0.8, 15, 15, 50, 50),
    ];
    assert_eq!(non_max_suppression(&candidates, 0.5, 0), vec![0, 1]);
  }

  #[test]
  fn nan_scores_do_not_break_ordering() {
    let candidates = vec![
      candidate(0.6, 0, 0, 10, 10),
      candidate(f32::NAN, 100, 0, 10, 10),
      candidate(0.9, 200, 0, 10, 10),
    ];
    let kept = non_max_suppression(&candidates, 0.5, 0);
    assert_eq!(kept.len(), 3);
    let pos = |i| kept.iter().position(|&k| k == i).unwrap();
    assert!(pos(2) < pos(0));
  }

  #[test]
  fn empty_input_keeps_nothing() {
    assert!(non_max_suppression(&[], 0.5, 0).is_empty());
  }
}
