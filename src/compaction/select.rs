use super::{MergeCandidate, MergePredicate, SelectOptions};
use crate::{
    config::{MergeSettings, DISK_USAGE_COEFFICIENT_TO_SELECT},
    part::{PartInfo, Partition},
};
use chrono::{DateTime, Local, Timelike};
use std::{cmp::Reverse, sync::Arc};

// Picks a run of at most max_parts_to_merge_at_once parts such that the
// largest part is less than max_size_ratio_to_merge_parts times the sum of
// the others. This bounds the total merge work at O(n log n) regardless of
// merge order and insert order.
//
// Heuristics on top:
// 1) between 01:00 and 05:00 the per-part size cap is raised several times
// 2) the permitted imbalance grows with the age of the parts
// 3) young parts of around a gigabyte or more merge in threes at minimum
// 4) while one worker merges large parts, others stick to small ones
// 5) the balance requirement tightens with the logarithm of the summed size
//
// Among valid runs, the maximal-by-inclusion one wins; ties prefer the
// smallest maximum size, then the smallest minimum size, then the longest run.

/// One second past the oldest part age that still counts as "young" for the
/// three-part minimum
const YOUNG_PART_SECONDS: u64 = 6 * 3_600;

/// Age past which an old partition may be swept regardless of balance
const OLD_SWEEP_SECONDS: u64 = 15 * 86_400;

/// Picks the best run of parts to merge, or `None` if nothing qualifies.
///
/// Deterministic on a fixed snapshot and fixed `now`; the wall clock is
/// passed in so one selection pass sees one consistent point in time.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn select_parts_to_merge(
    snapshot: &[Arc<PartInfo>],
    disk_free: u64,
    now: DateTime<Local>,
    opts: SelectOptions,
    can_merge: &dyn MergePredicate,
    settings: &MergeSettings,
) -> Option<MergeCandidate> {
    let granularity = settings.index_granularity;

    #[allow(clippy::cast_sign_loss)]
    let now_ts = now.timestamp().max(0) as u64;
    let current_partition = Partition::of(now.date_naive());
    let night = (1..=5).contains(&now.hour());

    let mut cur_cap = settings.max_rows_to_merge_parts;
    if night {
        cur_cap = cur_cap.saturating_mul(settings.merge_parts_at_night_inc);
    }
    if opts.only_small {
        cur_cap = settings.max_rows_to_merge_parts_second;
    }

    let mut best: Option<(usize, usize)> = None;
    let mut best_key = (u64::MAX, u64::MAX, Reverse(0_usize));

    // How many parts, starting at the current one, a valid run beginning
    // further left could still cover. Tracks maximality by inclusion.
    let mut reach_from_left = 0_usize;

    for (begin, first) in snapshot.iter().enumerate() {
        reach_from_left = reach_from_left.saturating_sub(1);

        if first.rows(granularity) > cur_cap && !opts.aggressive {
            continue;
        }

        if first.spans_partitions() {
            log::warn!("Part {} spans more than one partition", first.name);
            continue;
        }

        let partition = first.partition();
        let is_old_month = partition < current_partition;

        // Longest valid run starting here
        let mut longest: Option<(u64, u64, usize)> = None;

        let mut cur_max = first.rows(granularity);
        let mut cur_min = cur_max;
        let mut cur_sum = cur_max;
        let mut cur_bytes = first.size_in_bytes;
        let mut cur_right = first.max_block_id();
        let mut oldest_modification = first.modification_time;
        let mut len = 1_usize;

        for next_index in begin + 1..snapshot.len() {
            if len >= settings.max_parts_to_merge_at_once {
                break;
            }

            let prev = &snapshot[next_index - 1];
            let next = &snapshot[next_index];

            if !can_merge.can_merge(prev, next)
                || next.spans_partitions()
                || next.partition() != partition
            {
                break;
            }

            if next.rows(granularity) > cur_cap && !opts.aggressive {
                break;
            }

            if next.min_block_id() < cur_right {
                log::warn!("Part {} intersects previous part", next.name);
                break;
            }

            oldest_modification = oldest_modification.min(next.modification_time);
            cur_max = cur_max.max(next.rows(granularity));
            cur_min = cur_min.min(next.rows(granularity));
            cur_sum += next.rows(granularity);
            cur_bytes += next.size_in_bytes;
            cur_right = next.max_block_id();
            len += 1;

            let age_sec = now_ts.saturating_sub(oldest_modification);

            // Young parts of roughly a gigabyte or more merge in threes at minimum
            let mut min_len = 2;
            if cur_max.saturating_mul(150) > 1 << 30 && age_sec < YOUNG_PART_SECONDS {
                min_len = 3;
            }

            // Around 0.5 for fresh parts, grows towards 5 at a month of age
            #[allow(clippy::cast_precision_loss)]
            let time_ratio_modifier =
                0.5 + 9.0 * age_sec as f64 / ((30 * 86_400) as f64 + age_sec as f64);

            // Around 2 for small runs, shrinking towards 0.5 as the summed
            // size approaches 2^25 rows
            #[allow(clippy::cast_precision_loss)]
            let log_cur_sum = (cur_sum.max(1) as f64).log2();
            let size_ratio_modifier = (2.0 - 3.0 * log_cur_sum / (25.0 + log_cur_sum)).max(0.25);

            let ratio = (time_ratio_modifier
                * size_ratio_modifier
                * settings.max_size_ratio_to_merge_parts)
                .max(0.5);

            #[allow(clippy::cast_precision_loss)]
            let balanced = (cur_max as f64) / ((cur_sum - cur_max).max(1) as f64) < ratio;

            // Anything goes in a month long past, if allowed and old enough
            let old_sweep =
                is_old_month && opts.merge_old_partitions && age_sec > OLD_SWEEP_SECONDS;

            let valid = (len >= min_len && (balanced || old_sweep))
                || (opts.aggressive && len >= 2);

            if valid {
                #[allow(clippy::cast_precision_loss)]
                if disk_free as f64 > cur_bytes as f64 * DISK_USAGE_COEFFICIENT_TO_SELECT {
                    longest = Some((cur_max, cur_min, len));
                } else {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let overhead_percent = ((DISK_USAGE_COEFFICIENT_TO_SELECT - 1.0) * 100.0) as u64;
                    log::warn!(
                        "Won't merge parts from {} to {} because not enough free space: {disk_free} free and unreserved, {cur_bytes} required now (+{overhead_percent}% on overhead)",
                        first.name,
                        next.name,
                    );
                }
            }
        }

        // A valid run reaching further right than any run from an earlier
        // left endpoint is maximal by inclusion
        if let Some((longest_max, longest_min, longest_len)) = longest {
            if longest_len > reach_from_left {
                reach_from_left = longest_len;

                let key = (longest_max, longest_min, Reverse(longest_len));
                if key < best_key {
                    best_key = key;
                    best = Some((begin, longest_len));
                }
            }
        }
    }

    match best {
        Some((begin, len)) => {
            let parts = snapshot[begin..begin + len].to_vec();

            log::debug!(
                "Selected {} parts from {} to {}",
                parts.len(),
                parts.first().expect("run should not be empty").name,
                parts.last().expect("run should not be empty").name,
            );

            Some(MergeCandidate { parts })
        }
        None => {
            log::debug!("No parts to merge");
            None
        }
    }
}
