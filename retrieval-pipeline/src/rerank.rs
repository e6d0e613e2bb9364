//! Late fusion across corpora: merge per-corpus hybrid hits, apply the date
//! post-filter, then blend normalized lexical/semantic score with recency.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use common::corpus::CorpusKey;

use crate::hybrid::HybridHit;

/// A chunk after cross-corpus fusion, carrying every score stage for
/// diagnostics and response assembly.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub record: common::storage::types::chunk::ChunkRecord,
    pub dataset: CorpusKey,
    pub hybrid_score: f32,
    pub norm_hybrid: f32,
    pub norm_recency: f32,
    pub final_score: f32,
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Min-max normalization to [0, 1]; a degenerate range maps every value
/// to 1.0.
fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for v in values {
        if !v.is_finite() {
            continue;
        }
        if *v < min {
            min = *v;
        }
        if *v > max {
            max = *v;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return vec![0.0; values.len()];
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; values.len()];
    }

    values
        .iter()
        .map(|v| {
            if v.is_finite() {
                ((v - min) / (max - min)).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Merges per-corpus hits and ranks them by
/// `(1 − W) · norm_hybrid + W · norm_recency`.
///
/// The date range is a post-filter: it only applies to corpora that carry a
/// date column, and rows whose date cannot be parsed are silently dropped
/// while the filter is active. Rows without any date never score recency
/// above the observed minimum; when no row has a date at all, recency
/// contributes zero and the hybrid score decides alone.
pub fn merge_and_rerank(
    frames: Vec<(CorpusKey, Vec<HybridHit>)>,
    date_range: Option<(NaiveDate, NaiveDate)>,
    recency_weight: f32,
    top_k: usize,
) -> Vec<RankedChunk> {
    let mut merged: Vec<(CorpusKey, HybridHit)> = Vec::new();
    for (dataset, hits) in frames {
        let before = hits.len();
        let mut kept = 0usize;
        for hit in hits {
            if let Some((start, end)) = date_range {
                if dataset.has_date_field() {
                    match parse_date(&hit.record.published_at) {
                        Some(date) if date >= start && date <= end => {}
                        _ => continue,
                    }
                }
            }
            kept += 1;
            merged.push((dataset, hit));
        }
        if date_range.is_some() {
            debug!(corpus = %dataset, before, kept, "Date filter applied");
        }
    }

    if merged.is_empty() {
        return Vec::new();
    }

    let hybrid_scores: Vec<f32> = merged.iter().map(|(_, hit)| hit.hybrid_score).collect();
    let norm_hybrid = min_max_normalize(&hybrid_scores);

    // Recency comes from published_at, falling back to updated_at. Rows
    // without a date take the minimum observed timestamp.
    let dates: Vec<Option<NaiveDate>> = merged
        .iter()
        .map(|(_, hit)| {
            parse_date(&hit.record.published_at).or_else(|| parse_date(&hit.record.updated_at))
        })
        .collect();

    let valid: Vec<i64> = dates
        .iter()
        .flatten()
        .map(|d| d.num_days_from_ce() as i64)
        .collect();

    let norm_recency = if valid.is_empty() {
        vec![0.0; merged.len()]
    } else {
        let min_day = valid.iter().copied().min().unwrap_or(0);
        let timestamps: Vec<f32> = dates
            .iter()
            .map(|d| d.map_or(min_day, |d| d.num_days_from_ce() as i64) as f32)
            .collect();
        min_max_normalize(&timestamps)
    };

    let mut ranked: Vec<RankedChunk> = merged
        .into_iter()
        .enumerate()
        .map(|(i, (dataset, hit))| {
            let nh = norm_hybrid.get(i).copied().unwrap_or(0.0);
            let nr = norm_recency.get(i).copied().unwrap_or(0.0);
            RankedChunk {
                record: hit.record,
                dataset,
                hybrid_score: hit.hybrid_score,
                norm_hybrid: nh,
                norm_recency: nr,
                final_score: (1.0 - recency_weight) * nh + recency_weight * nr,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.chunk_id.cmp(&b.record.chunk_id))
    });
    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use common::storage::types::chunk::ChunkRecord;

    fn hit(chunk_id: &str, score: f32, published_at: &str) -> HybridHit {
        HybridHit {
            record: ChunkRecord {
                chunk_id: chunk_id.to_string(),
                chunk_text: format!("{chunk_id} 본문"),
                published_at: published_at.to_string(),
                source: "notices".to_string(),
                ..ChunkRecord::default()
            },
            hybrid_score: score,
        }
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let ranked = merge_and_rerank(Vec::new(), None, 0.2, 5);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_single_candidate_normalizes_to_one() {
        let frames = vec![(CorpusKey::Notices, vec![hit("only", 0.4, "2025-11-10")])];
        let ranked = merge_and_rerank(frames, None, 0.2, 5);

        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].norm_hybrid - 1.0).abs() < f32::EPSILON);
        assert!((ranked[0].norm_recency - 1.0).abs() < f32::EPSILON);
        assert!((ranked[0].final_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let frames = vec![(
            CorpusKey::Notices,
            vec![
                hit("a", 0.9, "2025-11-10"),
                hit("b", 0.1, "2024-01-01"),
                hit("c", 0.5, ""),
            ],
        )];
        let ranked = merge_and_rerank(frames, None, 0.3, 5);

        for chunk in &ranked {
            assert!((0.0..=1.0).contains(&chunk.norm_hybrid));
            assert!((0.0..=1.0).contains(&chunk.norm_recency));
            assert!((0.0..=1.0).contains(&chunk.final_score));
        }
        // The dateless row is pinned to the minimum timestamp.
        let dateless = ranked.iter().find(|c| c.record.chunk_id == "c").expect("c");
        assert!((dateless.norm_recency - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_recency_boost_is_monotone() {
        // Same hybrid score: the newer row must never rank below the older.
        let frames = vec![(
            CorpusKey::Notices,
            vec![hit("old", 0.5, "2023-01-01"), hit("new", 0.5, "2025-11-10")],
        )];
        let ranked = merge_and_rerank(frames, None, 0.3, 5);
        assert_eq!(ranked[0].record.chunk_id, "new");
    }

    #[test]
    fn test_all_dates_missing_recency_contributes_zero() {
        let frames = vec![(
            CorpusKey::Courses,
            vec![hit("a", 0.9, ""), hit("b", 0.3, "")],
        )];
        let ranked = merge_and_rerank(frames, None, 0.5, 5);

        assert_eq!(ranked[0].record.chunk_id, "a");
        for chunk in &ranked {
            assert!((chunk.norm_recency - 0.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_date_filter_drops_out_of_range_and_unparseable() {
        let frames = vec![(
            CorpusKey::Notices,
            vec![
                hit("in", 0.5, "2025-11-10"),
                hit("out", 0.9, "2025-10-01"),
                hit("junk", 0.9, "날짜없음"),
            ],
        )];
        let range = Some((date("2025-11-10"), date("2025-11-10")));
        let ranked = merge_and_rerank(frames, range, 0.2, 5);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.chunk_id, "in");
    }

    #[test]
    fn test_date_filter_skips_corpora_without_dates() {
        // Courses carry no date column; the filter must not drop them.
        let frames = vec![
            (CorpusKey::Courses, vec![hit("course", 0.5, "")]),
            (CorpusKey::Notices, vec![hit("notice", 0.5, "2020-01-01")]),
        ];
        let range = Some((date("2025-11-01"), date("2025-11-30")));
        let ranked = merge_and_rerank(frames, range, 0.2, 5);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.chunk_id, "course");
    }

    #[test]
    fn test_top_k_truncation_and_ordering() {
        let frames = vec![(
            CorpusKey::Notices,
            (0..10)
                .map(|i| hit(&format!("c{i}"), i as f32 / 10.0, "2025-11-10"))
                .collect::<Vec<_>>(),
        )];
        let ranked = merge_and_rerank(frames, None, 0.0, 3);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].record.chunk_id, "c9");
        assert!(ranked[0].final_score >= ranked[1].final_score);
        assert!(ranked[1].final_score >= ranked[2].final_score);
    }

    #[test]
    fn test_num_days_is_monotone_in_dates() {
        assert!(date("2025-11-10").num_days_from_ce() > date("2024-11-10").num_days_from_ce());
    }
}
