//! # Formation Recognition
//!
//! ## Per frame
//! Outfield players are sorted by depth from their own goal and split into
//! horizontal lines with an optimal 1-D clustering. For each catalog
//! formation with the same number of players, the players are assigned to
//! the formation's slots (each slot sits at the depth of its line) with the
//! Hungarian algorithm; the cheapest assignment plus a per-line penalty wins.
//!
//! ## Hysteresis
//! A label is reported only once it has held for a minimum number of
//! consecutive frames. Until then the previously settled label stands. The
//! lookback reads raw labels of earlier frames, so the result depends only on
//! the frame index, never on the order frames were visited.

use std::ops::Range;

use pathfinding::prelude::{kuhn_munkres_min, Matrix};
use serde::Serialize;

use crate::config::FormationConfig;
use crate::error::QueryResult;

/// Centimetre resolution for the integer assignment costs.
const COST_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormationTemplate {
    pub label: &'static str,
    /// Players per line, back to front.
    pub lines: &'static [usize],
}

pub const CATALOG: &[FormationTemplate] = &[
    FormationTemplate { label: "4-4-2", lines: &[4, 4, 2] },
    FormationTemplate { label: "4-3-3", lines: &[4, 3, 3] },
    FormationTemplate { label: "3-5-2", lines: &[3, 5, 2] },
    FormationTemplate { label: "5-3-2", lines: &[5, 3, 2] },
    FormationTemplate { label: "5-4-1", lines: &[5, 4, 1] },
    FormationTemplate { label: "4-5-1", lines: &[4, 5, 1] },
    FormationTemplate { label: "4-2-4", lines: &[4, 2, 4] },
    FormationTemplate { label: "3-4-3", lines: &[3, 4, 3] },
    FormationTemplate { label: "4-2-3-1", lines: &[4, 2, 3, 1] },
    FormationTemplate { label: "4-1-4-1", lines: &[4, 1, 4, 1] },
];

/// Raw classification of a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationGuess {
    pub label: &'static str,
    /// Sizes of the detected lines, back to front.
    pub lines: Vec<usize>,
    /// Assignment cost in metres including the line penalty.
    pub cost: f64,
    /// Margin over the runner-up template, in [0, 1].
    pub confidence: f64,
}

/// Reported formation after hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationReading {
    pub label: &'static str,
    pub confidence: f64,
    /// The label has held for the minimum duration.
    pub settled: bool,
    /// Raw label of the frame itself, which may differ while a change is pending.
    pub raw_label: Option<&'static str>,
}

/// Optimal split of ascending `sorted` values into `k` contiguous groups
/// minimising the within-group squared error.
pub fn cluster_lines(sorted: &[f64], k: usize) -> Option<Vec<Range<usize>>> {
    let n = sorted.len();
    if k == 0 || k > n {
        return None;
    }
    let mut s1 = vec![0.0; n + 1];
    let mut s2 = vec![0.0; n + 1];
    for (i, v) in sorted.iter().enumerate() {
        s1[i + 1] = s1[i] + v;
        s2[i + 1] = s2[i] + v * v;
    }
    let sse = |a: usize, b: usize| {
        let s = s1[b] - s1[a];
        (s2[b] - s2[a]) - s * s / (b - a) as f64
    };

    let mut cost = vec![vec![f64::INFINITY; n + 1]; k + 1];
    let mut cut = vec![vec![0usize; n + 1]; k + 1];
    cost[0][0] = 0.0;
    for j in 1..=k {
        for i in j..=n {
            for p in j - 1..i {
                let c = cost[j - 1][p] + sse(p, i);
                if c < cost[j][i] {
                    cost[j][i] = c;
                    cut[j][i] = p;
                }
            }
        }
    }

    let mut ranges = Vec::with_capacity(k);
    let mut end = n;
    for j in (1..=k).rev() {
        let start = cut[j][end];
        ranges.push(start..end);
        end = start;
    }
    ranges.reverse();
    Some(ranges)
}

/// Assignment cost (metres) of `sorted` depths onto `template`, or `None`
/// when the player count does not match.
fn template_cost(sorted: &[f64], template: &FormationTemplate, cfg: &FormationConfig) -> Option<(f64, Vec<usize>)> {
    if template.lines.iter().sum::<usize>() != sorted.len() {
        return None;
    }
    let clusters = cluster_lines(sorted, template.lines.len())?;
    let centres: Vec<f64> = clusters
        .iter()
        .map(|r| sorted[r.clone()].iter().sum::<f64>() / r.len() as f64)
        .collect();
    let slots: Vec<f64> = template
        .lines
        .iter()
        .zip(&centres)
        .flat_map(|(&size, &depth)| std::iter::repeat(depth).take(size))
        .collect();

    let rows = sorted
        .iter()
        .map(|d| slots.iter().map(|s| ((d - s).abs() * COST_SCALE).round() as i64).collect::<Vec<_>>());
    let weights = Matrix::from_rows(rows).ok()?;
    let (total, _) = kuhn_munkres_min(&weights);

    let cost = total as f64 / COST_SCALE + cfg.line_penalty_m * template.lines.len() as f64;
    Some((cost, clusters.iter().map(|r| r.len()).collect()))
}

/// Best catalog formation for outfield depths measured from the own goal.
pub fn classify(depths: &[f64], cfg: &FormationConfig) -> Option<FormationGuess> {
    let mut sorted: Vec<f64> = depths.iter().copied().filter(|d| d.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let mut best: Option<(&FormationTemplate, f64, Vec<usize>)> = None;
    let mut runner_up = f64::INFINITY;
    for template in CATALOG {
        let Some((cost, lines)) = template_cost(&sorted, template, cfg) else {
            continue;
        };
        let best_cost = best.as_ref().map_or(f64::INFINITY, |b| b.1);
        if cost < best_cost {
            runner_up = runner_up.min(best_cost);
            best = Some((template, cost, lines));
        } else {
            runner_up = runner_up.min(cost);
        }
    }

    let (template, cost, lines) = best?;
    let confidence = if runner_up.is_infinite() {
        1.0
    } else if runner_up > 0.0 {
        ((runner_up - cost) / runner_up).clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some(FormationGuess { label: template.label, lines, cost, confidence })
}

/// Hysteresis over raw per-frame guesses. `raw(f)` classifies frame `f`;
/// it is called for `frame` and as far back as needed within `lookback_frames`.
pub fn settle<F>(frame: usize, min_frames: usize, lookback_frames: usize, mut raw: F) -> QueryResult<Option<FormationReading>>
where
    F: FnMut(usize) -> QueryResult<Option<FormationGuess>>,
{
    let min_frames = min_frames.max(1);
    let current = raw(frame)?;
    let raw_label = current.as_ref().map(|g| g.label);
    let oldest = frame.saturating_sub(lookback_frames);

    let mut run_label = raw_label;
    let mut run_guess = current.clone();
    let mut run_len = 1;
    let mut f = frame;
    loop {
        if run_len >= min_frames {
            return Ok(run_guess.map(|g| FormationReading {
                label: g.label,
                confidence: g.confidence,
                settled: true,
                raw_label,
            }));
        }
        if f == oldest {
            break;
        }
        f -= 1;
        let guess = raw(f)?;
        let label = guess.as_ref().map(|g| g.label);
        if label == run_label {
            run_len += 1;
        } else {
            run_label = label;
            run_guess = guess;
            run_len = 1;
        }
    }

    // Nothing has held long enough yet: report the frame's own label unsettled.
    Ok(current.map(|g| FormationReading { label: g.label, confidence: g.confidence, settled: false, raw_label }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depths(lines: &[(usize, f64)]) -> Vec<f64> {
        let mut out = Vec::new();
        for &(n, depth) in lines {
            for i in 0..n {
                out.push(depth + 0.3 * i as f64 - 0.15 * (n - 1) as f64);
            }
        }
        out
    }

    #[test]
    fn test_cluster_lines() {
        let mut s = vec![1.0, 1.2, 1.1, 10.0, 10.5, 20.0];
        s.sort_by(f64::total_cmp);
        let lines = cluster_lines(&s, 3).unwrap();
        assert_eq!(lines, vec![0..3, 3..5, 5..6]);
        assert!(cluster_lines(&s, 7).is_none());
    }

    #[test]
    fn test_classifies_clear_shapes() {
        let cfg = FormationConfig::default();
        let guess = classify(&depths(&[(4, 20.0), (4, 40.0), (2, 60.0)]), &cfg).unwrap();
        assert_eq!(guess.label, "4-4-2");
        assert_eq!(guess.lines, vec![4, 4, 2]);
        assert!(guess.confidence > 0.5);

        let guess = classify(&depths(&[(4, 20.0), (3, 38.0), (3, 58.0)]), &cfg).unwrap();
        assert_eq!(guess.label, "4-3-3");

        let guess = classify(&depths(&[(4, 15.0), (2, 30.0), (3, 45.0), (1, 60.0)]), &cfg).unwrap();
        assert_eq!(guess.label, "4-2-3-1");
    }

    #[test]
    fn test_unmatched_player_count() {
        assert!(classify(&[10.0, 20.0, 30.0], &FormationConfig::default()).is_none());
    }

    fn guess(label: &'static str) -> Option<FormationGuess> {
        Some(FormationGuess { label, lines: vec![], cost: 0.0, confidence: 0.8 })
    }

    #[test]
    fn test_hysteresis_holds_previous_label() {
        // 4-4-2 for frames 0..100, then 4-3-3.
        let raw = |f: usize| Ok(if f < 100 { guess("4-4-2") } else { guess("4-3-3") });
        let at = |f| settle(f, 50, 600, raw).unwrap().unwrap();

        assert_eq!(at(99).label, "4-4-2");
        let pending = at(120);
        assert_eq!(pending.label, "4-4-2");
        assert_eq!(pending.raw_label, Some("4-3-3"));
        assert!(pending.settled);
        assert_eq!(at(149).label, "4-3-3");
    }

    #[test]
    fn test_flicker_is_suppressed() {
        let raw = |f: usize| Ok(if f % 7 == 0 { guess("3-5-2") } else { guess("4-4-2") });
        for f in 200..260 {
            let reading = settle(f, 5, 600, raw).unwrap().unwrap();
            assert_eq!(reading.label, "4-4-2");
        }
    }

    #[test]
    fn test_start_of_match_is_unsettled() {
        let raw = |_f: usize| Ok(guess("4-4-2"));
        let reading = settle(3, 50, 600, raw).unwrap().unwrap();
        assert!(!reading.settled);
        assert_eq!(reading.label, "4-4-2");
    }
}
