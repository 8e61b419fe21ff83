//! Word Error Rate (§4.2 "WER calculation").
//!
//! Tokenizes to lowercase alphanumeric words, computes word-level Levenshtein
//! distance with the three standard edit operations, and backtracks over the DP
//! matrix to recover substitution/deletion/insertion counts alongside the
//! aggregate distance.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WerBreakdown {
    pub substitutions: u32,
    pub deletions: u32,
    pub insertions: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WerResult {
    pub wer: f64,
    pub distance: u32,
    pub reference_len: u32,
    pub breakdown: WerBreakdown,
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Match,
    Sub,
    Del,
    Ins,
}

/// `wer(x, x) = 0`; `wer(x, "") = 1`; insertion-heavy hypotheses can push the
/// ratio above 1 (§8 testable property: "`wer(x, y) ∈ [0, 1+ε]`").
pub fn word_error_rate(reference: &str, hypothesis: &str) -> WerResult {
    let r = tokenize(reference);
    let h = tokenize(hypothesis);
    let (rn, hn) = (r.len(), h.len());

    if rn == 0 {
        return WerResult {
            wer: if hn == 0 { 0.0 } else { 1.0 },
            distance: hn as u32,
            reference_len: 0,
            breakdown: WerBreakdown { insertions: hn as u32, ..Default::default() },
        };
    }

    // dp[i][j] = edit distance between r[..i] and h[..j]
    let mut dp = vec![vec![0u32; hn + 1]; rn + 1];
    for i in 0..=rn {
        dp[i][0] = i as u32;
    }
    for j in 0..=hn {
        dp[0][j] = j as u32;
    }
    for i in 1..=rn {
        for j in 1..=hn {
            dp[i][j] = if r[i - 1] == h[j - 1] {
                dp[i - 1][j - 1]
            } else {
                1 + dp[i - 1][j - 1].min(dp[i - 1][j]).min(dp[i][j - 1])
            };
        }
    }

    // Backtrack to recover the operation counts.
    let mut breakdown = WerBreakdown::default();
    let (mut i, mut j) = (rn, hn);
    while i > 0 || j > 0 {
        let here = dp[i][j];
        let op = if i > 0 && j > 0 && r[i - 1] == h[j - 1] && dp[i - 1][j - 1] == here {
            Op::Match
        } else if i > 0 && j > 0 && dp[i - 1][j - 1] + 1 == here {
            Op::Sub
        } else if i > 0 && dp[i - 1][j] + 1 == here {
            Op::Del
        } else {
            Op::Ins
        };
        match op {
            Op::Match => {
                i -= 1;
                j -= 1;
            }
            Op::Sub => {
                breakdown.substitutions += 1;
                i -= 1;
                j -= 1;
            }
            Op::Del => {
                breakdown.deletions += 1;
                i -= 1;
            }
            Op::Ins => {
                breakdown.insertions += 1;
                j -= 1;
            }
        }
    }

    let distance = dp[rn][hn];
    WerResult { wer: distance as f64 / rn as f64, distance, reference_len: rn as u32, breakdown }
}
