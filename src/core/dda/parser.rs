//! Q-matrix text output parsing (spec §4.G "Result handling"): strip the
//! binary's trailing terminator line, parse the remaining whitespace
//! separated matrix, transpose `[window][channel]` to `[channel][window]`,
//! replace NaN with 0.0, and project any still-non-finite value to `None`
//! at the boundary (mirrors the Python original's
//! `np.nan_to_num(..., nan=0.0)` then `np.where(np.isnan(Q), None, Q)`).

#[derive(Debug, Default)]
pub struct QMatrixStats {
    pub nan_count: usize,
    pub inf_count: usize,
    pub finite_count: usize,
}

/// Parses the binary's raw stdout/output-file text into a transposed,
/// sanitized `[channel][window]` matrix plus NaN/Inf/finite counters for
/// logging (spec §A "Q matrix statistics").
pub fn parse_q_matrix(content: &str) -> Option<(Vec<Vec<Option<f64>>>, QMatrixStats)> {
    let mut lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    // The binary's final line is a terminator, not data.
    lines.pop();
    if lines.is_empty() {
        return None;
    }

    let mut raw_matrix: Vec<Vec<f64>> = Vec::with_capacity(lines.len());
    for line in &lines {
        let row: Vec<f64> = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>().unwrap_or(f64::NAN))
            .collect();
        if !row.is_empty() {
            raw_matrix.push(row);
        }
    }
    if raw_matrix.is_empty() {
        return None;
    }

    let num_windows = raw_matrix.len();
    let num_channels = raw_matrix.iter().map(|r| r.len()).max().unwrap_or(0);
    if num_channels == 0 {
        return None;
    }

    let mut stats = QMatrixStats::default();
    let mut transposed: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(num_windows); num_channels];

    for row in &raw_matrix {
        for ch in 0..num_channels {
            let value = row.get(ch).copied().unwrap_or(f64::NAN);
            let sanitized = if value.is_nan() {
                stats.nan_count += 1;
                Some(0.0)
            } else if value.is_infinite() {
                stats.inf_count += 1;
                None
            } else {
                stats.finite_count += 1;
                Some(value)
            };
            transposed[ch].push(sanitized);
        }
    }

    Some((transposed, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_terminator_line_and_transposes() {
        let content = "1.0 2.0\n3.0 4.0\n5.0 6.0\nEND\n";
        let (matrix, stats) = parse_q_matrix(content).unwrap();
        // 2 windows (rows) of 2 channels each -> transposed to 2 channels x 2 windows
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0], vec![Some(1.0), Some(3.0)]);
        assert_eq!(matrix[1], vec![Some(2.0), Some(4.0)]);
        assert_eq!(stats.finite_count, 4);
    }

    #[test]
    fn nan_becomes_zero_inf_becomes_none() {
        let content = "nan 1.0\ninf 2.0\nTERM\n";
        let (matrix, stats) = parse_q_matrix(content).unwrap();
        assert_eq!(matrix[0][0], Some(0.0));
        assert_eq!(matrix[0][1], None);
        assert_eq!(stats.nan_count, 1);
        assert_eq!(stats.inf_count, 1);
    }

    #[test]
    fn empty_content_returns_none() {
        assert!(parse_q_matrix("").is_none());
        assert!(parse_q_matrix("ONLY_TERMINATOR\n").is_none());
    }
}
