use gcb_ci_core::util::truncate_bytes;

/// Line fragment that closes one step's output in a build log.
pub const STEP_BOUNDARY: &str = "Finished Step #";
/// Segments above this many bytes are elided.
pub const SEGMENT_LIMIT: usize = 64 * 1024;
/// Hard cap for an annotation's raw details.
pub const RAW_DETAILS_LIMIT: usize = 65_535;
pub const HEAD_LINES: usize = 100;
pub const TAIL_LINES: usize = 450;
pub const ELISION: &str = "...\n...\nSkipping lines to fit 64kb size\n...\n...";

/// Split a build log into one segment per step.
pub fn split_steps(log: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for line in log.lines() {
        current.push_str(line);
        current.push('\n');
        if line.contains(STEP_BOUNDARY) {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

/// Fit a segment into an annotation, keeping its first and last lines.
pub fn truncate_segment(segment: String) -> String {
    if segment.len() <= SEGMENT_LIMIT {
        return segment;
    }
    let lines: Vec<&str> = segment.split('\n').collect();
    if lines.len() > HEAD_LINES + TAIL_LINES {
        // Elided output keeps every head and tail line intact.
        let mut kept = Vec::with_capacity(HEAD_LINES + TAIL_LINES + 1);
        kept.extend_from_slice(&lines[..HEAD_LINES]);
        kept.push(ELISION);
        kept.extend_from_slice(&lines[lines.len() - TAIL_LINES..]);
        return kept.join("\n");
    }
    let mut out = segment;
    truncate_bytes(&mut out, RAW_DETAILS_LIMIT);
    out
}

pub fn process_log(log: &str) -> Vec<String> {
    split_steps(log).into_iter().map(truncate_segment).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_steps() {
        let log = "starting\nStep #0: hello\nFinished Step #0\nStep #1: world\nFinished Step #1\nPUSH\nDONE\n";
        let segments = split_steps(log);
        assert_eq!(segments, vec![
            "starting\nStep #0: hello\nFinished Step #0\n",
            "Step #1: world\nFinished Step #1\n",
            "PUSH\nDONE\n",
        ]);
        assert!(split_steps("").is_empty());
    }

    #[test]
    fn test_small_segment_untouched() {
        let segment = "Step #0: ok\n".repeat(10);
        assert_eq!(truncate_segment(segment.clone()), segment);
    }

    #[test]
    fn test_large_segment_keeps_head_and_tail() {
        let segment: String = (0..2000).map(|i| format!("Step #0: line {i:05} {}\n", "x".repeat(40))).collect();
        assert!(segment.len() > SEGMENT_LIMIT);

        let truncated = truncate_segment(segment.clone());

        let lines: Vec<&str> = truncated.split('\n').collect();
        let marker_lines = ELISION.split('\n').count();
        assert_eq!(lines.len(), HEAD_LINES + marker_lines + TAIL_LINES);
        assert!(lines[0].contains("line 00000"));
        assert!(lines[HEAD_LINES - 1].contains("line 00099"));
        assert_eq!(lines[HEAD_LINES + 2], "Skipping lines to fit 64kb size");
        // The segment ends with a newline, so the final split piece is empty.
        assert!(lines[lines.len() - 2].contains("line 01999"));
        assert!(lines[HEAD_LINES + marker_lines].contains("line 01551"));
        assert_eq!(truncated.matches("Skipping lines").count(), 1);
        assert!(truncated.len() <= RAW_DETAILS_LIMIT);
    }

    #[test]
    fn test_long_lines_keep_final_line() {
        let segment: String = (0..2000).map(|i| format!("{i:05} {}\n", "x".repeat(200))).collect();

        let truncated = truncate_segment(segment);

        assert!(truncated.len() > RAW_DETAILS_LIMIT);
        assert!(truncated.starts_with("00000 "));
        assert!(truncated.contains("00099 "));
        assert!(!truncated.contains("00100 "));
        assert!(truncated.contains(ELISION));
        assert!(truncated.contains("01551 "));
        assert!(truncated.trim_end().lines().last().unwrap().starts_with("01999 "));
        assert_eq!(truncated.split('\n').count(), HEAD_LINES + ELISION.split('\n').count() + TAIL_LINES);
    }

    #[test]
    fn test_few_long_lines_are_capped() {
        let segment = format!("{}\n", "é".repeat(40_000));
        let truncated = truncate_segment(segment);
        assert!(truncated.len() <= RAW_DETAILS_LIMIT);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
