//! The shared script cleaner (spec §4.6, applied after S2 and S3). Pure and
//! idempotent: `clean_script(clean_script(x)) == clean_script(x)`.
//!
//! No regex dependency — the teacher's text-processing code elsewhere in
//! the stack (see `shipper-registry` response parsing) favors hand-written
//! scanning over pulling in a pattern-matching crate for a handful of
//! fixed delimiters, so this follows suit.

/// Run every step of the cleaner in order: strip `<think>` blocks, strip
/// review-marker sections, normalize speaker labels and emphasis, drop
/// non-speaker lines, then collapse blank runs. Dropping lines before
/// collapsing matters: `retain_speaker_lines` can merge several short blank
/// runs around a stray non-speaker line into one long run, and collapsing
/// first would miss that merged run on a second pass.
pub fn clean_script(text: &str) -> String {
    let text = strip_think_blocks(text);
    let text = strip_review_markers(&text);
    let text = normalize_speaker_labels(&text);
    let text = strip_emphasis(&text);
    let text = retain_speaker_lines(&text);
    let text = collapse_blank_runs(&text);
    text.trim().to_string()
}

fn strip_think_blocks(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut result = String::new();
    let mut rest_orig = text;
    let mut rest_lower: &str = &lower;

    loop {
        match rest_lower.find("<think>") {
            Some(start) => {
                result.push_str(&rest_orig[..start]);
                match rest_lower[start..].find("</think>") {
                    Some(end_rel) => {
                        let end = start + end_rel + "</think>".len();
                        rest_orig = &rest_orig[end..];
                        rest_lower = &rest_lower[end..];
                    }
                    None => return result,
                }
            }
            None => {
                result.push_str(rest_orig);
                return result;
            }
        }
    }
}

fn parse_marker(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.len() > 6 && trimmed.starts_with("===") && trimmed.ends_with("===") {
        let inner = trimmed[3..trimmed.len() - 3].trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }
    None
}

fn strip_review_markers(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();

    if let Some(cut_idx) = lines.iter().position(|line| {
        parse_marker(line)
            .map(|label| {
                let upper = label.to_uppercase();
                upper == "REVIEW" || upper == "REVIEW NOTES"
            })
            .unwrap_or(false)
    }) {
        lines.truncate(cut_idx);
    }

    lines
        .into_iter()
        .filter(|line| parse_marker(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_speaker_labels(text: &str) -> String {
    let mut result = String::new();
    let mut rest = text;

    loop {
        match rest.find("**Speaker ") {
            Some(start) => {
                result.push_str(&rest[..start]);
                let after = &rest[start + 2..]; // skip leading "**"
                if let Some(end_rel) = after.find(":**") {
                    result.push_str(&after[..end_rel]);
                    result.push(':');
                    rest = &after[end_rel + 3..];
                } else {
                    result.push_str("**Speaker ");
                    rest = &rest[start + "**Speaker ".len()..];
                }
            }
            None => {
                result.push_str(rest);
                return result;
            }
        }
    }
}

fn strip_delim_pairs(text: &str, delim: &str) -> String {
    let mut result = String::new();
    let mut rest = text;

    loop {
        match rest.find(delim) {
            Some(start) => {
                let after_start = &rest[start + delim.len()..];
                match after_start.find(delim) {
                    Some(end_rel) => {
                        result.push_str(&rest[..start]);
                        result.push_str(&after_start[..end_rel]);
                        rest = &after_start[end_rel + delim.len()..];
                    }
                    None => {
                        result.push_str(rest);
                        return result;
                    }
                }
            }
            None => {
                result.push_str(rest);
                return result;
            }
        }
    }
}

fn strip_emphasis(text: &str) -> String {
    let text = strip_delim_pairs(text, "**");
    strip_delim_pairs(&text, "*")
}

fn collapse_blank_runs(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim().is_empty() {
            let start = i;
            while i < lines.len() && lines[i].trim().is_empty() {
                i += 1;
            }
            let run_len = i - start;
            if run_len >= 3 {
                out.push("");
            } else {
                out.extend(std::iter::repeat("").take(run_len));
            }
        } else {
            out.push(lines[i]);
            i += 1;
        }
    }

    out.join("\n")
}

fn is_speaker_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix("Speaker ") else {
        return false;
    };
    let Some(colon_idx) = rest.find(':') else {
        return false;
    };
    let digits = &rest[..colon_idx];
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn retain_speaker_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_speaker_block = false;

    for line in text.lines() {
        if is_speaker_line(line) {
            in_speaker_block = true;
            out.push(line);
        } else if line.trim().is_empty() {
            in_speaker_block = false;
            out.push(line);
        } else if in_speaker_block {
            out.push(line);
        }
    }

    out.join("\n")
}
