use anyhow::{bail, Result};

/// Quote state for the segmenter state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
    Backtick,
}

/// Split a shell command into pipeline segments on `|`, `&&`, `||` and `;`.
///
/// Operators are recognized only outside quotes and outside `$(…)`
/// substitutions, so `echo "ls | rm -rf /"` stays a single segment.
/// A lone `&` (background job) is not a separator. Backslash escapes the
/// next character except inside single quotes. Unbalanced quotes or `$(`
/// are a hard failure.
pub fn split_segments(command: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = command.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut state = Quote::None;
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' && state != Quote::Single {
            current.push(c);
            if i + 1 < chars.len() {
                current.push(chars[i + 1]);
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        match state {
            Quote::None | Quote::Double => {
                let in_double = state == Quote::Double;
                match c {
                    '\'' if !in_double => {
                        state = Quote::Single;
                        current.push(c);
                    }
                    '"' => {
                        state = if in_double { Quote::None } else { Quote::Double };
                        current.push(c);
                    }
                    '`' if !in_double => {
                        state = Quote::Backtick;
                        current.push(c);
                    }
                    '$' if i + 1 < chars.len() && chars[i + 1] == '(' => {
                        depth += 1;
                        current.push('$');
                        current.push('(');
                        i += 2;
                        continue;
                    }
                    ')' if depth > 0 => {
                        depth -= 1;
                        current.push(c);
                    }
                    '|' | ';' if !in_double && depth == 0 => {
                        flush(&mut segments, &mut current);
                        if c == '|' && i + 1 < chars.len() && chars[i + 1] == '|' {
                            i += 1;
                        }
                    }
                    '&' if !in_double
                        && depth == 0
                        && i + 1 < chars.len()
                        && chars[i + 1] == '&' =>
                    {
                        flush(&mut segments, &mut current);
                        i += 1;
                    }
                    _ => current.push(c),
                }
            }
            Quote::Single => {
                if c == '\'' {
                    state = Quote::None;
                }
                current.push(c);
            }
            Quote::Backtick => {
                if c == '`' {
                    state = Quote::None;
                }
                current.push(c);
            }
        }
        i += 1;
    }

    match state {
        Quote::None => {}
        Quote::Single => bail!("unbalanced single quote"),
        Quote::Double => bail!("unbalanced double quote"),
        Quote::Backtick => bail!("unbalanced backtick"),
    }
    if depth != 0 {
        bail!("unbalanced command substitution");
    }

    flush(&mut segments, &mut current);
    Ok(segments)
}

fn flush(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

/// Extract the immediate (non-recursive) command substitution bodies of a
/// segment: top-level `$(…)` contents and backtick contents. Nested
/// substitutions stay inside the extracted body; the validator recurses
/// into each body separately.
pub fn extract_substitutions(segment: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = segment.chars().collect();
    let mut bodies = Vec::new();
    let mut state = Quote::None;
    let mut depth = 0usize;
    let mut capture = String::new();
    // Raw capture of a top-level backtick body; no depth tracking inside,
    // the recursive validation of the body handles whatever it contains.
    let mut in_backtick_body = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_backtick_body {
            if c == '\\' && i + 1 < chars.len() {
                capture.push(c);
                capture.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '`' {
                in_backtick_body = false;
                bodies.push(capture.trim().to_string());
                capture.clear();
            } else {
                capture.push(c);
            }
            i += 1;
            continue;
        }

        if c == '\\' && state != Quote::Single {
            if depth > 0 {
                capture.push(c);
                if i + 1 < chars.len() {
                    capture.push(chars[i + 1]);
                }
            }
            i += if i + 1 < chars.len() { 2 } else { 1 };
            continue;
        }

        match state {
            Quote::None | Quote::Double => {
                let in_double = state == Quote::Double;
                match c {
                    '\'' if !in_double => {
                        state = Quote::Single;
                        if depth > 0 {
                            capture.push(c);
                        }
                    }
                    '"' => {
                        state = if in_double { Quote::None } else { Quote::Double };
                        if depth > 0 {
                            capture.push(c);
                        }
                    }
                    '`' if !in_double => {
                        if depth > 0 {
                            // Nested backtick stays inside the $() body.
                            state = Quote::Backtick;
                            capture.push(c);
                        } else {
                            in_backtick_body = true;
                        }
                    }
                    '$' if i + 1 < chars.len() && chars[i + 1] == '(' => {
                        if depth > 0 {
                            capture.push('$');
                            capture.push('(');
                        }
                        depth += 1;
                        i += 2;
                        continue;
                    }
                    ')' if depth > 0 => {
                        depth -= 1;
                        if depth == 0 {
                            bodies.push(capture.trim().to_string());
                            capture.clear();
                        } else {
                            capture.push(c);
                        }
                    }
                    _ => {
                        if depth > 0 {
                            capture.push(c);
                        }
                    }
                }
            }
            Quote::Single => {
                if c == '\'' {
                    state = Quote::None;
                }
                if depth > 0 {
                    capture.push(c);
                }
            }
            Quote::Backtick => {
                // Only reachable nested inside a $() body.
                if c == '`' {
                    state = Quote::None;
                }
                capture.push(c);
            }
        }
        i += 1;
    }

    if in_backtick_body || state == Quote::Backtick {
        bail!("unbalanced backtick");
    }
    if depth != 0 {
        bail!("unbalanced command substitution");
    }

    bodies.retain(|b| !b.is_empty());
    Ok(bodies)
}
