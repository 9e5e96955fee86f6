//! Text canonicalizer — format-level normalization applied before comparison.
//!
//! - CRLF and lone CR become LF
//! - trailing spaces and tabs are stripped from every line
//! - trailing blank lines are dropped and exactly one final newline is added
//!
//! Pure, total and idempotent.

/// Canonicalize a document's bytes.
pub fn canonicalize(input: &[u8]) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\n' => {
                lines.push(&input[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&input[start..i]);
                i += if input.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&input[start..]);

    let mut lines: Vec<&[u8]> = lines.into_iter().map(trim_line_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(input.len() + 1);
    for line in lines {
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    if out.is_empty() {
        out.push(b'\n');
    }
    out
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t' | b'\x0b' | b'\x0c'))
        .map_or(0, |pos| pos + 1);
    &line[..end]
}
