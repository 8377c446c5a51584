//! Text range file parser.
//!
//! One `start|end|region` range per line; blank lines and `#` comments are
//! skipped. Rejected lines are reported with their line number and up to
//! three lines of context on each side.

use std::io::{BufRead, BufReader, Read};

use crate::xdb::segment::Segment;
use crate::{Error, ParseError, Result};

/// Stream segments from a text range file, feeding each accepted segment
/// to `cb` in file order.
///
/// With `merge` set, a range whose region equals the previous one and
/// whose start is exactly `previous end + 1` is folded into the previous
/// range before emission. The Editor opens files with `merge` off so
/// adjacent same-region ranges stay separate.
///
/// Errors returned by `cb` are attributed to the line the rejected
/// segment came from.
pub fn iterate_segments<R: Read>(
    reader: R,
    merge: bool,
    cb: &mut dyn FnMut(Segment) -> Result<()>,
) -> Result<()> {
    let mut lines = Vec::new();
    for line in BufReader::new(reader).lines() {
        lines.push(line?);
    }

    // pending segment and the 0-based index of the line it started on
    let mut pending: Option<(Segment, usize)> = None;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let seg = Segment::parse(line).map_err(|e| contextualize(&lines, idx, e))?;

        match pending.take() {
            None => pending = Some((seg, idx)),
            Some((mut last, last_idx)) => {
                if merge
                    && last.region == seg.region
                    && last.end_ip.checked_add(1) == Some(seg.start_ip)
                {
                    last.end_ip = seg.end_ip;
                    pending = Some((last, last_idx));
                } else {
                    cb(last).map_err(|e| contextualize(&lines, last_idx, e))?;
                    pending = Some((seg, idx));
                }
            }
        }
    }

    if let Some((last, last_idx)) = pending {
        cb(last).map_err(|e| contextualize(&lines, last_idx, e))?;
    }

    Ok(())
}

/// Wrap a validation failure with the offending line and its neighbors.
fn contextualize(lines: &[String], idx: usize, cause: Error) -> Error {
    if matches!(cause, Error::Parse(_)) {
        return cause;
    }

    let start = idx.saturating_sub(3);
    let end = (idx + 4).min(lines.len());
    Error::Parse(ParseError {
        line_number: idx + 1,
        line: lines[idx].trim().to_string(),
        cause: Box::new(cause),
        before: (start..idx).map(|i| (i + 1, lines[i].clone())).collect(),
        after: (idx + 1..end).map(|i| (i + 1, lines[i].clone())).collect(),
    })
}
