//! Chat line wrapper: repackages an arbitrary logical message into
//! fixed 64-byte text frames.
//!
//! The wrapper is a pure function returning an owned, finite sequence
//! of frames. Each frame renders independently: the color code active
//! at a wrap boundary is re-asserted at the start of the continuation
//! line, and every line after the first gets a `> ` prefix.

use crate::STRING_LEN;

/// Width of one chat frame, in payload bytes.
pub const FRAME_LEN: usize = STRING_LEN;

/// Escape byte introducing a two-byte color code.
pub const COLOR_ESCAPE: u8 = b'&';

const CONTINUATION_PREFIX: &[u8] = b"> ";

/// A message may be split at the position a space occupies, or
/// immediately after a hyphen.
#[derive(Clone, Copy)]
struct BreakPoint {
    /// Line length to keep when backtracking here.
    keep: usize,
    /// Input index to resume from on the continuation line.
    resume: usize,
    /// Color active at the boundary, re-asserted on the next line.
    color: Option<u8>,
}

/// Wrap `message` into space-padded 64-byte frames.
///
/// Words are never split across frames unless a single word (with no
/// space or hyphen boundary) exceeds one full frame, in which case it
/// is force-split at capacity.
pub fn wrap(message: &str) -> Vec<[u8; FRAME_LEN]> {
    let input = message.as_bytes();
    let mut frames: Vec<[u8; FRAME_LEN]> = Vec::new();
    let mut line: Vec<u8> = Vec::with_capacity(FRAME_LEN);
    let mut color: Option<u8> = None;
    let mut break_point: Option<BreakPoint> = None;

    let mut i = 0;
    while i < input.len() {
        let b = input[i];

        // A color code is an atomic two-byte unit.
        if b == COLOR_ESCAPE && i + 1 < input.len() {
            if line.len() + 2 > FRAME_LEN {
                i = wrap_line(&mut frames, &mut line, &mut break_point, &mut color, i);
                continue;
            }
            line.push(b);
            line.push(input[i + 1]);
            color = Some(input[i + 1]);
            i += 2;
            continue;
        }

        if b == b' ' {
            if line.len() + 1 > FRAME_LEN {
                // The boundary falls exactly on the frame edge: wrap
                // here and drop the space.
                emit(&mut frames, &mut line);
                start_continuation(&mut line, color);
                break_point = None;
                i += 1;
                continue;
            }
            break_point = Some(BreakPoint { keep: line.len(), resume: i + 1, color });
            line.push(b);
            i += 1;
            continue;
        }

        if line.len() + 1 > FRAME_LEN {
            i = wrap_line(&mut frames, &mut line, &mut break_point, &mut color, i);
            continue;
        }
        line.push(b);
        if b == b'-' {
            break_point = Some(BreakPoint { keep: line.len(), resume: i + 1, color });
        }
        i += 1;
    }

    if !line.is_empty() || frames.is_empty() {
        emit(&mut frames, &mut line);
    }
    frames
}

/// Overflow at input index `i`: backtrack to the recorded boundary if
/// one exists, otherwise force-split the over-long word. Returns the
/// input index to continue from.
fn wrap_line(
    frames: &mut Vec<[u8; FRAME_LEN]>,
    line: &mut Vec<u8>,
    break_point: &mut Option<BreakPoint>,
    color: &mut Option<u8>,
    i: usize,
) -> usize {
    if let Some(bp) = break_point.take() {
        line.truncate(bp.keep);
        emit(frames, line);
        *color = bp.color;
        start_continuation(line, *color);
        return bp.resume;
    }
    emit(frames, line);
    start_continuation(line, *color);
    i
}

fn start_continuation(line: &mut Vec<u8>, color: Option<u8>) {
    line.extend_from_slice(CONTINUATION_PREFIX);
    if let Some(code) = color {
        line.push(COLOR_ESCAPE);
        line.push(code);
    }
}

fn emit(frames: &mut Vec<[u8; FRAME_LEN]>, line: &mut Vec<u8>) {
    let mut frame = [b' '; FRAME_LEN];
    frame[..line.len()].copy_from_slice(line);
    frames.push(frame);
    line.clear();
}

/// True if the text contains bytes a client may not send: control
/// characters, the color escape, or anything outside printable ASCII.
pub fn has_illegal_chars(text: &str) -> bool {
    text.bytes()
        .any(|b| b < 0x20 || b > 0x7e || b == COLOR_ESCAPE)
}
