//! H.264 Annex-B stream splitting
//!
//! Splits a byte stream on `00 00 01` / `00 00 00 01` start codes and groups
//! the NAL units into access units so the sender knows where frames end.

use ftl_protocol::packetizer::nal_unit_type;

/// Access unit delimiter
pub const NAL_TYPE_AUD: u8 = 9;

/// NAL units of a byte stream, start codes removed
pub fn split_nal_units(stream: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= stream.len() {
        if stream[i] == 0 && stream[i + 1] == 0 && stream[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => stream.len(),
        };
        // Trailing zeros belong to the next four-byte start code
        while end > start && stream[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(&stream[start..end]);
        }
    }
    units
}

fn is_vcl(nal: &[u8]) -> bool {
    matches!(nal_unit_type(nal), Some(1..=5))
}

/// Whether a slice NAL starts a new picture (`first_mb_in_slice == 0`)
fn starts_picture(nal: &[u8]) -> bool {
    is_vcl(nal) && nal.get(1).map_or(false, |b| b & 0x80 != 0)
}

/// Group NAL units into access units
///
/// A new access unit begins at an AUD, or at any non-VCL unit or first slice
/// that follows a slice.
pub fn access_units<'a>(units: &[&'a [u8]]) -> Vec<Vec<&'a [u8]>> {
    let mut frames: Vec<Vec<&'a [u8]>> = Vec::new();
    let mut current: Vec<&'a [u8]> = Vec::new();
    let mut seen_slice = false;

    for &nal in units {
        let boundary = nal_unit_type(nal) == Some(NAL_TYPE_AUD)
            || (seen_slice && (!is_vcl(nal) || starts_picture(nal)));
        if boundary && !current.is_empty() {
            frames.push(std::mem::take(&mut current));
            seen_slice = false;
        }
        if nal_unit_type(nal) == Some(NAL_TYPE_AUD) {
            continue;
        }
        seen_slice |= is_vcl(nal);
        current.push(nal);
    }

    if !current.is_empty() {
        frames.push(current);
    }
    frames
}
