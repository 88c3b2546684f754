//! Delta-encoded VLQ line map: maps bytecode PCs to source lines.
//!
//! Each entry is 2 VLQ values:
//! - `delta_pc` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)

/// Accumulates line entries during compilation.
pub struct LineMapBuilder {
    entries: Vec<(u32, u32)>, // (pc, line)
}

impl LineMapBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record that code from `pc` onward belongs to `line`. Consecutive
    /// records for the same line collapse into one entry.
    pub fn add(&mut self, pc: u32, line: u32) {
        match self.entries.last_mut() {
            Some((_, last_line)) if *last_line == line => {}
            Some((last_pc, last_line)) if *last_pc == pc => *last_line = line,
            _ => self.entries.push((pc, line)),
        }
    }

    /// Produce the delta-encoded VLQ byte stream.
    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut prev_pc: u32 = 0;
        let mut prev_line: i64 = 0;

        for (pc, line) in &self.entries {
            encode_unsigned_vlq(pc - prev_pc, &mut buf);
            encode_unsigned_vlq(zigzag_encode(*line as i64 - prev_line), &mut buf);
            prev_pc = *pc;
            prev_line = *line as i64;
        }

        buf
    }
}

impl Default for LineMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up the line for `target_pc` in a delta-encoded line map.
/// Returns the line of the last entry with `pc <= target_pc`.
pub fn line_map_lookup(encoded: &[u8], target_pc: u32) -> Option<u32> {
    let mut pos = 0;
    let mut pc: u32 = 0;
    let mut line: i64 = 0;
    let mut best = None;

    while pos < encoded.len() {
        let delta_pc = decode_unsigned_vlq(encoded, &mut pos)?;
        let delta_line = zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);

        pc += delta_pc;
        line += delta_line;

        if pc > target_pc {
            break;
        }
        best = Some(line as u32);
    }

    best
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// Encode an unsigned integer as a variable-length quantity.
/// Each byte uses 7 data bits + 1 continuation bit (MSB).
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_map() {
        let encoded = LineMapBuilder::new().finish();
        assert!(encoded.is_empty());
        assert_eq!(line_map_lookup(&encoded, 0), None);
    }

    #[test]
    fn lines_follow_pc() {
        let mut builder = LineMapBuilder::new();
        builder.add(0, 1);
        builder.add(4, 2);
        builder.add(9, 7);
        builder.add(12, 3);
        let encoded = builder.finish();

        assert_eq!(line_map_lookup(&encoded, 0), Some(1));
        assert_eq!(line_map_lookup(&encoded, 3), Some(1));
        assert_eq!(line_map_lookup(&encoded, 4), Some(2));
        assert_eq!(line_map_lookup(&encoded, 10), Some(7));
        assert_eq!(line_map_lookup(&encoded, 500), Some(3));
    }

    #[test]
    fn repeated_lines_collapse() {
        let mut builder = LineMapBuilder::new();
        builder.add(0, 5);
        builder.add(3, 5);
        builder.add(6, 5);
        let encoded = builder.finish();
        assert_eq!(encoded.len(), 2);
        assert_eq!(line_map_lookup(&encoded, 6), Some(5));
    }

    #[test]
    fn same_pc_keeps_latest_line() {
        let mut builder = LineMapBuilder::new();
        builder.add(0, 1);
        builder.add(0, 4);
        let encoded = builder.finish();
        assert_eq!(line_map_lookup(&encoded, 0), Some(4));
    }

    #[test]
    fn vlq_handles_large_values() {
        for v in [0, 1, 127, 128, 16383, 16384, u32::MAX >> 4] {
            let mut buf = Vec::new();
            encode_unsigned_vlq(v, &mut buf);
            let mut pos = 0;
            assert_eq!(decode_unsigned_vlq(&buf, &mut pos), Some(v));
            assert_eq!(pos, buf.len());
        }
    }
}
