//! Compact source-line table.
//!
//! Each entry is a byte pair `(offset_delta: u8, line_delta: i8)`. Steps that
//! do not fit are split: offset gaps first as `(255, 0)` pairs, then line
//! steps clamped to `127` / `-128` with the remaining pairs at offset delta 0.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTable {
    last_line: u32,
    last_offset: u32,
    bytes: Vec<u8>,
}

impl LineTable {
    pub fn new(first_line: u32) -> Self {
        Self {
            last_line: first_line,
            last_offset: 0,
            bytes: Vec::new(),
        }
    }

    /// Records that the instruction at `offset` belongs to `line`.
    pub fn add(&mut self, line: u32, offset: u32) {
        if line == self.last_line {
            return;
        }
        let mut offset_delta = offset.saturating_sub(self.last_offset);
        let mut line_delta = i64::from(line) - i64::from(self.last_line);

        while offset_delta > 0xFF {
            self.bytes.extend([0xFF, 0]);
            offset_delta -= 0xFF;
        }
        while line_delta > 0x7F {
            self.bytes.extend([offset_delta as u8, 0x7F]);
            line_delta -= 0x7F;
            offset_delta = 0;
        }
        while line_delta < -0x80 {
            self.bytes.extend([offset_delta as u8, 0x80]);
            line_delta += 0x80;
            offset_delta = 0;
        }
        self.bytes.extend([offset_delta as u8, line_delta as i8 as u8]);

        self.last_line = line;
        self.last_offset = offset;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// `(start_offset, line)` pairs recovered from an encoded table.
    pub fn entries(first_line: u32, bytes: &[u8]) -> Vec<(u32, u32)> {
        let mut out = vec![(0, first_line)];
        let mut offset: u32 = 0;
        let mut line = i64::from(first_line);

        for pair in bytes.chunks_exact(2) {
            offset += u32::from(pair[0]);
            let step = i64::from(pair[1] as i8);
            if step == 0 {
                continue;
            }
            line += step;
            let line = u32::try_from(line).unwrap_or(0);
            match out.last_mut() {
                Some(last) if last.0 == offset => last.1 = line,
                _ => out.push((offset, line)),
            }
        }
        out
    }
}
