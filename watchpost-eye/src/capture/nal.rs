//! Annex-B access unit scanning for the hardware decode path.

/// Splits an H.264 Annex-B byte stream into NAL units.
///
/// Units are emitted with their start code (`00 00 01` or `00 00 00 01`)
/// attached, once the following start code has been seen. Bytes before the
/// first start code are dropped.
#[derive(Debug, Default)]
pub struct NalScanner {
    buffer: Vec<u8>,
    scan_pos: usize,
    unit_start: Option<usize>,
}

fn start_code_len(unit: &[u8]) -> usize {
    if unit.len() >= 4 && unit[..4] == [0, 0, 0, 1] {
        4
    } else {
        3
    }
}

impl NalScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Vec<u8>>) {
        self.buffer.extend_from_slice(chunk);
        let mut i = self.scan_pos;
        while i + 3 <= self.buffer.len() {
            if self.buffer[i] == 0 && self.buffer[i + 1] == 0 && self.buffer[i + 2] == 1 {
                let start = if i > 0 && self.buffer[i - 1] == 0 { i - 1 } else { i };
                if let Some(current) = self.unit_start {
                    self.emit(current, start, out);
                }
                self.unit_start = Some(start);
                i += 3;
            } else {
                i += 1;
            }
        }
        self.scan_pos = i;
        self.compact();
    }

    /// Emits the trailing unit at end of stream.
    pub fn flush(&mut self, out: &mut Vec<Vec<u8>>) {
        if let Some(current) = self.unit_start.take() {
            let end = self.buffer.len();
            self.emit(current, end, out);
        }
        self.buffer.clear();
        self.scan_pos = 0;
    }

    fn emit(&self, start: usize, end: usize, out: &mut Vec<Vec<u8>>) {
        let unit = &self.buffer[start..end];
        if unit.len() > start_code_len(unit) {
            out.push(unit.to_vec());
        }
    }

    fn compact(&mut self) {
        // Keep one scanned byte: it may be the leading zero of a 4-byte start code.
        let keep_from = self
            .unit_start
            .unwrap_or_else(|| self.scan_pos.saturating_sub(1));
        if keep_from == 0 {
            return;
        }
        self.buffer.drain(..keep_from);
        self.scan_pos -= keep_from;
        self.unit_start = self.unit_start.map(|s| s - keep_from);
    }
}
