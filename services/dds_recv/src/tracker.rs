//! Which sequence numbers of a missing run have been recovered

/// One bit per sequence number in `begin..=end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceTracker {
    begin: u16,
    end: u16,
    bits: Vec<u64>,
    received: usize,
}

impl SequenceTracker {
    /// `begin` must not exceed `end`; wrapped runs are split before they
    /// get here. A reversed pair is swapped.
    pub fn new(begin: u16, end: u16) -> Self {
        let (begin, end) = if begin <= end { (begin, end) } else { (end, begin) };
        let len = (end - begin) as usize + 1;
        Self {
            begin,
            end,
            bits: vec![0; len.div_ceil(64)],
            received: 0,
        }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.begin, self.end)
    }

    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Marks `seq` received. Returns false if it is outside the range or
    /// was already marked.
    pub fn mark(&mut self, seq: u16) -> bool {
        if seq < self.begin || seq > self.end {
            return false;
        }
        let idx = (seq - self.begin) as usize;
        let (word, bit) = (idx / 64, 1u64 << (idx % 64));
        if self.bits[word] & bit != 0 {
            return false;
        }
        self.bits[word] |= bit;
        self.received += 1;
        true
    }

    pub fn contains(&self, seq: u16) -> bool {
        if seq < self.begin || seq > self.end {
            return false;
        }
        let idx = (seq - self.begin) as usize;
        self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn missing(&self) -> usize {
        self.len() - self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.len()
    }

    /// Contiguous runs still missing, in ascending order.
    pub fn missing_spans(&self) -> Vec<(u16, u16)> {
        let mut spans = Vec::new();
        let mut open: Option<u16> = None;
        for seq in self.begin..=self.end {
            match (self.contains(seq), open) {
                (false, None) => open = Some(seq),
                (true, Some(start)) => {
                    spans.push((start, seq - 1));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            spans.push((start, self.end));
        }
        spans
    }
}
