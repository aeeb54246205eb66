//! Run-length encoded history index. The value of a history table entry
//! lists every block at which the account (or storage slot) changed, as a
//! sequence of `{start: u64 BE, count: u16 BE}` runs covering
//! `start .. start + count` inclusive of the start block.

use super::StateReadError;

const RUN_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryIndex {
    runs: Vec<(u64, u16)>,
}

impl HistoryIndex {
    #[must_use]
    pub fn from_runs(runs: Vec<(u64, u16)>) -> Self {
        Self { runs }
    }

    /// Index listing the given individual blocks.
    #[must_use]
    pub fn from_blocks(blocks: &[u64]) -> Self {
        let mut runs: Vec<(u64, u16)> = Vec::new();
        for &block in blocks {
            match runs.last_mut() {
                Some((start, count)) if *start + u64::from(*count) == block && *count < u16::MAX => {
                    *count += 1;
                }
                _ => runs.push((block, 1)),
            }
        }
        Self { runs }
    }

    pub fn decode(data: &[u8], table: &str) -> Result<Self, StateReadError> {
        if data.len() % RUN_SIZE != 0 {
            return Err(StateReadError::decode(table, "history index size not a run multiple"));
        }
        let runs = data
            .chunks_exact(RUN_SIZE)
            .map(|chunk| {
                let start = u64::from_be_bytes(chunk[..8].try_into().expect("chunk is 10 bytes"));
                let count = u16::from_be_bytes(chunk[8..].try_into().expect("chunk is 10 bytes"));
                (start, count)
            })
            .collect();
        Ok(Self { runs })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.runs.len() * RUN_SIZE);
        for (start, count) in &self.runs {
            data.extend_from_slice(&start.to_be_bytes());
            data.extend_from_slice(&count.to_be_bytes());
        }
        data
    }

    /// Smallest recorded block >= `block`.
    #[must_use]
    pub fn first_at_or_after(&self, block: u64) -> Option<u64> {
        for (start, count) in &self.runs {
            let end = start + u64::from(*count);
            if block < *start {
                return Some(*start);
            }
            if block < end {
                return Some(block);
            }
        }
        None
    }

    /// Highest recorded block, if any.
    #[must_use]
    pub fn highest(&self) -> Option<u64> {
        self.runs
            .last()
            .map(|(start, count)| start + u64::from(*count) - 1)
    }
}
