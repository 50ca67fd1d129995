//! PCM input contracts
//!
//! Inputs deliver mono 16-bit little-endian PCM.

use std::sync::Arc;

use crate::errors::Result;

/// Bytes per mono PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// An open microphone input
///
/// `read` blocks until data is available or the input is stopped. `stop` may be
/// called from another thread while a `read` is in flight and must unblock it.
pub trait PcmInput: Send + Sync {
    /// Returns the number of bytes written into `buf`; 0 means nothing was read.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn stop(&self);

    fn release(&self);
}

/// Factory for PCM inputs
pub trait AudioSource: Send + Sync {
    /// Smallest buffer the hardware accepts at `sample_rate`, in bytes
    fn min_buffer_size(&self, sample_rate: u32) -> Result<usize>;

    fn open(&self, sample_rate: u32, buffer_size: usize) -> Result<Arc<dyn PcmInput>>;
}

/// Read buffer size: `max(2 x minimum, requested KB)`
pub fn read_buffer_size(min_buffer_size: usize, buffer_size_kb: u32) -> usize {
    let requested = buffer_size_kb as usize * 1024;
    (min_buffer_size * 2).max(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_buffer_size() {
        assert_eq!(read_buffer_size(3584, 4), 7168);
        assert_eq!(read_buffer_size(1024, 8), 8192);
        assert_eq!(read_buffer_size(0, 0), 0);
    }
}
