//! Word-oriented target memory access through the memory access port.
//!
//! Transfers stream through DRW with TAR auto-increment. The transfer
//! address is only rewritten when the next access is not contiguous with
//! the previous one, when a burst would cross the auto-increment window, or
//! when the configured burst bound is reached.

use crate::ap::{CSW, DRW, TAR};
use crate::dap::{DapInterface, SwdSettings};
use crate::error::Error;
use crate::link::SwdIo;

/// TAR auto-increment is only defined within this window; bursts must not
/// cross it.
const AUTOINC_WINDOW: u32 = 0x400;

/// Memory access for one load operation.
///
/// Holds the per-operation transfer caches: whether CSW was configured, the
/// address the next DRW access will hit, and the length of the running
/// burst.
pub struct MemoryInterface<'probe, IO: SwdIo> {
    dap: &'probe mut DapInterface<IO>,
    csw_configured: bool,
    /// Address the next DRW access hits, while auto-increment state is
    /// known.
    tar: Option<u32>,
    /// Words streamed since TAR was last written.
    burst_words: usize,
}

impl<'probe, IO: SwdIo> MemoryInterface<'probe, IO> {
    pub fn new(dap: &'probe mut DapInterface<IO>) -> Self {
        Self {
            dap,
            csw_configured: false,
            tar: None,
            burst_words: 0,
        }
    }

    pub(crate) fn settings(&self) -> &SwdSettings {
        self.dap.settings()
    }

    pub fn read_word_32(&mut self, address: u32) -> Result<u32, Error> {
        let mut word = [0];
        self.read_32(address, &mut word)?;
        Ok(word[0])
    }

    pub fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.write_32(address, &[value])
    }

    /// Write a block of words starting at `address`.
    pub fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        tracing::debug!("writing {} words at {:#010x}", data.len(), address);
        self.ensure_csw()?;

        let mut address = address;
        let mut data = data;
        while !data.is_empty() {
            let chunk = self.start_burst(address, data.len())?;
            self.dap.write_ap_repeated::<DRW>(&data[..chunk])?;
            self.finish_burst(&mut address, chunk);
            data = &data[chunk..];
        }
        Ok(())
    }

    /// Read a block of words starting at `address`.
    pub fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        tracing::debug!("reading {} words at {:#010x}", data.len(), address);
        self.ensure_csw()?;

        let mut address = address;
        let mut offset = 0;
        while offset < data.len() {
            let chunk = self.start_burst(address, data.len() - offset)?;
            self.dap
                .read_ap_repeated::<DRW>(&mut data[offset..offset + chunk])?;
            self.finish_burst(&mut address, chunk);
            offset += chunk;
        }
        Ok(())
    }

    /// Configure CSW for 32-bit auto-incrementing transfers. Done once per
    /// load operation; this is cross-cutting state, not per-block state.
    fn ensure_csw(&mut self) -> Result<(), Error> {
        if !self.csw_configured {
            self.dap.write_ap(CSW::transfer_default())?;
            self.csw_configured = true;
        }
        Ok(())
    }

    /// Prepare one burst at `address`: write TAR when required and return
    /// how many of `remaining` words fit before the next boundary.
    fn start_burst(&mut self, address: u32, remaining: usize) -> Result<usize, Error> {
        if address % 4 != 0 {
            return Err(Error::MemoryNotAligned { address });
        }
        let max_burst = self.dap.settings().max_burst_words;
        let window_left = ((AUTOINC_WINDOW - (address % AUTOINC_WINDOW)) / 4) as usize;

        let stale = self.tar != Some(address)
            || self.burst_words >= max_burst
            || address % AUTOINC_WINDOW == 0;
        if stale {
            self.dap.write_ap(TAR(address))?;
            self.burst_words = 0;
        }

        Ok(remaining
            .min(window_left)
            .min(max_burst - self.burst_words))
    }

    fn finish_burst(&mut self, address: &mut u32, words: usize) {
        *address += (words * 4) as u32;
        self.tar = Some(*address);
        self.burst_words += words;
    }
}
