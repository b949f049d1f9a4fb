//! Register access layer.
//!
//! Maps typed debug-port and access-port register accesses onto packet
//! exchanges. The SELECT register is cached so consecutive accesses within
//! one bank pay no bank-switch overhead, and the recovery policy lives
//! here: WAIT responses are retried up to a bound, a FAULT (or protocol
//! error) is cleared through ABORT and retried exactly once. Callers only
//! ever see fatal outcomes.

use std::fmt::Debug;

use crate::ap::ApRegister;
use crate::dp::{Abort, Ctrl, DpRegister, RdBuff, Select, TargetSel};
use crate::error::Error;
use crate::link::SwdIo;
use crate::transfer::{perform_selection_write, perform_transfer, PortType, Transfer};

/// Port number of the memory access port used for loading.
const MEM_AP: u8 = 0;

/// Cycles the line is held high for a reset; the architecture requires at
/// least 50.
const LINE_RESET_CYCLES: usize = 51;

/// Idle cycles after the reset high period; at least 2 are required before
/// the first request.
const LINE_RESET_IDLE_CYCLES: usize = 2;

/// A register with a fixed address within its port.
pub trait Register: Clone + From<u32> + Into<u32> + Sized + Debug {
    const ADDRESS: u8;
    const NAME: &'static str;
}

/// Packet-level outcome of a single exchange.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DapError {
    #[error("an error occurred in the SWD communication between host and target")]
    SwdProtocol,
    #[error("target device did not respond to the request")]
    NoAcknowledge,
    #[error("target device responded with a FAULT response")]
    FaultResponse,
    #[error("target device responded with a WAIT response")]
    WaitResponse,
    #[error("incorrect parity in data received from the target")]
    IncorrectParity,
}

/// Protocol policy knobs. The defaults suit a relaxed bit-banged link.
///
/// Every polling loop in the crate is bounded by one of these counts, never
/// by wall-clock time, so behavior is deterministic at a fixed clock rate.
#[derive(Debug, Clone)]
pub struct SwdSettings {
    /// How often a transfer is retried when the target answers WAIT.
    pub num_retries_after_wait: usize,

    /// Idle cycles clocked at the end of every transfer so buffered
    /// accesses drain before the next request.
    pub idle_cycles_after_transfer: usize,

    /// Poll bound for the power-up acknowledge bits.
    pub num_powerup_polls: usize,

    /// Poll bound for the halt acknowledge bit.
    pub num_halt_polls: usize,

    /// Poll bound for core-register transfer completion.
    pub num_core_register_polls: usize,

    /// Longest DRW burst before the transfer address is rewritten.
    pub max_burst_words: usize,
}

impl Default for SwdSettings {
    fn default() -> Self {
        Self {
            num_retries_after_wait: 32,
            idle_cycles_after_transfer: 8,
            num_powerup_polls: 100,
            num_halt_polls: 100,
            num_core_register_polls: 100,
            max_burst_words: 256,
        }
    }
}

/// Counters kept for the duration of one load operation.
#[derive(Debug, Default, Clone)]
pub struct LinkStatistics {
    /// Packet exchanges performed, retries included.
    num_transfers: usize,

    /// WAIT acknowledges observed.
    num_wait_resp: usize,

    /// FAULT acknowledges observed.
    num_faults: usize,

    /// Line resets executed.
    num_line_resets: usize,
}

impl LinkStatistics {
    fn record_transfer(&mut self) {
        self.num_transfers += 1;
    }

    fn report_response(&mut self, response: &Result<(), DapError>) {
        match response {
            Err(DapError::FaultResponse) => self.num_faults += 1,
            Err(DapError::WaitResponse) => self.num_wait_resp += 1,
            _ => (),
        }
    }

    fn report_line_reset(&mut self) {
        self.num_line_resets += 1;
    }

    pub fn num_transfers(&self) -> usize {
        self.num_transfers
    }

    pub fn num_wait_responses(&self) -> usize {
        self.num_wait_resp
    }

    pub fn num_faults(&self) -> usize {
        self.num_faults
    }

    pub fn num_line_resets(&self) -> usize {
        self.num_line_resets
    }
}

/// Typed register access with SELECT caching and recovery.
///
/// Owns the link, and with it the two signal lines, for one load operation.
#[derive(Debug)]
pub struct DapInterface<IO: SwdIo> {
    io: IO,
    settings: SwdSettings,
    statistics: LinkStatistics,
    /// Last (AP bank, DP bank) written to SELECT; `None` while the
    /// target-side value is unknown.
    select: Option<(u8, u8)>,
}

impl<IO: SwdIo> DapInterface<IO> {
    pub fn new(io: IO, settings: SwdSettings) -> Self {
        Self {
            io,
            settings,
            statistics: LinkStatistics::default(),
            select: None,
        }
    }

    pub fn settings(&self) -> &SwdSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &LinkStatistics {
        &self.statistics
    }

    pub fn into_io(self) -> IO {
        self.io
    }

    /// Clock out up to 64 bits with the host driving the line, least
    /// significant bit first.
    pub fn swj_sequence(&mut self, bit_len: u8, bits: u64) {
        let bits: Vec<bool> = (0..bit_len).map(|i| (bits >> i) & 1 == 1).collect();
        self.io.write_bits(&bits);
    }

    /// Hold the line high long enough to force the debug logic idle, then
    /// clock the required idle cycles.
    ///
    /// Invalidates the SELECT cache: the reset clears the DP bank selection
    /// on the target side.
    pub fn line_reset(&mut self) {
        tracing::debug!("performing line reset");
        self.statistics.report_line_reset();
        self.io.write_bits(&[true; LINE_RESET_CYCLES]);
        self.io.idle(LINE_RESET_IDLE_CYCLES);
        self.select = None;
    }

    /// Write the multidrop selection register. No acknowledge is expected.
    pub fn write_selection(&mut self, code: u32) {
        tracing::debug!("selecting multidrop target {:#010x}", code);
        perform_selection_write(
            &mut self.io,
            TargetSel::ADDRESS,
            code,
            self.settings.idle_cycles_after_transfer,
        );
    }

    pub fn read_dp<R: DpRegister>(&mut self) -> Result<R, Error> {
        self.select_dp_bank(R::BANK)?;
        let mut transfer = Transfer::read(PortType::DebugPort, R::ADDRESS);
        self.perform(&mut transfer)?;
        tracing::trace!("read {} = {:#010x}", R::NAME, transfer.value);
        Ok(R::from(transfer.value))
    }

    pub fn write_dp<R: DpRegister>(&mut self, register: R) -> Result<(), Error> {
        self.select_dp_bank(R::BANK)?;
        let value: u32 = register.into();
        tracing::trace!("write {} = {:#010x}", R::NAME, value);
        let mut transfer = Transfer::write(PortType::DebugPort, R::ADDRESS, value);
        self.perform(&mut transfer)
    }

    /// Read an access-port register.
    ///
    /// Access-port reads are posted: the issued read primes the result,
    /// which is then collected from RDBUFF.
    pub fn read_ap<R: ApRegister>(&mut self) -> Result<R, Error> {
        self.select_ap_bank(R::BANK)?;
        let mut transfer = Transfer::read(PortType::AccessPort, R::ADDRESS);
        self.perform(&mut transfer)?;
        let mut result = Transfer::read(PortType::DebugPort, RdBuff::ADDRESS);
        self.perform(&mut result)?;
        tracing::trace!("read {} = {:#010x}", R::NAME, result.value);
        Ok(R::from(result.value))
    }

    pub fn write_ap<R: ApRegister>(&mut self, register: R) -> Result<(), Error> {
        self.select_ap_bank(R::BANK)?;
        let value: u32 = register.into();
        tracing::trace!("write {} = {:#010x}", R::NAME, value);
        let mut transfer = Transfer::write(PortType::AccessPort, R::ADDRESS, value);
        self.perform(&mut transfer)
    }

    /// Stream `values` into the same access-port register back to back.
    pub fn write_ap_repeated<R: ApRegister>(&mut self, values: &[u32]) -> Result<(), Error> {
        self.select_ap_bank(R::BANK)?;
        for &value in values {
            let mut transfer = Transfer::write(PortType::AccessPort, R::ADDRESS, value);
            self.perform(&mut transfer)?;
        }
        Ok(())
    }

    /// Fill `values` from the same access-port register back to back,
    /// keeping the posted-read pipeline full: the first issued read returns
    /// stale data, each following read returns its predecessor's result,
    /// and RDBUFF returns the final one.
    pub fn read_ap_repeated<R: ApRegister>(&mut self, values: &mut [u32]) -> Result<(), Error> {
        let Some((last, head)) = values.split_last_mut() else {
            return Ok(());
        };
        self.select_ap_bank(R::BANK)?;

        let mut transfer = Transfer::read(PortType::AccessPort, R::ADDRESS);
        self.perform(&mut transfer)?;
        for value in head.iter_mut() {
            let mut transfer = Transfer::read(PortType::AccessPort, R::ADDRESS);
            self.perform(&mut transfer)?;
            *value = transfer.value;
        }
        let mut result = Transfer::read(PortType::DebugPort, RdBuff::ADDRESS);
        self.perform(&mut result)?;
        *last = result.value;
        Ok(())
    }

    /// Run one exchange under the recovery policy.
    fn perform(&mut self, transfer: &mut Transfer) -> Result<(), Error> {
        let mut wait_retries = 0;
        let mut fault_cleared = false;

        loop {
            self.statistics.record_transfer();
            let response = perform_transfer(
                &mut self.io,
                transfer,
                self.settings.idle_cycles_after_transfer,
            );
            self.statistics.report_response(&response);

            match response {
                Ok(()) => return Ok(()),
                Err(DapError::WaitResponse) => {
                    wait_retries += 1;
                    if wait_retries > self.settings.num_retries_after_wait {
                        tracing::error!(
                            "{:?} register {:#x} still busy after {} retries",
                            transfer.port,
                            transfer.address,
                            self.settings.num_retries_after_wait
                        );
                        return Err(Error::WaitRetriesExceeded {
                            retries: self.settings.num_retries_after_wait,
                        });
                    }
                    tracing::debug!(
                        "SWD WAIT, retry {}/{}",
                        wait_retries,
                        self.settings.num_retries_after_wait
                    );
                }
                Err(err) => {
                    // FAULT and protocol errors share one recovery: clear
                    // the sticky flags and retry the exchange a single time.
                    if fault_cleared {
                        tracing::error!(
                            "{:?} register {:#x}: {} after the sticky flags were cleared",
                            transfer.port,
                            transfer.address,
                            err
                        );
                        return Err(Error::Dap(err));
                    }
                    tracing::warn!(
                        "{:?} register {:#x}: {}, clearing sticky flags and retrying",
                        transfer.port,
                        transfer.address,
                        err
                    );
                    self.clear_sticky_errors();
                    fault_cleared = true;
                }
            }
        }
    }

    /// FAULT recovery: inspect CTRL/STAT for the sticky flags, then clear
    /// them through ABORT. Raw exchanges; routing these through the retry
    /// policy could recurse.
    fn clear_sticky_errors(&mut self) {
        let mut ctrl = Transfer::read(PortType::DebugPort, Ctrl::ADDRESS);
        match perform_transfer(
            &mut self.io,
            &mut ctrl,
            self.settings.idle_cycles_after_transfer,
        ) {
            Ok(()) => tracing::debug!("CTRL/STAT after fault: {:?}", Ctrl::from(ctrl.value)),
            Err(err) => tracing::debug!("CTRL/STAT not readable after fault: {}", err),
        }

        let mut transfer =
            Transfer::write(PortType::DebugPort, Abort::ADDRESS, Abort::clear_all().into());
        if let Err(err) = perform_transfer(
            &mut self.io,
            &mut transfer,
            self.settings.idle_cycles_after_transfer,
        ) {
            tracing::warn!("ABORT write failed during fault recovery: {}", err);
        }
    }

    fn write_select(&mut self, ap_bank: u8, dp_bank: u8) -> Result<(), Error> {
        let mut select = Select(0);
        select.set_ap_sel(MEM_AP);
        select.set_ap_bank_sel(ap_bank);
        select.set_dp_bank_sel(dp_bank);
        tracing::debug!(
            "switching SELECT to AP bank {:#x}, DP bank {:#x}",
            ap_bank,
            dp_bank
        );
        let mut transfer = Transfer::write(PortType::DebugPort, Select::ADDRESS, select.into());
        self.perform(&mut transfer)?;
        self.select = Some((ap_bank, dp_bank));
        Ok(())
    }

    fn select_ap_bank(&mut self, bank: u8) -> Result<(), Error> {
        match self.select {
            Some((ap, _)) if ap == bank => Ok(()),
            Some((_, dp)) => self.write_select(bank, dp),
            None => self.write_select(bank, 0),
        }
    }

    fn select_dp_bank(&mut self, bank: Option<u8>) -> Result<(), Error> {
        let Some(bank) = bank else { return Ok(()) };
        match self.select {
            Some((_, dp)) if dp == bank => Ok(()),
            // A line reset leaves DPBANKSEL at zero, so the reset state
            // already selects bank 0.
            None if bank == 0 => Ok(()),
            Some((ap, _)) => self.write_select(ap, bank),
            None => self.write_select(0, bank),
        }
    }
}
