use crate::dap::DapError;
use thiserror::Error;

/// A fatal load failure.
///
/// Recoverable conditions (WAIT retries, a single FAULT, bank switches)
/// are handled inside the register access layer and never show up here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("SWD transfer failed: {0}")]
    Dap(#[from] DapError),
    #[error("target stayed busy for {retries} retries")]
    WaitRetriesExceeded { retries: usize },
    #[error("debug port answered {dpidr:#010x}, which is not a serial-wire debug port")]
    IdMismatch { dpidr: u32 },
    #[error("no memory access port answered at port 0")]
    NoMemoryAp,
    #[error("debug and system power-up were not acknowledged")]
    PowerUpFailed,
    #[error("core did not acknowledge the halt request")]
    HaltTimeout,
    #[error("core register transfer did not complete")]
    CoreRegisterTimeout,
    #[error("unaligned memory access at {address:#010x}")]
    MemoryNotAligned { address: u32 },
    #[error("verification failed at {address:#010x}: wrote {written:#010x}, read back {read:#010x}")]
    Verify { address: u32, written: u32, read: u32 },
    #[error("invalid load plan: {0}")]
    InvalidPlan(&'static str),
}
