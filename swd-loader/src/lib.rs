//! # Load and start firmware over bit-banged SWD
//!
//! This crate lets a host program a second microcontroller through its
//! two-wire serial-wire debug port, using nothing but two host-controlled
//! digital lines: it activates the serial-wire protocol, checks the
//! target's identification, powers the debug domains, halts the core,
//! streams firmware sections into target RAM through the memory access
//! port, and redirects execution to the image's entry point.
//!
//! The protocol stack is layered strictly: the bit-level link drives the
//! pins, the packet protocol frames requests and acknowledges, the register
//! access layer adds bank caching and recovery, and the connection
//! sequencer, core control and memory loader sit on top. Everything above
//! the [`LinkPins`] pin trait is platform independent and tested against a
//! simulated target.
//!
//! ## Loading a program
//!
//! ```no_run
//! use swd_loader::{load_program, BitbangLink, LinkConfig, Section};
//!
//! # struct MyPins;
//! # impl swd_loader::LinkPins for MyPins {
//! #     fn set_clock(&mut self, _high: bool) {}
//! #     fn set_data(&mut self, _high: bool) {}
//! #     fn read_data(&mut self) -> bool { false }
//! #     fn set_data_driven(&mut self, _driven: bool) {}
//! # }
//! let link = BitbangLink::new(MyPins, LinkConfig::default());
//!
//! let firmware = [0xfe, 0xe7, 0x00, 0x00];
//! let sections = [Section { address: 0x2000_0000, data: &firmware }];
//!
//! // Entry point with the execution-mode bit set, stack on top of RAM.
//! let ok = load_program(link, &sections, 0x2000_0001, 0x2004_2000, false);
//! ```

pub mod ap;
pub mod core;
pub mod dap;
pub mod dp;
mod error;
pub mod link;
pub mod loader;
pub mod memory;
pub mod sequence;
#[cfg(any(test, feature = "test"))]
pub mod sim;
pub mod transfer;

pub use dap::{DapError, DapInterface, LinkStatistics, Register, SwdSettings};
pub use error::Error;
pub use link::{BitbangLink, LinkConfig, LinkPins, SwdIo};
pub use loader::{load_program, LoadPlan, LoadState, LoadStep, Loader, Section};
pub use memory::MemoryInterface;
pub use sequence::ConnectionSequence;
