//! Target core control.
//!
//! Halts and resumes the core through the debug halting control register
//! and moves values into core registers through the register transfer
//! mechanism. Everything here is ordinary word access to the memory-mapped
//! debug registers; the polling loops are bounded by the link settings.

use bitfield::bitfield;

use crate::error::Error;
use crate::link::SwdIo;
use crate::memory::MemoryInterface;

/// A core register addressable through the transfer mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterId(pub u16);

/// Current stack pointer (R13).
pub const SP: RegisterId = RegisterId(13);
/// Program counter. Bit 0 of a written value selects the execution mode.
pub const PC: RegisterId = RegisterId(15);
/// Combined program status register.
pub const XPSR: RegisterId = RegisterId(16);
/// Main stack pointer.
pub const MSP: RegisterId = RegisterId(17);

/// A memory-mapped debug register.
pub trait CoreRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    const ADDRESS: u32;
    const NAME: &'static str;
}

bitfield! {
    /// Debug halting control and status register.
    ///
    /// Writes must carry the debug key ([`Dhcsr::enable_write`]) or the
    /// processor ignores them.
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Place the debug key in bits \[31:16\] to enable the write.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }
}

impl From<u32> for Dhcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dhcsr> for u32 {
    fn from(value: Dhcsr) -> Self {
        value.0
    }
}

impl CoreRegister for Dhcsr {
    const ADDRESS: u32 = 0xE000_EDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// Core register selector; writing it starts a transfer to or from the
    /// data register.
    #[derive(Copy, Clone)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub _, set_regwnr: 16;
    pub _, set_regsel: 4, 0;
}

impl From<u32> for Dcrsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcrsr> for u32 {
    fn from(value: Dcrsr) -> Self {
        value.0
    }
}

impl CoreRegister for Dcrsr {
    const ADDRESS: u32 = 0xE000_EDF4;
    const NAME: &'static str = "DCRSR";
}

/// Core register data.
#[derive(Debug, Copy, Clone)]
pub struct Dcrdr(pub u32);

impl From<u32> for Dcrdr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcrdr> for u32 {
    fn from(value: Dcrdr) -> Self {
        value.0
    }
}

impl CoreRegister for Dcrdr {
    const ADDRESS: u32 = 0xE000_EDF8;
    const NAME: &'static str = "DCRDR";
}

/// Vector table offset register.
#[derive(Debug, Copy, Clone)]
pub struct Vtor(pub u32);

impl From<u32> for Vtor {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Vtor> for u32 {
    fn from(value: Vtor) -> Self {
        value.0
    }
}

impl CoreRegister for Vtor {
    const ADDRESS: u32 = 0xE000_ED08;
    const NAME: &'static str = "VTOR";
}

/// Request a halt and poll for the halt acknowledge.
pub fn halt<IO: SwdIo>(memory: &mut MemoryInterface<'_, IO>) -> Result<(), Error> {
    let mut value = Dhcsr(0);
    value.set_c_halt(true);
    value.set_c_debugen(true);
    value.enable_write();
    memory.write_word_32(Dhcsr::ADDRESS, value.into())?;

    let polls = memory.settings().num_halt_polls;
    for _ in 0..polls {
        let dhcsr = Dhcsr::from(memory.read_word_32(Dhcsr::ADDRESS)?);
        if dhcsr.s_halt() {
            tracing::debug!("core halted");
            return Ok(());
        }
    }
    Err(Error::HaltTimeout)
}

/// Clear the halt request, releasing the core to execute from its current
/// program counter and stack pointer.
pub fn resume<IO: SwdIo>(memory: &mut MemoryInterface<'_, IO>) -> Result<(), Error> {
    let mut value = Dhcsr(0);
    value.set_c_halt(false);
    value.set_c_debugen(true);
    value.enable_write();
    memory.write_word_32(Dhcsr::ADDRESS, value.into())?;
    tracing::debug!("core released");
    Ok(())
}

/// Move `value` into a core register: data register first, then the
/// selector with the write direction, then poll for completion.
pub fn write_core_register<IO: SwdIo>(
    memory: &mut MemoryInterface<'_, IO>,
    id: RegisterId,
    value: u32,
) -> Result<(), Error> {
    memory.write_word_32(Dcrdr::ADDRESS, value)?;

    let mut dcrsr = Dcrsr(0);
    dcrsr.set_regwnr(true);
    dcrsr.set_regsel(u32::from(id.0));
    memory.write_word_32(Dcrsr::ADDRESS, dcrsr.into())?;

    wait_for_register_transfer(memory)?;
    tracing::debug!("core register {} = {:#010x}", id.0, value);
    Ok(())
}

/// Point the vector table at the loaded image so faults and lockups vector
/// into it.
pub fn set_vector_table<IO: SwdIo>(
    memory: &mut MemoryInterface<'_, IO>,
    address: u32,
) -> Result<(), Error> {
    tracing::debug!("vector table at {:#010x}", address);
    memory.write_word_32(Vtor::ADDRESS, address)
}

fn wait_for_register_transfer<IO: SwdIo>(
    memory: &mut MemoryInterface<'_, IO>,
) -> Result<(), Error> {
    let polls = memory.settings().num_core_register_polls;
    for _ in 0..polls {
        let dhcsr = Dhcsr::from(memory.read_word_32(Dhcsr::ADDRESS)?);
        if dhcsr.s_regrdy() {
            return Ok(());
        }
    }
    Err(Error::CoreRegisterTimeout)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{halt, resume, write_core_register, Dhcsr, SP};
    use crate::dap::{DapInterface, SwdSettings};
    use crate::memory::MemoryInterface;
    use crate::sim::{SimEvent, SimTarget};

    #[test]
    fn the_debug_key_gates_writes() {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        assert_eq!(u32::from(dhcsr), 0xA05F_0003);
    }

    #[test]
    fn halt_then_resume_is_observed_by_the_target() {
        let mut sim = SimTarget::new();
        let mut dap = DapInterface::new(&mut sim, SwdSettings::default());
        let mut memory = MemoryInterface::new(&mut dap);

        halt(&mut memory).unwrap();
        resume(&mut memory).unwrap();

        assert_eq!(
            sim.events
                .iter()
                .filter(|event| matches!(event, SimEvent::Halted | SimEvent::Resumed))
                .copied()
                .collect::<Vec<_>>(),
            vec![SimEvent::Halted, SimEvent::Resumed]
        );
    }

    #[test]
    fn core_register_write_selects_after_the_data() {
        let mut sim = SimTarget::new();
        let mut dap = DapInterface::new(&mut sim, SwdSettings::default());
        let mut memory = MemoryInterface::new(&mut dap);

        halt(&mut memory).unwrap();
        write_core_register(&mut memory, SP, 0x2004_2000).unwrap();

        assert_eq!(sim.core_register_writes(), vec![(13, 0x2004_2000)]);
    }
}
