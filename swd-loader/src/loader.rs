//! The memory loader.
//!
//! Walks a load plan: connect, halt, stream every section into target RAM,
//! optionally read everything back, hand the stack pointer and program
//! counter to the core and release it. Nothing is rolled back on failure;
//! rerunning the operation is the recovery path and is safe because it
//! starts with a line reset.

use std::ops::Range;

use crate::core::{halt, resume, set_vector_table, write_core_register, PC, SP};
use crate::dap::{DapInterface, LinkStatistics, SwdSettings};
use crate::error::Error;
use crate::link::SwdIo;
use crate::memory::MemoryInterface;
use crate::sequence::ConnectionSequence;

/// Main RAM window sections may always target.
const MAIN_RAM: Range<u32> = 0x2000_0000..0x2004_2000;

/// Execute-in-place cache window, writable as RAM when the plan opts in.
const XIP_RAM: Range<u32> = 0x1500_0000..0x1500_4000;

/// One contiguous block of bytes to place in target memory.
#[derive(Debug, Clone, Copy)]
pub struct Section<'data> {
    pub address: u32,
    pub data: &'data [u8],
}

impl Section<'_> {
    fn end(&self) -> u32 {
        self.address + self.data.len() as u32
    }
}

/// Everything needed to load and start one firmware image.
#[derive(Debug, Clone)]
pub struct LoadPlan<'data> {
    /// Sections in load order.
    pub sections: &'data [Section<'data>],
    /// Address execution starts at, execution-mode bit already applied by
    /// the caller.
    pub entry_point: u32,
    /// Initial stack pointer.
    pub stack_pointer: u32,
    /// Allow placing sections in the execute-in-place window.
    pub xip_as_ram: bool,
    /// Read every word back after writing and compare.
    pub verify: bool,
    /// Vector table address to install before starting, for images that
    /// need faults and lockups vectored into them.
    pub vector_table: Option<u32>,
}

/// Phases of one load operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotConnected,
    Connected,
    Halted,
    Loaded,
    Running,
    /// Terminal; names the step that gave up.
    Failed(LoadStep),
}

/// Step identity carried by [`LoadState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Plan,
    Connect,
    Halt,
    Write,
    Verify,
    Start,
}

/// Drives complete load operations over one link.
///
/// All session state lives in the interfaces built per call, so repeated
/// loads start from a clean slate.
pub struct Loader<IO: SwdIo> {
    dap: DapInterface<IO>,
    sequence: ConnectionSequence,
    state: LoadState,
}

impl<IO: SwdIo> Loader<IO> {
    pub fn new(io: IO) -> Self {
        Self::with_settings(io, SwdSettings::default(), ConnectionSequence::default())
    }

    pub fn with_settings(io: IO, settings: SwdSettings, sequence: ConnectionSequence) -> Self {
        Self {
            dap: DapInterface::new(io, settings),
            sequence,
            state: LoadState::NotConnected,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn statistics(&self) -> &LinkStatistics {
        self.dap.statistics()
    }

    /// Run one complete load operation.
    ///
    /// On failure the target may be left halted or partially written; no
    /// state is reverted.
    pub fn load(&mut self, plan: &LoadPlan<'_>) -> Result<(), Error> {
        self.state = LoadState::NotConnected;
        match Self::run(&mut self.dap, &self.sequence, plan, &mut self.state) {
            Ok(()) => {
                self.state = LoadState::Running;
                tracing::info!("load complete, target running at {:#010x}", plan.entry_point);
                Ok(())
            }
            Err((step, err)) => {
                self.state = LoadState::Failed(step);
                tracing::error!("load failed during {:?}: {}", step, err);
                Err(err)
            }
        }
    }

    fn run(
        dap: &mut DapInterface<IO>,
        sequence: &ConnectionSequence,
        plan: &LoadPlan<'_>,
        state: &mut LoadState,
    ) -> Result<(), (LoadStep, Error)> {
        validate_plan(plan).map_err(|err| (LoadStep::Plan, err))?;

        sequence
            .connect(dap)
            .map_err(|err| (LoadStep::Connect, err))?;
        *state = LoadState::Connected;

        let mut memory = MemoryInterface::new(dap);

        halt(&mut memory).map_err(|err| (LoadStep::Halt, err))?;
        *state = LoadState::Halted;

        for section in plan.sections {
            write_section(&mut memory, section).map_err(|err| (LoadStep::Write, err))?;
        }

        if plan.verify {
            for section in plan.sections {
                verify_section(&mut memory, section).map_err(|err| (LoadStep::Verify, err))?;
            }
        }
        *state = LoadState::Loaded;

        let start = |err| (LoadStep::Start, err);
        if let Some(table) = plan.vector_table {
            set_vector_table(&mut memory, table).map_err(start)?;
        }
        write_core_register(&mut memory, SP, plan.stack_pointer).map_err(start)?;
        write_core_register(&mut memory, PC, plan.entry_point).map_err(start)?;
        resume(&mut memory).map_err(start)?;

        Ok(())
    }
}

/// Load `sections` into target memory and start execution at `entry_point`
/// with the given initial stack pointer.
///
/// The whole-operation entry point: every failure collapses into the
/// returned flag, with the failing step logged rather than returned. On
/// failure the target may be left halted or mid-write; rerunning the load
/// is the recovery path.
pub fn load_program<IO: SwdIo>(
    io: IO,
    sections: &[Section<'_>],
    entry_point: u32,
    stack_pointer: u32,
    xip_as_ram: bool,
) -> bool {
    let plan = LoadPlan {
        sections,
        entry_point,
        stack_pointer,
        xip_as_ram,
        verify: true,
        vector_table: None,
    };

    let mut loader = Loader::new(io);
    match loader.load(&plan) {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("firmware load failed: {err}");
            false
        }
    }
}

fn write_section<IO: SwdIo>(
    memory: &mut MemoryInterface<'_, IO>,
    section: &Section<'_>,
) -> Result<(), Error> {
    tracing::info!(
        "loading {} bytes at {:#010x}",
        section.data.len(),
        section.address
    );
    memory.write_32(section.address, &section_words(section.data))
}

fn verify_section<IO: SwdIo>(
    memory: &mut MemoryInterface<'_, IO>,
    section: &Section<'_>,
) -> Result<(), Error> {
    let written = section_words(section.data);
    let mut read = vec![0u32; written.len()];
    memory.read_32(section.address, &mut read)?;

    for (i, (&written, &read)) in written.iter().zip(read.iter()).enumerate() {
        if written != read {
            let address = section.address + (i * 4) as u32;
            return Err(Error::Verify {
                address,
                written,
                read,
            });
        }
    }
    Ok(())
}

/// Pack section bytes into little-endian words, zero-padding the tail.
fn section_words(data: &[u8]) -> Vec<u32> {
    data.chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

fn validate_plan(plan: &LoadPlan<'_>) -> Result<(), Error> {
    if plan.entry_point == 0 {
        return Err(Error::InvalidPlan("entry point is zero"));
    }
    if plan.stack_pointer == 0 {
        return Err(Error::InvalidPlan("stack pointer is zero"));
    }

    for section in plan.sections {
        if section.data.is_empty() {
            continue;
        }
        let Some(end) = section
            .address
            .checked_add(section.data.len() as u32)
        else {
            return Err(Error::InvalidPlan("section wraps the address space"));
        };
        if !region_allows(plan.xip_as_ram, section.address, end) {
            return Err(Error::InvalidPlan("section outside the loadable regions"));
        }
    }

    for (i, a) in plan.sections.iter().enumerate() {
        for b in &plan.sections[i + 1..] {
            if a.address < b.end() && b.address < a.end() {
                return Err(Error::InvalidPlan("sections overlap"));
            }
        }
    }

    Ok(())
}

/// Sections must land in RAM the target can accept at load time. The
/// execute-in-place window only qualifies when the plan opts in.
fn region_allows(xip_as_ram: bool, start: u32, end: u32) -> bool {
    let within = |range: Range<u32>| range.contains(&start) && end <= range.end;
    within(MAIN_RAM) || (xip_as_ram && within(XIP_RAM))
}

#[cfg(test)]
mod test {
    use super::{validate_plan, LoadPlan, Section};

    fn plan<'a>(sections: &'a [Section<'a>]) -> LoadPlan<'a> {
        LoadPlan {
            sections,
            entry_point: 0x2000_0001,
            stack_pointer: 0x2004_2000,
            xip_as_ram: false,
            verify: false,
            vector_table: None,
        }
    }

    #[test]
    fn overlapping_sections_are_rejected() {
        let data = [0u8; 16];
        let sections = [
            Section { address: 0x2000_0000, data: &data },
            Section { address: 0x2000_0008, data: &data },
        ];
        assert!(validate_plan(&plan(&sections)).is_err());
    }

    #[test]
    fn zero_stack_pointer_is_rejected() {
        let mut plan = plan(&[]);
        plan.stack_pointer = 0;
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn xip_sections_need_the_opt_in() {
        let data = [0u8; 16];
        let sections = [Section { address: 0x1500_0000, data: &data }];

        let mut plan = plan(&sections);
        assert!(validate_plan(&plan).is_err());

        plan.xip_as_ram = true;
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn sections_outside_ram_are_rejected() {
        let data = [0u8; 16];
        let sections = [Section { address: 0x1000_0000, data: &data }];
        assert!(validate_plan(&plan(&sections)).is_err());
    }
}
