//! Behavioral serial-wire debug target for the test suite.
//!
//! Implements [`SwdIo`] directly: requests arrive through `write_bits`,
//! acknowledges and read data leave through `read_bits`. The model covers
//! the register file the loader touches: the debug-port registers with
//! power-up behavior and sticky faults, a memory access port with TAR
//! auto-increment (including the 1 KiB wrap), and the core debug registers
//! with halt/resume and the core-register transfer mechanism.
//!
//! Acknowledge behavior can be scripted to exercise the recovery policy.

use std::collections::{HashMap, VecDeque};

use bitvec::prelude::*;

use crate::link::SwdIo;

/// Observations made by the simulated target, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    LineReset,
    /// The multidrop selection code matched.
    Selected,
    SelectWrite(u32),
    PowerUpRequested,
    TarWrite(u32),
    CoreRegisterWrite(u16, u32),
    VectorTableWrite(u32),
    Halted,
    Resumed,
}

/// Acknowledge the simulator gives to the next scripted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAck {
    Ok,
    Wait,
    Fault,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    /// Request decoded, acknowledge not yet collected.
    Ack,
    /// Acknowledge was OK for a read; data follows.
    ReadData,
    /// Acknowledge was OK for a write; data is expected.
    WriteData,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    ap: bool,
    read: bool,
    address: u8,
}

impl Request {
    fn is_abort_write(&self) -> bool {
        !self.ap && !self.read && self.address == 0x0
    }

    fn is_ctrl_read(&self) -> bool {
        !self.ap && self.read && self.address == 0x4
    }

    fn is_selection_write(&self) -> bool {
        !self.ap && !self.read && self.address == 0xC
    }
}

/// The simulated target.
#[derive(Debug)]
pub struct SimTarget {
    dpidr: u32,
    /// Selection code this target answers to; `None` answers immediately.
    multidrop: Option<u32>,
    selected: bool,
    ctrl_req: u32,
    refuse_power_up: bool,
    sticky_fault: bool,
    select: u32,
    csw: u32,
    tar: u32,
    /// Posted access-port read result.
    ap_result: Option<u32>,
    memory: HashMap<u32, u32>,
    dhcsr: u32,
    halted: bool,
    reg_transfer_done: bool,
    dcrdr: u32,
    core_registers: HashMap<u16, u32>,
    vtor: u32,

    phase: Phase,
    request: Option<Request>,
    scripted_acks: VecDeque<SimAck>,
    wait_always: bool,
    /// Word address whose writes get flipped, for verification tests.
    corrupt_address: Option<u32>,

    /// Requests the target acknowledged, retries included.
    pub request_count: usize,
    pub events: Vec<SimEvent>,
}

impl SimTarget {
    /// A single-drop target with an Arm DPv2 identification.
    pub fn new() -> Self {
        Self::with_dpidr(0x0BC1_2477)
    }

    pub fn with_dpidr(dpidr: u32) -> Self {
        Self {
            dpidr,
            multidrop: None,
            selected: true,
            ctrl_req: 0,
            refuse_power_up: false,
            sticky_fault: false,
            select: 0,
            csw: 0,
            tar: 0,
            ap_result: None,
            memory: HashMap::new(),
            dhcsr: 0,
            halted: false,
            reg_transfer_done: false,
            dcrdr: 0,
            core_registers: HashMap::new(),
            vtor: 0,
            phase: Phase::Idle,
            request: None,
            scripted_acks: VecDeque::new(),
            wait_always: false,
            corrupt_address: None,
            request_count: 0,
            events: Vec::new(),
        }
    }

    /// A target that stays silent until the given selection code is
    /// written.
    pub fn multidrop(code: u32) -> Self {
        let mut sim = Self::new();
        sim.multidrop = Some(code);
        sim.selected = false;
        sim
    }

    /// Script the acknowledge for an upcoming request. Recovery traffic
    /// (CTRL/STAT reads and ABORT writes) is never scripted.
    pub fn queue_ack(&mut self, ack: SimAck) {
        self.scripted_acks.push_back(ack);
    }

    /// Answer WAIT to everything except ABORT writes and CTRL/STAT reads.
    pub fn always_wait(&mut self) {
        self.wait_always = true;
    }

    /// Refuse the system power-up acknowledge.
    pub fn refuse_power_up(&mut self) {
        self.refuse_power_up = true;
    }

    /// Flip the lowest bit of every word written to `address`.
    pub fn corrupt_writes_at(&mut self, address: u32) {
        self.corrupt_address = Some(address);
    }

    /// Word currently stored at `address`.
    pub fn word(&self, address: u32) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    /// TAR writes observed, in order.
    pub fn tar_writes(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SimEvent::TarWrite(address) => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// Core register writes observed, in order.
    pub fn core_register_writes(&self) -> Vec<(u16, u32)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SimEvent::CoreRegisterWrite(id, value) => Some((*id, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn resumed(&self) -> bool {
        self.events.contains(&SimEvent::Resumed)
    }

    fn line_reset(&mut self) {
        self.phase = Phase::Idle;
        self.request = None;
        // The reset clears the DP bank selection and deselects multidrop
        // targets.
        self.select &= !0xF;
        if self.multidrop.is_some() {
            self.selected = false;
        }
        self.events.push(SimEvent::LineReset);
    }

    fn decode_request(&mut self, bits: &[bool]) {
        // Stop low and park high, else this is not request framing.
        if bits[6] || !bits[7] {
            return;
        }
        let ap = bits[1];
        let read = bits[2];
        let a2 = bits[3];
        let a3 = bits[4];
        if bits[5] != (ap ^ read ^ a2 ^ a3) {
            // Corrupt request: a real target stays quiet.
            return;
        }

        let request = Request {
            ap,
            read,
            address: (u8::from(a3) << 3) | (u8::from(a2) << 2),
        };

        if !self.selected && !request.is_selection_write() {
            return;
        }

        self.request_count += 1;
        self.request = Some(request);
        self.phase = Phase::Ack;
    }

    fn next_ack(&mut self, request: &Request) -> SimAck {
        // Recovery traffic always goes through, so the fault path can run.
        if request.is_abort_write() || request.is_ctrl_read() {
            return SimAck::Ok;
        }
        if self.wait_always {
            return SimAck::Wait;
        }
        if let Some(ack) = self.scripted_acks.pop_front() {
            return ack;
        }
        if self.sticky_fault && request.ap {
            return SimAck::Fault;
        }
        SimAck::Ok
    }

    fn acknowledge(&mut self) -> Vec<bool> {
        let Some(request) = self.request else {
            return vec![true; 3];
        };

        if request.is_selection_write() {
            // No target drives the line during selection; the data phase
            // still follows.
            self.phase = Phase::WriteData;
            return vec![true; 3];
        }

        match self.next_ack(&request) {
            SimAck::Ok => {
                self.phase = if request.read {
                    Phase::ReadData
                } else {
                    Phase::WriteData
                };
                vec![true, false, false]
            }
            SimAck::Wait => {
                self.phase = Phase::Idle;
                self.request = None;
                vec![false, true, false]
            }
            SimAck::Fault => {
                self.sticky_fault = true;
                self.phase = Phase::Idle;
                self.request = None;
                vec![false, false, true]
            }
        }
    }

    fn read_data(&mut self) -> Vec<bool> {
        let request = self.request.take().expect("read data without a request");
        self.phase = Phase::Idle;

        let value = self.execute_read(request);
        let mut response = BitVec::<usize, Lsb0>::repeat(false, 33);
        response.get_mut(..32).unwrap().store_le(value);
        response.set(32, value.count_ones() % 2 == 1);
        response.into_iter().collect()
    }

    fn finish_write(&mut self, bits: &[bool]) {
        let request = self.request.take().expect("data phase without a request");
        self.phase = Phase::Idle;

        let data: BitVec<usize, Lsb0> = bits.iter().take(32).copied().collect();
        let value = data.load_le::<u32>();
        self.execute_write(request, value);
    }

    fn execute_read(&mut self, request: Request) -> u32 {
        if request.ap {
            let posted = self.ap_result.take().unwrap_or(0);
            let fresh = self.read_ap_register(request.address);
            self.ap_result = Some(fresh);
            posted
        } else {
            match request.address {
                0x0 => self.dpidr,
                0x4 => self.ctrl_status(),
                0xC => self.ap_result.take().unwrap_or(0),
                _ => 0,
            }
        }
    }

    fn execute_write(&mut self, request: Request, value: u32) {
        if request.ap {
            let bank = ((self.select >> 4) & 0xF) as u8;
            match (bank, request.address) {
                (0x0, 0x0) => self.csw = value,
                (0x0, 0x4) => {
                    self.tar = value;
                    self.events.push(SimEvent::TarWrite(value));
                }
                (0x0, 0xC) => {
                    self.write_memory(self.tar, value);
                    self.advance_tar();
                }
                _ => {}
            }
        } else {
            match request.address {
                0x0 => {
                    // ABORT: write one to clear.
                    if value & 0x1E != 0 {
                        self.sticky_fault = false;
                    }
                }
                0x4 => {
                    self.ctrl_req = value;
                    if value & (1 << 28) != 0
                        && value & (1 << 30) != 0
                        && !self.events.contains(&SimEvent::PowerUpRequested)
                    {
                        self.events.push(SimEvent::PowerUpRequested);
                    }
                }
                0x8 => {
                    self.select = value;
                    self.events.push(SimEvent::SelectWrite(value));
                }
                0xC => {
                    if self.multidrop == Some(value) {
                        self.selected = true;
                        self.events.push(SimEvent::Selected);
                    }
                }
                _ => {}
            }
        }
    }

    fn read_ap_register(&mut self, address: u8) -> u32 {
        let bank = ((self.select >> 4) & 0xF) as u8;
        match (bank, address) {
            (0x0, 0x0) => self.csw,
            (0x0, 0x4) => self.tar,
            (0x0, 0xC) => {
                let value = self.read_memory(self.tar);
                self.advance_tar();
                value
            }
            // Identification of an AHB memory access port.
            (0xF, 0xC) => 0x0477_0031,
            _ => 0,
        }
    }

    fn advance_tar(&mut self) {
        // Single increment wraps within the 1 KiB window; the top bits stay
        // put, exactly the behavior the burst logic must avoid relying on.
        if (self.csw >> 4) & 0x3 == 0b01 {
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(4) & 0x3FF);
        }
    }

    fn read_memory(&mut self, address: u32) -> u32 {
        match address {
            0xE000_EDF0 => self.dhcsr_status(),
            0xE000_EDF8 => self.dcrdr,
            0xE000_ED08 => self.vtor,
            _ => self.memory.get(&address).copied().unwrap_or(0),
        }
    }

    fn write_memory(&mut self, address: u32, value: u32) {
        match address {
            0xE000_EDF0 => {
                // The debug key gates the control bits.
                if value >> 16 == 0xA05F {
                    self.dhcsr = value & 0xF;
                    let debugen = value & 0b01 != 0;
                    let halt = value & 0b10 != 0;
                    if debugen && halt && !self.halted {
                        self.halted = true;
                        self.events.push(SimEvent::Halted);
                    }
                    if debugen && !halt && self.halted {
                        self.halted = false;
                        self.events.push(SimEvent::Resumed);
                    }
                }
            }
            0xE000_EDF4 => {
                // DCRSR: move DCRDR into the selected register on a write
                // request.
                let regsel = (value & 0x1F) as u16;
                if value & (1 << 16) != 0 {
                    self.core_registers.insert(regsel, self.dcrdr);
                    self.events
                        .push(SimEvent::CoreRegisterWrite(regsel, self.dcrdr));
                }
                self.reg_transfer_done = true;
            }
            0xE000_EDF8 => self.dcrdr = value,
            0xE000_ED08 => {
                self.vtor = value;
                self.events.push(SimEvent::VectorTableWrite(value));
            }
            _ => {
                let stored = if self.corrupt_address == Some(address) {
                    value ^ 1
                } else {
                    value
                };
                self.memory.insert(address, stored);
            }
        }
    }

    fn ctrl_status(&self) -> u32 {
        let mut value = self.ctrl_req & 0x5000_0000;
        if self.ctrl_req & (1 << 28) != 0 {
            value |= 1 << 29;
        }
        if self.ctrl_req & (1 << 30) != 0 && !self.refuse_power_up {
            value |= 1 << 31;
        }
        if self.sticky_fault {
            value |= 1 << 5;
        }
        value
    }

    fn dhcsr_status(&self) -> u32 {
        let mut value = self.dhcsr & 0xF;
        if self.halted {
            value |= 1 << 17;
        }
        if self.reg_transfer_done {
            value |= 1 << 16;
        }
        value
    }
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SwdIo for SimTarget {
    fn write_bits(&mut self, bits: &[bool]) {
        if matches!(self.phase, Phase::WriteData) && bits.len() == 33 {
            self.finish_write(bits);
            return;
        }
        if bits.len() >= 50 && bits.iter().all(|&bit| bit) {
            self.line_reset();
            return;
        }
        if bits.len() == 8 && bits[0] && matches!(self.phase, Phase::Idle) {
            self.decode_request(bits);
        }
        // Idle cycles and activation patterns need no modelling.
    }

    fn read_bits(&mut self, count: usize) -> Vec<bool> {
        match (self.phase, count) {
            (Phase::Ack, 3) => self.acknowledge(),
            (Phase::ReadData, 33) => self.read_data(),
            // Nothing drives the line; it reads as pulled high.
            _ => vec![true; count],
        }
    }

    fn turnaround(&mut self) {}
}
