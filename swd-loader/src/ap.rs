//! Memory access-port registers.

use bitfield::bitfield;

use crate::dap::Register;

/// Marker for access-port registers, carrying the APBANKSEL value the
/// register lives in.
pub trait ApRegister: Register {
    const BANK: u8;
}

/// Transfer unit selected in the CSW SIZE field.
///
/// Every MCU supports `U32`; the smaller sizes are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSize {
    U8 = 0b000,
    U16 = 0b001,
    #[default]
    U32 = 0b010,
}

/// TAR increment applied after each DRW access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressIncrement {
    /// TAR stays put.
    Off = 0b00,
    /// TAR grows by the transfer size. Saves a TAR write per word on
    /// consecutive accesses.
    #[default]
    Single = 0b01,
    /// Packed sub-word access, where supported.
    Packed = 0b10,
}

bitfield! {
    /// Control and status word: transfer size, auto-increment and bus
    /// protection for memory accesses through the port.
    #[derive(Clone)]
    pub struct CSW(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 24;
    pub tr_in_prog, _: 7;
    pub device_en, _: 6;
    pub u8, addr_inc, set_addr_inc: 5, 4;
    pub u8, size, set_size: 2, 0;
}

impl CSW {
    /// CSW for 32-bit auto-incrementing transfers.
    ///
    /// HPROT\[1:0\] request a privileged data access.
    pub fn transfer_default() -> Self {
        let mut csw = CSW(0);
        csw.set_dbg_sw_enable(true);
        csw.set_prot(0b11);
        csw.set_addr_inc(AddressIncrement::Single as u8);
        csw.set_size(DataSize::U32 as u8);
        csw
    }
}

impl From<u32> for CSW {
    fn from(raw: u32) -> Self {
        CSW(raw)
    }
}

impl From<CSW> for u32 {
    fn from(raw: CSW) -> Self {
        raw.0
    }
}

impl Register for CSW {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "CSW";
}

impl ApRegister for CSW {
    const BANK: u8 = 0x0;
}

/// Transfer address for the next DRW access. Auto-increments within a
/// 1 KiB window when CSW enables it.
#[derive(Clone, Copy, Debug)]
pub struct TAR(pub u32);

impl From<u32> for TAR {
    fn from(raw: u32) -> Self {
        TAR(raw)
    }
}

impl From<TAR> for u32 {
    fn from(raw: TAR) -> Self {
        raw.0
    }
}

impl Register for TAR {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "TAR";
}

impl ApRegister for TAR {
    const BANK: u8 = 0x0;
}

/// Data read/write register: accesses target memory at the address held in
/// TAR.
#[derive(Clone, Copy, Debug)]
pub struct DRW(pub u32);

impl From<u32> for DRW {
    fn from(raw: u32) -> Self {
        DRW(raw)
    }
}

impl From<DRW> for u32 {
    fn from(raw: DRW) -> Self {
        raw.0
    }
}

impl Register for DRW {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "DRW";
}

impl ApRegister for DRW {
    const BANK: u8 = 0x0;
}

bitfield! {
    /// Access-port identification.
    #[derive(Clone)]
    pub struct IDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u16, designer, _: 27, 17;
    pub u8, class, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, ap_type, _: 3, 0;
}

impl IDR {
    /// Class reported by memory access ports.
    pub const MEMORY_AP_CLASS: u8 = 0b1000;

    pub fn is_memory_ap(&self) -> bool {
        self.class() == Self::MEMORY_AP_CLASS
    }
}

impl From<u32> for IDR {
    fn from(raw: u32) -> Self {
        IDR(raw)
    }
}

impl From<IDR> for u32 {
    fn from(raw: IDR) -> Self {
        raw.0
    }
}

impl Register for IDR {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "IDR";
}

impl ApRegister for IDR {
    const BANK: u8 = 0xF;
}
