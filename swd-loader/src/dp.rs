//! Debug-port registers.

use bitfield::bitfield;

use crate::dap::Register;

/// Marker for debug-port registers, carrying the DPBANKSEL value the
/// register lives in. `None` when the bank does not matter.
pub trait DpRegister: Register {
    const BANK: Option<u8>;
}

bitfield! {
    /// Identification register of the debug port.
    #[derive(Clone)]
    pub struct DPIDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
}

impl From<u32> for DPIDR {
    fn from(raw: u32) -> Self {
        DPIDR(raw)
    }
}

impl From<DPIDR> for u32 {
    fn from(raw: DPIDR) -> Self {
        raw.0
    }
}

impl Register for DPIDR {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

impl DpRegister for DPIDR {
    const BANK: Option<u8> = None;
}

/// Decoded identification fields.
#[derive(Debug)]
pub struct DebugPortId {
    pub revision: u8,
    pub part_no: u8,
    pub version: u8,
    pub min_dp_support: bool,
    pub designer: u16,
}

impl From<DPIDR> for DebugPortId {
    fn from(dpidr: DPIDR) -> DebugPortId {
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.part_no(),
            version: dpidr.version(),
            min_dp_support: dpidr.min(),
            designer: dpidr.designer(),
        }
    }
}

bitfield! {
    /// Abort register. Write-only; write one to clear the sticky flags.
    #[derive(Clone)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

impl Abort {
    /// An abort value clearing every sticky error flag.
    pub fn clear_all() -> Abort {
        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkerrclr(true);
        abort.set_stkcmpclr(true);
        abort
    }
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

impl DpRegister for Abort {
    const BANK: Option<u8> = None;
}

bitfield! {
    /// Control/status register: power-up requests and acknowledges plus the
    /// sticky error flags.
    #[derive(Clone)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub w_data_err, _: 7;
    pub read_ok, _: 6;
    pub sticky_err, _: 5;
    pub sticky_cmp, _: 4;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

impl DpRegister for Ctrl {
    const BANK: Option<u8> = Some(0);
}

bitfield! {
    /// Access-port and debug-port bank selection.
    #[derive(Clone)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

impl DpRegister for Select {
    const BANK: Option<u8> = None;
}

/// Read buffer; returns the posted result of the previous access-port read
/// without starting a new access.
#[derive(Clone, Copy, Debug)]
pub struct RdBuff(pub u32);

impl From<u32> for RdBuff {
    fn from(raw: u32) -> Self {
        RdBuff(raw)
    }
}

impl From<RdBuff> for u32 {
    fn from(raw: RdBuff) -> Self {
        raw.0
    }
}

impl Register for RdBuff {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "RDBUFF";
}

impl DpRegister for RdBuff {
    const BANK: Option<u8> = None;
}

/// Multidrop target selection. Written with the acknowledge ignored, since
/// no target may drive the line before one is selected.
#[derive(Clone, Copy, Debug)]
pub struct TargetSel(pub u32);

impl From<u32> for TargetSel {
    fn from(raw: u32) -> Self {
        TargetSel(raw)
    }
}

impl From<TargetSel> for u32 {
    fn from(raw: TargetSel) -> Self {
        raw.0
    }
}

impl Register for TargetSel {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "TARGETSEL";
}

impl DpRegister for TargetSel {
    const BANK: Option<u8> = None;
}
