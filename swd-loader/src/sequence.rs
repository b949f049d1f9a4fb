//! Connection sequence.
//!
//! Brings the target's debug logic from an unknown state to a powered
//! serial-wire debug port: line reset, protocol activation, identification
//! check, power-up. The steps run strictly in order and the first failure
//! aborts the sequence; the returned error names the failing step.

use crate::ap::IDR;
use crate::dap::DapInterface;
use crate::dp::{Abort, Ctrl, DebugPortId, DPIDR};
use crate::error::Error;
use crate::link::SwdIo;

/// 16-bit selection pattern that switches SWJ debug logic from JTAG to the
/// serial-wire protocol.
const JTAG_TO_SWD: u16 = 0xE79E;

/// Dormant-state selection alert, transmitted before the activation code
/// for targets that power up dormant.
const SELECTION_ALERT: [u64; 2] = [0x8685_2D95_6209_F392, 0x19BC_0EA2_E3DD_AFE9];

/// Four low cycles followed by the 8-bit serial-wire activation code.
const SWD_ACTIVATION: u16 = 0x1A0;

/// Puts an active interface back into the dormant state, so the alert
/// sequence is observed from a defined starting point.
const TO_DORMANT: u32 = 0x33BB_BBBA;

/// Fixed low nibble every serial-wire debug port reports in its
/// identification register: the read-as-one bit plus the low bits of the
/// Arm designer code.
const DPIDR_LOW_NIBBLE: u32 = 0b0111;

/// Configuration of the connection sequence.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSequence {
    /// Selection code for multidrop targets, written to TARGETSEL after the
    /// reset that precedes the identification read. `None` for single-drop
    /// targets.
    pub target_select: Option<u32>,
}

impl ConnectionSequence {
    pub fn new(target_select: Option<u32>) -> Self {
        Self { target_select }
    }

    /// Run the whole sequence. Returns the decoded identification on
    /// success.
    pub fn connect<IO: SwdIo>(&self, dap: &mut DapInterface<IO>) -> Result<DebugPortId, Error> {
        tracing::debug!("connecting: line reset");
        dap.line_reset();

        tracing::debug!("connecting: protocol activation");
        self.send_activation(dap);

        tracing::debug!("connecting: identification check");
        let id = check_id(dap)?;

        tracing::debug!("connecting: power-up");
        power_up(dap)?;

        tracing::debug!("debug port ready: {:?}", id);
        Ok(id)
    }

    fn send_activation<IO: SwdIo>(&self, dap: &mut DapInterface<IO>) {
        if self.target_select.is_some() {
            // Dormant targets: drop to dormant, send the alert, then the
            // serial-wire activation code.
            dap.swj_sequence(31, TO_DORMANT as u64);
            dap.swj_sequence(8, 0xFF);
            dap.swj_sequence(64, SELECTION_ALERT[0]);
            dap.swj_sequence(64, SELECTION_ALERT[1]);
            dap.swj_sequence(12, SWD_ACTIVATION as u64);
        } else {
            dap.swj_sequence(16, JTAG_TO_SWD as u64);
        }

        // The activation only takes effect across a reset. The reset also
        // deselects any multidrop target, so selection comes after it.
        dap.line_reset();

        if let Some(code) = self.target_select {
            dap.write_selection(code);
        }
    }
}

/// Read the identification register and verify the architected pattern.
///
/// A mismatch is the primary signal separating "nothing connected or
/// powered" from "connected but not speaking this protocol".
fn check_id<IO: SwdIo>(dap: &mut DapInterface<IO>) -> Result<DebugPortId, Error> {
    let dpidr: DPIDR = dap.read_dp()?;
    let raw: u32 = dpidr.clone().into();
    if raw & 0xF != DPIDR_LOW_NIBBLE {
        return Err(Error::IdMismatch { dpidr: raw });
    }
    Ok(DebugPortId::from(dpidr))
}

/// Clear stale sticky flags, request debug and system power-up, and poll
/// for both acknowledge bits. Finishes by checking that the memory access
/// port answers.
fn power_up<IO: SwdIo>(dap: &mut DapInterface<IO>) -> Result<(), Error> {
    dap.write_dp(Abort::clear_all())?;

    let mut ctrl = Ctrl(0);
    ctrl.set_cdbgpwrupreq(true);
    ctrl.set_csyspwrupreq(true);
    dap.write_dp(ctrl)?;

    let polls = dap.settings().num_powerup_polls;
    let mut powered = false;
    for _ in 0..polls {
        let ctrl: Ctrl = dap.read_dp()?;
        if ctrl.csyspwrupack() && ctrl.cdbgpwrupack() {
            powered = true;
            break;
        }
    }
    if !powered {
        return Err(Error::PowerUpFailed);
    }

    let idr: IDR = dap.read_ap()?;
    if !idr.is_memory_ap() {
        return Err(Error::NoMemoryAp);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::ConnectionSequence;
    use crate::dap::{DapError, DapInterface, SwdSettings};
    use crate::error::Error;
    use crate::sim::{SimEvent, SimTarget};

    fn interface(sim: &mut SimTarget) -> DapInterface<&mut SimTarget> {
        DapInterface::new(sim, SwdSettings::default())
    }

    #[test]
    fn connect_identifies_and_powers_up() {
        let mut sim = SimTarget::new();
        let mut dap = interface(&mut sim);

        let id = ConnectionSequence::default().connect(&mut dap).unwrap();
        assert_eq!(id.designer, 0x23B);
        assert_eq!(id.version, 2);
        assert!(sim.events.contains(&SimEvent::PowerUpRequested));
    }

    #[test]
    fn id_mismatch_stops_before_power_up() {
        let mut sim = SimTarget::with_dpidr(0x0BC1_2470);
        let mut dap = interface(&mut sim);

        let result = ConnectionSequence::default().connect(&mut dap);
        assert!(matches!(
            result,
            Err(Error::IdMismatch { dpidr: 0x0BC1_2470 })
        ));
        assert!(!sim.events.contains(&SimEvent::PowerUpRequested));
    }

    #[test]
    fn multidrop_target_is_selected_before_the_id_check() {
        let mut sim = SimTarget::multidrop(0x0100_2927);
        let mut dap = interface(&mut sim);

        ConnectionSequence::new(Some(0x0100_2927))
            .connect(&mut dap)
            .unwrap();

        let selected = sim
            .events
            .iter()
            .position(|event| *event == SimEvent::Selected)
            .unwrap();
        let powered = sim
            .events
            .iter()
            .position(|event| *event == SimEvent::PowerUpRequested)
            .unwrap();
        assert!(selected < powered);
    }

    #[test]
    fn unselected_multidrop_target_stays_silent() {
        let mut sim = SimTarget::multidrop(0x0100_2927);
        let mut dap = interface(&mut sim);

        // Single-drop sequence against a multidrop-only target: nothing
        // drives the line, which shows up as a missing acknowledge.
        let result = ConnectionSequence::default().connect(&mut dap);
        assert!(matches!(
            result,
            Err(Error::Dap(DapError::NoAcknowledge))
        ));
    }

    #[test]
    fn refused_power_up_is_fatal() {
        let mut sim = SimTarget::new();
        sim.refuse_power_up();
        let mut dap = interface(&mut sim);

        let result = ConnectionSequence::default().connect(&mut dap);
        assert!(matches!(result, Err(Error::PowerUpFailed)));
    }
}
