//! SWD packet protocol.
//!
//! One exchange is an 8-bit request, a turnaround, a 3-bit acknowledge from
//! the target and, when the acknowledge is OK, a 33-bit data phase (32 data
//! bits plus parity). All fields travel least significant bit first. Every
//! exchange ends with idle cycles so buffered transfers complete before the
//! line goes quiet.

use crate::dap::DapError;
use crate::link::SwdIo;

/// Port addressed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    DebugPort,
    AccessPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Read,
    Write,
}

/// A single register request. Constructed fresh for every exchange.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub port: PortType,
    pub direction: TransferDirection,
    /// Register byte address. Only A\[3:2\] go on the wire; the bank comes
    /// from the SELECT register.
    pub address: u8,
    /// Value to write, or the value read back.
    pub value: u32,
}

impl Transfer {
    pub fn read(port: PortType, address: u8) -> Self {
        Self {
            port,
            direction: TransferDirection::Read,
            address,
            value: 0,
        }
    }

    pub fn write(port: PortType, address: u8, value: u32) -> Self {
        Self {
            port,
            direction: TransferDirection::Write,
            address,
            value,
        }
    }
}

/// Assemble a request: start bit, APnDP, RnW, A\[3:2\], parity over those
/// four bits, stop bit, park bit.
fn request_bits(port: PortType, direction: TransferDirection, address: u8) -> [bool; 8] {
    let ap = port == PortType::AccessPort;
    let read = direction == TransferDirection::Read;
    let a2 = (address >> 2) & 0b1 == 1;
    let a3 = (address >> 3) & 0b1 == 1;
    let parity = ap ^ read ^ a2 ^ a3;

    [true, ap, read, a2, a3, parity, false, true]
}

/// 32 data bits plus the trailing parity bit (XOR of all data bits).
fn data_bits(mut value: u32) -> [bool; 33] {
    let mut bits = [false; 33];
    let mut parity = false;
    for slot in bits.iter_mut().take(32) {
        let bit = value & 1 == 1;
        *slot = bit;
        parity ^= bit;
        value >>= 1;
    }
    bits[32] = parity;
    bits
}

/// Reassemble a 33-bit data phase, validating the parity bit.
fn parse_data(bits: &[bool]) -> Result<u32, DapError> {
    let mut value = 0u32;
    for (i, &bit) in bits.iter().take(32).enumerate() {
        value |= (bit as u32) << i;
    }
    if (value.count_ones() % 2 == 1) != bits[32] {
        return Err(DapError::IncorrectParity);
    }
    Ok(value)
}

/// Classify a 3-bit acknowledge field.
///
/// All bits high means nothing drove the line; any unassigned pattern is a
/// protocol error and is handled like a FAULT by the layer above.
fn classify_ack(ack: &[bool]) -> Result<(), DapError> {
    match (ack[0], ack[1], ack[2]) {
        (true, true, true) => Err(DapError::NoAcknowledge),
        (_, true, _) => Err(DapError::WaitResponse),
        (_, _, true) => Err(DapError::FaultResponse),
        (true, false, false) => Ok(()),
        _ => Err(DapError::SwdProtocol),
    }
}

/// Perform one request/acknowledge/data exchange.
///
/// Fills `transfer.value` on a successful read. On WAIT and FAULT the data
/// phase is skipped; the line is handed back to the host and the idle
/// cycles are still clocked so the exchange ends in a defined state.
pub(crate) fn perform_transfer<IO: SwdIo>(
    io: &mut IO,
    transfer: &mut Transfer,
    idle_cycles: usize,
) -> Result<(), DapError> {
    io.write_bits(&request_bits(
        transfer.port,
        transfer.direction,
        transfer.address,
    ));
    io.turnaround();

    let ack = io.read_bits(3);
    if let Err(err) = classify_ack(&ack) {
        io.turnaround();
        io.idle(idle_cycles);
        tracing::trace!(
            "{:?} {:?} at {:#x}: {:?}",
            transfer.port,
            transfer.direction,
            transfer.address,
            err
        );
        return Err(err);
    }

    match transfer.direction {
        TransferDirection::Read => {
            let data = io.read_bits(33);
            io.turnaround();
            io.idle(idle_cycles);
            transfer.value = parse_data(&data)?;
        }
        TransferDirection::Write => {
            io.turnaround();
            io.write_bits(&data_bits(transfer.value));
            io.idle(idle_cycles);
        }
    }

    Ok(())
}

/// A selection write (multidrop TARGETSEL): the target is required not to
/// drive an acknowledge, so those cycles are clocked and discarded.
pub(crate) fn perform_selection_write<IO: SwdIo>(
    io: &mut IO,
    address: u8,
    value: u32,
    idle_cycles: usize,
) {
    io.write_bits(&request_bits(
        PortType::DebugPort,
        TransferDirection::Write,
        address,
    ));
    io.turnaround();
    let _ = io.read_bits(3);
    io.turnaround();
    io.write_bits(&data_bits(value));
    io.idle(idle_cycles);
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::{
        classify_ack, data_bits, parse_data, perform_transfer, request_bits, PortType, Transfer,
        TransferDirection,
    };
    use crate::dap::DapError;
    use crate::link::SwdIo;

    fn request_byte(port: PortType, direction: TransferDirection, address: u8) -> u8 {
        request_bits(port, direction, address)
            .iter()
            .enumerate()
            .fold(0, |byte, (i, &bit)| byte | (u8::from(bit) << i))
    }

    #[test]
    fn request_bytes_match_the_architecture() {
        use PortType::{AccessPort, DebugPort};
        use TransferDirection::{Read, Write};

        assert_eq!(request_byte(DebugPort, Read, 0x0), 0xA5);
        assert_eq!(request_byte(DebugPort, Read, 0x4), 0x8D);
        assert_eq!(request_byte(DebugPort, Write, 0x8), 0xB1);
        assert_eq!(request_byte(DebugPort, Read, 0xC), 0xBD);
        assert_eq!(request_byte(AccessPort, Write, 0x0), 0xA3);
        assert_eq!(request_byte(AccessPort, Write, 0x4), 0x8B);
        assert_eq!(request_byte(AccessPort, Read, 0xC), 0x9F);
        assert_eq!(request_byte(AccessPort, Write, 0xC), 0xBB);
    }

    #[test]
    fn request_parity_covers_selector_direction_and_address() {
        for port in [PortType::DebugPort, PortType::AccessPort] {
            for direction in [TransferDirection::Read, TransferDirection::Write] {
                for address in [0x0u8, 0x4, 0x8, 0xC] {
                    let bits = request_bits(port, direction, address);
                    assert_eq!(bits[5], bits[1] ^ bits[2] ^ bits[3] ^ bits[4]);
                    assert!(bits[0], "start bit");
                    assert!(!bits[6], "stop bit");
                    assert!(bits[7], "park bit");
                }
            }
        }
    }

    #[test]
    fn data_parity_is_the_xor_of_all_data_bits() {
        for value in [0, 1, 0xFFFF_FFFF, 0x8000_0001, 0xDEAD_BEEF, 0x0BC1_2477] {
            let bits = data_bits(value);
            assert_eq!(bits[32], value.count_ones() % 2 == 1);
            assert_eq!(parse_data(&bits), Ok(value));
        }
    }

    #[test]
    fn flipped_parity_is_rejected() {
        let mut bits = data_bits(0x1234_5678);
        bits[32] = !bits[32];
        assert_eq!(parse_data(&bits), Err(DapError::IncorrectParity));
    }

    #[test]
    fn acknowledge_codes_classify() {
        assert_eq!(classify_ack(&[true, false, false]), Ok(()));
        assert_eq!(
            classify_ack(&[false, true, false]),
            Err(DapError::WaitResponse)
        );
        assert_eq!(
            classify_ack(&[false, false, true]),
            Err(DapError::FaultResponse)
        );
        assert_eq!(
            classify_ack(&[true, true, true]),
            Err(DapError::NoAcknowledge)
        );
        assert_eq!(
            classify_ack(&[false, false, false]),
            Err(DapError::SwdProtocol)
        );
    }

    #[derive(Default)]
    struct ScriptedIo {
        written: Vec<Vec<bool>>,
        responses: VecDeque<Vec<bool>>,
        turnarounds: usize,
    }

    impl ScriptedIo {
        fn respond(&mut self, bits: Vec<bool>) {
            self.responses.push_back(bits);
        }
    }

    impl SwdIo for ScriptedIo {
        fn write_bits(&mut self, bits: &[bool]) {
            self.written.push(bits.to_vec());
        }

        fn read_bits(&mut self, count: usize) -> Vec<bool> {
            let response = self.responses.pop_front().expect("unexpected read");
            assert_eq!(response.len(), count);
            response
        }

        fn turnaround(&mut self) {
            self.turnarounds += 1;
        }
    }

    #[test]
    fn write_exchange_shapes_the_line() {
        let mut io = ScriptedIo::default();
        io.respond(vec![true, false, false]);

        let mut transfer = Transfer::write(PortType::AccessPort, 0xC, 0xCAFE_F00D);
        perform_transfer(&mut io, &mut transfer, 8).unwrap();

        // Request, data phase, trailing idle.
        assert_eq!(io.written.len(), 3);
        assert_eq!(io.written[0].len(), 8);
        assert_eq!(io.written[1], data_bits(0xCAFE_F00D).to_vec());
        assert_eq!(io.written[2], vec![false; 8]);
        assert_eq!(io.turnarounds, 2);
    }

    #[test]
    fn read_exchange_returns_the_parsed_word() {
        let mut io = ScriptedIo::default();
        io.respond(vec![true, false, false]);
        io.respond(data_bits(0x2000_1234).to_vec());

        let mut transfer = Transfer::read(PortType::DebugPort, 0x0);
        perform_transfer(&mut io, &mut transfer, 8).unwrap();

        assert_eq!(transfer.value, 0x2000_1234);
        assert_eq!(io.turnarounds, 2);
    }

    #[test]
    fn read_with_bad_parity_is_a_protocol_error() {
        let mut io = ScriptedIo::default();
        io.respond(vec![true, false, false]);
        let mut data = data_bits(0x2000_1234).to_vec();
        data[32] = !data[32];
        io.respond(data);

        let mut transfer = Transfer::read(PortType::DebugPort, 0x0);
        assert!(matches!(
            perform_transfer(&mut io, &mut transfer, 8),
            Err(DapError::IncorrectParity)
        ));
    }

    #[test]
    fn wait_acknowledge_skips_the_data_phase() {
        let mut io = ScriptedIo::default();
        io.respond(vec![false, true, false]);

        let mut transfer = Transfer::write(PortType::AccessPort, 0x4, 0x2000_0000);
        assert!(matches!(
            perform_transfer(&mut io, &mut transfer, 8),
            Err(DapError::WaitResponse)
        ));

        // Request and trailing idle only; the line was handed back.
        assert_eq!(io.written.len(), 2);
        assert_eq!(io.written[1], vec![false; 8]);
        assert_eq!(io.turnarounds, 2);
    }
}
