//! End-to-end load operations against the simulated target.

use pretty_assertions::assert_eq;

use swd_loader::sim::{SimEvent, SimTarget};
use swd_loader::{load_program, Error, LoadPlan, LoadState, LoadStep, Loader, Section};

const ENTRY: u32 = 0x1000_0001;
const STACK: u32 = 0x2004_2000;

fn plan<'a>(sections: &'a [Section<'a>]) -> LoadPlan<'a> {
    LoadPlan {
        sections,
        entry_point: ENTRY,
        stack_pointer: STACK,
        xip_as_ram: false,
        verify: true,
        vector_table: None,
    }
}

#[test]
fn a_section_is_loaded_verified_and_started() {
    let data = [0x01, 0x02, 0x03, 0x04];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    loader.load(&plan(&sections)).unwrap();
    assert_eq!(loader.state(), LoadState::Running);

    assert_eq!(sim.word(0x2000_0000), 0x0403_0201);
    assert!(sim.resumed());
}

#[test]
fn control_point_registers_are_written_before_resume() {
    let data = [0x01, 0x02, 0x03, 0x04];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    loader.load(&plan(&sections)).unwrap();

    assert_eq!(
        sim.core_register_writes(),
        vec![(13, STACK), (15, ENTRY)]
    );

    let last_register_write = sim
        .events
        .iter()
        .rposition(|event| matches!(event, SimEvent::CoreRegisterWrite(..)))
        .unwrap();
    let resumed = sim
        .events
        .iter()
        .position(|event| *event == SimEvent::Resumed)
        .unwrap();
    assert!(last_register_write < resumed);
}

#[test]
fn trailing_bytes_are_zero_padded() {
    let data = [0x11, 0x22, 0x33, 0x44, 0x55];
    let sections = [Section {
        address: 0x2000_0100,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    loader.load(&plan(&sections)).unwrap();

    assert_eq!(sim.word(0x2000_0100), 0x4433_2211);
    assert_eq!(sim.word(0x2000_0104), 0x0000_0055);
}

#[test]
fn contiguous_sections_reuse_the_transfer_address() {
    let first = [0xAAu8; 16];
    let second = [0xBBu8; 16];
    let sections = [
        Section {
            address: 0x2000_0000,
            data: &first,
        },
        Section {
            address: 0x2000_0010,
            data: &second,
        },
    ];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    let mut section_plan = plan(&sections);
    // Writes only; the read-back pass repositions the transfer address.
    section_plan.verify = false;
    loader.load(&section_plan).unwrap();

    let ram_tar_writes: Vec<u32> = sim
        .tar_writes()
        .into_iter()
        .filter(|address| *address < 0xE000_0000)
        .collect();
    assert_eq!(ram_tar_writes, vec![0x2000_0000]);
}

#[test]
fn gapped_sections_rewrite_the_transfer_address() {
    let first = [0xAAu8; 16];
    let second = [0xBBu8; 8];
    let sections = [
        Section {
            address: 0x2000_0000,
            data: &first,
        },
        Section {
            address: 0x2000_0100,
            data: &second,
        },
    ];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    let mut section_plan = plan(&sections);
    section_plan.verify = false;
    loader.load(&section_plan).unwrap();

    let ram_tar_writes: Vec<u32> = sim
        .tar_writes()
        .into_iter()
        .filter(|address| *address < 0xE000_0000)
        .collect();
    assert_eq!(ram_tar_writes, vec![0x2000_0000, 0x2000_0100]);
}

#[test]
fn verification_reports_the_offending_address() {
    let data = [0u8; 16];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    sim.corrupt_writes_at(0x2000_0008);

    let mut loader = Loader::new(&mut sim);
    let result = loader.load(&plan(&sections));

    assert!(matches!(
        result,
        Err(Error::Verify {
            address: 0x2000_0008,
            ..
        })
    ));
    assert_eq!(loader.state(), LoadState::Failed(LoadStep::Verify));
}

#[test]
fn repeated_loads_reach_the_same_terminal_state() {
    let data = [0x01, 0x02, 0x03, 0x04];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    let section_plan = plan(&sections);

    loader.load(&section_plan).unwrap();
    let first = loader.state();
    loader.load(&section_plan).unwrap();
    let second = loader.state();

    assert_eq!(first, LoadState::Running);
    assert_eq!(first, second);
    assert_eq!(sim.word(0x2000_0000), 0x0403_0201);
}

#[test]
fn an_invalid_plan_fails_before_touching_the_wire() {
    let data = [0u8; 16];
    let sections = [
        Section {
            address: 0x2000_0000,
            data: &data,
        },
        Section {
            address: 0x2000_0008,
            data: &data,
        },
    ];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    let result = loader.load(&plan(&sections));

    assert!(matches!(result, Err(Error::InvalidPlan(_))));
    assert_eq!(loader.state(), LoadState::Failed(LoadStep::Plan));
    assert!(sim.events.is_empty());
}

#[test]
fn the_vector_table_is_installed_before_start() {
    let data = [0u8; 8];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    let mut loader = Loader::new(&mut sim);
    let mut table_plan = plan(&sections);
    table_plan.vector_table = Some(0x2000_0000);
    loader.load(&table_plan).unwrap();

    assert!(sim
        .events
        .contains(&SimEvent::VectorTableWrite(0x2000_0000)));
}

#[test]
fn the_boolean_entry_point_reports_success() {
    let data = [0x01, 0x02, 0x03, 0x04];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    assert!(load_program(&mut sim, &sections, ENTRY, STACK, false));
    assert_eq!(sim.word(0x2000_0000), 0x0403_0201);
}

#[test]
fn the_boolean_entry_point_reports_failure() {
    let data = [0x01, 0x02, 0x03, 0x04];
    let sections = [Section {
        address: 0x2000_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    sim.always_wait();
    assert!(!load_program(&mut sim, &sections, ENTRY, STACK, false));
}

#[test]
fn xip_sections_load_with_the_opt_in() {
    let data = [0xDE, 0xAD, 0xBE, 0xEF];
    let sections = [Section {
        address: 0x1500_0000,
        data: &data,
    }];

    let mut sim = SimTarget::new();
    assert!(load_program(&mut sim, &sections, ENTRY, STACK, true));
    assert_eq!(sim.word(0x1500_0000), 0xEFBE_ADDE);

    let mut rejected = SimTarget::new();
    assert!(!load_program(&mut rejected, &sections, ENTRY, STACK, false));
    assert!(rejected.events.is_empty());
}
