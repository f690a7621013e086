// SPDX-License-Identifier: AGPL-3.0-only

//! Backend validation tests
//!
//! The software backends must agree with each other on everything the
//! loader and the HAL observe.

mod common;

use common::{elf32, image_file};
use epiphany_hal::chip::layout::{EMEM_CONFIG_ADDR, GROUP_CONFIG_ADDR};
use epiphany_hal::chip::CoreId;
use epiphany_hal::{
    select_backend, Backend, BackendSelection, BackendType, DirectBackend, GroupConfig, Hal,
    HalConfig, LoadConfig, MemoryTeam, PalBackend, Platform, SimulatorBackend, Target,
};

fn backends(platform: &Platform) -> Vec<Box<dyn Backend>> {
    vec![
        Box::new(SimulatorBackend::new(platform)),
        Box::new(PalBackend::new(MemoryTeam::for_platform(platform))),
    ]
}

#[test]
fn software_backends_load_identically() {
    let platform = Platform::parallella16();
    let file = image_file(&elf32(&[
        (0x0, &[0x10; 0x28], 0x28),
        (0x100, b"entry point", 11),
        (0x8E00_4000, b"ext", 3),
    ]));

    let mut snapshots = Vec::new();
    for backend in backends(&platform) {
        let kind = backend.backend_type();
        let mut hal = Hal::with_backend(platform.clone(), backend)
            .with_load_config(LoadConfig::default().with_zero_fill(true));
        let group = hal.open(1, 1, 2, 2).unwrap();
        hal.load_group(file.path(), &group, 0, 0, 2, 2, false).unwrap();

        let mut snapshot = Vec::new();
        for (r, c) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let mut local = vec![0u8; 0x120];
            hal.read(&group, r, c, 0, &mut local).unwrap();
            snapshot.push(local);
        }
        let mut seg = hal.alloc(0x4000, 0x10).unwrap();
        let mut ext = vec![0u8; 3];
        hal.read_mem(&mut seg, 0, &mut ext).unwrap();
        snapshot.push(ext);

        snapshots.push((kind, snapshot));
    }

    let (first_kind, first) = &snapshots[0];
    for (kind, snapshot) in &snapshots[1..] {
        assert_eq!(snapshot, first, "{kind} differs from {first_kind}");
    }

    let core = &first[3];
    assert_eq!(&core[..0x28], [0x10; 0x28].as_slice());
    let block = GroupConfig::from_bytes(&core[GROUP_CONFIG_ADDR as usize..][..40]).unwrap();
    assert_eq!((block.core_row, block.core_col), (1, 1));
    assert_eq!(&core[EMEM_CONFIG_ADDR as usize..][..4], [5, 0, 0, 0].as_slice());
    assert_eq!(&core[0x100..0x10B], b"entry point");
    assert_eq!(first[4], b"ext");
}

#[test]
fn software_backends_reject_off_platform_cores() {
    let platform = Platform::parallella16();
    for mut backend in backends(&platform) {
        let kind = backend.backend_type();
        let result = backend.write_bytes(Target::Core(CoreId::from_coords(0, 0)), 0, &[1]);
        assert!(result.is_err(), "{kind} accepted an off-platform core");
    }
}

#[test]
fn selection_builds_requested_backend() {
    let platform = Platform::parallella64();
    let sim = select_backend(BackendSelection::Simulator, &platform, None).unwrap();
    assert_eq!(sim.backend_type(), BackendType::Simulator);

    let mut hal = Hal::init(HalConfig::simulator(platform)).unwrap();
    let group = hal.open(0, 0, 8, 8).unwrap();
    assert_eq!(group.core_ids().count(), 64);
    assert!(hal.open(0, 0, 9, 1).is_err());
}

#[test]
fn direct_backend_missing_device() {
    let result = DirectBackend::open(Some(std::path::Path::new("/dev/epiphany-does-not-exist")));
    assert!(result.is_err(), "Should fail gracefully on missing device");
}

#[test]
#[ignore = "Requires hardware"]
fn direct_backend_round_trip() {
    let mut hal = Hal::init(HalConfig {
        backend: BackendSelection::Direct,
        ..HalConfig::simulator(Platform::parallella16())
    })
    .unwrap();
    let group = hal.open(0, 0, 1, 1).unwrap();

    hal.write(&group, 0, 0, 0x7000, b"ping").unwrap();
    let mut out = [0u8; 4];
    hal.read(&group, 0, 0, 0x7000, &mut out).unwrap();
    assert_eq!(&out, b"ping");
    hal.close(group).unwrap();
}
