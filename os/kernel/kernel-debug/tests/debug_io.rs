use kernel_debug::{DebugConfig, DebugPort, LOGGER, QEMU_DEBUG_PORT, initialize_debug_io};
use kernel_hal::mock::MockPlatform;
use log::LevelFilter;

#[test]
fn configured_ports_receive_log_records() {
    // COM2's scratch register reads back 0xFF: nothing is connected.
    let platform: &'static MockPlatform =
        Box::leak(Box::new(MockPlatform::new().with_port_input(0x2F8 + 7, 0xFF)));

    let mut config = DebugConfig {
        level: LevelFilter::Debug,
        ..DebugConfig::default()
    };
    config.add_port(DebugPort::Com(1));
    config.add_port(DebugPort::Com(2));
    config.add_port(DebugPort::Qemu);

    assert_eq!(initialize_debug_io(platform, &config, None), 2);
    assert_eq!(LOGGER.sink_count(), 2);
    assert_eq!(log::max_level(), LevelFilter::Debug);

    platform.clear_events();
    log::info!("phase 0 done");
    let qemu = platform.port_writes(QEMU_DEBUG_PORT);
    assert_eq!(qemu, b"[INFO] debug_io: phase 0 done\n");
    assert!(platform.port_writes(0x3F8).ends_with(b"phase 0 done\r\n"));
    assert!(platform.port_writes(0x2F8).is_empty());

    // Bringing the same ports up again registers nothing new.
    assert_eq!(initialize_debug_io(platform, &config, None), 0);
    assert_eq!(LOGGER.sink_count(), 2);
}
