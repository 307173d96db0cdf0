use jtag_vpi_client::{ClientError, VpiClient};
use jtag_vpi_protocol::{
    Dialect, EdgeCell, TapMode,
    oscan1::{JScanCommand, ScanningFormat, msb_first_bits},
};
use jtag_vpi_server::server::Builder;
use jtag_vpi_tests::{BypassChain, CellLog, ServerThread};

fn recording_server() -> (ServerThread, CellLog) {
    let (chain, cells) = BypassChain::recording(0);
    let server = ServerThread::spawn(Builder::new(), chain).unwrap();
    (server, cells)
}

fn take_cells(cells: &CellLog) -> Vec<EdgeCell> {
    std::mem::take(&mut *cells.lock().unwrap())
}

fn jscan_cells(command: JScanCommand) -> Vec<EdgeCell> {
    command
        .packet(false)
        .into_iter()
        .map(|bit| EdgeCell::new(bit, bit))
        .collect()
}

#[test]
fn sf0_scan_after_init() {
    let server = ServerThread::loopback().unwrap();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull).unwrap();
    client.oscan1_init().unwrap();

    let tms = [false, true, true, false, false];
    let tdi = [true, false, true, true, false];
    assert_eq!(client.sf0_scan(&tms, &tdi).unwrap(), tdi);
}

#[test]
fn init_with_parity() {
    let server = ServerThread::loopback().unwrap();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull)
        .unwrap()
        .with_parity(true);
    client.oscan1_init().unwrap();
    assert!(client.oscan1_edge(EdgeCell::new(false, true)).unwrap());
}

#[test]
fn edges_through_bypass_register() {
    let server = ServerThread::spawn(Builder::new(), BypassChain::new(1)).unwrap();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull).unwrap();
    assert!(!client.oscan1_edge(EdgeCell::new(false, true)).unwrap());
    assert!(client.oscan1_edge(EdgeCell::new(false, false)).unwrap());
    assert!(!client.oscan1_edge(EdgeCell::new(true, false)).unwrap());
}

#[test]
fn mode_returns_to_initial_after_disconnect() {
    let server = ServerThread::loopback().unwrap();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull).unwrap();
    client.oscan1_edge(EdgeCell::new(true, true)).unwrap();
    drop(client);

    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdMinimal).unwrap();
    assert_eq!(client.query_mode().unwrap(), TapMode::Jtag);
}

#[test]
fn initial_cjtag_mode() {
    let builder = Builder::new().initial_mode(TapMode::Cjtag);
    let server = ServerThread::spawn(builder, BypassChain::new(0)).unwrap();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdMinimal).unwrap();
    assert_eq!(client.query_mode().unwrap(), TapMode::Cjtag);
    client.reset().unwrap();
    assert_eq!(client.query_mode().unwrap(), TapMode::Cjtag);
}

#[test]
fn oscan1_reset_leaves_oscan() {
    let (server, cells) = recording_server();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull).unwrap();
    client.oscan1_init().unwrap();
    take_cells(&cells);

    client.oscan1_reset().unwrap();
    let mut expected = jscan_cells(JScanCommand::Reset);
    expected.extend(jscan_cells(JScanCommand::OScanOff));
    assert_eq!(take_cells(&cells), expected);

    // Already off, nothing left to send
    client.oscan1_reset().unwrap();
    assert!(take_cells(&cells).is_empty());
}

#[test]
fn scanning_format_selection() {
    let (server, cells) = recording_server();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull).unwrap();
    client.oscan1_init().unwrap();
    take_cells(&cells);

    client.set_scanning_format(ScanningFormat::Sf2).unwrap();
    let mut expected = jscan_cells(JScanCommand::SfSelect);
    expected.extend([EdgeCell::new(true, true), EdgeCell::new(false, false)]);
    assert_eq!(take_cells(&cells), expected);
    assert_eq!(client.scanning_format(), ScanningFormat::Sf2);

    match client.sf0_scan(&[false], &[true]) {
        Err(ClientError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput),
        other => panic!("Expected an InvalidInput error, got {:?}", other),
    }
    assert!(take_cells(&cells).is_empty());

    client.set_scanning_format(ScanningFormat::Sf0).unwrap();
    assert_eq!(client.sf0_scan(&[false], &[true]).unwrap(), [true]);
}

#[test]
fn zero_insertion_after_five_tdi_ones() {
    let (server, cells) = recording_server();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull)
        .unwrap()
        .with_zero_insertion(true);
    client.oscan1_init().unwrap();
    take_cells(&cells);

    let tms = [false; 7];
    let tdi = [true; 7];
    assert_eq!(client.sf0_scan(&tms, &tdi).unwrap(), tdi);

    let cells = take_cells(&cells);
    assert_eq!(cells.len(), 8);
    assert_eq!(cells[5], EdgeCell::new(false, false));
    assert!(cells.iter().enumerate().all(|(i, cell)| i == 5 || cell.tdi));
}

#[test]
fn crc_follows_payload() {
    let (server, cells) = recording_server();
    let mut client = VpiClient::connect(server.addr(), Dialect::OpenOcdFull)
        .unwrap()
        .with_crc(true);
    client.oscan1_init().unwrap();
    take_cells(&cells);

    let tdi: Vec<bool> = msb_first_bits(&[0xAA, 0x55]).collect();
    let tms = vec![false; tdi.len()];
    assert_eq!(client.sf0_scan(&tms, &tdi).unwrap(), tdi);

    let cells = take_cells(&cells);
    assert_eq!(cells.len(), 24);
    let crc: Vec<EdgeCell> = msb_first_bits(&[0xE1])
        .map(|bit| EdgeCell::new(false, bit))
        .collect();
    assert_eq!(cells[16..], crc[..]);
}
