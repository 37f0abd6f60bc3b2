use std::{net::TcpStream, sync::Arc, time::Duration};

use scanwire_client::{ScanClient, client};
use scanwire_protocol::{Command, Status};
use scanwire_scan::{
    LineLayout, ScanError, SessionState,
    commands::{ScanParameters, Scsi2},
    resample::{AveragePairs, Resample},
    session::Builder,
};
use scanwire_tests::{MockConfig, MockScanner, expected_image};

async fn start_scanner(config: MockConfig) -> (Arc<MockScanner>, String) {
    let scanner = Arc::new(MockScanner::bind(config).await.unwrap());
    let addr = scanner.local_addr().unwrap().to_string();
    scanner.clone().spawn();
    (scanner, addr)
}

fn connect(addr: &str) -> ScanClient<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    client::Builder::new().strict_magic(true).build(stream)
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_round_trip() {
    let (scanner, addr) = start_scanner(MockConfig::default()).await;

    tokio::task::spawn_blocking(move || {
        let mut client = connect(&addr);
        assert_eq!(client.lock().unwrap(), Status::Good);
        assert_eq!(client.unlock().unwrap(), Status::Good);
        assert_eq!(client.pending_len(), 0);
    })
    .await
    .unwrap();

    assert_eq!(scanner.commands(), vec![Command::LOCK, Command::UNLOCK]);
}

#[tokio::test(flavor = "multi_thread")]
async fn skewed_planar_scan() {
    let (_scanner, addr) = start_scanner(MockConfig::default()).await;

    let image = tokio::task::spawn_blocking(move || {
        let mut session = Builder::new()
            .lines_per_request(3)
            .open(connect(&addr), Scsi2::default())
            .unwrap();
        session.start(ScanParameters::new(8, 20)).unwrap();
        let image = session.read_to_end().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.close().unwrap();
        image
    })
    .await
    .unwrap();

    assert_eq!(image, expected_image(8, 20));
}

#[tokio::test(flavor = "multi_thread")]
async fn negative_skew_interleaved_supersampled() {
    let config = MockConfig {
        green_skew: 0x83,
        blue_skew: 0x81,
        layout: LineLayout::Interleaved,
    };
    let (_scanner, addr) = start_scanner(config).await;

    let image = tokio::task::spawn_blocking(move || {
        let mut session = Builder::new()
            .lines_per_request(64)
            .resampler(AveragePairs)
            .open(connect(&addr), Scsi2::new(LineLayout::Interleaved))
            .unwrap();
        session.start(ScanParameters::new(6, 9)).unwrap();
        let image = session.read_to_end().unwrap();
        session.close().unwrap();
        image
    })
    .await
    .unwrap();

    let expected: Vec<u8> = expected_image(6, 9)
        .chunks(18)
        .flat_map(|line| {
            let mut out = vec![0u8; AveragePairs.output_len(line.len())];
            AveragePairs.resample(line, &mut out);
            out
        })
        .collect();
    assert_eq!(image, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_then_rescan() {
    let (scanner, addr) = start_scanner(MockConfig::default()).await;

    let image = tokio::task::spawn_blocking(move || {
        let mut session = Builder::new()
            .lines_per_request(8)
            .open(connect(&addr), Scsi2::default())
            .unwrap();
        session.start(ScanParameters::new(4, 12)).unwrap();
        let mut line = [0u8; 12];
        assert!(session.read_line(&mut line).unwrap());
        assert!(session.read_line(&mut line).unwrap());

        session.cancel();
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Cancelled)
        ));
        assert_eq!(session.reset_device().unwrap(), Status::Good);

        session.start(ScanParameters::new(4, 12)).unwrap();
        let image = session.read_to_end().unwrap();
        session.close().unwrap();
        image
    })
    .await
    .unwrap();

    assert_eq!(image, expected_image(4, 12));
    let commands = scanner.commands();
    assert_eq!(commands.first(), Some(&Command::LOCK));
    assert_eq!(commands.last(), Some(&Command::UNLOCK));
}

#[tokio::test(flavor = "multi_thread")]
async fn device_lock_is_exclusive() {
    let (_scanner, addr) = start_scanner(MockConfig::default()).await;

    tokio::task::spawn_blocking(move || {
        let first = Builder::new()
            .open(connect(&addr), Scsi2::default())
            .unwrap();
        let second = Builder::new().open(connect(&addr), Scsi2::default());
        assert!(matches!(second, Err(ScanError::Device(Status::DeviceBusy))));

        first.close().unwrap();
        let second = Builder::new()
            .open(connect(&addr), Scsi2::default())
            .unwrap();
        second.close().unwrap();
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn advisory_lock_is_released_after_scan() {
    let (_scanner, addr) = start_scanner(MockConfig::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let lock_dir = dir.path().to_path_buf();

    tokio::task::spawn_blocking(move || {
        for _ in 0..2 {
            let mut session = Builder::new()
                .lock_id(format!("net:{}", addr))
                .lock_dir(&lock_dir)
                .open(connect(&addr), Scsi2::default())
                .unwrap();
            session.start(ScanParameters::new(2, 2)).unwrap();
            assert_eq!(session.read_to_end().unwrap(), expected_image(2, 2));
            session.close().unwrap();
        }
    })
    .await
    .unwrap();
}
