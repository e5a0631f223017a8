use pzem_logger::protocol::{crc, frame};
use pzem_logger::{DeviceSession, Measurement, PzemError};
use tokio_test::io::Builder;

const READ_REQUEST: [u8; 8] = [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D];

/// 25 byte answer carrying `[2300, 1000, 0, 500, 0, 12345, 0, 500, 95, 0]`.
const READ_RESPONSE: [u8; 25] = [
    0x01, 0x04, 0x14, 0x08, 0xFC, 0x03, 0xE8, 0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x30, 0x39,
    0x00, 0x00, 0x01, 0xF4, 0x00, 0x5F, 0x00, 0x00, 0xDA, 0xF0,
];

#[test]
fn canned_frames_carry_valid_checksums() {
    assert!(crc::verify(&READ_REQUEST));
    assert!(crc::verify(&READ_RESPONSE));
    assert_eq!(
        frame::read_input_registers(0x01, 0x0000, 10).unwrap().as_bytes(),
        &READ_REQUEST
    );
}

#[tokio::test(start_paused = true)]
async fn reads_measurements_end_to_end() {
    let mock = Builder::new()
        .write(&READ_REQUEST)
        .read(&READ_RESPONSE)
        .build();
    let mut session = DeviceSession::new(mock, 0x01);

    let measurement = session.read_measurements().await.unwrap();
    assert_eq!(
        measurement,
        Measurement {
            voltage: 230.0,
            current: 1.000,
            power: 50.0,
            energy: 12345,
            frequency: 50.0,
            power_factor: 0.95,
            alarm: false,
        }
    );

    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exception_is_never_decoded() {
    let mock = Builder::new()
        .write(&READ_REQUEST)
        .read(&[0x01, 0x84, 0x02, 0xC2, 0xC1])
        .build();
    let mut session = DeviceSession::new(mock, 0x01);

    let err = session.read_measurements().await.unwrap_err();
    assert!(matches!(err, PzemError::ExceptionResponse { .. }));
}

#[tokio::test]
async fn device_hanging_up_is_a_timeout() {
    // the stream ends without a single byte of response
    let mock = Builder::new().write(&READ_REQUEST).build();
    let mut session = DeviceSession::new(mock, 0x01);

    let err = session.read_measurements().await.unwrap_err();
    assert!(matches!(err, PzemError::Timeout));
}

#[test]
fn invalid_write_request_never_reaches_the_transport() {
    let err = frame::build(0x01, 0x06, 0x0001, None).unwrap_err();
    assert!(matches!(err, PzemError::MissingPayload(_)));
}
