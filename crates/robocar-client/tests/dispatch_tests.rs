//! 客户端调度循环集成测试
//!
//! 一部分使用手写帧的脚本服务端，一部分连接真实的流服务。

use robocar_client::{
    ChannelSink, Client, ClientConfig, ClientError, ClientEvent, DispatchEnd, MessageSink,
};
use robocar_protocol::{
    ImageFormat, ImuChannel, ImuSample, LaserConfig, LaserScan, MessageType, ProtocolError,
    StereoFrame, TextMessage, Timestamp, UsbFrame, WireMessage,
};
use robocar_stream::{ServerBuilder, ServerConfig};
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const T0: Timestamp = Timestamp::new(1_700_000_000, 0);

/// 接受一个连接，写出给定字节后关闭
fn scripted_server(bytes: Vec<u8>) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&bytes).unwrap();
        stream.flush().unwrap();
    });
    (addr, handle)
}

fn frames(messages: &[WireMessage]) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| m.encode().unwrap().to_vec())
        .collect()
}

fn drain(rx: &crossbeam_channel::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    rx.try_iter().collect()
}

#[test]
fn test_dispatch_routes_every_type_and_skips_bad_frames() {
    let imu = ImuSample::default()
        .with(ImuChannel::AccX, 0.5)
        .with(ImuChannel::AccZ, 1.0)
        .with(ImuChannel::Gyro, 0.1);
    let laser = LaserScan::new(
        LaserConfig::default(),
        vec![1.0, 2.0, 3.0],
        vec![10.0, 20.0, 30.0],
    )
    .unwrap();
    let stereo = StereoFrame::new(2, 2, vec![1u8, 2, 3, 4], vec![5u8, 6, 7, 8]).unwrap();
    let usb_format = ImageFormat::new(4, 2, 3);
    let usb = UsbFrame::new(usb_format, vec![7u8; usb_format.frame_len()]).unwrap();

    let script = frames(&[
        WireMessage::from_raw(9, T0, vec![1u8, 2, 3]),
        TextMessage::new("hello").to_message(T0),
        // 长度字段与负载不一致
        WireMessage::from_raw(u8::from(MessageType::LaserScan), T0, vec![0u8; 5]),
        laser.to_message(T0),
        laser.to_message(T0),
        usb.to_message(T0),
        stereo.to_message(T0),
        imu.to_message(T0),
        imu.to_message(T0.offset(Duration::from_secs(1))),
        // 乱序样本
        imu.to_message(T0),
    ]);
    let (addr, server) = scripted_server(script);

    let config = ClientConfig {
        usb_format,
        ..ClientConfig::default()
    };
    let mut client = Client::connect_with(addr, config).unwrap();
    let (mut sink, rx) = ChannelSink::new();
    let end = client.run(&mut sink).unwrap();
    server.join().unwrap();

    assert_eq!(end, DispatchEnd::ServerClosed);
    let stats = client.stats();
    assert_eq!(stats.frames, 10);
    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.text, 1);
    assert_eq!(stats.laser_scans, 2);
    assert_eq!(stats.usb_frames, 1);
    assert_eq!(stats.stereo_frames, 1);
    assert_eq!(stats.imu_samples, 3);
    assert_eq!(stats.odometry_reports, 2);
    assert_eq!(stats.rejected_samples, 1);

    let events = drain(&rx);
    assert!(matches!(events[0], ClientEvent::Unknown { tag: 9, size: 3, .. }));
    assert!(matches!(&events[1], ClientEvent::Text { text, .. } if text == "hello"));

    let laser_seqs: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::LaserScan { seq, scan, .. } => {
                assert_eq!(scan, &laser);
                Some(*seq)
            },
            _ => None,
        })
        .collect();
    assert_eq!(laser_seqs, vec![0, 1]);

    let image_ids: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::UsbFrame { frame_id, .. } | ClientEvent::StereoFrame { frame_id, .. } => {
                Some(*frame_id)
            },
            _ => None,
        })
        .collect();
    assert_eq!(image_ids, vec![0, 1]);

    // 1 秒内 x 方向 0.5 g
    let velocity = client.odometer().velocity();
    assert!((velocity.x - 0.5 * 9.8065).abs() < 1e-4, "{:?}", velocity);
    assert!((client.odometer().heading() - 0.1).abs() < 1e-6);
}

#[test]
fn test_truncated_frame_is_fatal() {
    let bytes = TextMessage::new("cut short").to_message(T0).encode().unwrap();
    let (addr, server) = scripted_server(bytes[..bytes.len() - 3].to_vec());

    let mut client = Client::connect(addr).unwrap();
    let (mut sink, _rx) = ChannelSink::new();
    let err = client.run(&mut sink).unwrap_err();
    server.join().unwrap();

    assert!(
        matches!(err, ClientError::Protocol(ProtocolError::TruncatedStream { .. })),
        "{:?}",
        err
    );
}

#[test]
fn test_oversized_frame_is_fatal() {
    let bytes = frames(&[WireMessage::from_raw(1, T0, vec![b'x'; 64])]);
    let (addr, server) = scripted_server(bytes);

    let config = ClientConfig {
        max_payload_size: 16,
        ..ClientConfig::default()
    };
    let mut client = Client::connect_with(addr, config).unwrap();
    let (mut sink, rx) = ChannelSink::new();
    let err = client.run(&mut sink).unwrap_err();
    server.join().unwrap();

    assert!(matches!(
        err,
        ClientError::Protocol(ProtocolError::OversizedPayload {
            declared: 64,
            max: 16
        })
    ));
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_connect_refused() {
    // 绑定后立即释放，端口上没有监听者
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let err = Client::connect(addr).unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }), "{:?}", err);
}

#[test]
fn test_end_to_end_text_only_server() {
    let mut config = ServerConfig::text_only();
    config.network.bind_address = "127.0.0.1".parse().unwrap();
    config.network.port = 0;
    config.text.message = "robocar says hi".to_string();
    config.text.interval_ms = 200;

    let mut server = ServerBuilder::new().config(config).build().unwrap();
    let addr = server.local_addr();
    let server_shutdown = server.shutdown_handle();
    let server_thread = thread::spawn(move || server.run());

    let mut client = Client::connect(addr).unwrap();
    let client_shutdown = client.shutdown_handle().unwrap();
    let (mut sink, rx) = ChannelSink::new();
    let client_thread = thread::spawn(move || client.run(&mut sink));

    let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    match event {
        ClientEvent::Text { text, .. } => assert_eq!(text, "robocar says hi"),
        other => panic!("unexpected event {:?}", other),
    }

    client_shutdown.shutdown();
    assert!(client_shutdown.is_shutdown());
    assert_eq!(client_thread.join().unwrap().unwrap(), DispatchEnd::Shutdown);

    server_shutdown.shutdown();
    server_thread.join().unwrap().unwrap();
}

#[test]
fn test_custom_sink_receives_odometry() {
    #[derive(Default)]
    struct OdometryOnly {
        headings: Vec<f64>,
    }

    impl MessageSink for OdometryOnly {
        fn on_odometry(&mut self, report: robocar_client::OdometryReport) {
            self.headings.push(report.heading());
        }
    }

    let gyro = ImuSample::default().with(ImuChannel::Gyro, 0.25);
    let script = frames(&[
        gyro.to_message(T0),
        gyro.to_message(T0.offset(Duration::from_secs(1))),
        gyro.to_message(T0.offset(Duration::from_secs(2))),
    ]);
    let (addr, server) = scripted_server(script);

    let mut client = Client::connect(addr).unwrap();
    let mut sink = OdometryOnly::default();
    client.run(&mut sink).unwrap();
    server.join().unwrap();

    assert_eq!(sink.headings.len(), 3);
    assert!(sink.headings[0].abs() < 1e-9);
    assert!((sink.headings[1] - 0.25).abs() < 1e-6);
    assert!((sink.headings[2] - 0.5).abs() < 1e-6);
}

#[test]
fn test_extreme_imu_timestamps_do_not_stop_dispatch() {
    let sample = ImuSample::default().with(ImuChannel::Gyro, 0.1);
    let script = frames(&[
        sample.to_message(Timestamp::new(i64::MIN / 2, 0)),
        sample.to_message(Timestamp::new(i64::MAX / 2, 0)),
        ImuSample::default()
            .with(ImuChannel::Gyro, f32::NAN)
            .to_message(Timestamp::new(i64::MIN / 2, 1)),
        TextMessage::new("still here").to_message(T0),
    ]);
    let (addr, server) = scripted_server(script);

    let mut client = Client::connect(addr).unwrap();
    let (mut sink, rx) = ChannelSink::new();
    let end = client.run(&mut sink).unwrap();
    server.join().unwrap();

    assert_eq!(end, DispatchEnd::ServerClosed);
    let stats = client.stats();
    assert_eq!(stats.imu_samples, 3);
    assert_eq!(stats.rejected_samples, 2);
    assert_eq!(stats.odometry_reports, 1);
    assert!(client.odometer().heading().is_finite());
    assert!(
        drain(&rx)
            .iter()
            .any(|e| matches!(e, ClientEvent::Text { text, .. } if text == "still here"))
    );
}
