use std::{
    net::{Ipv4Addr, UdpSocket},
    sync::Arc,
    thread,
    time::Duration,
};

use udpq_pacer::{ExplicitSocket, Manager};

fn receiver() -> UdpSocket {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    socket
}

#[test]
fn process_sends_over_default_sockets() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(20, Duration::from_millis(5), 4096).unwrap());
    let receiver = receiver();
    let destination = receiver.local_addr().unwrap();

    let dispatcher = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.process())
    };

    for i in 0..3u8 {
        assert!(manager.enqueue(1, &[i; 32], destination));
    }

    let mut buf = [0u8; 64];
    for i in 0..3u8 {
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[i; 32]);
    }

    manager.release();
    dispatcher.join().unwrap().unwrap();
}

#[test]
fn explicit_socket_is_used_as_source() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(20, Duration::from_millis(5), 4096).unwrap());
    let receiver = receiver();
    let destination = receiver.local_addr().unwrap();

    let explicit = ExplicitSocket::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap());
    let source = explicit.socket().local_addr().unwrap();

    let dispatcher = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.process())
    };

    assert!(manager.enqueue_with_explicit_transport(1, b"explicit", destination, explicit));

    let mut buf = [0u8; 64];
    let (n, from) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"explicit");
    assert_eq!(from, source);

    manager.release();
    dispatcher.join().unwrap().unwrap();
}
