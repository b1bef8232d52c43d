use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use cwmp::{DeviceId, Inform, ParameterValue};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, UdpSocket},
};

use acs_server::{AcsServer, Device, DeviceStore, PerformanceHandler, memory::{MemoryObjectStore, MemoryStore}};

struct NullHandler {}

#[async_trait]
impl PerformanceHandler for NullHandler {
    async fn handle_measure_values(
        &self,
        _device: Arc<dyn Device>,
        _filename: &str,
        _values: HashMap<String, f64>,
    ) {
    }
}

fn acs(store: Arc<MemoryStore>) -> AcsServer {
    AcsServer::builder(
        store.clone(),
        store,
        Arc::new(NullHandler {}),
        MemoryObjectStore::new(),
    )
    .build()
    .unwrap()
}

async fn device_with_params(
    store: &Arc<MemoryStore>,
    serial_number: &str,
    parameters: &[(&str, String)],
) -> Arc<dyn Device> {
    store.add_product("", "000000", "enb");

    let inform = Inform {
        device_id: DeviceId {
            manufacturer: "Acme".into(),
            oui: "000000".into(),
            product_class: "enb".into(),
            serial_number: serial_number.into(),
        },
        parameter_list: parameters
            .iter()
            .map(|(name, value)| ParameterValue::new(*name, value.clone()))
            .collect(),
        ..Default::default()
    };
    store
        .create_device_with_inform("", "000000", "enb", serial_number, &inform)
        .await
        .unwrap()
}

/// Serves exactly one HTTP exchange with a fixed status line.
async fn one_shot_http(status_line: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    port
}

fn verify_signature(datagram: &str, username: &str, password: &str) {
    assert!(datagram.starts_with("GET http://"));
    assert!(datagram.contains("Connection: close\r\n"));

    let query = datagram
        .split_once('?')
        .and_then(|(_, rest)| rest.split_once(' '))
        .map(|(query, _)| query)
        .expect("query string");

    let mut fields: HashMap<&str, &str> = HashMap::new();
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap();
        fields.insert(key, value);
    }
    assert_eq!(fields["un"], username);
    assert_eq!(fields["cn"].len(), 16);

    let mut mac = Hmac::<Sha1>::new_from_slice(password.as_bytes()).unwrap();
    mac.update(
        format!(
            "{}{}{}{}",
            fields["ts"], fields["id"], fields["un"], fields["cn"]
        )
        .as_bytes(),
    );
    let expected: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    assert_eq!(fields["sig"], expected.as_str());
}

#[tokio::test]
async fn wake_up_succeeds_over_http_without_touching_udp() {
    let store = MemoryStore::new();
    let port = one_shot_http("HTTP/1.1 200 OK").await;

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let udp_addr = udp.local_addr().unwrap();

    let device = device_with_params(
        &store,
        "CR1",
        &[
            (
                "Device.ManagementServer.ConnectionRequestURL",
                format!("http://127.0.0.1:{port}/cr"),
            ),
            (
                "Device.ManagementServer.ConnectionRequestUsername",
                "acs".to_owned(),
            ),
            (
                "Device.ManagementServer.ConnectionRequestPassword",
                "secret".to_owned(),
            ),
            (
                "Device.ManagementServer.UDPConnectionRequestAddress",
                udp_addr.to_string(),
            ),
            ("Device.ManagementServer.NATDetected", "1".to_owned()),
        ],
    )
    .await;

    acs(store).send_connection_request(&device).await.unwrap();

    // HTTP success means no UDP fallback.
    let mut buf = [0u8; 1024];
    let received = tokio::time::timeout(Duration::from_millis(300), udp.recv_from(&mut buf)).await;
    assert!(received.is_err(), "unexpected UDP datagram");
}

#[tokio::test]
async fn wake_up_falls_back_to_three_signed_datagrams() {
    let store = MemoryStore::new();
    let port = one_shot_http("HTTP/1.1 500 Internal Server Error").await;

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let udp_addr = udp.local_addr().unwrap();

    let device = device_with_params(
        &store,
        "CR2",
        &[
            (
                "Device.ManagementServer.ConnectionRequestURL",
                format!("http://127.0.0.1:{port}/cr"),
            ),
            (
                "Device.ManagementServer.ConnectionRequestUsername",
                "acs".to_owned(),
            ),
            (
                "Device.ManagementServer.ConnectionRequestPassword",
                "secret".to_owned(),
            ),
            (
                "Device.ManagementServer.UDPConnectionRequestAddress",
                udp_addr.to_string(),
            ),
            ("Device.ManagementServer.NATDetected", "1".to_owned()),
        ],
    )
    .await;

    let started = Instant::now();
    acs(store).send_connection_request(&device).await.unwrap();
    // Three datagrams spaced a second apart.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let mut buf = [0u8; 2048];
    for _ in 0..3 {
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), udp.recv_from(&mut buf))
            .await
            .expect("datagram arrives")
            .unwrap();
        let datagram = std::str::from_utf8(&buf[..n]).unwrap();
        verify_signature(datagram, "acs", "secret");
    }
    let extra = tokio::time::timeout(Duration::from_millis(300), udp.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "more than three datagrams");
}

#[tokio::test]
async fn no_udp_address_surfaces_the_http_error() {
    let store = MemoryStore::new();
    let port = one_shot_http("HTTP/1.1 503 Service Unavailable").await;

    let device = device_with_params(
        &store,
        "CR3",
        &[(
            "Device.ManagementServer.ConnectionRequestURL",
            format!("http://127.0.0.1:{port}/cr"),
        )],
    )
    .await;

    let result = acs(store).send_connection_request(&device).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn lan_addresses_are_never_contacted() {
    let store = MemoryStore::new();

    for url in [
        "http://10.1.2.3:7547/cr",
        "http://172.16.9.9/cr",
        "http://192.168.1.1:7547/cr",
    ] {
        let serial = format!("CR-{}", url.len());
        let device = device_with_params(
            &store,
            &serial,
            &[(
                "Device.ManagementServer.ConnectionRequestURL",
                url.to_owned(),
            )],
        )
        .await;

        let started = Instant::now();
        let result = acs(store.clone()).send_connection_request(&device).await;
        assert!(result.is_ok(), "{url} should be skipped");
        // A real connection attempt would eat the 2 s connect timeout.
        assert!(started.elapsed() < Duration::from_secs(1), "{url} was contacted");
    }
}
