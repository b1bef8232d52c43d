//! Out-of-band wake-ups: an authenticated HTTP GET against the CPE's
//! connection-request URL, falling back to signed UDP datagrams for
//! devices behind NAT.

use std::{fmt::Write, net::IpAddr, sync::Arc};

use hmac::{Hmac, Mac};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use sha1::Sha1;
use time::OffsetDateTime;
use tokio::net::UdpSocket;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::{AcsServer, Device, Error};

const CONNECTION_REQUEST_URL: &str = "Device.ManagementServer.ConnectionRequestURL";
const CONNECTION_REQUEST_USERNAME: &str = "Device.ManagementServer.ConnectionRequestUsername";
const CONNECTION_REQUEST_PASSWORD: &str = "Device.ManagementServer.ConnectionRequestPassword";
const UDP_CONNECTION_REQUEST_ADDRESS: &str = "Device.ManagementServer.UDPConnectionRequestAddress";
const NAT_DETECTED: &str = "Device.ManagementServer.NATDetected";

const UDP_ATTEMPTS: usize = 3;

impl AcsServer {
    /// Asks a CPE to open a session now. HTTP is tried first unless the
    /// URL points into RFC 1918 space; on failure, a NATed device with a
    /// UDP address gets three signed datagrams a second apart. The HTTP
    /// error is surfaced only when the UDP path is not applicable.
    pub async fn send_connection_request(&self, device: &Arc<dyn Device>) -> Result<(), Error> {
        let url = device.parameter_value_or_default(CONNECTION_REQUEST_URL);
        let username = device.parameter_value_or_default(CONNECTION_REQUEST_USERNAME);
        let password = device.parameter_value_or_default(CONNECTION_REQUEST_PASSWORD);
        let udp_address = device.parameter_value_or_default(UDP_CONNECTION_REQUEST_ADDRESS);
        let nat_detected = device.parameter_value_or_default(NAT_DETECTED);

        let mut http_error = None;
        if !url.is_empty() {
            match self.send_http_connection_request(&url, &username, &password).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(error) => {
                    warn!(%error, url, "http connection request");
                    http_error = Some(error);
                }
            }
        }

        if nat_detected == "1" && !udp_address.is_empty() {
            for attempt in 0..UDP_ATTEMPTS {
                if let Err(error) =
                    send_udp_connection_request(&udp_address, &username, &password).await
                {
                    warn!(%error, address = udp_address, "udp connection request");
                }
                if attempt + 1 < UDP_ATTEMPTS {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
            return Ok(());
        }

        match http_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Returns `Ok(true)` when the CPE acknowledged the request, `Ok(false)`
    /// when it was skipped because the target is unreachable LAN space.
    async fn send_http_connection_request(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<bool, Error> {
        if self.is_lan_address(url).await {
            debug!(url, "connection request target is in LAN space, skipping");
            return Ok(false);
        }

        let response = self
            .http()
            .get(url)
            .basic_auth(username, Some(password))
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 204 => Ok(true),
            status => Err(Error::ConnectionRequestStatus(status)),
        }
    }

    /// Whether the URL's host lives in RFC 1918 space and is therefore
    /// unreachable from the ACS side.
    async fn is_lan_address(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host() else {
            return false;
        };

        match host {
            Host::Ipv4(ip) => is_rfc1918(ip),
            Host::Ipv6(_) => false,
            Host::Domain(domain) => {
                let port = parsed.port_or_known_default().unwrap_or(80);
                match tokio::net::lookup_host((domain, port)).await {
                    Ok(mut addresses) => addresses
                        .any(|address| matches!(address.ip(), IpAddr::V4(ip) if is_rfc1918(ip))),
                    Err(error) => {
                        warn!(%error, domain, "resolve connection request host");
                        // Unresolvable hosts default to "not LAN" so the
                        // request is still attempted; flip with
                        // `lan_check_fail_open(false)`.
                        !self.lan_check_fail_open()
                    }
                }
            }
        }
    }
}

fn is_rfc1918(ip: std::net::Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

fn cnonce(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// `lowercase-hex(HMAC-SHA1(password, ts ∥ id ∥ un ∥ cn))`.
fn signature(
    timestamp: i64,
    message_id: &str,
    username: &str,
    cnonce: &str,
    password: &str,
) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(password.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{timestamp}{message_id}{username}{cnonce}").as_bytes());

    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn udp_request_payload(addr: &str, username: &str, password: &str) -> String {
    let now = OffsetDateTime::now_utc();
    let timestamp = now.unix_timestamp();
    let message_id = now.unix_timestamp_nanos().to_string();
    let cnonce = cnonce(16);
    let signature = signature(timestamp, &message_id, username, &cnonce, password);

    format!(
        "GET http://{addr}?ts={timestamp}&id={message_id}&un={username}&cn={cnonce}&sig={signature} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Connection: close\r\n\
         \r\n"
    )
}

async fn send_udp_connection_request(
    addr: &str,
    username: &str,
    password: &str,
) -> Result<(), Error> {
    let payload = udp_request_payload(addr, username, password);
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(payload.as_bytes(), addr).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signature_matches_reference_hmac() {
        // hex(HMAC-SHA1("secret", "1687850000" + "42" + "acs" + "AAAA"))
        let sig = signature(1_687_850_000, "42", "acs", "AAAA", "secret");
        assert_eq!(sig.len(), 40);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let mut mac = Hmac::<Sha1>::new_from_slice(b"secret").unwrap();
        mac.update(b"1687850000");
        mac.update(b"42");
        mac.update(b"acs");
        mac.update(b"AAAA");
        let expected: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .fold(String::new(), |mut out, byte| {
                let _ = write!(out, "{byte:02x}");
                out
            });
        assert_eq!(sig, expected);
    }

    #[test]
    fn cnonce_is_alphanumeric() {
        let value = cnonce(16);
        assert_eq!(value.len(), 16);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(cnonce(16), cnonce(16));
    }

    #[test]
    fn payload_shape_and_signature_verify() {
        let payload = udp_request_payload("203.0.113.5:7547", "acs", "secret");

        assert!(payload.starts_with("GET http://203.0.113.5:7547?ts="));
        assert!(payload.ends_with("\r\n\r\n"));
        assert!(payload.contains("Host: 203.0.113.5:7547\r\n"));
        assert!(payload.contains("Connection: close\r\n"));

        let query = payload
            .split_once('?')
            .and_then(|(_, rest)| rest.split_once(' '))
            .map(|(query, _)| query)
            .unwrap();
        let mut ts = 0;
        let mut id = String::new();
        let mut un = String::new();
        let mut cn = String::new();
        let mut sig = String::new();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap();
            match key {
                "ts" => ts = value.parse().unwrap(),
                "id" => id = value.to_owned(),
                "un" => un = value.to_owned(),
                "cn" => cn = value.to_owned(),
                "sig" => sig = value.to_owned(),
                _ => panic!("unexpected query key {key}"),
            }
        }
        assert_eq!(un, "acs");
        assert_eq!(cn.len(), 16);
        assert_eq!(sig, signature(ts, &id, &un, &cn, "secret"));
    }

    #[test]
    fn rfc1918_blocks() {
        assert!(is_rfc1918("10.0.0.1".parse().unwrap()));
        assert!(is_rfc1918("172.16.0.1".parse().unwrap()));
        assert!(is_rfc1918("172.31.255.255".parse().unwrap()));
        assert!(is_rfc1918("192.168.1.1".parse().unwrap()));
        assert!(!is_rfc1918("172.32.0.1".parse().unwrap()));
        assert!(!is_rfc1918("8.8.8.8".parse().unwrap()));
        assert!(!is_rfc1918("203.0.113.5".parse().unwrap()));
    }
}
