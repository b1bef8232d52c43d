use std::net::{IpAddr, SocketAddr};

pub(crate) const MAGIC_COOKIE: u32 = 0x2112_A442;

pub(crate) const HEADER_LEN: usize = 20;

const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ATTR_SOFTWARE: u16 = 0x8022;
const ATTR_FINGERPRINT: u16 = 0x8028;
const FINGERPRINT_XOR: u32 = 0x5354_554E;
// attribute header plus the CRC value
const FINGERPRINT_LEN: usize = 8;

/// Checks the STUN framing invariants: minimum size, the two zero bits at
/// the front, the magic cookie and a length field that fits the datagram.
pub(crate) fn is_message(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN || buf[0] & 0xC0 != 0 {
        return false;
    }
    if buf[4..8] != MAGIC_COOKIE.to_be_bytes() {
        return false;
    }
    let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    HEADER_LEN + declared <= buf.len()
}

pub(crate) fn transaction_id(buf: &[u8]) -> [u8; 12] {
    let mut id = [0u8; 12];
    id.copy_from_slice(&buf[8..HEADER_LEN]);
    id
}

fn set_length(out: &mut [u8], length: u16) {
    out[2..4].copy_from_slice(&length.to_be_bytes());
}

fn append_attribute(out: &mut Vec<u8>, kind: u16, value: &[u8]) {
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn append_xor_mapped_address(out: &mut Vec<u8>, peer: SocketAddr, transaction_id: &[u8; 12]) {
    let mut value = Vec::with_capacity(20);
    value.push(0);

    let xor_port = peer.port() ^ (MAGIC_COOKIE >> 16) as u16;
    match peer.ip() {
        IpAddr::V4(ip) => {
            value.push(0x01);
            value.extend_from_slice(&xor_port.to_be_bytes());
            for (octet, mask) in ip.octets().iter().zip(MAGIC_COOKIE.to_be_bytes()) {
                value.push(octet ^ mask);
            }
        }
        IpAddr::V6(ip) => {
            value.push(0x02);
            value.extend_from_slice(&xor_port.to_be_bytes());
            let mut mask = [0u8; 16];
            mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            mask[4..].copy_from_slice(transaction_id);
            for (octet, mask) in ip.octets().iter().zip(mask) {
                value.push(octet ^ mask);
            }
        }
    }

    append_attribute(out, ATTR_XOR_MAPPED_ADDRESS, &value);
}

/// Builds a Binding Success response reflecting the peer address, with a
/// SOFTWARE attribute and a trailing FINGERPRINT.
pub(crate) fn binding_success(
    transaction_id: [u8; 12],
    peer: SocketAddr,
    software: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    out.extend_from_slice(&transaction_id);

    append_attribute(&mut out, ATTR_SOFTWARE, software.as_bytes());
    append_xor_mapped_address(&mut out, peer, &transaction_id);

    // The fingerprint CRC covers the message with the length field already
    // counting the fingerprint attribute itself.
    let total = out.len() - HEADER_LEN + FINGERPRINT_LEN;
    set_length(&mut out, total as u16);
    let crc = crc32fast::hash(&out) ^ FINGERPRINT_XOR;
    append_attribute(&mut out, ATTR_FINGERPRINT, &crc.to_be_bytes());

    out
}

#[cfg(test)]
pub(crate) fn attributes(buf: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let mut out = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + 4 <= buf.len() {
        let kind = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let start = offset + 4;
        out.push((kind, buf[start..start + len].to_vec()));
        offset = start + len.div_ceil(4) * 4;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(transaction_id: [u8; 12]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0001u16.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(&transaction_id);
        buf
    }

    #[test]
    fn framing_checks() {
        assert!(is_message(&request([7; 12])));
        assert!(!is_message(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(!is_message(&[0; 8]));

        let mut wrong_cookie = request([7; 12]);
        wrong_cookie[4] = 0x30;
        assert!(!is_message(&wrong_cookie));

        let mut overlong = request([7; 12]);
        set_length(&mut overlong, 64);
        assert!(!is_message(&overlong));
    }

    #[test]
    fn binding_success_layout() {
        let txid = [3; 12];
        let peer: SocketAddr = "192.0.2.7:49152".parse().unwrap();
        let response = binding_success(txid, peer, "stund");

        assert_eq!(&response[..2], &BINDING_SUCCESS.to_be_bytes());
        assert_eq!(&response[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(transaction_id(&response), txid);
        let declared = u16::from_be_bytes([response[2], response[3]]) as usize;
        assert_eq!(HEADER_LEN + declared, response.len());

        let attrs = attributes(&response);
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0], (ATTR_SOFTWARE, b"stund".to_vec()));

        let (kind, value) = &attrs[1];
        assert_eq!(*kind, ATTR_XOR_MAPPED_ADDRESS);
        assert_eq!(value[1], 0x01);
        let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
        assert_eq!(port, 49152);
        let magic = MAGIC_COOKIE.to_be_bytes();
        let octets: Vec<u8> = value[4..8]
            .iter()
            .zip(magic)
            .map(|(o, m)| o ^ m)
            .collect();
        assert_eq!(octets, vec![192, 0, 2, 7]);
    }

    #[test]
    fn fingerprint_verifies() {
        let response = binding_success([9; 12], "198.51.100.2:3478".parse().unwrap(), "stund");

        let attrs = attributes(&response);
        let (kind, value) = attrs.last().unwrap();
        assert_eq!(*kind, ATTR_FINGERPRINT);

        let covered = &response[..response.len() - FINGERPRINT_LEN];
        let expected = crc32fast::hash(covered) ^ FINGERPRINT_XOR;
        assert_eq!(value.as_slice(), expected.to_be_bytes().as_slice());
    }
}
