//! IPv4 parsing, checksum computation, and in-place NAT rewriting. Shared by
//! the pipeline's "Core" forward branch and the downlink receiver (C7), which
//! both need to translate an inner IPv4 datagram's address/port and keep its
//! checksums valid.

use std::net::Ipv4Addr;

use crate::rules::IpProtocol;

pub struct Ipv4View {
    pub header_len: usize,
    pub total_len: usize,
    pub protocol: IpProtocol,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Parses just enough of an IPv4 header to classify and NAT the packet.
/// Returns `None` on anything that isn't a plausible IPv4 datagram.
pub fn parse_ipv4(pkt: &[u8]) -> Option<Ipv4View> {
    if pkt.len() < 20 {
        return None;
    }
    if pkt[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((pkt[0] & 0x0f) as usize) * 4;
    if header_len < 20 || pkt.len() < header_len {
        return None;
    }
    let total_len = u16::from_be_bytes([pkt[2], pkt[3]]) as usize;
    if total_len > pkt.len() {
        return None;
    }
    Some(Ipv4View {
        header_len,
        total_len,
        protocol: IpProtocol::from(pkt[9]),
        src: Ipv4Addr::new(pkt[12], pkt[13], pkt[14], pkt[15]),
        dst: Ipv4Addr::new(pkt[16], pkt[17], pkt[18], pkt[19]),
    })
}

/// Extracts the field NAT keys on: source/destination port for TCP/UDP, the
/// ICMP echo identifier otherwise (the conventional NAT substitute for a
/// port when translating ICMP echo traffic).
pub fn transport_key(pkt: &[u8], view: &Ipv4View, want_source: bool) -> Option<u16> {
    let l4 = &pkt[view.header_len..];
    match view.protocol {
        IpProtocol::Tcp | IpProtocol::Udp => {
            if l4.len() < 4 {
                return None;
            }
            Some(if want_source {
                u16::from_be_bytes([l4[0], l4[1]])
            } else {
                u16::from_be_bytes([l4[2], l4[3]])
            })
        }
        IpProtocol::Icmp => {
            if l4.len() < 8 || (l4[0] != 0 && l4[0] != 8) {
                return None;
            }
            Some(u16::from_be_bytes([l4[4], l4[5]]))
        }
        IpProtocol::Other(_) => None,
    }
}

fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Rewrites `pkt`'s source or destination IPv4 address and the matching
/// TCP/UDP port, then recomputes the IP header checksum and (for TCP/UDP)
/// the transport checksum from scratch. ICMP echo messages only need the IP
/// header checksum redone: the ICMP checksum covers the ICMP message itself,
/// which the address rewrite doesn't touch.
pub fn rewrite_nat(pkt: &mut [u8], view: &Ipv4View, new_addr: Ipv4Addr, new_port: u16, rewrite_source: bool) {
    let addr_offset = if rewrite_source { 12 } else { 16 };
    pkt[addr_offset..addr_offset + 4].copy_from_slice(&new_addr.octets());

    let header_len = view.header_len;
    pkt[10] = 0;
    pkt[11] = 0;
    let checksum = internet_checksum(&pkt[..header_len]);
    pkt[10..12].copy_from_slice(&checksum.to_be_bytes());

    match view.protocol {
        IpProtocol::Tcp | IpProtocol::Udp => {
            let port_offset = header_len + if rewrite_source { 0 } else { 2 };
            pkt[port_offset..port_offset + 2].copy_from_slice(&new_port.to_be_bytes());
            rewrite_transport_checksum(pkt, view);
        }
        IpProtocol::Icmp | IpProtocol::Other(_) => {}
    }
}

fn rewrite_transport_checksum(pkt: &mut [u8], view: &Ipv4View) {
    let header_len = view.header_len;
    let l4_len = view.total_len - header_len;
    let checksum_offset = match view.protocol {
        IpProtocol::Tcp => header_len + 16,
        IpProtocol::Udp => header_len + 6,
        _ => return,
    };
    pkt[checksum_offset] = 0;
    pkt[checksum_offset + 1] = 0;

    let src = Ipv4Addr::new(pkt[12], pkt[13], pkt[14], pkt[15]);
    let dst = Ipv4Addr::new(pkt[16], pkt[17], pkt[18], pkt[19]);
    let proto = match view.protocol {
        IpProtocol::Tcp => 6u8,
        IpProtocol::Udp => 17u8,
        _ => return,
    };

    let mut pseudo = Vec::with_capacity(12 + l4_len);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.push(0);
    pseudo.push(proto);
    pseudo.extend_from_slice(&(l4_len as u16).to_be_bytes());
    pseudo.extend_from_slice(&pkt[header_len..header_len + l4_len]);

    let checksum = internet_checksum(&pseudo);
    pkt[checksum_offset..checksum_offset + 2].copy_from_slice(&checksum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_udp_packet(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + payload.len();
        let total_len = 20 + udp_len;
        let mut pkt = vec![0u8; total_len];
        pkt[0] = 0x45;
        pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        pkt[8] = 64;
        pkt[9] = 17;
        pkt[12..16].copy_from_slice(&src.octets());
        pkt[16..20].copy_from_slice(&dst.octets());
        pkt[20..22].copy_from_slice(&src_port.to_be_bytes());
        pkt[22..24].copy_from_slice(&dst_port.to_be_bytes());
        pkt[24..26].copy_from_slice(&(udp_len as u16).to_be_bytes());
        pkt[28..].copy_from_slice(payload);

        let checksum = internet_checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&checksum.to_be_bytes());
        pkt
    }

    #[test]
    fn parses_basic_udp_datagram() {
        let pkt = build_udp_packet(
            Ipv4Addr::new(10, 60, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            40000,
            53,
            b"hello",
        );
        let view = parse_ipv4(&pkt).unwrap();
        assert_eq!(view.protocol, IpProtocol::Udp);
        assert_eq!(view.src, Ipv4Addr::new(10, 60, 0, 1));
        assert_eq!(transport_key(&pkt, &view, true), Some(40000));
        assert_eq!(transport_key(&pkt, &view, false), Some(53));
    }

    #[test]
    fn rewrite_nat_updates_source_and_checksums_stay_valid() {
        let mut pkt = build_udp_packet(
            Ipv4Addr::new(10, 60, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            40000,
            53,
            b"hello",
        );
        let view = parse_ipv4(&pkt).unwrap();
        rewrite_nat(&mut pkt, &view, Ipv4Addr::new(10, 45, 0, 1), 11000, true);

        let view2 = parse_ipv4(&pkt).unwrap();
        assert_eq!(view2.src, Ipv4Addr::new(10, 45, 0, 1));
        assert_eq!(transport_key(&pkt, &view2, true), Some(11000));

        assert_eq!(internet_checksum(&pkt[..20]), 0);

        let l4_len = view2.total_len - view2.header_len;
        let mut pseudo = Vec::new();
        pseudo.extend_from_slice(&view2.src.octets());
        pseudo.extend_from_slice(&view2.dst.octets());
        pseudo.push(0);
        pseudo.push(17);
        pseudo.extend_from_slice(&(l4_len as u16).to_be_bytes());
        pseudo.extend_from_slice(&pkt[view2.header_len..view2.header_len + l4_len]);
        assert_eq!(internet_checksum(&pseudo), 0);
    }
}
