use crate::command::CommandCode;
use crate::error::ProtocolError;
use crate::wire::{self, Writer};

/// Fixed header size of every control and ack packet.
pub const HEADER_LEN: usize = 24;

/// An ack is a bare header plus the acknowledged counter.
pub const ACK_PACKET_LEN: usize = HEADER_LEN + 4;

/// Hard cap for a control datagram. Anything larger is rejected, never
/// fragmented.
pub const MAX_CONTROL_DATAGRAM: usize = 512;

/// Header field offsets. The broadcast path rewrites these three words per
/// recipient, so they are named rather than implied.
pub const PRIVATE_ID_OFFSET: usize = 4;
pub const PUBLIC_ID_OFFSET: usize = 8;
pub const COUNTER_OFFSET: usize = 12;

const CLASS_CONTROL: u16 = 0xBEF0;
const CLASS_ACK: u16 = 0xBEF1;
const CLASS_VOICE: u16 = 0xBEF4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Control,
    Ack,
    Voice,
}

impl PacketClass {
    pub fn from_wire(raw: u16) -> Result<Self, ProtocolError> {
        match raw {
            CLASS_CONTROL => Ok(Self::Control),
            CLASS_ACK => Ok(Self::Ack),
            CLASS_VOICE => Ok(Self::Voice),
            other => Err(ProtocolError::UnknownClass(other)),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Self::Control => CLASS_CONTROL,
            Self::Ack => CLASS_ACK,
            Self::Voice => CLASS_VOICE,
        }
    }
}

/// The fixed 24-byte packet header.
///
/// Outbound, `private_id`/`public_id` are the *recipient's* ids; inbound they
/// are the sender's. `public_id` is a u16 widened to 32 bits on the wire.
/// The version word at offset 16 is reserved and always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub class: PacketClass,
    pub command: u16,
    pub private_id: u32,
    pub public_id: u32,
    pub counter: u32,
}

/// A classified inbound datagram.
#[derive(Debug)]
pub enum Frame<'a> {
    Control { header: Header, command: CommandCode, payload: &'a [u8] },
    Ack { header: Header, acked: u32 },
    /// Voice data plane; not handled here.
    Voice,
}

/// Validate and classify one datagram: length, class, CRC, command code.
pub fn parse_frame(datagram: &[u8]) -> Result<Frame<'_>, ProtocolError> {
    if datagram.len() > MAX_CONTROL_DATAGRAM {
        return Err(ProtocolError::Oversize(datagram.len()));
    }
    if datagram.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated { expected: HEADER_LEN, got: datagram.len() });
    }

    let raw_class = u16::from_le_bytes([datagram[0], datagram[1]]);
    let class = PacketClass::from_wire(raw_class)?;
    if class == PacketClass::Voice {
        return Ok(Frame::Voice);
    }

    wire::verify_crc(datagram)?;

    let header = Header {
        class,
        command: u16::from_le_bytes([datagram[2], datagram[3]]),
        private_id: u32::from_le_bytes(datagram[4..8].try_into().expect("4 bytes")),
        public_id: u32::from_le_bytes(datagram[8..12].try_into().expect("4 bytes")),
        counter: u32::from_le_bytes(datagram[12..16].try_into().expect("4 bytes")),
    };

    match class {
        PacketClass::Control => {
            let command = CommandCode::from_wire(header.command)?;
            Ok(Frame::Control { header, command, payload: &datagram[HEADER_LEN..] })
        }
        PacketClass::Ack => {
            if datagram.len() < ACK_PACKET_LEN {
                return Err(ProtocolError::Truncated {
                    expected: ACK_PACKET_LEN,
                    got: datagram.len(),
                });
            }
            let acked = u32::from_le_bytes(datagram[24..28].try_into().expect("4 bytes"));
            Ok(Frame::Ack { header, acked })
        }
        PacketClass::Voice => unreachable!("handled above"),
    }
}

/// Build a control packet with the recipient fields (private id, public id,
/// counter) and the CRC left zero. [`personalize`] fills them in per
/// recipient; the payload is shared across all of them.
pub fn control_template(command: CommandCode, payload: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(HEADER_LEN + payload.len());
    w.u16(PacketClass::Control.to_wire());
    w.u16(command.to_wire());
    w.zeroes(4); // private id
    w.zeroes(4); // public id
    w.zeroes(4); // counter
    w.zeroes(4); // protocol version, never populated
    w.zeroes(4); // crc
    let mut buf = w.finish();
    buf.extend_from_slice(payload);
    buf
}

/// Address a template to one recipient and seal it: splice the recipient's
/// ids and next counter, then recompute the CRC.
pub fn personalize(packet: &mut [u8], private_id: u32, public_id: u16, counter: u32) {
    packet[PRIVATE_ID_OFFSET..PRIVATE_ID_OFFSET + 4].copy_from_slice(&private_id.to_le_bytes());
    packet[PUBLIC_ID_OFFSET..PUBLIC_ID_OFFSET + 4]
        .copy_from_slice(&(public_id as u32).to_le_bytes());
    packet[COUNTER_OFFSET..COUNTER_OFFSET + 4].copy_from_slice(&counter.to_le_bytes());
    wire::splice_crc(packet);
}

/// A complete, sealed ack for the given inbound counter. Acks carry no
/// counter of their own and are never retained or retransmitted.
pub fn ack_packet(private_id: u32, public_id: u16, acked: u32) -> Vec<u8> {
    let mut w = Writer::with_capacity(ACK_PACKET_LEN);
    w.u16(PacketClass::Ack.to_wire());
    w.u16(0); // no command
    w.u32(private_id);
    w.u32(public_id as u32);
    w.zeroes(4); // counter
    w.zeroes(4); // protocol version
    w.zeroes(4); // crc
    w.u32(acked);
    let mut buf = w.finish();
    wire::splice_crc(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(command: CommandCode, payload: &[u8]) -> Vec<u8> {
        let mut pkt = control_template(command, payload);
        personalize(&mut pkt, 0xaabb_ccdd, 7, 42);
        pkt
    }

    #[test]
    fn control_roundtrip() {
        let pkt = sealed(CommandCode::Ping, &[]);
        match parse_frame(&pkt).unwrap() {
            Frame::Control { header, command, payload } => {
                assert_eq!(command, CommandCode::Ping);
                assert_eq!(header.private_id, 0xaabb_ccdd);
                assert_eq!(header.public_id, 7);
                assert_eq!(header.counter, 42);
                assert!(payload.is_empty());
            }
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[test]
    fn payload_is_preserved() {
        let pkt = sealed(CommandCode::ChanDelete, &[9, 0, 0, 0]);
        match parse_frame(&pkt).unwrap() {
            Frame::Control { payload, .. } => assert_eq!(payload, &[9, 0, 0, 0]),
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[test]
    fn ack_roundtrip() {
        let pkt = ack_packet(0x1122_3344, 3, 17);
        assert_eq!(pkt.len(), ACK_PACKET_LEN);
        match parse_frame(&pkt).unwrap() {
            Frame::Ack { header, acked } => {
                assert_eq!(header.private_id, 0x1122_3344);
                assert_eq!(header.public_id, 3);
                assert_eq!(acked, 17);
            }
            other => panic!("expected ack frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_short_datagram() {
        assert!(matches!(
            parse_frame(&[0xf0, 0xbe, 0, 0]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_oversize_datagram() {
        let big = vec![0u8; MAX_CONTROL_DATAGRAM + 1];
        assert!(matches!(parse_frame(&big), Err(ProtocolError::Oversize(_))));
    }

    #[test]
    fn rejects_unknown_class() {
        let mut pkt = sealed(CommandCode::Ping, &[]);
        pkt[0] = 0x00;
        pkt[1] = 0x00;
        assert!(matches!(parse_frame(&pkt), Err(ProtocolError::UnknownClass(0))));
    }

    #[test]
    fn rejects_bad_crc() {
        let mut pkt = sealed(CommandCode::Ping, &[]);
        pkt[COUNTER_OFFSET] ^= 0xff;
        assert!(matches!(parse_frame(&pkt), Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_unknown_command() {
        let mut pkt = control_template(CommandCode::Ping, &[]);
        pkt[2] = 0xee;
        pkt[3] = 0xee;
        personalize(&mut pkt, 1, 1, 1);
        assert!(matches!(parse_frame(&pkt), Err(ProtocolError::UnknownCommand(0xeeee))));
    }

    #[test]
    fn voice_class_is_passed_through_unchecked() {
        // voice packets are not CRC'd here; the control core just skips them
        let mut pkt = vec![0u8; 32];
        pkt[0] = 0xf4;
        pkt[1] = 0xbe;
        assert!(matches!(parse_frame(&pkt).unwrap(), Frame::Voice));
    }

    #[test]
    fn short_ack_is_truncated() {
        let mut pkt = ack_packet(1, 1, 1);
        pkt.truncate(HEADER_LEN);
        wire::splice_crc(&mut pkt);
        assert!(matches!(parse_frame(&pkt), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn personalize_rewrites_only_recipient_words() {
        let a = sealed(CommandCode::Ping, &[1, 2, 3]);
        let mut b = control_template(CommandCode::Ping, &[1, 2, 3]);
        personalize(&mut b, 0xdead_beef, 9, 1000);
        // class, command and payload bytes identical across recipients
        assert_eq!(&a[..4], &b[..4]);
        assert_eq!(&a[HEADER_LEN..], &b[HEADER_LEN..]);
    }
}
