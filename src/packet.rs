//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT 3.1.1 control packets used by the node and the
//! traits for encoding them into and decoding them from a byte buffer.
//!
//! The client only ever *sends* CONNECT, PUBLISH, PUBACK, SUBSCRIBE, UNSUBSCRIBE,
//! PINGREQ and DISCONNECT, and only ever *receives* CONNACK, PUBLISH, PUBACK,
//! SUBACK, UNSUBACK and PINGRESP, so each packet implements just the direction it
//! travels in.

use crate::error::{MqttError, ProtocolError};
use crate::util::{
    self, CodecResult, RESERVED_HEADER, finish_packet, read_u16, read_utf8_string, write_bytes,
    write_utf8_string,
};

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> CodecResult<Self> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Writes the whole packet to the start of `buf` and returns its length.
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize>;
}

/// A trait for packets that can be decoded from a byte buffer.
///
/// `buf` holds exactly one framed packet, fixed header included.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> CodecResult<Self>;
}

/// Every packet a broker may send to this client.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    SubAck(SubAck),
    UnsubAck(UnsubAck),
    PingResp,
}

/// Decodes one framed packet received from the broker.
pub fn decode(buf: &[u8]) -> CodecResult<MqttPacket<'_>> {
    let first = *buf
        .first()
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(PubAck::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        11 => MqttPacket::UnsubAck(UnsubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                packet_type,
            )));
        }
    };
    Ok(packet)
}

/// Skips the fixed header and returns `(body_start, body_end)`.
fn body_bounds(buf: &[u8]) -> CodecResult<(usize, usize)> {
    let mut cursor = 1;
    let remaining = util::read_variable_byte_integer(&mut cursor, buf)?;
    let end = cursor + remaining;
    if end > buf.len() {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    Ok((cursor, end))
}

/// Decodes the body of an acknowledgement that only carries a packet identifier.
fn decode_packet_id(buf: &[u8]) -> CodecResult<u16> {
    let (mut cursor, end) = body_bounds(buf)?;
    read_u16(&mut cursor, &buf[..end])
}

fn encode_packet_id(buf: &mut [u8], header: u8, packet_id: u16) -> CodecResult<usize> {
    let bytes = packet_id.to_be_bytes();
    let packet = [header, 0x02, bytes[0], bytes[1]];
    let mut cursor = 0;
    write_bytes(&mut cursor, buf, &packet)?;
    Ok(cursor)
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a str) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut cursor = RESERVED_HEADER;
        write_utf8_string(&mut cursor, buf, "MQTT")?;
        // Protocol level 4 is MQTT 3.1.1.
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        write_bytes(&mut cursor, buf, &[4, flags])?;
        write_bytes(&mut cursor, buf, &self.keep_alive.to_be_bytes())?;
        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(username) = self.username {
            write_utf8_string(&mut cursor, buf, username)?;
        }
        if let Some(password) = self.password {
            write_utf8_string(&mut cursor, buf, password)?;
        }
        finish_packet(buf, 0x10, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> CodecResult<Self> {
        let (cursor, end) = body_bounds(buf)?;
        match buf.get(cursor..end) {
            Some(&[flags, return_code]) => Ok(Self {
                session_present: (flags & 0x01) != 0,
                return_code,
            }),
            _ => Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        }
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> CodecResult<Self> {
        let (mut cursor, end) = body_bounds(buf)?;
        let flags = buf[0] & 0x0F;
        let qos = QoS::from_bits((flags >> 1) & 0x03)?;
        let retain = (flags & 0x01) != 0;

        let buf = &buf[..end];
        let topic = read_utf8_string(&mut cursor, buf)?;

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, buf)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain,
            payload: &buf[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut header = 0x30 | ((self.qos as u8) << 1);
        if self.retain {
            header |= 0x01;
        }

        let mut cursor = RESERVED_HEADER;
        write_utf8_string(&mut cursor, buf, self.topic)?;

        // Packet ID (only for QoS > 0)
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
            write_bytes(&mut cursor, buf, &id.to_be_bytes())?;
        }

        write_bytes(&mut cursor, buf, self.payload)?;
        finish_packet(buf, header, cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl DecodePacket<'_> for PubAck {
    fn decode(buf: &[u8]) -> CodecResult<Self> {
        Ok(Self {
            packet_id: decode_packet_id(buf)?,
        })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        encode_packet_id(buf, 0x40, self.packet_id)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub qos: QoS,
}

impl<'a> Subscribe<'a> {
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        Self {
            packet_id,
            topic,
            qos,
        }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut cursor = RESERVED_HEADER;
        write_bytes(&mut cursor, buf, &self.packet_id.to_be_bytes())?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        write_bytes(&mut cursor, buf, &[self.qos as u8])?;
        // SUBSCRIBE has fixed header flags 0b0010.
        finish_packet(buf, 0x82, cursor)
    }
}

// --- SUBACK Packet ---
/// SUBACK for a single-topic SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    /// Granted QoS, or `0x80` when the broker refused the subscription.
    pub return_code: u8,
}

impl SubAck {
    pub fn is_success(&self) -> bool {
        self.return_code != 0x80
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(buf: &[u8]) -> CodecResult<Self> {
        let (mut cursor, end) = body_bounds(buf)?;
        let buf = &buf[..end];
        let packet_id = read_u16(&mut cursor, buf)?;
        let return_code = *buf
            .get(cursor)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        Ok(Self {
            packet_id,
            return_code,
        })
    }
}

// --- UNSUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Unsubscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
}

impl EncodePacket for Unsubscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut cursor = RESERVED_HEADER;
        write_bytes(&mut cursor, buf, &self.packet_id.to_be_bytes())?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        finish_packet(buf, 0xA2, cursor)
    }
}

// --- UNSUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
}

impl DecodePacket<'_> for UnsubAck {
    fn decode(buf: &[u8]) -> CodecResult<Self> {
        Ok(Self {
            packet_id: decode_packet_id(buf)?,
        })
    }
}

// --- PINGREQ Packet ---
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut cursor = 0;
        write_bytes(&mut cursor, buf, &[0xC0, 0x00])?;
        Ok(cursor)
    }
}

// --- DISCONNECT Packet ---
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let mut cursor = 0;
        write_bytes(&mut cursor, buf, &[0xE0, 0x00])?;
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_without_credentials() {
        let mut buf = [0u8; 64];
        let len = Connect::new("pico_client", 0, true).encode(&mut buf).unwrap();
        let expected: &[u8] = &[
            0x10, 23, 0x00, 0x04, b'M', b'Q', b'T', b'T', 4, 0x02, 0x00, 0x00, 0x00, 11, b'p',
            b'i', b'c', b'o', b'_', b'c', b'l', b'i', b'e', b'n', b't',
        ];
        assert_eq!(&buf[..len], expected);
    }

    #[test]
    fn connect_with_credentials_sets_flags() {
        let mut buf = [0u8; 64];
        let len = Connect::new("c", 30, true)
            .with_credentials("u", "p")
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf[9], 0xC2);
        assert_eq!(&buf[10..12], &30u16.to_be_bytes());
        assert_eq!(&buf[len - 6..len], &[0, 1, b'u', 0, 1, b'p']);
    }

    #[test]
    fn publish_qos1_layout() {
        let mut buf = [0u8; 64];
        let len = Publish {
            topic: "/light_sensor",
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: b"300",
            packet_id: Some(7),
        }
        .encode(&mut buf)
        .unwrap();
        assert_eq!(buf[0], 0x32);
        assert_eq!(buf[1] as usize, len - 2);
        assert_eq!(&buf[2..4], &[0, 13]);
        assert_eq!(&buf[17..19], &[0, 7]);
        assert_eq!(&buf[19..len], b"300");
    }

    #[test]
    fn publish_qos1_without_id_is_rejected() {
        let mut buf = [0u8; 64];
        let err = Publish {
            topic: "t",
            qos: QoS::AtLeastOnce,
            retain: true,
            payload: b"",
            packet_id: None,
        }
        .encode(&mut buf);
        assert!(matches!(err, Err(MqttError::Protocol(ProtocolError::MalformedPacket))));
    }

    #[test]
    fn publish_into_small_buffer_fails() {
        let mut buf = [0u8; 12];
        let err = Publish {
            topic: "/light_sensor",
            qos: QoS::AtMostOnce,
            retain: false,
            payload: b"65535",
            packet_id: None,
        }
        .encode(&mut buf);
        assert!(matches!(err, Err(MqttError::BufferTooSmall)));
    }

    #[test]
    fn decode_inbound_publish() {
        let frame = [0x33, 0x0A, 0x00, 0x06, b'/', b'l', b'i', b'g', b'h', b't', 0x00, 0x2A];
        // Remaining length 10 covers topic and id, payload empty.
        match decode(&frame).unwrap() {
            MqttPacket::Publish(p) => {
                assert_eq!(p.topic, "/light");
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert!(p.retain);
                assert_eq!(p.packet_id, Some(42));
                assert!(p.payload.is_empty());
            }
            other => panic!("unexpected packet {other:?}"),
        }

        let frame = [0x30, 0x0A, 0x00, 0x06, b'/', b'l', b'i', b'g', b'h', b't', b'O', b'n'];
        match decode(&frame).unwrap() {
            MqttPacket::Publish(p) => {
                assert_eq!(p.packet_id, None);
                assert_eq!(p.payload, b"On");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decode_acks() {
        assert!(matches!(
            decode(&[0x20, 0x02, 0x00, 0x05]).unwrap(),
            MqttPacket::ConnAck(ConnAck { session_present: false, return_code: 5 })
        ));
        assert!(matches!(
            decode(&[0x40, 0x02, 0x01, 0x02]).unwrap(),
            MqttPacket::PubAck(PubAck { packet_id: 0x0102 })
        ));
        match decode(&[0x90, 0x03, 0x00, 0x03, 0x80]).unwrap() {
            MqttPacket::SubAck(ack) => {
                assert_eq!(ack.packet_id, 3);
                assert!(!ack.is_success());
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert!(matches!(
            decode(&[0xB0, 0x02, 0x00, 0x09]).unwrap(),
            MqttPacket::UnsubAck(UnsubAck { packet_id: 9 })
        ));
        assert!(matches!(decode(&[0xD0, 0x00]).unwrap(), MqttPacket::PingResp));
    }

    #[test]
    fn decode_rejects_unknown_and_truncated() {
        assert!(matches!(
            decode(&[0xF0, 0x00]),
            Err(MqttError::Protocol(ProtocolError::InvalidPacketType(15)))
        ));
        assert!(matches!(
            decode(&[0x20, 0x01, 0x00]),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        ));
        assert!(matches!(
            decode(&[0x20, 0x02, 0x00]),
            Err(MqttError::Protocol(ProtocolError::MalformedPacket))
        ));
    }

    #[test]
    fn subscribe_and_unsubscribe_layout() {
        let mut buf = [0u8; 32];
        let len = Subscribe::new(1, "/ping", QoS::AtLeastOnce)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(&buf[..len], &[0x82, 10, 0, 1, 0, 5, b'/', b'p', b'i', b'n', b'g', 1]);

        let len = Unsubscribe {
            packet_id: 2,
            topic: "/ping",
        }
        .encode(&mut buf)
        .unwrap();
        assert_eq!(&buf[..len], &[0xA2, 9, 0, 2, 0, 5, b'/', b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn fixed_size_packets() {
        let mut buf = [0u8; 4];
        assert_eq!(PingReq.encode(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0xC0, 0x00]);
        assert_eq!(Disconnect.encode(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0xE0, 0x00]);
        assert_eq!(PubAck { packet_id: 42 }.encode(&mut buf).unwrap(), 4);
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x2A]);
    }
}
