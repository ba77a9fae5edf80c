use super::*;

use crate::Error;
use crate::Result;

pub const PACKET_HEADER_SIZE: usize = 1 + 4;
pub const FRAME_HEADER_SIZE: usize = 1;
pub const ACK_FRAME_SIZE: usize = 4 + 4;
pub const STREAM_FRAME_HEADER_SIZE: usize = 4 + 8 + 2 + 1;

/// Bytes preceding the payload of a stream frame within a datagram.
pub const STREAM_OVERHEAD_SIZE: usize =
    PACKET_HEADER_SIZE + FRAME_HEADER_SIZE + STREAM_FRAME_HEADER_SIZE;

/// Size of a datagram carrying an ack frame.
pub const ACK_PACKET_SIZE: usize = PACKET_HEADER_SIZE + FRAME_HEADER_SIZE + ACK_FRAME_SIZE;

pub const DATAGRAM_SIZE_MAX: usize = 1500;

pub const STREAM_PAYLOAD_SIZE_MAX: usize = DATAGRAM_SIZE_MAX - STREAM_OVERHEAD_SIZE;

const STREAM_PAYLOAD_LEN_MAX: usize = u16::MAX as usize;

const PACKET_TYPE_INITIAL: u8 = 0x01;
const PACKET_TYPE_ONE_RTT: u8 = 0x02;

const FRAME_TYPE_ACK: u8 = 0x01;
const FRAME_TYPE_STREAM: u8 = 0x02;

/// Bounds-checked big-endian reader. Every read either consumes exactly the requested number of
/// bytes or fails without advancing past the end of the buffer.
pub struct Reader<'a> {
    buffer: &'a [u8],
    read_idx: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_idx: 0,
        }
    }

    pub fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.buffer.len() - self.read_idx < len {
            return Err(Error::MalformedPacket(what));
        }

        let bytes = &self.buffer[self.read_idx..self.read_idx + len];
        self.read_idx += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.take(N, what)?);
        Ok(array)
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(u8::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_u64(&mut self, what: &'static str) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array(what)?))
    }
}

/// Big-endian writer. Callers check capacity up front; see [`BlockSerial::write_to`].
pub struct Writer<'a> {
    buffer: &'a mut [u8],
    write_idx: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            write_idx: 0,
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.write_idx
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.write_idx
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining());
        self.buffer[self.write_idx..self.write_idx + bytes.len()].copy_from_slice(bytes);
        self.write_idx += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_slice(&value.to_be_bytes());
    }
}

/// A structure with a fixed-size wire representation.
pub trait BlockSerial: Sized {
    const SIZE: usize;

    fn read(rd: &mut Reader) -> Result<Self>;

    fn write(&self, wr: &mut Writer);

    /// Writes `self` to the front of `buffer`, returning the number of bytes written, or `None`
    /// if `buffer` is too small.
    fn write_to(&self, buffer: &mut [u8]) -> Option<usize> {
        if buffer.len() < Self::SIZE {
            return None;
        }

        let mut wr = Writer::new(buffer);
        self.write(&mut wr);

        debug_assert_eq!(wr.bytes_written(), Self::SIZE);

        Some(Self::SIZE)
    }

    fn read_from(buffer: &[u8]) -> Result<Self> {
        Self::read(&mut Reader::new(buffer))
    }
}

impl BlockSerial for PacketHeader {
    const SIZE: usize = PACKET_HEADER_SIZE;

    fn read(rd: &mut Reader) -> Result<Self> {
        let type_bits = rd.read_u8("truncated packet header")?;
        let packet_number = rd.read_u32("truncated packet header")?;

        let packet_type = match type_bits {
            PACKET_TYPE_INITIAL => PacketType::Initial,
            PACKET_TYPE_ONE_RTT => PacketType::OneRtt,
            _ => return Err(Error::MalformedPacket("unknown packet type")),
        };

        Ok(Self {
            packet_type,
            packet_number,
        })
    }

    fn write(&self, wr: &mut Writer) {
        wr.write_u8(match self.packet_type {
            PacketType::Initial => PACKET_TYPE_INITIAL,
            PacketType::OneRtt => PACKET_TYPE_ONE_RTT,
        });
        wr.write_u32(self.packet_number);
    }
}

impl BlockSerial for FrameHeader {
    const SIZE: usize = FRAME_HEADER_SIZE;

    fn read(rd: &mut Reader) -> Result<Self> {
        let frame_type = match rd.read_u8("truncated frame header")? {
            FRAME_TYPE_ACK => FrameType::Ack,
            FRAME_TYPE_STREAM => FrameType::Stream,
            _ => return Err(Error::MalformedPacket("unknown frame type")),
        };

        Ok(Self { frame_type })
    }

    fn write(&self, wr: &mut Writer) {
        wr.write_u8(match self.frame_type {
            FrameType::Ack => FRAME_TYPE_ACK,
            FrameType::Stream => FRAME_TYPE_STREAM,
        });
    }
}

impl BlockSerial for AckFrame {
    const SIZE: usize = ACK_FRAME_SIZE;

    fn read(rd: &mut Reader) -> Result<Self> {
        let packet_number = rd.read_u32("truncated ack frame")?;
        let window_size = rd.read_u32("truncated ack frame")?;

        Ok(Self {
            packet_number,
            window_size,
        })
    }

    fn write(&self, wr: &mut Writer) {
        wr.write_u32(self.packet_number);
        wr.write_u32(self.window_size);
    }
}

impl StreamFrame {
    /// Size of this frame on the wire, header included.
    pub fn wire_size(&self) -> usize {
        STREAM_FRAME_HEADER_SIZE + self.payload.len()
    }

    pub fn read(rd: &mut Reader) -> Result<Self> {
        let stream_id = rd.read_u32("truncated stream frame")?;
        let offset = rd.read_u64("truncated stream frame")?;
        let length = rd.read_u16("truncated stream frame")? as usize;

        let finished = match rd.read_u8("truncated stream frame")? {
            0x00 => false,
            0x01 => true,
            _ => return Err(Error::MalformedPacket("invalid finished flag")),
        };

        // The declared length must be fully present; trailing bytes are not ours to claim
        let payload = rd.take(length, "truncated stream payload")?;

        Ok(Self {
            stream_id,
            offset,
            finished,
            payload: payload.into(),
        })
    }

    pub fn write(&self, wr: &mut Writer) -> Option<usize> {
        if self.payload.len() > STREAM_PAYLOAD_LEN_MAX || wr.remaining() < self.wire_size() {
            return None;
        }

        wr.write_u32(self.stream_id);
        wr.write_u64(self.offset);
        wr.write_u16(self.payload.len() as u16);
        wr.write_u8(self.finished as u8);
        wr.write_slice(&self.payload);

        Some(self.wire_size())
    }
}

impl Packet {
    /// Size of this packet on the wire.
    pub fn wire_size(&self) -> usize {
        PACKET_HEADER_SIZE
            + FRAME_HEADER_SIZE
            + match &self.frame {
                Frame::Ack(_) => ACK_FRAME_SIZE,
                Frame::Stream(stream) => stream.wire_size(),
            }
    }
}

/// Serializes `packet` into the front of `dst`. Returns the number of bytes written, or `None`
/// if `dst` cannot hold the packet.
pub fn write_packet(dst: &mut [u8], packet: &Packet) -> Option<usize> {
    if dst.len() < packet.wire_size() {
        return None;
    }

    let mut wr = Writer::new(dst);

    packet.header.write(&mut wr);

    FrameHeader {
        frame_type: packet.frame.frame_type(),
    }
    .write(&mut wr);

    match &packet.frame {
        Frame::Ack(ack) => ack.write(&mut wr),
        Frame::Stream(stream) => {
            stream.write(&mut wr)?;
        }
    }

    Some(wr.bytes_written())
}

/// Serializes a `OneRtt` packet carrying `frame` into the front of `dst`, without taking
/// ownership of the frame.
pub fn write_stream_packet(
    dst: &mut [u8],
    packet_number: u32,
    frame: &StreamFrame,
) -> Option<usize> {
    let size = PACKET_HEADER_SIZE + FRAME_HEADER_SIZE + frame.wire_size();

    if dst.len() < size {
        return None;
    }

    let mut wr = Writer::new(dst);

    PacketHeader {
        packet_type: PacketType::OneRtt,
        packet_number,
    }
    .write(&mut wr);

    FrameHeader {
        frame_type: FrameType::Stream,
    }
    .write(&mut wr);

    frame.write(&mut wr)?;

    Some(wr.bytes_written())
}

pub fn encode_packet(packet: &Packet) -> Box<[u8]> {
    let mut buffer = vec![0; packet.wire_size()].into_boxed_slice();
    let size = write_packet(&mut buffer, packet);
    debug_assert_eq!(size, Some(buffer.len()));
    buffer
}

/// Parses a packet header, a frame header, and the frame it announces. Bytes beyond the frame
/// are ignored.
pub fn decode_packet(src: &[u8]) -> Result<Packet> {
    let mut rd = Reader::new(src);

    let header = PacketHeader::read(&mut rd)?;
    let frame_header = FrameHeader::read(&mut rd)?;

    let frame = match frame_header.frame_type {
        FrameType::Ack => Frame::Ack(AckFrame::read(&mut rd)?),
        FrameType::Stream => Frame::Stream(StreamFrame::read(&mut rd)?),
    };

    Ok(Packet { header, frame })
}

/// Largest stream payload which fits a datagram of `datagram_size_max` bytes.
pub fn stream_payload_size_max(datagram_size_max: usize) -> usize {
    datagram_size_max
        .saturating_sub(STREAM_OVERHEAD_SIZE)
        .min(STREAM_PAYLOAD_LEN_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_bytes(size: usize) -> Box<[u8]> {
        (0..size)
            .map(|_| rand::random::<u8>())
            .collect::<Vec<_>>()
            .into_boxed_slice()
    }

    fn stream_packet(packet_number: u32, offset: u64, finished: bool, payload: &[u8]) -> Packet {
        Packet::new(
            PacketType::OneRtt,
            packet_number,
            Frame::Stream(StreamFrame {
                stream_id: 7,
                offset,
                finished,
                payload: payload.into(),
            }),
        )
    }

    #[test]
    fn header_sizes() {
        assert_eq!(PACKET_HEADER_SIZE, 5);
        assert_eq!(FRAME_HEADER_SIZE, 1);
        assert_eq!(ACK_FRAME_SIZE, 8);
        assert_eq!(STREAM_FRAME_HEADER_SIZE, 15);
        assert_eq!(STREAM_PAYLOAD_SIZE_MAX, 1479);
        assert_eq!(stream_payload_size_max(DATAGRAM_SIZE_MAX), 1479);
    }

    #[test]
    fn block_roundtrip() {
        for header in [
            PacketHeader {
                packet_type: PacketType::Initial,
                packet_number: 0,
            },
            PacketHeader {
                packet_type: PacketType::OneRtt,
                packet_number: u32::MAX,
            },
        ] {
            let mut buf = [0; PACKET_HEADER_SIZE];
            assert_eq!(header.write_to(&mut buf), Some(PACKET_HEADER_SIZE));
            assert_eq!(PacketHeader::read_from(&buf).unwrap(), header);
        }

        for frame_type in [FrameType::Ack, FrameType::Stream] {
            let header = FrameHeader { frame_type };
            let mut buf = [0; FRAME_HEADER_SIZE];
            header.write_to(&mut buf);
            assert_eq!(FrameHeader::read_from(&buf).unwrap(), header);
        }

        for (packet_number, window_size) in [(0, 0), (u32::MAX, u32::MAX), (17, 64)] {
            let ack = AckFrame {
                packet_number,
                window_size,
            };
            let mut buf = [0; ACK_FRAME_SIZE];
            ack.write_to(&mut buf);
            assert_eq!(AckFrame::read_from(&buf).unwrap(), ack);
        }
    }

    #[test]
    fn packet_roundtrip() {
        let packets = [
            stream_packet(2, 0, false, &random_bytes(STREAM_PAYLOAD_SIZE_MAX)),
            stream_packet(3, u64::MAX - 10, true, &random_bytes(10)),
            // Empty final frame
            stream_packet(4, 0, true, &[]),
            Packet::new(
                PacketType::Initial,
                0,
                Frame::Ack(AckFrame {
                    packet_number: 0,
                    window_size: 64,
                }),
            ),
        ];

        for packet in packets.iter() {
            let bytes = encode_packet(packet);
            assert_eq!(bytes.len(), packet.wire_size());
            assert!(bytes.len() <= DATAGRAM_SIZE_MAX);
            assert_eq!(&decode_packet(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let bytes = encode_packet(&stream_packet(0x0102_0304, 0x0A0B, true, b"xy"));

        assert_eq!(
            &bytes[..],
            &[
                0x02, 0x01, 0x02, 0x03, 0x04, // packet header
                0x02, // frame header
                0x00, 0x00, 0x00, 0x07, // stream id
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x0B, // offset
                0x00, 0x02, // length
                0x01, // finished
                b'x', b'y',
            ]
        );
    }

    #[test]
    fn truncated_buffers_are_malformed() {
        let bytes = encode_packet(&stream_packet(9, 100, false, b"hello"));

        for len in 0..bytes.len() {
            assert!(matches!(
                decode_packet(&bytes[..len]),
                Err(Error::MalformedPacket(_))
            ));
        }

        let ack = encode_packet(&Packet::new(
            PacketType::OneRtt,
            1,
            Frame::Ack(AckFrame {
                packet_number: 5,
                window_size: 5,
            }),
        ));

        for len in 0..ack.len() {
            assert!(decode_packet(&ack[..len]).is_err());
        }

        assert!(AckFrame::read_from(&[0; ACK_FRAME_SIZE - 1]).is_err());
    }

    #[test]
    fn unknown_tags_are_malformed() {
        let mut bytes = encode_packet(&stream_packet(1, 0, true, b"a")).into_vec();

        bytes[0] = 0x7F;
        assert!(matches!(
            decode_packet(&bytes),
            Err(Error::MalformedPacket("unknown packet type"))
        ));

        bytes[0] = PACKET_TYPE_ONE_RTT;
        bytes[PACKET_HEADER_SIZE] = 0x00;
        assert!(matches!(
            decode_packet(&bytes),
            Err(Error::MalformedPacket("unknown frame type"))
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let packet = stream_packet(11, 0, false, b"abc");
        let mut bytes = encode_packet(&packet).into_vec();
        bytes.extend_from_slice(b"garbage");

        assert_eq!(decode_packet(&bytes).unwrap(), packet);
    }

    #[test]
    fn stream_packet_writer_matches_encoder() {
        let packet = stream_packet(42, 1479, true, &random_bytes(300));
        let frame = match &packet.frame {
            Frame::Stream(frame) => frame.clone(),
            Frame::Ack(_) => unreachable!(),
        };

        let mut buf = [0; DATAGRAM_SIZE_MAX];
        let size = write_stream_packet(&mut buf, 42, &frame).unwrap();

        assert_eq!(&buf[..size], &encode_packet(&packet)[..]);
        assert_eq!(write_stream_packet(&mut buf[..size - 1], 42, &frame), None);
    }

    #[test]
    fn write_into_small_buffer_fails() {
        let packet = stream_packet(1, 0, true, &random_bytes(100));
        let mut buf = [0; 64];
        assert_eq!(write_packet(&mut buf, &packet), None);
        assert_eq!(AckFrame { packet_number: 0, window_size: 0 }.write_to(&mut buf[..4]), None);
    }
}
