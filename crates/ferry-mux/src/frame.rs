//! 复用器线格式。
//!
//! 帧头定长 7 字节：`kind: u8 | stream: u32 BE | length: u16 BE`，载荷
//! 紧随其后。`Open`/`Close` 的 `length` 恒为 0。

use bytes::{BufMut, Bytes, BytesMut};

/// 帧头长度。
pub const HEADER_LENGTH: usize = 7;

/// 单个 `Data` 帧的载荷上限（16 位长度字段决定）。
pub const MAX_DATA_PAYLOAD: usize = u16::MAX as usize;

const KIND_OPEN: u8 = 0;
const KIND_DATA: u8 = 1;
const KIND_CLOSE: u8 = 2;

/// 复用器帧。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// 发起方宣告新流。
    Open { stream: u32 },
    /// 流内数据块。
    Data { stream: u32, payload: Bytes },
    /// 流整体关闭。
    Close { stream: u32 },
}

impl Frame {
    /// 编码到输出缓冲。
    pub fn encode(&self, buffer: &mut BytesMut) {
        match self {
            Frame::Open { stream } => {
                buffer.put_u8(KIND_OPEN);
                buffer.put_u32(*stream);
                buffer.put_u16(0);
            }
            Frame::Data { stream, payload } => {
                debug_assert!(payload.len() <= MAX_DATA_PAYLOAD);
                buffer.put_u8(KIND_DATA);
                buffer.put_u32(*stream);
                buffer.put_u16(payload.len() as u16);
                buffer.extend_from_slice(payload);
            }
            Frame::Close { stream } => {
                buffer.put_u8(KIND_CLOSE);
                buffer.put_u32(*stream);
                buffer.put_u16(0);
            }
        }
    }

    /// 解析帧头，返回 (帧种类构造信息, 载荷长度)。
    pub fn decode_header(header: &[u8; HEADER_LENGTH]) -> Result<(FrameHeader, usize), u8> {
        let stream = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        let length = u16::from_be_bytes([header[5], header[6]]) as usize;
        let kind = match header[0] {
            KIND_OPEN => FrameHeader::Open { stream },
            KIND_DATA => FrameHeader::Data { stream },
            KIND_CLOSE => FrameHeader::Close { stream },
            other => return Err(other),
        };
        Ok((kind, length))
    }
}

/// 解析后的帧头信息。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameHeader {
    /// 新流宣告。
    Open { stream: u32 },
    /// 数据块，载荷随后到达。
    Data { stream: u32 },
    /// 流关闭。
    Close { stream: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_through_header_encoding() {
        for frame in [
            Frame::Open { stream: 1 },
            Frame::Data {
                stream: 7,
                payload: Bytes::from_static(b"abc"),
            },
            Frame::Close { stream: u32::MAX },
        ] {
            let mut buffer = BytesMut::new();
            frame.encode(&mut buffer);
            let mut header = [0u8; HEADER_LENGTH];
            header.copy_from_slice(&buffer[..HEADER_LENGTH]);
            let (decoded, length) = Frame::decode_header(&header).expect("valid header");
            match (&frame, decoded) {
                (Frame::Open { stream }, FrameHeader::Open { stream: got }) => {
                    assert_eq!(*stream, got);
                    assert_eq!(length, 0);
                }
                (Frame::Data { stream, payload }, FrameHeader::Data { stream: got }) => {
                    assert_eq!(*stream, got);
                    assert_eq!(length, payload.len());
                    assert_eq!(&buffer[HEADER_LENGTH..], payload.as_ref());
                }
                (Frame::Close { stream }, FrameHeader::Close { stream: got }) => {
                    assert_eq!(*stream, got);
                    assert_eq!(length, 0);
                }
                (sent, decoded) => panic!("frame kind mismatch: {sent:?} vs {decoded:?}"),
            }
        }
    }

    #[test]
    fn unknown_frame_kind_is_rejected()  {
        let header = [9u8, 0, 0, 0, 1, 0, 0];
        assert_eq!(Frame::decode_header(&header), Err(9));
    }
}
