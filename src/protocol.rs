//! 와이어 프로토콜
//!
//! 커넥션 하나 = 파일 하나. 모든 정수는 big-endian.
//!
//! | 단계 | 방향 | 인코딩 |
//! |---|---|---|
//! | 핸드셰이크 | 송신 → 수신 | u16 이름 길이 + UTF-8, i64 파일 크기 |
//! | 승인 | 수신 → 송신 | bool 1바이트 (수락/거부) |
//! | go-ahead | 수신 → 송신 | bool 1바이트, flow_control 시 청크마다 |
//! | 청크 | 송신 → 수신 | bool false + i32 길이 + 페이로드 |
//! | EOF | 송신 → 수신 | bool true |
//! | 마무리 | 수신 → 송신 | bool 1바이트 (성공/실패) |
//!
//! EOF는 청크별 boolean 플래그 방식 하나만 사용함. 길이 -1 센티널과는
//! 와이어 호환이 없으므로 섞어 쓰지 않음.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::{Error, Result};

/// 파일 이름 최대 길이 (u16 길이 프리픽스 한계)
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// 청크 페이로드 상한 (와이어 한계)
///
/// 수신 슬롯 용량과는 무관함. 슬롯보다 큰 청크는 슬롯 여러 개에
/// 나눠 담기므로 여기서는 비상식적인 길이만 걸러냄.
pub const MAX_CHUNK_LEN: usize = 1 << 30; // 1GiB

/// 전송 세션 상태 (로깅/추적용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 핸드셰이크 진행 중
    Negotiating,

    /// 청크 스트리밍 중
    Streaming,

    /// 디스크 반영 대기 및 이름 변경
    Finalizing,

    /// 정상 완료
    Done,

    /// 실패로 종료
    Failed,
}

/// 핸드셰이크: 파일 이름 + 선언된 크기
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 파일 이름 (경로 없이 이름만)
    pub file_name: String,

    /// 송신측이 선언한 파일 크기 (바이트)
    pub file_size: u64,
}

impl Handshake {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
        }
    }

    /// 핸드셰이크 기록 및 flush
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let name = self.file_name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }

        let mut frame = BytesMut::with_capacity(2 + name.len() + 8);
        frame.put_u16(name.len() as u16);
        frame.put_slice(name);
        frame.put_i64(self.file_size as i64);
        w.write_all(&frame)?;
        w.flush()?;
        Ok(())
    }

    /// 핸드셰이크 읽기
    ///
    /// 파일 이름은 경로 없는 이름이어야 함. 구분자가 섞인 이름은
    /// 수신 디렉토리 밖으로 빠져나갈 수 있으므로 프로토콜 위반으로 거부
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let file_name = read_string(r)?;
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains('/')
            || file_name.contains('\\')
        {
            return Err(Error::Protocol(format!(
                "유효하지 않은 파일 이름: {:?}",
                file_name
            )));
        }
        let file_size = read_i64(r)?;
        if file_size < 0 {
            return Err(Error::Protocol(format!(
                "음수 파일 크기: {}",
                file_size
            )));
        }
        Ok(Self {
            file_name,
            file_size: file_size as u64,
        })
    }
}

/// u16 길이 프리픽스 UTF-8 문자열 읽기
pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::Protocol("파일 이름이 UTF-8이 아님".into()))
}

/// bool 1바이트 기록 (flush 없음)
pub fn write_bool<W: Write>(w: &mut W, value: bool) -> Result<()> {
    w.write_all(&[value as u8])?;
    Ok(())
}

/// bool 1바이트 기록 후 flush
pub fn write_bool_flush<W: Write>(w: &mut W, value: bool) -> Result<()> {
    w.write_all(&[value as u8])?;
    w.flush()?;
    Ok(())
}

/// bool 1바이트 읽기 (0 = false, 그 외 = true)
pub fn read_bool<R: Read>(r: &mut R) -> Result<bool> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

/// i32 big-endian 읽기
pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// i64 big-endian 읽기
pub fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// 청크 하나 기록: EOF 플래그 false + 길이 + 페이로드, flush 포함
pub fn write_chunk<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    debug_assert!(payload.len() <= i32::MAX as usize);
    let mut frame = BytesMut::with_capacity(5 + payload.len());
    frame.put_u8(0); // EOF = false
    frame.put_i32(payload.len() as i32);
    frame.put_slice(payload);
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// EOF 표시 기록 및 flush
pub fn write_eof<W: Write>(w: &mut W) -> Result<()> {
    write_bool_flush(w, true)
}

/// 청크 헤더 읽기: EOF면 None, 아니면 검증된 페이로드 길이
pub fn read_chunk_header<R: Read>(r: &mut R) -> Result<Option<usize>> {
    if read_bool(r)? {
        return Ok(None);
    }
    let len = read_i32(r)?;
    if len < 0 || len as usize > MAX_CHUNK_LEN {
        return Err(Error::Protocol(format!(
            "유효하지 않은 청크 길이: {} (최대 {})",
            len, MAX_CHUNK_LEN
        )));
    }
    Ok(Some(len as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_handshake_roundtrip() {
        let hs = Handshake::new("모델-v1.4.ckpt", 7_703_657_063);

        let mut buf = Vec::new();
        hs.write_to(&mut buf).unwrap();

        let restored = Handshake::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(restored, hs);
    }

    #[test]
    fn test_handshake_rejects_negative_size() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(b"a.gz");
        buf.extend_from_slice(&(-1i64).to_be_bytes());

        let result = Handshake::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_handshake_rejects_path_separators() {
        for name in ["../escape.bin", "a/b.bin", "a\\b.bin", "..", "", "."] {
            let mut buf = Vec::new();
            Handshake::new(name, 10).write_to(&mut buf).unwrap();

            let result = Handshake::read_from(&mut Cursor::new(buf));
            assert!(
                matches!(result, Err(Error::Protocol(_))),
                "거부돼야 함: {:?}",
                name
            );
        }
    }

    #[test]
    fn test_chunk_roundtrip() {
        let payload = vec![0x5Au8; 300];
        let mut buf = Vec::new();
        write_chunk(&mut buf, &payload).unwrap();
        write_eof(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let len = read_chunk_header(&mut cursor).unwrap().unwrap();
        assert_eq!(len, 300);

        let mut restored = vec![0u8; len];
        cursor.read_exact(&mut restored).unwrap();
        assert_eq!(restored, payload);

        assert!(read_chunk_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_nonsense_chunk_length_is_rejected() {
        // 음수 길이
        let mut buf = Vec::new();
        buf.push(0);
        buf.extend_from_slice(&(-5i32).to_be_bytes());
        let result = read_chunk_header(&mut Cursor::new(buf));
        assert!(matches!(result, Err(Error::Protocol(_))));

        // 와이어 상한 초과
        let mut buf = Vec::new();
        buf.push(0);
        buf.extend_from_slice(&((MAX_CHUNK_LEN as i32) + 1).to_be_bytes());
        let result = read_chunk_header(&mut Cursor::new(buf));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bool_encoding() {
        let mut buf = Vec::new();
        write_bool(&mut buf, true).unwrap();
        write_bool(&mut buf, false).unwrap();
        assert_eq!(buf, [1, 0]);

        let mut cursor = Cursor::new(buf);
        assert!(read_bool(&mut cursor).unwrap());
        assert!(!read_bool(&mut cursor).unwrap());
    }
}
