use crate::{Row, Verb, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ring::Endpoint;

/// One inter-node message: a verb, the sender, and an opaque body owned by
/// the verb's codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub verb: Verb,
    pub from: Endpoint,
    pub body: Bytes,
}

impl Message {
    pub fn new(verb: Verb, from: Endpoint, body: impl Into<Bytes>) -> Self {
        Self {
            verb,
            from,
            body: body.into(),
        }
    }
}

fn put_text(buf: &mut BytesMut, text: &str) {
    buf.put_u16(text.len() as u16);
    buf.put_slice(text.as_bytes());
}

fn get_text(buf: &mut impl Buf, field: &'static str) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(WireError::Truncated(field));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::BadText { field })
}

fn get_bytes(buf: &mut impl Buf, field: &'static str) -> Result<Bytes, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated(field));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(WireError::Truncated(field));
    }
    Ok(buf.copy_to_bytes(len))
}

/// A write to one row of one table. Serialized once at the coordinator; the
/// same bytes travel to replicas and into hint files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub table: String,
    pub key: Bytes,
    pub row: Row,
}

impl Mutation {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_text(&mut buf, &self.table);
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(&self.key);
        self.row.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(mut body: impl Buf) -> Result<Mutation, WireError> {
        let table = get_text(&mut body, "mutation table")?;
        let key = get_bytes(&mut body, "mutation key")?;
        let row = Row::decode(&mut body)?;
        Ok(Mutation { table, key, row })
    }
}

/// A single-key read, as full data or digest only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    pub table: String,
    pub key: Bytes,
    pub digest_only: bool,
}

impl ReadCommand {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_text(&mut buf, &self.table);
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u8(self.digest_only as u8);
        buf.freeze()
    }

    pub fn decode(mut body: impl Buf) -> Result<ReadCommand, WireError> {
        let table = get_text(&mut body, "read table")?;
        let key = get_bytes(&mut body, "read key")?;
        if body.remaining() < 1 {
            return Err(WireError::Truncated("read flags"));
        }
        let digest_only = body.get_u8() != 0;
        Ok(ReadCommand {
            table,
            key,
            digest_only,
        })
    }
}

/// A replica's answer to a read: its row version, or just that version's
/// digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResponse {
    Data(Row),
    Digest(Bytes),
}

impl ReadResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            ReadResponse::Data(row) => {
                buf.put_u8(0);
                row.encode(&mut buf);
            }
            ReadResponse::Digest(digest) => {
                buf.put_u8(1);
                buf.put_u32(digest.len() as u32);
                buf.put_slice(digest);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut body: impl Buf) -> Result<ReadResponse, WireError> {
        if body.remaining() < 1 {
            return Err(WireError::Truncated("response kind"));
        }
        match body.get_u8() {
            0 => Ok(ReadResponse::Data(Row::decode(&mut body)?)),
            1 => Ok(ReadResponse::Digest(get_bytes(&mut body, "digest")?)),
            other => Err(WireError::BadResponseKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let mut row = Row::new();
        row.set(&b"c1"[..], &b"v1"[..], 10);
        row
    }

    #[test]
    fn mutation_codec_round_trips() {
        let mutation = Mutation {
            table: "events".to_string(),
            key: Bytes::from_static(b"a3user-7"),
            row: sample_row(),
        };
        let decoded = Mutation::decode(mutation.encode()).unwrap();
        assert_eq!(decoded, mutation);
    }

    #[test]
    fn read_command_codec_round_trips() {
        for digest_only in [false, true] {
            let command = ReadCommand {
                table: "events".to_string(),
                key: Bytes::from_static(b"a3user-7"),
                digest_only,
            };
            assert_eq!(ReadCommand::decode(command.encode()).unwrap(), command);
        }
    }

    #[test]
    fn response_codec_round_trips() {
        let data = ReadResponse::Data(sample_row());
        assert_eq!(ReadResponse::decode(data.encode()).unwrap(), data);

        let digest = ReadResponse::Digest(Bytes::copy_from_slice(&sample_row().digest()));
        assert_eq!(ReadResponse::decode(digest.encode()).unwrap(), digest);

        assert!(matches!(
            ReadResponse::decode(Bytes::from_static(&[9])),
            Err(WireError::BadResponseKind(9))
        ));
    }
}
