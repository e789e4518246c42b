//! Minimal UDP wire framing: a one-byte tag identifying the payload kind
//! followed by its `bincode` encoding. There is no counterpart to this file
//! in the original source, which talks NDN TLV over a local forwarder
//! socket (`ndn-cxx::Face`); real interop and wire compatibility are
//! explicit non-goals (§1), so a small closed frame format stands in.

use serde::{Deserialize, Serialize};

use crate::types::{Data, Interest, NackReason};

const TAG_INTEREST: u8 = 1;
const TAG_DATA: u8 = 2;
const TAG_NACK: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Interest(Interest),
    Data(Data),
    Nack { interest: Interest, reason: NackReason },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        let tag = match self {
            Frame::Interest(_) => TAG_INTEREST,
            Frame::Data(_) => TAG_DATA,
            Frame::Nack { .. } => TAG_NACK,
        };
        let mut buf = vec![tag];
        buf.extend(bincode::serialize(self)?);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, bincode::Error> {
        if bytes.is_empty() {
            return Err(Box::new(bincode::ErrorKind::SizeLimit));
        }
        // The tag byte is redundant with the enum discriminant bincode
        // already writes, but keeping it lets a future reader recognize a
        // frame without decoding it fully; bincode decodes the remainder.
        bincode::deserialize(&bytes[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentType, Name};

    #[test]
    fn interest_round_trips() {
        let interest = Interest::new(Name::parse("/a/b").with_segment(3), true, 4000);
        let frame = Frame::Interest(interest.clone());
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(&bytes).unwrap();
        match decoded {
            Frame::Interest(i) => assert_eq!(i, interest),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn data_round_trips() {
        let data = Data {
            name: Name::parse("/a/b").with_segment(0),
            content: vec![1, 2, 3],
            final_block_id: Some(9),
            content_type: ContentType::Blob,
        };
        let bytes = Frame::Data(data.clone()).encode().unwrap();
        match Frame::decode(&bytes).unwrap() {
            Frame::Data(d) => assert_eq!(d, data),
            _ => panic!("wrong variant"),
        }
    }
}
