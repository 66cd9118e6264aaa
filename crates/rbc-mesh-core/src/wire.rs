//! Canonical advertisement encoding
//!
//! Advertisement PDUs use postcard serialization with the field order of
//! the Rust structs. Encoding writes into a caller-provided buffer so the
//! transmit path never allocates.

use crate::error::Result;
use crate::types::{Advertisement, NodeAddr};
use serde::{Deserialize, Serialize};

/// Upper bound on an encoded [`AdvPdu`].
///
/// sender (6) + variant (1) + handle (<=3) + version (<=5) + origin (6)
/// + payload length (1) + payload (28) = 50.
pub const MAX_PDU_LEN: usize = 50;

/// What one node puts on the air: who is transmitting and what.
///
/// `sender` is the transmitting node, which differs from the value's
/// origin whenever a node relays someone else's update.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdvPdu {
    pub sender: NodeAddr,
    pub adv: Advertisement,
}

/// Encode a PDU into `buf`, returning the used prefix.
pub fn encode_pdu<'a>(pdu: &AdvPdu, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
    Ok(postcard::to_slice(pdu, buf)?)
}

/// Decode a PDU, rejecting trailing bytes.
pub fn decode_pdu(bytes: &[u8]) -> Result<AdvPdu> {
    let (pdu, rest) = postcard::take_from_bytes::<AdvPdu>(bytes)?;
    if !rest.is_empty() {
        return Err(postcard::Error::DeserializeBadEncoding.into());
    }
    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::*;

    fn sample_unit() -> BroadcastUnit {
        BroadcastUnit {
            handle: ValueHandle(3),
            version: 300,
            origin: NodeAddr([1, 2, 3, 4, 5, 6]),
            payload: Payload::new(&[0x01, 0x02]).unwrap(),
        }
    }

    #[test]
    fn test_value_pdu_layout() {
        let pdu = AdvPdu {
            sender: NodeAddr([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]),
            adv: Advertisement::Value(sample_unit()),
        };
        let mut buf = [0u8; MAX_PDU_LEN];
        let bytes = encode_pdu(&pdu, &mut buf).unwrap();

        let expected: &[u8] = &[
            0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, // sender
            0x00, // Advertisement::Value
            0x03, // handle
            0xAC, 0x02, // version 300 (varint)
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // origin
            0x02, 0x01, 0x02, // payload
        ];
        assert_eq!(&bytes[..], expected);
        assert_eq!(decode_pdu(expected).unwrap(), pdu);
    }

    #[test]
    fn test_request_pdu_layout() {
        let pdu = AdvPdu {
            sender: NodeAddr([9; 6]),
            adv: Advertisement::Request(ValueHandle(7)),
        };
        let mut buf = [0u8; MAX_PDU_LEN];
        let bytes = encode_pdu(&pdu, &mut buf).unwrap();
        assert_eq!(&bytes[6..], &[0x01, 0x07]);
    }

    #[test]
    fn test_largest_pdu_fills_bound() {
        let pdu = AdvPdu {
            sender: NodeAddr([0xFF; 6]),
            adv: Advertisement::Value(BroadcastUnit {
                handle: ValueHandle(u16::MAX),
                version: u32::MAX,
                origin: NodeAddr([0xFF; 6]),
                payload: Payload::new(&[0xFF; MAX_VALUE_LEN]).unwrap(),
            }),
        };
        let mut buf = [0u8; MAX_PDU_LEN];
        assert_eq!(encode_pdu(&pdu, &mut buf).unwrap().len(), MAX_PDU_LEN);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_pdu(&[0x01, 0x02]), Err(Error::Serialization(_))));

        let pdu = AdvPdu {
            sender: NodeAddr([1; 6]),
            adv: Advertisement::Request(ValueHandle(1)),
        };
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = encode_pdu(&pdu, &mut buf).unwrap().len();
        assert!(decode_pdu(&buf[..len + 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let mut bytes = vec![0u8; 6];
        bytes.extend_from_slice(&[0x00, 0x01, 0x01]);
        bytes.extend_from_slice(&[0u8; 6]);
        bytes.push((MAX_VALUE_LEN + 1) as u8);
        bytes.extend(std::iter::repeat(0xEE).take(MAX_VALUE_LEN + 1));
        assert!(decode_pdu(&bytes).is_err());
    }
}
