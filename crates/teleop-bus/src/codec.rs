//! Length-prefixed wire framing for channel records.
//!
//! Every record is a 2-byte magic tag (stream-desync detection), a 4-byte
//! little-endian body length, and a bincode-encoded [`Envelope`] body. The
//! body is self-describing: the payload variant tag travels with the data,
//! so a record is decodable without out-of-band schema agreement.

use teleop_types::Envelope;

/// Magic prefix of every framed record.
pub(crate) const MAGIC: [u8; 2] = *b"TB";

/// Bytes of framing before the body.
pub(crate) const FRAME_HEADER: usize = 6;

/// Upper bound on a single record body. A length prefix beyond this is
/// treated as stream corruption rather than a real record.
pub(crate) const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Encode one envelope into a framed record.
pub(crate) fn encode(envelope: &Envelope) -> Result<Vec<u8>, String> {
    let body = bincode::serialize(envelope).map_err(|e| e.to_string())?;
    if body.len() > MAX_BODY_BYTES {
        return Err(format!("record body of {} bytes exceeds limit", body.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER + body.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Try to decode one record from the front of `buf`.
///
/// Returns `Ok(Some((envelope, consumed)))` for a complete record,
/// `Ok(None)` when more bytes are needed, and `Err` on a corrupt stream
/// (bad magic, absurd length, or an undecodable body).
pub(crate) fn decode(buf: &[u8]) -> Result<Option<(Envelope, usize)>, String> {
    if buf.len() < FRAME_HEADER {
        return Ok(None);
    }
    if buf[0..2] != MAGIC {
        return Err(format!("bad record magic {:02x}{:02x}", buf[0], buf[1]));
    }
    let body_len = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
    if body_len > MAX_BODY_BYTES {
        return Err(format!("record length {body_len} exceeds limit"));
    }
    let total = FRAME_HEADER + body_len;
    if buf.len() < total {
        return Ok(None);
    }
    let envelope: Envelope =
        bincode::deserialize(&buf[FRAME_HEADER..total]).map_err(|e| e.to_string())?;
    Ok(Some((envelope, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use teleop_types::{ImageFrame, Payload, RenderSet};

    fn roundtrip(payload: Payload) {
        let envelope = Envelope::new(payload, Utc::now(), 17);
        let frame = encode(&envelope).unwrap();
        let (back, consumed) = decode(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(back, envelope);
    }

    #[test]
    fn roundtrip_every_payload_shape() {
        let image = ImageFrame {
            width: 3,
            height: 2,
            data: (0u8..18).collect(),
        };
        roundtrip(Payload::Empty);
        roundtrip(Payload::Position(vec![2047, 907, 3070]));
        roundtrip(Payload::PositionWithForce {
            pos: vec![1, 2, 3],
            force: vec![-40, 0, 12],
        });
        roundtrip(Payload::JointAngles(vec![0.0, -1.57, 1.57]));
        roundtrip(Payload::JointAnglesWithForce {
            qpos: vec![0.5; 6],
            force: vec![0.1; 6],
        });
        roundtrip(Payload::JointAnglesRenderWithForce {
            qpos: vec![0.5; 6],
            force: vec![0.0; 6],
            render: RenderSet {
                color: Some(image.clone()),
                depth: None,
                segmentation: None,
                normal: Some(image.clone()),
            },
        });
        roundtrip(Payload::DualJointAnglesWithImage {
            primary_qpos: vec![0.1; 6],
            mirrored_qpos: vec![0.2; 7],
            image: image.clone(),
        });
        roundtrip(Payload::RawImage(image));
        roundtrip(Payload::ObjectDetectionSignal);
        roundtrip(Payload::PoisonPill);
        roundtrip(Payload::SessionStart("rec-2026-08-06".to_string()));
    }

    #[test]
    fn decode_incomplete_returns_none() {
        let envelope = Envelope::new(Payload::Position(vec![1]), Utc::now(), 0);
        let frame = encode(&envelope).unwrap();
        for cut in 0..frame.len() {
            assert!(decode(&frame[..cut]).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn decode_bad_magic_is_an_error() {
        let envelope = Envelope::new(Payload::Empty, Utc::now(), 0);
        let mut frame = encode(&envelope).unwrap();
        frame[0] = b'X';
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn decode_two_back_to_back_records() {
        let first = Envelope::new(Payload::Position(vec![1]), Utc::now(), 1);
        let second = Envelope::new(Payload::Position(vec![2]), Utc::now(), 2);
        let mut stream = encode(&first).unwrap();
        stream.extend_from_slice(&encode(&second).unwrap());

        let (a, used) = decode(&stream).unwrap().unwrap();
        assert_eq!(a, first);
        let (b, _) = decode(&stream[used..]).unwrap().unwrap();
        assert_eq!(b, second);
    }
}
