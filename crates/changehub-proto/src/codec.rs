//! BSON document codec on top of the framing layer.

use bson::Document;

use crate::framing::{encode_frame, extract_payload};
use crate::Error;

/// Serialize a document to raw BSON bytes.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)
        .map_err(|e| Error::Serialization(format!("failed to encode document: {}", e)))?;
    Ok(bytes)
}

/// Deserialize raw BSON bytes into a document.
pub fn decode_document(bytes: &[u8]) -> Result<Document, Error> {
    Document::from_reader(bytes)
        .map_err(|e| Error::Deserialization(format!("failed to decode document: {}", e)))
}

/// Encode a document as a complete wire frame.
pub fn encode_document_frame(doc: &Document) -> Result<Vec<u8>, Error> {
    let payload = encode_document(doc)?;
    encode_frame(&payload)
}

/// Decode the document carried by a complete wire frame.
pub fn decode_document_frame(frame: &[u8]) -> Result<Document, Error> {
    decode_document(extract_payload(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameDecoder;
    use bson::doc;

    #[test]
    fn test_document_frame_roundtrip() {
        let doc = doc! {
            "watcher": "w1",
            "data": { "operationType": "insert", "fullDocument": { "n": 1, "tags": ["a", "b"] } },
        };
        let frame = encode_document_frame(&doc).unwrap();
        assert_eq!(decode_document_frame(&frame).unwrap(), doc);
    }

    #[test]
    fn test_roundtrip_through_decoder_in_pieces() {
        let first = doc! { "watcher": "a", "data": { "x": 1.5 } };
        let second = doc! { "error": "Unknown action" };

        let mut wire = encode_document_frame(&first).unwrap();
        wire.extend(encode_document_frame(&second).unwrap());

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in &wire {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(payload) = decoder.next_payload().unwrap() {
                decoded.push(decode_document(&payload).unwrap());
            }
        }

        assert_eq!(decoded, vec![first, second]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_document(b"not bson"),
            Err(Error::Deserialization(_))
        ));
    }
}
