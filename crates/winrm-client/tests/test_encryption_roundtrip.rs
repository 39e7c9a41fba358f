//! Multipart/encrypted framing against a mock mechanism, including the
//! multi-segment responses WinRM produces for large envelopes.

use winrm_client::WinRmError;
use winrm_client::auth::MessageSealer;
use winrm_client::auth::encryption::{decrypt_payload, encrypt_payload};

/// Reversible stand-in for an established security context.
struct RotSealer;

impl MessageSealer for RotSealer {
    fn seal(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WinRmError> {
        let ciphertext = plaintext.iter().map(|byte| byte.wrapping_add(13)).collect();
        Ok((vec![0xAB; 16], ciphertext))
    }

    fn unseal(&mut self, header: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, WinRmError> {
        assert_eq!(header.len(), 16);
        Ok(ciphertext.iter().map(|byte| byte.wrapping_sub(13)).collect())
    }
}

const TERMINATOR: &[u8] = b"--Encrypted Boundary--\r\n";

#[test]
fn single_segment_round_trip() {
    let plaintext = br#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope><s:Body/></s:Envelope>"#;
    let body = encrypt_payload(&mut RotSealer, plaintext).unwrap();
    assert!(body.ends_with(TERMINATOR));

    let decrypted = decrypt_payload(&mut RotSealer, &body).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn multi_segment_response_concatenates_in_order() {
    let first = b"<s:Envelope>first half ".to_vec();
    let second = b"and second half</s:Envelope>".to_vec();

    let mut body = encrypt_payload(&mut RotSealer, &first).unwrap();
    body.truncate(body.len() - TERMINATOR.len());
    body.extend_from_slice(&encrypt_payload(&mut RotSealer, &second).unwrap());

    let decrypted = decrypt_payload(&mut RotSealer, &body).unwrap();
    assert_eq!(
        decrypted,
        b"<s:Envelope>first half and second half</s:Envelope>"
    );
}

#[test]
fn corrupted_header_length_is_an_encryption_error() {
    let body = encrypt_payload(&mut RotSealer, b"payload").unwrap();

    // Overwrite the little-endian header length with nonsense.
    let marker = b"\tContent-Type: application/octet-stream\r\n";
    let position = body
        .windows(marker.len())
        .position(|window| window == marker)
        .unwrap();
    let mut corrupted = body.clone();
    corrupted[position + marker.len()..position + marker.len() + 4]
        .copy_from_slice(&u32::MAX.to_le_bytes());

    let err = decrypt_payload(&mut RotSealer, &corrupted).unwrap_err();
    assert!(matches!(err, WinRmError::Encryption(_)));
}
