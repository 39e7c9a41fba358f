//! WinRM message-level encryption: the multipart/encrypted content
//! envelope wrapped around every post-handshake SOAP body.
//!
//! The byte layout is fixed by the protocol; CRLF and tab placement matter.

use tracing::{debug, instrument};

use crate::error::WinRmError;

pub const BOUNDARY: &str = "Encrypted Boundary";
pub const PROTOCOL: &str = "application/HTTP-SPNEGO-session-encrypted";
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=UTF-8";
pub const ENCRYPTED_CONTENT_TYPE: &str = "multipart/encrypted;protocol=\"application/HTTP-SPNEGO-session-encrypted\";boundary=\"Encrypted Boundary\"";

const MIME_BOUNDARY: &[u8] = b"--Encrypted Boundary";
const OCTET_STREAM_HEADER: &[u8] = b"\tContent-Type: application/octet-stream\r\n";

/// The sealing half of an established security context: produces and
/// consumes `(header, ciphertext)` pairs for WinRM message encryption.
pub trait MessageSealer {
    fn seal(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WinRmError>;
    fn unseal(&mut self, header: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, WinRmError>;
}

/// True when a response Content-Type advertises the SPNEGO session
/// encryption protocol.
pub fn is_encrypted_content_type(content_type: &str) -> bool {
    content_type.contains(&format!("protocol=\"{PROTOCOL}\""))
}

#[inline]
fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
}

#[inline]
fn write_crlf(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"\r\n");
}

/// Seals a SOAP body and assembles the multipart/encrypted payload.
#[instrument(skip_all, fields(plain_len = plaintext.len()))]
pub fn encrypt_payload(
    sealer: &mut dyn MessageSealer,
    plaintext: &[u8],
) -> Result<Vec<u8>, WinRmError> {
    let plain_len = plaintext.len();
    let (header, ciphertext) = sealer.seal(plaintext)?;

    debug!(
        header_len = header.len(),
        sealed_len = ciphertext.len(),
        "assembling encrypted body"
    );

    let mut body =
        Vec::with_capacity(plain_len + header.len() + MIME_BOUNDARY.len() * 3 + 160);

    // Part 1: metadata only.
    body.extend_from_slice(MIME_BOUNDARY);
    write_crlf(&mut body);
    write_str(&mut body, "\tContent-Type: ");
    write_str(&mut body, PROTOCOL);
    write_crlf(&mut body);
    write_str(
        &mut body,
        "\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length=",
    );
    write_str(&mut body, &plain_len.to_string());
    write_crlf(&mut body);

    // Part 2: 4-byte little-endian header length, then header and ciphertext.
    body.extend_from_slice(MIME_BOUNDARY);
    write_crlf(&mut body);
    body.extend_from_slice(OCTET_STREAM_HEADER);
    body.extend_from_slice(&(header.len() as u32).to_le_bytes());
    body.extend_from_slice(&header);
    body.extend_from_slice(&ciphertext);

    // Closing boundary, no CRLF before it.
    body.extend_from_slice(MIME_BOUNDARY);
    write_str(&mut body, "--");
    write_crlf(&mut body);

    Ok(body)
}

/// Splits a multipart/encrypted response and unseals every segment.
#[instrument(skip_all, fields(body_len = body.len()))]
pub fn decrypt_payload(
    sealer: &mut dyn MessageSealer,
    body: &[u8],
) -> Result<Vec<u8>, WinRmError> {
    let separator = [MIME_BOUNDARY, b"\r\n"].concat();
    let parts: Vec<&[u8]> = split_on(body, &separator)
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

    let mut plaintext = Vec::new();
    let mut declared_total = 0usize;

    let mut parts = parts.into_iter();
    while let Some(metadata) = parts.next() {
        let payload = parts.next().ok_or_else(|| {
            WinRmError::encryption("encrypted response is missing a payload part")
        })?;

        let expected_length = parse_declared_length(metadata)?;
        declared_total += expected_length;

        let terminator = [MIME_BOUNDARY, b"--\r\n"].concat();
        let payload = payload.strip_suffix(terminator.as_slice()).unwrap_or(payload);
        let payload = payload.strip_prefix(OCTET_STREAM_HEADER).unwrap_or(payload);

        if payload.len() < 4 {
            return Err(WinRmError::encryption(
                "encrypted payload too short to contain header length",
            ));
        }
        let header_length =
            u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if payload.len() < 4 + header_length {
            return Err(WinRmError::encryption(
                "encrypted payload header length is invalid",
            ));
        }

        let header = &payload[4..4 + header_length];
        let ciphertext = &payload[4 + header_length..];

        let message = sealer.unseal(header, ciphertext)?;
        debug!(
            expected_length,
            actual_length = message.len(),
            "decrypted message segment"
        );
        plaintext.extend_from_slice(&message);
    }

    if plaintext.len() != declared_total {
        return Err(WinRmError::encryption(format!(
            "decrypted length {} does not match declared length {declared_total}",
            plaintext.len()
        )));
    }

    Ok(plaintext)
}

fn parse_declared_length(metadata: &[u8]) -> Result<usize, WinRmError> {
    let position = find_subsequence(metadata, b"Length=")
        .ok_or_else(|| WinRmError::encryption("encrypted response missing Length header"))?;
    let digits: String = metadata[position + b"Length=".len()..]
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .map(|byte| *byte as char)
        .collect();
    digits
        .parse::<usize>()
        .map_err(|_| WinRmError::encryption("encrypted response missing Length header"))
}

fn split_on<'a>(haystack: &'a [u8], separator: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(position) = find_subsequence(&haystack[start..], separator) {
        parts.push(&haystack[start..start + position]);
        start += position + separator.len();
    }
    parts.push(&haystack[start..]);
    parts
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=(haystack.len() - needle.len())).find(|&i| haystack[i..i + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reversible toy sealer: "header" is a fixed tag, "ciphertext" is the
    /// plaintext with every byte XOR'd.
    struct XorSealer;

    impl MessageSealer for XorSealer {
        fn seal(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WinRmError> {
            let ciphertext = plaintext.iter().map(|byte| byte ^ 0x2A).collect();
            Ok((b"SIGNATURE".to_vec(), ciphertext))
        }

        fn unseal(&mut self, header: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, WinRmError> {
            assert_eq!(header, b"SIGNATURE");
            Ok(ciphertext.iter().map(|byte| byte ^ 0x2A).collect())
        }
    }

    #[test]
    fn framing_layout_is_exact() {
        let plaintext = b"<s:Envelope>payload</s:Envelope>";
        let body = encrypt_payload(&mut XorSealer, plaintext).unwrap();

        let octet_position = find_subsequence(&body, OCTET_STREAM_HEADER).unwrap();
        let after_header = octet_position + OCTET_STREAM_HEADER.len();
        let length_bytes = &body[after_header..after_header + 4];
        assert_eq!(length_bytes, (b"SIGNATURE".len() as u32).to_le_bytes());

        assert!(body.starts_with(b"--Encrypted Boundary\r\n"));
        assert!(body.ends_with(b"--Encrypted Boundary--\r\n"));

        let declared = format!(
            "\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length={}\r\n",
            plaintext.len()
        );
        assert!(find_subsequence(&body, declared.as_bytes()).is_some());
    }

    #[test]
    fn round_trip_reconstructs_plaintext() {
        let plaintext = b"<s:Envelope><s:Body/></s:Envelope>".to_vec();
        let body = encrypt_payload(&mut XorSealer, &plaintext).unwrap();
        let decrypted = decrypt_payload(&mut XorSealer, &body).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn length_mismatch_is_an_encryption_error() {
        let plaintext = b"0123456789";
        let mut body = encrypt_payload(&mut XorSealer, plaintext).unwrap();

        // Corrupt the declared length.
        let position = find_subsequence(&body, b"Length=10").unwrap();
        body[position + b"Length=".len()..position + b"Length=".len() + 2]
            .copy_from_slice(b"99");

        let err = decrypt_payload(&mut XorSealer, &body).unwrap_err();
        assert!(matches!(err, WinRmError::Encryption(_)));
    }

    #[test]
    fn missing_payload_part_is_rejected() {
        let body = b"--Encrypted Boundary\r\n\tContent-Type: application/HTTP-SPNEGO-session-encrypted\r\n\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length=5\r\n";
        let err = decrypt_payload(&mut XorSealer, body).unwrap_err();
        assert!(matches!(err, WinRmError::Encryption(_)));
    }

    #[test]
    fn truncated_binary_payload_is_rejected() {
        let body = b"--Encrypted Boundary\r\n\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length=5\r\n--Encrypted Boundary\r\n\tContent-Type: application/octet-stream\r\n\xff\xff".to_vec();
        let err = decrypt_payload(&mut XorSealer, &body).unwrap_err();
        assert!(matches!(err, WinRmError::Encryption(_)));
    }

    #[test]
    fn recognizes_encrypted_content_type() {
        assert!(is_encrypted_content_type(ENCRYPTED_CONTENT_TYPE));
        assert!(!is_encrypted_content_type("application/soap+xml; charset=UTF-8"));
    }
}
