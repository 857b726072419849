//! PEM armor

use crate::error::{BridgeError, BridgeResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";
pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

const LINE_WIDTH: usize = 64;

/// Armor `der` as a PEM block labelled `label`
pub fn encode(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {}-----\n", label);
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", label));
    out
}

/// Extract the DER bytes of the first `label` block in `pem`
pub fn decode(label: &str, pem: &str) -> BridgeResult<Vec<u8>> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let mut lines = pem.lines().map(str::trim);
    if !lines.by_ref().any(|line| line == begin) {
        return Err(BridgeError::Pem(format!("missing '{}'", begin)));
    }

    let mut body = String::new();
    let mut closed = false;
    for line in lines {
        if line == end {
            closed = true;
            break;
        }
        body.push_str(line);
    }
    if !closed {
        return Err(BridgeError::Pem(format!("missing '{}'", end)));
    }

    STANDARD
        .decode(body.as_bytes())
        .map_err(|e| BridgeError::Pem(e.to_string()))
}
