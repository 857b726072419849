//! Small helpers shared across the bridge

/// Render a byte buffer with printable ASCII kept and everything else as `\xNN`.
pub fn dump_charbuf(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

/// Report an unrecoverable internal-consistency failure and abort the process.
pub fn fatal(message: &str) -> ! {
    tracing::error!(message, "fatal bridge failure");
    eprintln!("PANIC: {}", message);
    std::process::abort()
}
