use std::env;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

pub const ENV_DEBUG: &str = "REPLAY_UNPACK_DEBUG";

/// Initialize debug mode from the environment.
///
/// With `REPLAY_UNPACK_DEBUG` set, every decoded replay also has its
/// decrypted stream dumped, whatever the per-call configuration says.
pub fn init_debug_mode() {
    let debug = env::var(ENV_DEBUG).is_ok();
    set_debug_mode(debug);

    if debug {
        tracing::info!("debug mode enabled; decrypted streams will be dumped");
    }
}

pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Space-separated hex of the first `limit` bytes, with an ellipsis when cut.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out = String::with_capacity(limit.min(bytes.len()) * 3 + 4);
    for (i, byte) in bytes.iter().take(limit).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    if bytes.len() > limit {
        out.push_str(" ...");
    }
    out
}
