use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique identifier of the form `<prefix>_<millis>_<random hex>`
pub fn generate_id(prefix: &str) -> String {
    let entropy: [u8; 8] = rand::random();
    format!("{}_{}_{}", prefix, now_millis(), hex::encode(entropy))
}
