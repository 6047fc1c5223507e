//! Greeting page and share link served to plain HTTP requests.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Body of the greeting page.
pub const GREETING: &str = "Hello, World\n";

/// Build the client share link for this endpoint.
pub fn share_link(uuid: &str, domain: &str, name: &str) -> String {
    format!(
        "vless://{uuid}@{domain}:443?encryption=none&security=tls&sni={domain}&type=ws&host={domain}&path=%2F#v1-ws-tls-{name}"
    )
}

/// The share link, base64-encoded with a trailing newline.
pub fn encoded_share_link(uuid: &str, domain: &str, name: &str) -> String {
    let mut encoded = STANDARD.encode(share_link(uuid, domain, name));
    encoded.push('\n');
    encoded
}
