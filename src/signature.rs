use base64::prelude::*;
use ring::hmac;

/// Device identity baked into every request. The server ties signatures to
/// these values, so they must match the strings the official client sends.
pub const USER_AGENT: &str = "CodoonSport(8.9.0 1170;Android 7;Sony XZ1)";
pub const DID: &str = "24-00000000-03e1-7dd7-0033-c5870033c588";
pub const DAVINCI: &str = "0";

pub const BASE_URL: &str = "https://api.codoon.com";
pub const CLIENT_ID: &str = "099cce28c05f6c39ad5e04e51ed60704";
pub const BASIC_AUTH: &str =
    "MDk5Y2NlMjhjMDVmNmMzOWFkNWUwNGU1MWVkNjA3MDQ6YzM5ZDNmYmVhMWU4NWJlY2VlNDFjMTk5N2FjZjBlMzY=";

// Shared secret recovered from libencrypt.so (encryptHttpSignature).
const SIGNING_KEY: &[u8] = b"ecc140ad6e1e12f7d972af04add2c7ee";

/// Compute the `signature` header for one request.
///
/// The canonical message is pipe-delimited: the auth/device/timestamp header
/// block, then the URL path, then the body as sent on the wire, then the
/// URL-decoded query string. Field order and encoding are verified server
/// side, so any deviation invalidates the signature.
///
/// GET requests sign with `timestamp = 0` and an empty body; POST requests
/// sign with the current Unix time and the exact body string that is sent.
pub fn sign(auth_header: &str, path_with_query: &str, body: Option<&str>, timestamp: i64) -> String {
    let (path, raw_query) = match path_with_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_with_query, ""),
    };
    let query = if raw_query.is_empty() {
        String::new()
    } else {
        urlencoding::decode(raw_query)
            .map(|q| q.into_owned())
            .unwrap_or_else(|_| raw_query.to_string())
    };
    let body_str = body.unwrap_or("");

    let message = format!(
        "Authorization={auth_header}&Davinci={DAVINCI}&Did={DID}&Timestamp={timestamp}|path={path}|body={body_str}|{query}"
    );

    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, SIGNING_KEY);
    let tag = hmac::sign(&key, message.as_bytes());
    BASE64_STANDARD.encode(tag.as_ref())
}
