//! Thumbnail URL sanitization.
//!
//! Provider send calls only ever see HTTPS URLs on known upstream CDN
//! hosts. A URL failing the checks is dropped and the announcement goes
//! out text-only; this is an SSRF guard, not a user-facing validation.

use url::Url;

/// Known CDN hosts of the upstream streaming platform.
const ALLOWED_HOSTS: &[&str] = &[
    "static-cdn.jtvnw.net",
    "vod-secure.twitch.tv",
    "clips-media-assets2.twitch.tv",
];

const THUMBNAIL_WIDTH: u32 = 1280;
const THUMBNAIL_HEIGHT: u32 = 720;

/// Substitute sizing placeholders and validate scheme/host.
/// Returns None when the URL must not be forwarded to a provider.
pub fn sanitize_thumbnail_url(raw: &str) -> Option<String> {
    let sized = raw
        .replace("{width}", &THUMBNAIL_WIDTH.to_string())
        .replace("{height}", &THUMBNAIL_HEIGHT.to_string());

    let url = Url::parse(&sized).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?;
    if !ALLOWED_HOSTS.contains(&host) {
        return None;
    }

    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_sizing_placeholders() {
        let sanitized = sanitize_thumbnail_url(
            "https://static-cdn.jtvnw.net/previews-ttv/live_user_ch-{width}x{height}.jpg",
        )
        .unwrap();
        assert_eq!(
            sanitized,
            "https://static-cdn.jtvnw.net/previews-ttv/live_user_ch-1280x720.jpg"
        );
    }

    #[test]
    fn test_rejects_http_scheme() {
        assert_eq!(
            sanitize_thumbnail_url("http://static-cdn.jtvnw.net/previews-ttv/live.jpg"),
            None
        );
    }

    #[test]
    fn test_rejects_unknown_host() {
        assert_eq!(
            sanitize_thumbnail_url("https://evil.example.com/preview.jpg"),
            None
        );
        // Suffix tricks must not pass the allow-list
        assert_eq!(
            sanitize_thumbnail_url("https://static-cdn.jtvnw.net.evil.com/p.jpg"),
            None
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(sanitize_thumbnail_url("not a url"), None);
        assert_eq!(sanitize_thumbnail_url("file:///etc/passwd"), None);
    }

    #[test]
    fn test_passes_plain_cdn_url() {
        let url = "https://vod-secure.twitch.tv/thumb/123.jpg";
        assert_eq!(sanitize_thumbnail_url(url).unwrap(), url);
    }
}
