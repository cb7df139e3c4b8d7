//! Canonical forms of the content links orders are placed against.

use url::Url;

const CONTENT_SEGMENTS: &[&str] = &["p", "reel", "reels", "tv"];

fn parse_lenient(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    Url::parse(&candidate).ok()
}

fn is_instagram_host(url: &Url) -> bool {
    url.host_str()
        .map(|h| {
            let h = h.to_ascii_lowercase();
            h == "instagram.com" || h.ends_with(".instagram.com")
        })
        .unwrap_or(false)
}

fn segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Normalizes a link so the same post always maps to the same string:
/// scheme and host are canonicalized, query and fragment dropped, and the path
/// ends with a slash. Anything that does not parse is returned trimmed.
pub fn normalize_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(url) = parse_lenient(trimmed) else {
        return trimmed.to_string();
    };
    if !url.has_host() || !trimmed.contains('/') {
        return trimmed.to_string();
    }

    let host = if is_instagram_host(&url) {
        "instagram.com".to_string()
    } else {
        url.host_str().unwrap_or_default().to_ascii_lowercase()
    };

    let segs = segments(&url);
    if segs.is_empty() {
        return format!("https://{}/", host);
    }
    format!("https://{}/{}/", host, segs.join("/"))
}

/// True for links that point at a post, reel or IGTV item.
pub fn is_content_link(raw: &str) -> bool {
    match parse_lenient(raw) {
        Some(url) if is_instagram_host(&url) => segments(&url)
            .first()
            .map(|s| CONTENT_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
            .unwrap_or(false),
        _ => false,
    }
}

/// True for links that point at a profile page rather than at content.
pub fn is_profile_link(raw: &str) -> bool {
    match parse_lenient(raw) {
        Some(url) if is_instagram_host(&url) && raw.contains('/') => {
            let segs = segments(&url);
            !segs.is_empty() && !is_content_link(raw)
        }
        _ => false,
    }
}

/// Extracts a bare username from `@name`, `name` or a profile URL.
pub fn extract_username(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.contains("instagram.com") {
        let url = parse_lenient(trimmed)?;
        if !is_instagram_host(&url) || is_content_link(trimmed) {
            return None;
        }
        return segments(&url)
            .into_iter()
            .next()
            .map(|s| s.trim_start_matches('@').to_string())
            .filter(|s| !s.is_empty());
    }

    let name = trimmed
        .trim_start_matches('@')
        .split(&['?', '#', '/'][..])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
