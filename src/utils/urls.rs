use url::{ParseError, Url};

pub fn to_url(host: &str) -> Result<Url, ParseError> {
    Url::parse(host)
}

/// True for `http(s)://` sources, which have to be fetched before upload.
pub fn is_web_url(path: &str) -> bool {
    match to_url(path) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_web_url;

    #[test]
    fn detects_web_sources() {
        assert!(is_web_url("http://example.com/a.mp4"));
        assert!(is_web_url("https://example.com/a.m3u8?token=1"));
        assert!(!is_web_url("/opt/media/a.mp4"));
        assert!(!is_web_url("C:\\media\\a.mp4"));
        assert!(!is_web_url("file:///opt/media/a.mp4"));
    }
}
