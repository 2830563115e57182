//! Path and name helpers shared by request objects, the downloader and the
//! playlist rewriter. Sources may be local paths (either separator) or URLs.

/// Maximum title length accepted by the control plane, in bytes.
pub const VOD_MAX_TITLE_LENGTH: usize = 128;
pub const VOD_MAX_DESCRIPTION_LENGTH: usize = 1024;

/// Regions whose storage endpoints have an `-internal` variant reachable from
/// compute instances in the same region.
pub const INTERNAL_ENDPOINT_REGIONS: [&str; 16] = [
    "cn-qingdao",
    "cn-beijing",
    "cn-zhangjiakou",
    "cn-huhehaote",
    "cn-hangzhou",
    "cn-shanghai",
    "cn-shenzhen",
    "cn-hongkong",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-northeast-1",
    "us-west-1",
    "us-east-1",
    "eu-central-1",
    "me-east-1",
];

const SEPARATORS: [char; 2] = ['/', '\\'];

/// Percent-decodes `value`, leaving it untouched when the result would not be
/// valid UTF-8.
pub fn url_decode(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Splits a path or URL into `(brief_path, file_name)`: the decoded source with
/// any query string removed, and its last path component.
pub fn get_file_name(file_url: &str) -> (String, String) {
    let decoded = url_decode(file_url);
    let brief_path = match decoded.rfind('?') {
        Some(pos) => decoded[..pos].to_string(),
        None => decoded,
    };
    let file_name = base_name(&brief_path).to_string();
    (brief_path, file_name)
}

pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATORS);
    match trimmed.rfind(SEPARATORS) {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Text after the last `.`, or None when there is no non-empty extension.
pub fn get_file_extension(file_name: &str) -> Option<String> {
    let pos = file_name.rfind('.')?;
    let ext = &file_name[pos + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_string())
    }
}

/// Replaces the last component of `file_path` with `replace`, keeping the
/// separator found (`/` first, then `\`). None when the path has neither.
pub fn replace_file_name(file_path: &str, replace: &str) -> Option<String> {
    if file_path.is_empty() || replace.is_empty() {
        return Some(file_path.to_string());
    }
    let decoded = url_decode(file_path);
    let (start, separator) = match decoded.rfind('/') {
        Some(pos) => (pos, '/'),
        None => (decoded.rfind('\\')?, '\\'),
    };

    Some(format!("{}{}{}", &decoded[..start], separator, replace))
}

/// Longest prefix of `value` that fits in `max_bytes` without splitting a
/// multi-byte character.
pub fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(idx, _)| idx)
        .take_while(|&idx| idx <= max_bytes)
        .last()
        .unwrap_or(0);
    &value[..end]
}

/// Rewrites a storage endpoint for the upload host. `https:` is downgraded to
/// `http:` unless SSL is enabled; when `ecs_region` is a known region the
/// endpoint is switched to its `-internal` variant (always plaintext).
pub fn convert_oss_internal(oss_url: &str, ecs_region: Option<&str>, enable_ssl: bool) -> String {
    let mut url = if enable_ssl {
        oss_url.to_string()
    } else {
        oss_url.replace("https:", "http:")
    };

    let Some(region) = ecs_region else {
        return url;
    };
    if !INTERNAL_ENDPOINT_REGIONS.contains(&region) {
        return url;
    }

    url = url.replace("https:", "http:");
    url.replace(
        &format!("oss-{}.aliyuncs.com", region),
        &format!("oss-{}-internal.aliyuncs.com", region),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_strips_query_and_directories() {
        let (brief, name) = get_file_name("http://host/path/seg%202.ts?x=1&y=2");
        assert_eq!(brief, "http://host/path/seg 2.ts");
        assert_eq!(name, "seg 2.ts");

        let (brief, name) = get_file_name("/opt/media/movie.mp4");
        assert_eq!(brief, "/opt/media/movie.mp4");
        assert_eq!(name, "movie.mp4");

        let (_, name) = get_file_name("C:\\media\\clip.mov");
        assert_eq!(name, "clip.mov");

        let (_, name) = get_file_name("bare.ts");
        assert_eq!(name, "bare.ts");
    }

    #[test]
    fn extension_requires_a_suffix() {
        assert_eq!(get_file_extension("movie.mp4").as_deref(), Some("mp4"));
        assert_eq!(get_file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(get_file_extension("movie"), None);
        assert_eq!(get_file_extension("movie."), None);
    }

    #[test]
    fn replace_file_name_uses_available_separator() {
        assert_eq!(
            replace_file_name("/opt/hls/index.m3u8", "seg1.ts").as_deref(),
            Some("/opt/hls/seg1.ts")
        );
        assert_eq!(
            replace_file_name("http://host/live/index.m3u8", "seg1.ts").as_deref(),
            Some("http://host/live/seg1.ts")
        );
        assert_eq!(
            replace_file_name("D:\\hls\\index.m3u8", "seg1.ts").as_deref(),
            Some("D:\\hls\\seg1.ts")
        );
        assert_eq!(replace_file_name("index.m3u8", "seg1.ts"), None);
        assert_eq!(
            replace_file_name("index.m3u8", "").as_deref(),
            Some("index.m3u8")
        );
    }

    #[test]
    fn truncation_never_splits_characters() {
        let title: String = "视".repeat(130);
        let cut = truncate_to_bytes(&title, VOD_MAX_TITLE_LENGTH);
        assert!(cut.len() <= VOD_MAX_TITLE_LENGTH);
        assert_eq!(cut.chars().count(), 42);
        assert!(cut.chars().all(|c| c == '视'));

        assert_eq!(truncate_to_bytes("short", 128), "short");
        assert_eq!(truncate_to_bytes("视频", 2), "");
        assert_eq!(truncate_to_bytes("abc", 0), "");
    }

    #[test]
    fn truncation_holds_for_mixed_width_titles() {
        let pieces = ["a", "é", "视", "🎬", "bc", "ß视"];
        for seed in 0..200usize {
            let mut title = String::new();
            let mut n = seed;
            for _ in 0..(seed % 97 + 1) {
                title.push_str(pieces[n % pieces.len()]);
                n = n.wrapping_mul(31).wrapping_add(7);
            }
            for max in [0usize, 1, 2, 3, 5, 64, 127, 128] {
                let cut = truncate_to_bytes(&title, max);
                assert!(cut.len() <= max);
                assert!(title.starts_with(cut));
                // the next character would not have fitted
                if let Some(next) = title[cut.len()..].chars().next() {
                    assert!(cut.len() + next.len_utf8() > max);
                }
            }
        }
    }

    #[test]
    fn internal_endpoint_rewrite() {
        assert_eq!(
            convert_oss_internal("https://oss-cn-shanghai.aliyuncs.com", None, false),
            "http://oss-cn-shanghai.aliyuncs.com"
        );
        assert_eq!(
            convert_oss_internal("https://oss-cn-shanghai.aliyuncs.com", None, true),
            "https://oss-cn-shanghai.aliyuncs.com"
        );
        assert_eq!(
            convert_oss_internal(
                "https://oss-cn-shanghai.aliyuncs.com",
                Some("cn-shanghai"),
                true
            ),
            "http://oss-cn-shanghai-internal.aliyuncs.com"
        );
        assert_eq!(
            convert_oss_internal(
                "https://oss-cn-shanghai.aliyuncs.com",
                Some("cn-beijing"),
                false
            ),
            "http://oss-cn-shanghai.aliyuncs.com"
        );
        assert_eq!(
            convert_oss_internal("https://oss-cn-shanghai.aliyuncs.com", Some("mars-1"), true),
            "https://oss-cn-shanghai.aliyuncs.com"
        );
    }
}
