pub const APPLICATION_JAVASCRIPT: &str = "application/javascript";
pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_PYTHON: &str = "application/x-python";
pub const APPLICATION_SCHEMA_JSON: &str = "application/schema+json";
pub const IMAGE_GIF: &str = "image/gif";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const IMAGE_PNG: &str = "image/png";
pub const TEXT_CSS: &str = "text/css";
pub const TEXT_HTML: &str = "text/html";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

const EXTENSIONS: [(&str, &str); 11] = [
    ("css", TEXT_CSS),
    ("gif", IMAGE_GIF),
    ("html", TEXT_HTML),
    ("jpeg", IMAGE_JPEG),
    ("jpg", IMAGE_JPEG),
    ("js", APPLICATION_JAVASCRIPT),
    ("json", APPLICATION_JSON),
    ("png", IMAGE_PNG),
    ("py", APPLICATION_PYTHON),
    ("schema.json", APPLICATION_SCHEMA_JSON),
    ("txt", TEXT_PLAIN),
];

/// Number of dot separated segments in the longest known extension.
const MAX_EXTENSION_SEGMENTS: usize = max_segments();

const fn max_segments() -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < EXTENSIONS.len() {
        let ext = EXTENSIONS[i].0.as_bytes();
        let mut segments = 1;
        let mut j = 0;
        while j < ext.len() {
            if ext[j] == b'.' {
                segments += 1;
            }
            j += 1;
        }
        if segments > max {
            max = segments;
        }
        i += 1;
    }
    max
}

/// Looks up a single extension, without the leading dot, ignoring case.
pub fn for_extension(ext: &str) -> Option<&'static str> {
    EXTENSIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, content_type)| *content_type)
}

/// Resolves the content type of a file path, preferring the extension with
/// the most segments, so `a.schema.json` is `application/schema+json` rather
/// than `application/json`.
pub fn for_path(path: &str) -> &'static str {
    // byte offsets of the dots closest to the end of the path, nearest first
    let mut dots = [0usize; MAX_EXTENSION_SEGMENTS];
    let mut found = 0;
    for (i, b) in path.bytes().enumerate().rev() {
        if found == MAX_EXTENSION_SEGMENTS {
            break;
        }
        if b == b'.' {
            dots[found] = i;
            found += 1;
        }
    }

    for segments in (1..=found).rev() {
        if let Some(content_type) = for_extension(&path[dots[segments - 1] + 1..]) {
            return content_type;
        }
    }

    APPLICATION_OCTET_STREAM
}
