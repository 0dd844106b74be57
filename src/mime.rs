//! Extension to content-type lookup for static file serving.

/// Returns the content-type for a file extension, matched case-insensitively.
/// Falls back to `application/octet-stream` for anything unrecognized.
pub(crate) fn lookup(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    let mut buf = [0u8; 8];
    let ext = ascii_lower(ext, &mut buf);

    match ext {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn ascii_lower<'a>(ext: &str, buf: &'a mut [u8; 8]) -> &'a str {
    let bytes = ext.as_bytes();
    if bytes.len() > buf.len() {
        return "";
    }
    for (i, &b) in bytes.iter().enumerate() {
        buf[i] = b.to_ascii_lowercase();
    }
    std::str::from_utf8(&buf[..bytes.len()]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::lookup;

    #[test]
    fn known_extensions() {
        assert_eq!(lookup("/a/b.HTML"), "text/html");
        assert_eq!(lookup("style.css"), "text/css");
        assert_eq!(lookup("app.JS"), "application/javascript");
        assert_eq!(lookup("photo.jpeg"), "image/jpeg");
        assert_eq!(lookup("icon.svg"), "image/svg+xml");
        assert_eq!(lookup("data.json"), "application/json");
    }

    #[test]
    fn unknown_falls_back() {
        assert_eq!(lookup("archive.tar.gz"), "application/octet-stream");
        assert_eq!(lookup("no_extension"), "application/octet-stream");
    }
}
