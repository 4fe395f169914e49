//! Filtering of image URLs down to ones served from our storage buckets.

use std::collections::HashSet;
use url::Url;

const PUBLIC_OBJECT_PREFIX: &str = "/storage/v1/object/public/";
const STORAGE_HOST_SUFFIX: &str = ".supabase.co";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "svg"];

/// Keep https image URLs under a Supabase public object path, first occurrence only.
pub fn filter_unique_images<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|url| url.as_ref().trim().to_string())
        .filter(|url| is_storage_image(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn is_storage_image(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    let host_ok = url
        .host_str()
        .is_some_and(|host| host.ends_with(STORAGE_HOST_SUFFIX));
    host_ok && url.path().starts_with(PUBLIC_OBJECT_PREFIX) && has_image_extension(url.path())
}

pub fn has_image_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .is_some_and(|(stem, ext)| {
            !stem.is_empty()
                && IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// MIME type for an upload, from the path's extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "https://x.supabase.co/storage/v1/object/public/media/a.jpg";

    #[test]
    fn test_filter_drops_duplicates_and_foreign_hosts() {
        let urls = [GOOD, GOOD, "https://evil.com/a.jpg"];
        assert_eq!(filter_unique_images(urls), vec![GOOD.to_string()]);
    }

    #[test]
    fn test_filter_keeps_first_seen_order() {
        let b = "https://x.supabase.co/storage/v1/object/public/media/b.PNG";
        let urls = vec![b.to_string(), GOOD.to_string(), b.to_string()];
        assert_eq!(filter_unique_images(&urls), vec![b.to_string(), GOOD.to_string()]);
    }

    #[test]
    fn test_rejects_lookalikes() {
        assert!(!is_storage_image("http://x.supabase.co/storage/v1/object/public/media/a.jpg"));
        assert!(!is_storage_image("https://supabase.co.evil.com/storage/v1/object/public/a.jpg"));
        assert!(!is_storage_image("https://x.supabase.co/storage/v1/object/sign/media/a.jpg"));
        assert!(!is_storage_image("https://x.supabase.co/storage/v1/object/public/media/a.txt"));
        assert!(!is_storage_image("https://x.supabase.co/storage/v1/object/public/media/.png"));
        assert!(!is_storage_image("not a url"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("avatars/me.JPG"), "image/jpeg");
        assert_eq!(content_type_for("posters/x.webp"), "image/webp");
        assert_eq!(content_type_for("readme"), "application/octet-stream");
    }
}
