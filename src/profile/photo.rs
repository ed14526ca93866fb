use rand::Rng;
use time::OffsetDateTime;

pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED: [&str; 5] = ["jpeg", "jpg", "png", "gif", "webp"];

/// Lowercased extension of an uploaded file name, if it is an accepted image.
pub fn image_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED.contains(&ext.as_str()).then_some(ext)
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .to_ascii_lowercase()
        .strip_prefix("image/")
        .is_some_and(|sub| ALLOWED.contains(&sub))
}

/// `profiles/profile-<unix millis>-<random>.<ext>`
pub fn object_key(ext: &str, now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("profiles/profile-{millis}-{suffix}.{ext}")
}
