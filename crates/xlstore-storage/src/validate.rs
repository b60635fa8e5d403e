use crate::multipart::MULTIPART_SUFFIX;
use crate::xl::posix::CHECKSUM_SUFFIX;

const MAX_OBJECT_NAME_LEN: usize = 1024;

/// 3 to 63 characters of lowercase letters, digits, `.` and `-`, starting
/// and ending with a letter or digit.
pub fn is_valid_bucket_name(bucket: &str) -> bool {
    if !(3..=63).contains(&bucket.len()) {
        return false;
    }

    let bytes = bucket.as_bytes();
    let edge_ok = |byte: u8| byte.is_ascii_lowercase() || byte.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    !bucket.contains("..")
        && bytes
            .iter()
            .all(|&byte| edge_ok(byte) || byte == b'.' || byte == b'-')
}

pub fn is_valid_object_name(object: &str) -> bool {
    !object.is_empty()
        && is_valid_object_prefix(object)
        && object.split('/').all(|segment| !segment.is_empty())
}

/// Like [`is_valid_object_name`] but allows an empty string and a trailing `/`.
pub fn is_valid_object_prefix(prefix: &str) -> bool {
    if prefix.len() > MAX_OBJECT_NAME_LEN || prefix.starts_with('/') || prefix.contains('\\') {
        return false;
    }

    prefix.split('/').all(|segment| {
        segment != "."
            && segment != ".."
            && !segment.ends_with(MULTIPART_SUFFIX)
            && !segment.ends_with(CHECKSUM_SUFFIX)
    })
}
