//! Small helpers shared by all parsers.

/// Decode a fixed-width, NUL-padded ASCII field.
///
/// Legacy formats store names in fixed byte slots with the unused tail
/// zero-filled; everything from the first zero byte on is discarded. Bytes
/// outside ASCII are decoded lossily rather than rejected - payload names
/// are not semantically validated.
pub(crate) fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
