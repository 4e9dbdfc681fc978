//! Content sniffing. Only the leading bytes of a buffer decide its type;
//! filenames and declared content types never reach this module.

use crate::models::upload::ClassificationResult;

/// Report the media type implied by the buffer's magic number.
pub fn classify(bytes: &[u8]) -> ClassificationResult {
    ClassificationResult {
        detected_type: infer::get(bytes).map(|kind| kind.mime_type()),
    }
}

/// Extension used for stored files of a given type.
pub fn canonical_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/avif" => "avif",
        "image/heif" => "heif",
        _ => "bin",
    }
}

/// Whether `extension` is an accepted spelling for `mime_type`.
pub fn extension_matches(mime_type: &str, extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    match mime_type {
        "image/jpeg" => matches!(extension.as_str(), "jpg" | "jpeg" | "jpe" | "jfif"),
        "image/tiff" => matches!(extension.as_str(), "tif" | "tiff"),
        other => canonical_extension(other) == extension,
    }
}

/// Fallback content type for a stored name when its bytes carry no signature.
pub fn content_type_for_name(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    if extension.eq_ignore_ascii_case("png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Minimal byte buffers carrying real signatures.

    pub const PNG: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
    ];

    pub const JPEG: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
        0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
    ];

    pub const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    pub const TEXT: &[u8] = b"just a shopping list: eggs, flour, milk\n";
}
