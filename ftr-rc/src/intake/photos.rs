//! Photo upload limits

/// Maximum number of photos per collection
pub const MAX_PHOTOS: usize = 5;

/// Maximum size of a single photo (5 MiB)
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

/// Accepted formats, as derived from the MIME subtype
pub const ALLOWED_FORMATS: &[&str] = &["JPG", "JPEG", "PNG"];

/// One uploaded photo as received from the multipart body
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    /// Upper-cased MIME subtype (`image/jpeg` -> `JPEG`)
    pub fn format(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .and_then(|mime| mime.split('/').nth(1))
            .map(|subtype| subtype.trim().to_uppercase())
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Check count, format and size limits; returns every violation
pub fn validate_photos(photos: &[PhotoUpload]) -> Vec<String> {
    if photos.len() > MAX_PHOTOS {
        return vec![format!("Máximo {} fotos permitidas", MAX_PHOTOS)];
    }

    let mut messages = Vec::new();
    for photo in photos {
        let format = photo.format();
        if !ALLOWED_FORMATS.contains(&format.as_str()) {
            messages.push(format!(
                "Formato {} no permitido. Solo {}",
                format,
                ALLOWED_FORMATS.join(", ")
            ));
        }
        if photo.size() > MAX_PHOTO_BYTES {
            messages.push(format!("Archivo {} supera 5MB", photo.original_name));
        }
    }
    messages
}
