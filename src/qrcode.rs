use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use thiserror::Error;

const MIN_DIMENSION: u32 = 264;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("pairing payload cannot be encoded as a QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),
}

/// Encodes a pairing payload as a self-contained `data:` URL holding an SVG
/// QR image, suitable for an `<img src>` attribute.
pub fn encode_data_url(payload: &str) -> Result<String, QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}
