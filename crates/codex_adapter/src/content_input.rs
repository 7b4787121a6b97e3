//! Maps `session_core::ContentBlock`s onto Codex `turn/start` inputs
//! (§4.4.2 "Content inputs"). Base64 images are spooled to a temp file (the
//! app-server only accepts a `localImage` path, not inline bytes) and the
//! file is deleted once the turn resolves, matching §5's resource policy
//! ("temp image files are deleted immediately after the request that
//! referenced them resolves, success or failure").

use session_core::{ContentBlock, ImageSourceWire};

use crate::error::CodexAdapterError;
use crate::protocol::TurnInput;

/// Holds the temp files created for one `turn/start` call so they can be
/// removed once the turn completes, regardless of outcome.
pub struct ContentInputGuard {
    files: Vec<tempfile::TempPath>,
}

impl ContentInputGuard {
    fn new() -> Self {
        Self { files: Vec::new() }
    }
}

/// Converts content blocks into Codex `TurnInput`s, spooling any base64
/// image to a temp file. The returned guard must be kept alive until the
/// turn resolves; dropping it deletes the temp files.
pub async fn content_blocks_to_turn_input(
    blocks: Vec<ContentBlock>,
) -> Result<(Vec<TurnInput>, ContentInputGuard), CodexAdapterError> {
    let mut guard = ContentInputGuard::new();
    let mut inputs = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => inputs.push(TurnInput::Text { text }),
            ContentBlock::Image { source } => match source {
                ImageSourceWire::Url { url } => inputs.push(TurnInput::Image { url }),
                ImageSourceWire::Base64 { data, media_type } => {
                    let bytes = base64::Engine::decode(
                        &base64::engine::general_purpose::STANDARD,
                        data.as_bytes(),
                    )
                    .map_err(|e| CodexAdapterError::InvalidRequest(format!("invalid base64 image data: {e}")))?;
                    let suffix = extension_for_media_type(&media_type);
                    let named = tokio::task::spawn_blocking(move || {
                        tempfile::Builder::new().suffix(&suffix).tempfile()
                    })
                    .await
                    .map_err(|e| CodexAdapterError::InvalidRequest(e.to_string()))?
                    .map_err(CodexAdapterError::TempIo)?;
                    let (mut file, path) = named.into_parts();
                    {
                        use std::io::Write;
                        file.write_all(&bytes).map_err(CodexAdapterError::TempIo)?;
                    }
                    let path_str = path.to_string_lossy().into_owned();
                    guard.files.push(path);
                    inputs.push(TurnInput::LocalImage { path: path_str });
                }
            },
            // Every other content block kind has no direct Codex turn-input
            // representation; §4.4.2 only names text and image inputs.
            _ => {}
        }
    }

    Ok((inputs, guard))
}

fn extension_for_media_type(media_type: &str) -> String {
    match media_type {
        "image/png" => ".png".to_string(),
        "image/jpeg" | "image/jpg" => ".jpg".to_string(),
        "image/gif" => ".gif".to_string(),
        "image/webp" => ".webp".to_string(),
        _ => ".bin".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_block_maps_to_text_input() {
        let (inputs, _guard) = content_blocks_to_turn_input(vec![ContentBlock::Text {
            text: "hello".to_string(),
        }])
        .await
        .unwrap();
        assert!(matches!(inputs[0], TurnInput::Text { .. }));
    }

    #[tokio::test]
    async fn image_url_maps_to_image_input() {
        let (inputs, _guard) = content_blocks_to_turn_input(vec![ContentBlock::Image {
            source: ImageSourceWire::Url {
                url: "https://example.com/a.png".to_string(),
            },
        }])
        .await
        .unwrap();
        assert!(matches!(inputs[0], TurnInput::Image { .. }));
    }

    #[tokio::test]
    async fn base64_image_spools_to_temp_file() {
        let data = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"fake-png-bytes");
        let (inputs, guard) = content_blocks_to_turn_input(vec![ContentBlock::Image {
            source: ImageSourceWire::Base64 {
                data,
                media_type: "image/png".to_string(),
            },
        }])
        .await
        .unwrap();
        match &inputs[0] {
            TurnInput::LocalImage { path } => assert!(std::path::Path::new(path).exists()),
            _ => panic!("expected local image input"),
        }
        assert_eq!(guard.files.len(), 1);
    }
}
