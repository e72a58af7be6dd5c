use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Turns a preprocessed grayscale crop into zero or more lines of text.
#[allow(async_fn_in_trait)]
pub trait TextRecognizer {
    async fn read_lines(&mut self, image: &GrayImage) -> Result<Vec<String>, OcrError>;
}

/// Runs `tesseract stdin stdout <args>` once per crop, feeding it PNG bytes.
pub struct TesseractRecognizer {
    program: String,
    args: Vec<String>,
}

impl TesseractRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TextRecognizer for TesseractRecognizer {
    async fn read_lines(&mut self, image: &GrayImage) -> Result<Vec<String>, OcrError> {
        let png = encode_png(image)?;

        let mut child = Command::new(&self.program)
            .arg("stdin")
            .arg("stdout")
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Io("could not get stdin handle".into()))?;
        stdin
            .write_all(&png)
            .await
            .map_err(|e| OcrError::Io(e.to_string()))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::Io(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(split_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>, OcrError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| OcrError::Encode(e.to_string()))?;
    Ok(buf)
}

fn split_lines(stdout: &str) -> Vec<String> {
    stdout.lines().map(str::to_string).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to spawn recognizer: {0}")]
    Spawn(String),
    #[error("recognizer io error: {0}")]
    Io(String),
    #[error("recognizer exited with error: {0}")]
    Failed(String),
    #[error("failed to encode region image: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_encoding_round_trips_dimensions() {
        let img = GrayImage::from_pixel(7, 3, image::Luma([200]));
        let png = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
    }

    #[test]
    fn output_split_keeps_blank_lines() {
        let lines = split_lines("\nKing's Row\n\u{c}");
        assert_eq!(lines, vec!["", "King's Row", "\u{c}"]);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let mut ocr = TesseractRecognizer::new("/nonexistent/tesseract", vec!["--psm".into(), "7".into()]);
        let img = GrayImage::new(4, 4);
        assert!(matches!(ocr.read_lines(&img).await, Err(OcrError::Spawn(_))));
    }
}
