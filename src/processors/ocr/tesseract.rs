//! Line-level OCR with the `tesseract` CLI.

use std::io::Write as _;

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

/// A line of recognized text, in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrLine {
    pub text: String,
    /// Mean word confidence, from 0.0 to 1.0.
    pub confidence: f64,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// OCR results for one image.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrPage {
    pub width: u32,
    pub height: u32,
    pub lines: Vec<OcrLine>,
}

/// Settings for running `tesseract`.
#[derive(Clone, Debug)]
pub struct TesseractSettings {
    /// Language models, such as `spa` or `spa+eng`.
    pub lang: String,
    /// Page segmentation mode.
    pub psm: u32,
    /// Extra `-c NAME=VALUE` config variables.
    pub config_vars: Vec<(String, String)>,
}

/// Run `tesseract` on an image and parse its TSV output.
#[instrument(level = "debug", skip_all, fields(lang = %settings.lang))]
pub async fn recognize(
    settings: &TesseractSettings,
    extension: &str,
    image: Vec<u8>,
) -> Result<OcrPage> {
    // Write our input to a temporary file.
    let suffix = format!(".{extension}");
    let input_file = spawn_blocking_propagating_panics(move || -> Result<_> {
        let mut file = tempfile::Builder::new()
            .prefix("tesseract")
            .suffix(&suffix)
            .tempfile()
            .context("cannot create tesseract input file")?;
        file.write_all(&image)
            .and_then(|()| file.flush())
            .context("cannot write tesseract input file")?;
        Ok(file)
    })
    .await?;

    let mut cmd = Command::new("tesseract");
    cmd.arg(input_file.path())
        .arg("stdout")
        .arg("-l")
        .arg(&settings.lang)
        .arg("--psm")
        .arg(settings.psm.to_string());
    for (name, value) in &settings.config_vars {
        cmd.arg("-c").arg(format!("{name}={value}"));
    }
    cmd.arg("tsv");
    let output = with_cpu_semaphore(|| async {
        cmd.output().await.context("cannot run tesseract")
    })
    .await?;
    check_for_command_failure("tesseract", &output, None)?;

    parse_tsv(&String::from_utf8_lossy(&output.stdout))
}

/// A line we're still collecting words for.
struct LineBuilder {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    confidences: Vec<f64>,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl LineBuilder {
    fn finish(self) -> Option<OcrLine> {
        let text = self.words.join(" ");
        if text.trim().is_empty() {
            return None;
        }
        let confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f64>() / self.confidences.len() as f64 / 100.0
        };
        Some(OcrLine {
            text: text.trim().to_owned(),
            confidence,
            left: self.left,
            top: self.top,
            width: self.right - self.left,
            height: self.bottom - self.top,
        })
    }
}

/// Parse `tesseract ... tsv` output, grouping words into lines.
///
/// Columns are `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Level 1 rows describe the page, level 5 rows are
/// words.
pub fn parse_tsv(tsv: &str) -> Result<OcrPage> {
    let mut size = None;
    let mut lines = vec![];
    let mut current: Option<LineBuilder> = None;

    for (idx, row) in tsv.lines().enumerate() {
        if row.starts_with("level") || row.trim().is_empty() {
            continue;
        }
        let cols = row.splitn(12, '\t').collect::<Vec<_>>();
        if cols.len() < 11 {
            return Err(anyhow!("malformed tesseract output on line {}: {:?}", idx + 1, row));
        }
        let num = |col: usize| -> Result<u32> {
            cols[col].trim().parse::<u32>().with_context(|| {
                format!("bad number in tesseract output on line {}: {:?}", idx + 1, row)
            })
        };
        match num(0)? {
            1 if size.is_none() => size = Some((num(8)?, num(9)?)),
            5 => {
                let text = cols.get(11).copied().unwrap_or("").trim();
                if text.is_empty() {
                    continue;
                }
                let key = (num(1)?, num(2)?, num(3)?, num(4)?);
                let (left, top) = (num(6)?, num(7)?);
                let (right, bottom) = (left + num(8)?, top + num(9)?);
                let conf = cols[10].trim().parse::<f64>().unwrap_or(-1.0);

                if current.as_ref().is_some_and(|line| line.key != key) {
                    lines.extend(current.take().and_then(LineBuilder::finish));
                }
                let line = current.get_or_insert_with(|| LineBuilder {
                    key,
                    words: vec![],
                    confidences: vec![],
                    left,
                    top,
                    right,
                    bottom,
                });
                line.words.push(text.to_owned());
                if conf >= 0.0 {
                    line.confidences.push(conf);
                }
                line.left = line.left.min(left);
                line.top = line.top.min(top);
                line.right = line.right.max(right);
                line.bottom = line.bottom.max(bottom);
            }
            _ => {}
        }
    }
    lines.extend(current.take().and_then(LineBuilder::finish));

    let (width, height) = size.ok_or_else(|| anyhow!("tesseract output has no page row"))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("tesseract reported an empty page"));
    }
    Ok(OcrPage {
        width,
        height,
        lines,
    })
}
