//! Generated image artifacts – barcodes and QR codes bound to record fields.
//!
//! Barcode refresh is synchronous. QR generation is split into a collect /
//! run / commit cycle so callers can overlap the (comparatively expensive)
//! matrix rendering with other work: every collected job carries a generation
//! number, and a commit is discarded when a newer refresh has bumped the
//! artifact's generation in the meantime.

use std::collections::HashMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::QrCode;

use crate::code128;
use crate::dom::{ElementNode, Tag};
use crate::placeholder::FIELD_NAME_ATTR;
use crate::resolver::{FieldMap, Record};

pub const BARCODE_CLASS: &str = "dynamic-barcode";
pub const QRCODE_CLASS: &str = "dynamic-qrcode";
pub const ARTIFACT_ID_ATTR: &str = "data-artifact-id";

const BARCODE_MODULE_WIDTH: u32 = 3;
const BARCODE_HEIGHT: u32 = 80;
const QR_SIZE: u32 = 300;

/// Per-artifact generation counters. One tracker lives as long as the
/// document it tracks; ids are minted on first encounter and persisted on the
/// element so later refreshes find them again.
#[derive(Debug, Default)]
pub struct ArtifactTracker {
    next_id: u64,
    generations: HashMap<String, u64>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_id(&mut self) -> String {
        self.next_id += 1;
        format!("qr-{}", self.next_id)
    }

    fn bump(&mut self, artifact_id: &str) -> u64 {
        let gen = self.generations.entry(artifact_id.to_string()).or_insert(0);
        *gen += 1;
        *gen
    }

    pub fn current(&self, artifact_id: &str) -> Option<u64> {
        self.generations.get(artifact_id).copied()
    }
}

/// A pending QR render. Valid for commit only while its generation is still
/// the artifact's latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrJob {
    pub artifact_id: String,
    pub generation: u64,
    pub payload: String,
}

/// Outcome of running a [`QrJob`]. `data_uri` is `None` when rendering
/// failed; committing that hides the image rather than leaving stale pixels.
#[derive(Debug, Clone)]
pub struct QrResult {
    pub artifact_id: String,
    pub generation: u64,
    pub data_uri: Option<String>,
}

/// Re-render every `img.dynamic-barcode` under `root` from the current
/// record. Unresolvable, empty, or non-encodable payloads hide the image.
pub fn refresh_barcodes(root: &mut ElementNode, record: &Record, map: &FieldMap) {
    root.visit_elements_mut(&mut |el| {
        if el.tag == Tag::Img && el.has_class(BARCODE_CLASS) {
            refresh_one_barcode(el, record, map);
        }
    });
}

fn refresh_one_barcode(img: &mut ElementNode, record: &Record, map: &FieldMap) {
    let field_name = img
        .attr(FIELD_NAME_ATTR)
        .unwrap_or("")
        .trim()
        .to_string();
    if field_name.is_empty() {
        img.set_style_value("display", "none");
        return;
    }

    let res = map.resolve(&field_name, record);
    let payload = strip_markup(&res.value);
    if !res.found || payload.is_empty() {
        img.set_style_value("display", "none");
        return;
    }
    if !payload.is_ascii() {
        log::warn!("barcode field {field_name:?} holds non-ASCII text; hiding the image");
        img.set_style_value("display", "none");
        return;
    }

    let modules = match code128::encode(&payload) {
        Ok(m) => m,
        Err(err) => {
            log::error!("barcode field {field_name:?}: {err}");
            img.set_style_value("display", "none");
            return;
        }
    };
    let uri = png_data_uri(&render_barcode(&modules));

    if img.src() != Some(uri.as_str()) {
        let (width, height) = preserved_dimensions(img);
        img.set_attr("src", &uri);
        // Human-readable fallback for the encoded value.
        img.set_attr("alt", &payload);
        img.remove_style_value("display");
        reapply_dimensions(img, width, height);
    } else {
        img.remove_style_value("display");
    }
}

/// Collect a render job for every `img.dynamic-qrcode` whose field resolves
/// to a non-empty value; hide the rest. Bumps each collected artifact's
/// generation, invalidating any job still in flight for it.
pub fn collect_qr_jobs(
    root: &mut ElementNode,
    record: &Record,
    map: &FieldMap,
    tracker: &mut ArtifactTracker,
) -> Vec<QrJob> {
    let mut jobs = Vec::new();
    root.visit_elements_mut(&mut |el| {
        if el.tag != Tag::Img || !el.has_class(QRCODE_CLASS) {
            return;
        }
        let field_name = el.attr(FIELD_NAME_ATTR).unwrap_or("").trim().to_string();
        let res = if field_name.is_empty() {
            crate::resolver::Resolution::miss()
        } else {
            map.resolve(&field_name, record)
        };
        if res.is_blank() {
            el.set_style_value("display", "none");
            return;
        }
        let artifact_id = match el.attr(ARTIFACT_ID_ATTR) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = tracker.mint_id();
                el.set_attr(ARTIFACT_ID_ATTR, &id);
                id
            }
        };
        let generation = tracker.bump(&artifact_id);
        jobs.push(QrJob {
            artifact_id,
            generation,
            payload: res.value,
        });
    });
    jobs
}

/// Render one QR job to a PNG data URI. Pure with respect to the document;
/// safe to run off to the side between collect and commit.
pub fn run_qr_job(job: &QrJob) -> QrResult {
    let data_uri = match QrCode::new(job.payload.as_bytes()) {
        Ok(code) => {
            let image = code
                .render::<Luma<u8>>()
                .quiet_zone(false)
                .min_dimensions(QR_SIZE, QR_SIZE)
                .build();
            let mut bytes = Vec::new();
            match image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png) {
                Ok(()) => Some(png_data_uri(&bytes)),
                Err(err) => {
                    log::error!("qr artifact {}: png encode failed: {err}", job.artifact_id);
                    None
                }
            }
        }
        Err(err) => {
            log::error!("qr artifact {}: {err}", job.artifact_id);
            None
        }
    };
    QrResult {
        artifact_id: job.artifact_id.clone(),
        generation: job.generation,
        data_uri,
    }
}

/// Apply a finished QR render to the document. Returns false when the result
/// was stale (a newer collect superseded it) or its image no longer exists.
pub fn commit_qr_result(
    root: &mut ElementNode,
    tracker: &ArtifactTracker,
    result: &QrResult,
) -> bool {
    if tracker.current(&result.artifact_id) != Some(result.generation) {
        log::debug!("qr artifact {}: stale result discarded", result.artifact_id);
        return false;
    }
    let Some(img) = find_artifact_img(root, &result.artifact_id) else {
        return false;
    };
    match &result.data_uri {
        Some(uri) => {
            if img.src() != Some(uri.as_str()) {
                let (width, height) = preserved_dimensions(img);
                img.set_attr("src", uri);
                img.remove_style_value("display");
                reapply_dimensions(img, width, height);
            } else {
                img.remove_style_value("display");
            }
        }
        None => img.set_style_value("display", "none"),
    }
    true
}

fn find_artifact_img<'a>(el: &'a mut ElementNode, id: &str) -> Option<&'a mut ElementNode> {
    let is_match = el.tag == Tag::Img && el.attr(ARTIFACT_ID_ATTR) == Some(id);
    if is_match {
        return Some(el);
    }
    for child in &mut el.children {
        if let Some(e) = child.as_element_mut() {
            if let Some(found) = find_artifact_img(e, id) {
                return Some(found);
            }
        }
    }
    None
}

/// The dimensions a regenerated image must keep, inline style first, then the
/// width/height attributes.
fn preserved_dimensions(img: &ElementNode) -> (Option<String>, Option<String>) {
    let width = img
        .style_value("width")
        .or_else(|| img.attr("width").map(str::to_string));
    let height = img
        .style_value("height")
        .or_else(|| img.attr("height").map(str::to_string));
    (width, height)
}

fn reapply_dimensions(img: &mut ElementNode, width: Option<String>, height: Option<String>) {
    for (prop, value) in [("width", width), ("height", height)] {
        let Some(value) = value else { continue };
        if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() {
            img.set_attr(prop, &value);
            img.set_style_value(prop, &format!("{value}px"));
        } else {
            img.set_style_value(prop, &value);
        }
    }
}

fn render_barcode(modules: &[bool]) -> Vec<u8> {
    let width = modules.len() as u32 * BARCODE_MODULE_WIDTH;
    let image = GrayImage::from_fn(width, BARCODE_HEIGHT, |x, _| {
        let module = (x / BARCODE_MODULE_WIDTH) as usize;
        if modules[module] {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });
    let mut bytes = Vec::new();
    // Writing a gray PNG into a Vec cannot fail.
    if let Err(err) = image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png) {
        log::error!("barcode png encode failed: {err}");
    }
    bytes
}

fn png_data_uri(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

/// Remove tags and collapse the remaining text, so attachment markup or
/// multi-paragraph values still yield a plain payload.
fn strip_markup(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_tag = false;
    for ch in value.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
