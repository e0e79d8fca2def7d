//! In-process re-encoding with the `gif` crate.
//!
//! The input is composited into full canvases first, then written back out:
//!
//! - every profile crops each frame to the rectangle that changed since the
//!   previous frame (`O1`)
//! - `O2` additionally turns unchanged pixels inside that rectangle
//!   transparent, which LZW packs into long runs
//! - `O3` additionally folds identical consecutive frames into one frame
//!   with the summed delay
//!
//! Lossless never quantizes: a rectangle that fits one palette is indexed
//! exactly, and one that does not is painted as several exactly indexed
//! layers. Lossy profiles posterize low colour bits before quantizing.

use super::{CompressionProfile, Transcoder};
use crate::result::{CastError, CastResult};
use async_trait::async_trait;
use gif::{ColorOutput, DecodeOptions, DisposalMethod, Encoder, Repeat};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::debug;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Re-encodes GIFs in-process on a blocking task
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTranscoder;

impl NativeTranscoder {
    /// Create a native transcoder
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transcoder for NativeTranscoder {
    async fn transcode(&self, input: &[u8], profile: &CompressionProfile) -> CastResult<Vec<u8>> {
        let input = input.to_vec();
        let profile = *profile;
        tokio::task::spawn_blocking(move || reencode(&input, &profile))
            .await
            .map_err(|e| CastError::encode(format!("transcode task panicked: {e}")))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    left: u16,
    top: u16,
    width: u16,
    height: u16,
}

/// One fully composited canvas and how long it is shown
#[derive(Debug, Clone)]
struct Still {
    rgba: Vec<u8>,
    delay: u16,
}

#[derive(Debug)]
struct Timeline {
    width: u16,
    height: u16,
    stills: Vec<Still>,
}

fn reencode(input: &[u8], profile: &CompressionProfile) -> CastResult<Vec<u8>> {
    let mut timeline = composite(input)?;
    let source_frames = timeline.stills.len();

    let bits = posterize_bits(profile);
    if bits > 0 {
        for still in &mut timeline.stills {
            posterize(&mut still.rgba, bits);
        }
    }
    if profile.optimization() >= 3 {
        merge_identical(&mut timeline.stills);
    }

    let output = write_optimized(&timeline, profile)?;
    debug!(
        profile = %profile,
        source_frames,
        written_frames = timeline.stills.len(),
        bytes = output.len(),
        "re-encoded GIF"
    );
    Ok(output)
}

fn composite(input: &[u8]) -> CastResult<Timeline> {
    let mut options = DecodeOptions::new();
    options.set_color_output(ColorOutput::RGBA);
    let mut decoder = options
        .read_info(Cursor::new(input))
        .map_err(|e| CastError::decode(format!("failed to read GIF: {e}")))?;

    let (width, height) = (decoder.width(), decoder.height());
    let mut canvas = vec![0u8; usize::from(width) * usize::from(height) * 4];
    let mut stills = Vec::new();

    while let Some(frame) = decoder
        .read_next_frame()
        .map_err(|e| CastError::decode(format!("failed to read GIF frame: {e}")))?
    {
        let rect = Rect {
            left: frame.left,
            top: frame.top,
            width: frame.width,
            height: frame.height,
        };
        let saved = (frame.dispose == DisposalMethod::Previous).then(|| canvas.clone());
        blit(&mut canvas, width, height, rect, &frame.buffer);
        stills.push(Still {
            rgba: canvas.clone(),
            delay: frame.delay,
        });
        match frame.dispose {
            DisposalMethod::Background => clear(&mut canvas, width, height, rect),
            DisposalMethod::Previous => {
                if let Some(saved) = saved {
                    canvas = saved;
                }
            }
            _ => {}
        }
    }

    if stills.is_empty() {
        return Err(CastError::decode("GIF contains no frames"));
    }
    Ok(Timeline {
        width,
        height,
        stills,
    })
}

fn blit(canvas: &mut [u8], width: u16, height: u16, rect: Rect, buffer: &[u8]) {
    for y in 0..rect.height {
        let cy = rect.top.saturating_add(y);
        if cy >= height {
            break;
        }
        for x in 0..rect.width {
            let cx = rect.left.saturating_add(x);
            if cx >= width {
                break;
            }
            let src = (usize::from(y) * usize::from(rect.width) + usize::from(x)) * 4;
            let Some(px) = buffer.get(src..src + 4) else {
                return;
            };
            if px[3] == 0 {
                continue;
            }
            let dst = (usize::from(cy) * usize::from(width) + usize::from(cx)) * 4;
            canvas[dst..dst + 3].copy_from_slice(&px[..3]);
            canvas[dst + 3] = 255;
        }
    }
}

fn clear(canvas: &mut [u8], width: u16, height: u16, rect: Rect) {
    for y in rect.top..rect.top.saturating_add(rect.height).min(height) {
        for x in rect.left..rect.left.saturating_add(rect.width).min(width) {
            let dst = (usize::from(y) * usize::from(width) + usize::from(x)) * 4;
            canvas[dst..dst + 4].copy_from_slice(&TRANSPARENT);
        }
    }
}

/// Low colour bits dropped per channel
fn posterize_bits(profile: &CompressionProfile) -> u32 {
    match *profile {
        CompressionProfile::Lossless { .. } => 0,
        CompressionProfile::Lossy { loss, .. } => (u32::from(loss) * 3 / 200).min(3),
        CompressionProfile::UltraLossy { loss, .. } => (u32::from(loss) * 3 / 200 + 1).min(5),
    }
}

fn quantizer_speed(profile: &CompressionProfile) -> i32 {
    match profile {
        CompressionProfile::Lossless { .. } => 1,
        CompressionProfile::Lossy { .. } => 10,
        CompressionProfile::UltraLossy { .. } => 30,
    }
}

fn posterize(rgba: &mut [u8], bits: u32) {
    let mask = 0xFFu8 << bits;
    for px in rgba.chunks_exact_mut(4) {
        if px[3] != 0 {
            px[0] &= mask;
            px[1] &= mask;
            px[2] &= mask;
        }
    }
}

fn merge_identical(stills: &mut Vec<Still>) {
    let mut merged: Vec<Still> = Vec::with_capacity(stills.len());
    for still in stills.drain(..) {
        match merged.last_mut() {
            Some(last) if last.rgba == still.rgba => {
                last.delay = last.delay.saturating_add(still.delay);
            }
            _ => merged.push(still),
        }
    }
    *stills = merged;
}

fn changed_rect(previous: &[u8], current: &[u8], width: u16) -> Option<Rect> {
    let stride = usize::from(width);
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for (i, (old, new)) in previous
        .chunks_exact(4)
        .zip(current.chunks_exact(4))
        .enumerate()
    {
        if old == new {
            continue;
        }
        let (x, y) = (i % stride, i / stride);
        bounds = Some(match bounds {
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            None => (x, y, x, y),
        });
    }
    let (x0, y0, x1, y1) = bounds?;
    Some(Rect {
        left: u16::try_from(x0).ok()?,
        top: u16::try_from(y0).ok()?,
        width: u16::try_from(x1 - x0 + 1).ok()?,
        height: u16::try_from(y1 - y0 + 1).ok()?,
    })
}

fn crop(rgba: &[u8], canvas_width: u16, rect: Rect) -> Vec<u8> {
    let stride = usize::from(canvas_width) * 4;
    let row_len = usize::from(rect.width) * 4;
    let mut out = Vec::with_capacity(row_len * usize::from(rect.height));
    for y in 0..usize::from(rect.height) {
        let start = (usize::from(rect.top) + y) * stride + usize::from(rect.left) * 4;
        out.extend_from_slice(&rgba[start..start + row_len]);
    }
    out
}

fn write_optimized(timeline: &Timeline, profile: &CompressionProfile) -> CastResult<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = Encoder::new(&mut output, timeline.width, timeline.height, &[])
        .map_err(|e| CastError::encode(format!("failed to create GIF encoder: {e}")))?;
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| CastError::encode(format!("failed to set GIF repeat: {e}")))?;

    let mut previous: Option<&[u8]> = None;
    for still in &timeline.stills {
        for frame in optimized_frames(timeline.width, timeline.height, still, previous, profile) {
            encoder
                .write_frame(&frame)
                .map_err(|e| CastError::encode(format!("failed to write GIF frame: {e}")))?;
        }
        previous = Some(&still.rgba);
    }

    encoder
        .into_inner()
        .map_err(|e| CastError::encode(format!("failed to write GIF trailer: {e}")))?;
    Ok(output)
}

/// Frames that draw `still` over `previous`
///
/// Lossy profiles always yield one quantized frame. Lossless yields one
/// exactly indexed frame when the rectangle fits a palette, and otherwise
/// several zero-delay layers that together paint every colour exactly.
fn optimized_frames(
    width: u16,
    height: u16,
    still: &Still,
    previous: Option<&[u8]>,
    profile: &CompressionProfile,
) -> Vec<gif::Frame<'static>> {
    let rect = match previous {
        // An unchanged canvas still needs a frame to carry its delay.
        Some(prev) => changed_rect(prev, &still.rgba, width).unwrap_or(Rect {
            left: 0,
            top: 0,
            width: 1,
            height: 1,
        }),
        None => Rect {
            left: 0,
            top: 0,
            width,
            height,
        },
    };

    let opaque = crop(&still.rgba, width, rect);
    let mut pixels = opaque.clone();
    if let (Some(prev), true) = (previous, profile.optimization() >= 2) {
        let before = crop(prev, width, rect);
        for (px, old) in pixels.chunks_exact_mut(4).zip(before.chunks_exact(4)) {
            if px == old {
                px.copy_from_slice(&TRANSPARENT);
            }
        }
    }
    clear_invisible(&mut pixels);

    let mut frames = match profile {
        CompressionProfile::Lossless { .. } => exact_palette_frame(rect, &pixels)
            .or_else(|| {
                // The transparency slot can push a full palette over 256 entries.
                let mut opaque = opaque;
                clear_invisible(&mut opaque);
                exact_palette_frame(rect, &opaque)
            })
            .map_or_else(|| layered_palette_frames(rect, &pixels), |frame| vec![frame]),
        _ => vec![gif::Frame::from_rgba_speed(
            rect.width,
            rect.height,
            &mut pixels,
            quantizer_speed(profile),
        )],
    };

    let last = frames.len().saturating_sub(1);
    for (i, frame) in frames.iter_mut().enumerate() {
        frame.left = rect.left;
        frame.top = rect.top;
        frame.delay = if i == last { still.delay } else { 0 };
        frame.dispose = DisposalMethod::Keep;
    }
    frames
}

fn clear_invisible(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        if px[3] == 0 {
            px.copy_from_slice(&TRANSPARENT);
        }
    }
}

/// Split a rectangle with too many colours into exactly indexed layers
///
/// Each layer holds up to 255 colours; index 255 is transparent, so pixels
/// belonging to other layers keep whatever the canvas shows underneath.
fn layered_palette_frames(rect: Rect, rgba: &[u8]) -> Vec<gif::Frame<'static>> {
    const LAYER_COLOURS: usize = 255;

    let mut palettes: Vec<Vec<u8>> = Vec::new();
    let mut lookup: HashMap<[u8; 3], (usize, u8)> = HashMap::new();
    let mut slots = Vec::with_capacity(rgba.len() / 4);

    for px in rgba.chunks_exact(4) {
        if px[3] == 0 {
            slots.push(None);
            continue;
        }
        let key = [px[0], px[1], px[2]];
        let slot = *lookup.entry(key).or_insert_with(|| {
            if !palettes.last().is_some_and(|p| p.len() / 3 < LAYER_COLOURS) {
                palettes.push(Vec::with_capacity(256 * 3));
            }
            let layer = palettes.len() - 1;
            let palette = &mut palettes[layer];
            let index = (palette.len() / 3) as u8;
            palette.extend_from_slice(&key);
            (layer, index)
        });
        slots.push(Some(slot));
    }

    let transparent = LAYER_COLOURS as u8;
    palettes
        .into_iter()
        .enumerate()
        .map(|(layer, mut palette)| {
            palette.resize(256 * 3, 0);
            let indices: Vec<u8> = slots
                .iter()
                .map(|slot| match slot {
                    Some((l, index)) if *l == layer => *index,
                    _ => transparent,
                })
                .collect();
            gif::Frame::from_palette_pixels(
                rect.width,
                rect.height,
                indices.as_slice(),
                palette.as_slice(),
                Some(transparent),
            )
        })
        .collect()
}

/// Index the frame against its own colours; `None` past 256 entries
fn exact_palette_frame(rect: Rect, rgba: &[u8]) -> Option<gif::Frame<'static>> {
    let mut palette: Vec<u8> = Vec::new();
    let mut lookup: HashMap<[u8; 3], u8> = HashMap::new();
    let mut transparent: Option<u8> = None;
    let mut indices = Vec::with_capacity(rgba.len() / 4);

    for px in rgba.chunks_exact(4) {
        let index = if px[3] == 0 {
            if let Some(index) = transparent {
                index
            } else {
                let index = u8::try_from(palette.len() / 3).ok()?;
                palette.extend_from_slice(&TRANSPARENT[..3]);
                transparent = Some(index);
                index
            }
        } else {
            let key = [px[0], px[1], px[2]];
            if let Some(&index) = lookup.get(&key) {
                index
            } else {
                let index = u8::try_from(palette.len() / 3).ok()?;
                palette.extend_from_slice(&key);
                lookup.insert(key, index);
                index
            }
        };
        indices.push(index);
    }

    Some(gif::Frame::from_palette_pixels(
        rect.width,
        rect.height,
        indices.as_slice(),
        palette.as_slice(),
        transparent,
    ))
}
