//! FFmpeg video filter definitions.

/// HDR (PQ/HLG) to SDR BT.709 conversion with the Hable curve.
///
/// Linearizes, converts primaries in float, tone-maps, then encodes to
/// limited-range BT.709 `yuv420p`.
pub const FILTER_TONEMAP_HABLE: &str = concat!(
    "zscale=t=linear:npl=100,",
    "format=gbrpf32le,",
    "zscale=p=bt709,",
    "tonemap=tonemap=hable:desat=0,",
    "zscale=t=bt709:m=bt709:r=tv,",
    "format=yuv420p"
);

/// Scale to `height`, keeping aspect with an even width.
pub fn scale_to_height(height: u32) -> String {
    format!("scale=-2:{}", height)
}

/// Fit into a `width`x`height` box, letterboxed and centred.
pub fn fit_box(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// Sample one frame every `interval` seconds.
pub fn sample_every(interval: f64) -> String {
    format!("fps=1/{}", interval)
}

/// Join filter stages, tone-mapping first when the source is HDR.
pub fn chain(tone_map: bool, stages: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(stages.len() + 1);
    if tone_map {
        parts.push(FILTER_TONEMAP_HABLE);
    }
    parts.extend(stages.iter().map(String::as_str));
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tonemap_uses_hable() {
        assert!(FILTER_TONEMAP_HABLE.contains("tonemap=hable"));
        assert!(FILTER_TONEMAP_HABLE.ends_with("format=yuv420p"));
    }

    #[test]
    fn test_chain_orders_tonemap_first() {
        let sdr = chain(false, &[scale_to_height(720)]);
        assert_eq!(sdr, "scale=-2:720");

        let hdr = chain(true, &[scale_to_height(720)]);
        assert!(hdr.starts_with("zscale=t=linear"));
        assert!(hdr.ends_with(",scale=-2:720"));
    }

    #[test]
    fn test_filmstrip_filters() {
        assert_eq!(sample_every(1.0), "fps=1/1");
        assert_eq!(
            fit_box(160, 90),
            "scale=160:90:force_original_aspect_ratio=decrease,pad=160:90:(ow-iw)/2:(oh-ih)/2"
        );
    }
}
