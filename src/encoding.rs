//! Filename encoding resolution for legacy archives.
//!
//! Many ZIP writers (notably on Windows) stored member names in a local code
//! page and left the UTF-8 name flag unset, so the original byte sequence has
//! to be decoded heuristically. Names within one archive are usually
//! homogeneous, so the last successful guess is cached and re-verified by
//! round-tripping the decoded text back into bytes; when an archive mixes
//! encodings the cache self-corrects by falling back to the configured
//! preferred encoding and then to a fresh detection pass. CP437, the format's
//! historical filename code page, is the unconditional terminal fallback and
//! never fails.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::cp437;

/// Default preferred encoding when the caller does not configure one.
pub const DEFAULT_PREFERRED: &str = "cp866";

/// Stateful filename decoder. One resolver per archive session; the cached
/// guess must not leak between concurrently open archives.
pub struct EncodingResolver {
    /// Last encoding that decoded a segment and survived the round-trip
    /// check. Cleared when two consecutive guesses disagree.
    latest: Option<&'static Encoding>,
    /// Encoding to try once when the cached one stops matching.
    preferred: &'static Encoding,
}

impl EncodingResolver {
    /// Create a resolver with the given preferred encoding label
    /// (e.g. `"cp866"`, `"shift_jis"`). Unknown labels fall back to the
    /// default preferred encoding.
    pub fn new(preferred_label: &str) -> Self {
        let preferred = Encoding::for_label(preferred_label.as_bytes())
            .or_else(|| Encoding::for_label(DEFAULT_PREFERRED.as_bytes()))
            .expect("default encoding label is always known");
        Self {
            latest: None,
            preferred,
        }
    }

    /// Decode a raw member name. Each `/`-delimited segment is decoded
    /// independently, which reduces misdetection when parent and child
    /// names use different scripts.
    pub fn decode_name(&mut self, raw: &[u8]) -> String {
        let segments: Vec<String> = raw
            .split(|&b| b == b'/')
            .map(|segment| self.decode_segment(segment).1)
            .collect();
        segments.join("/")
    }

    /// Decode one path segment, returning the winning encoding name and the
    /// decoded text. Three bounded attempts: the cached encoding, then the
    /// preferred one, then fresh statistical detection; if all reject the
    /// bytes, CP437 decodes them unconditionally.
    pub fn decode_segment(&mut self, segment: &[u8]) -> (&'static str, String) {
        self.decode_segment_with(segment, detect)
    }

    fn decode_segment_with(
        &mut self,
        segment: &[u8],
        detector: impl Fn(&[u8]) -> &'static Encoding,
    ) -> (&'static str, String) {
        for attempt in 0..3 {
            match self.latest {
                Some(encoding) => {
                    if let Some(text) = round_trip(encoding, segment) {
                        return (encoding.name(), text);
                    }
                    // First miss retries the preferred encoding; repeated
                    // misses force a fresh detection pass.
                    if attempt == 0 && encoding != self.preferred {
                        self.latest = Some(self.preferred);
                    } else {
                        self.latest = None;
                    }
                }
                None => {
                    let guessed = detector(segment);
                    if let Some(text) = round_trip(guessed, segment) {
                        self.latest = Some(guessed);
                        return (guessed.name(), text);
                    }
                    return ("cp437", cp437::decode(segment));
                }
            }
        }
        ("cp437", cp437::decode(segment))
    }
}

/// Statistical charset detection over a name segment.
fn detect(segment: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(segment, true);
    detector.guess(None, true)
}

/// Decode `bytes` with `encoding` and verify that re-encoding the text
/// reproduces the original bytes exactly; a lossy decode or a diverging
/// re-encode rejects the attempt.
fn round_trip(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let (text, malformed) = encoding.decode_without_bom_handling(bytes);
    if malformed {
        return None;
    }
    let (reencoded, _, unmappable) = encoding.encode(&text);
    if unmappable || reencoded.as_ref() != bytes {
        return None;
    }
    Some(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_decodes_and_caches() {
        let mut resolver = EncodingResolver::new("cp866");
        let (_, text) = resolver.decode_segment(b"readme.txt");
        assert_eq!(text, "readme.txt");
        assert!(resolver.latest.is_some());
    }

    #[test]
    fn name_segments_are_joined_with_slashes() {
        let mut resolver = EncodingResolver::new("cp866");
        assert_eq!(resolver.decode_name(b"docs/readme.txt"), "docs/readme.txt");
        // Trailing slash of directory entries survives decoding.
        assert_eq!(resolver.decode_name(b"docs/"), "docs/");
    }

    #[test]
    fn stale_cache_falls_back_to_preferred() {
        let mut resolver = EncodingResolver::new("cp866");
        resolver.latest = Some(encoding_rs::UTF_8);
        // "Привет" in cp866: invalid UTF-8, so the cached encoding is
        // rejected and the preferred one wins on the second attempt.
        let raw = [0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2];
        let (name, text) = resolver.decode_segment(&raw);
        assert_eq!(name, encoding_rs::IBM866.name());
        assert_eq!(text, "Привет");
        assert_eq!(resolver.latest, Some(encoding_rs::IBM866));
    }

    #[test]
    fn exhausted_detection_lands_on_cp437() {
        let mut resolver = EncodingResolver::new("utf-8");
        resolver.latest = Some(encoding_rs::UTF_8);
        // Invalid under the cache, the (equal) preferred encoding and the
        // injected detector; the terminal branch must decode via CP437
        // instead of failing.
        let raw = [b'n', 0xE4, b'm', 0xFF];
        let (name, text) = resolver.decode_segment_with(&raw, |_| encoding_rs::UTF_8);
        assert_eq!(name, "cp437");
        assert_eq!(text, cp437::decode(&raw));
    }
}
