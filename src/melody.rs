use crate::archive::{Archive, ArchiveError};
use crate::dom::{Document, DomError};
use thiserror::Error;

/// Shared container for discs that ship their melodies encrypted.
const BINARY_MELODY_PREFIX: &str = "export/melodies_10";
const BINARY_MELODY_SUFFIX: &str = ".chc";

#[derive(Error, Debug)]
pub enum MelodyError {
    #[error("Melody XML not found for song {0}")]
    NotFound(String),
    #[error("Binary melody decode failed: {0}")]
    Decode(String),
    #[error("Unable to find BPM info")]
    MissingTempo,
    #[error("Unknown tempo resolution: {0}")]
    UnknownTempoResolution(String),
    #[error("Invalid tempo value: {0}")]
    InvalidTempo(String),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Melody document error: {0}")]
    Dom(#[from] DomError),
}

/// The four configuration values newer discs derive their melody key from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptionKeys {
    pub product_name: String,
    pub product_code: String,
    pub territory: String,
    pub default_language: String,
}

/// Decoder for the proprietary binary melody container.
///
/// `load` is called once while the catalog is built; `decode` may then be
/// called from several song workers at once and must yield a document
/// equivalent to the plain-text melody XML.
pub trait MelodyDecoder: Send + Sync {
    fn load(&mut self, keys: &DecryptionKeys);

    fn decode(&self, container: &[u8], song_id: &str) -> Result<String, MelodyError>;
}

/// Decoder used when no binary melody support is available.
#[derive(Debug, Default)]
pub struct UnavailableDecoder {
    keys: Option<DecryptionKeys>,
}

impl MelodyDecoder for UnavailableDecoder {
    fn load(&mut self, keys: &DecryptionKeys) {
        self.keys = Some(keys.clone());
    }

    fn decode(&self, _container: &[u8], song_id: &str) -> Result<String, MelodyError> {
        let product = self
            .keys
            .as_ref()
            .map(|k| k.product_code.as_str())
            .unwrap_or("unknown product");
        Err(MelodyError::Decode(format!(
            "song {song_id} is stored in an encrypted melody container ({product}) and no decoder is available"
        )))
    }
}

/// Where a song's melody document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MelodySource {
    Plain,
    Binary,
}

/// Locate and parse a song's melody: the plain per-song XML if present,
/// otherwise the shared binary container run through `decoder`.
pub fn resolve(
    archive: &dyn Archive,
    decoder: &dyn MelodyDecoder,
    song_id: &str,
) -> Result<(Document, MelodySource), MelodyError> {
    let plain_prefix = format!("export/{song_id}/melody");
    if let Some(path) = archive.find(&plain_prefix, ".xml") {
        log::debug!("[{song_id}] Melody from {path}");
        let bytes = archive.read(path)?;
        return Ok((Document::parse(&bytes)?, MelodySource::Plain));
    }

    let path = archive
        .find(BINARY_MELODY_PREFIX, BINARY_MELODY_SUFFIX)
        .ok_or_else(|| MelodyError::NotFound(song_id.to_string()))?;
    log::debug!("[{song_id}] Melody from binary container {path}");
    let bytes = archive.read(path)?;
    let xml = decoder.decode(&bytes, song_id)?;
    Ok((Document::parse_str(xml)?, MelodySource::Binary))
}

/// Tempo and duet flag read from the melody root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelodyHeader {
    pub tempo: f64,
    pub duet: bool,
}

/// Read tempo (normalised to semiquaver resolution) and the duet flag.
pub fn read_header(doc: &Document) -> Result<MelodyHeader, MelodyError> {
    let root = doc
        .find("/MELODY")
        .into_iter()
        .next()
        .ok_or(MelodyError::MissingTempo)?;

    let raw = root.attr("Tempo").ok_or(MelodyError::MissingTempo)?;
    let mut tempo: f64 = raw
        .trim()
        .parse()
        .map_err(|_| MelodyError::InvalidTempo(raw.to_string()))?;

    let resolution = root.attr("Resolution").unwrap_or_default();
    match resolution {
        "Semiquaver" => {}
        "Demisemiquaver" => tempo *= 2.0,
        other => return Err(MelodyError::UnknownTempoResolution(other.to_string())),
    }

    Ok(MelodyHeader {
        tempo,
        duet: root.attr("Duet") == Some("Yes"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;

    struct EchoDecoder;

    impl MelodyDecoder for EchoDecoder {
        fn load(&mut self, _keys: &DecryptionKeys) {}

        fn decode(&self, _container: &[u8], song_id: &str) -> Result<String, MelodyError> {
            Ok(format!(r#"<MELODY Tempo="100" Resolution="Semiquaver" Id="{song_id}"/>"#))
        }
    }

    fn header(xml: &str) -> Result<MelodyHeader, MelodyError> {
        read_header(&Document::parse(xml.as_bytes()).unwrap())
    }

    #[test]
    fn test_plain_melody_preferred() {
        let a = MemoryArchive::new()
            .with("export/7/melody_1.xml", r#"<MELODY Tempo="1"/>"#)
            .with("export/melodies_10.chc", "bin");
        let (doc, source) = resolve(&a, &EchoDecoder, "7").unwrap();
        assert_eq!(source, MelodySource::Plain);
        assert_eq!(doc.root().attr("Tempo"), Some("1"));
    }

    #[test]
    fn test_binary_fallback_passes_song_id() {
        let a = MemoryArchive::new().with("export/melodies_10.chc", "bin");
        let (doc, source) = resolve(&a, &EchoDecoder, "42").unwrap();
        assert_eq!(source, MelodySource::Binary);
        assert_eq!(doc.root().attr("Id"), Some("42"));
    }

    #[test]
    fn test_melody_not_found() {
        let a = MemoryArchive::new().with("export/8/melody_1.xml", "<MELODY/>");
        assert!(matches!(
            resolve(&a, &EchoDecoder, "7"),
            Err(MelodyError::NotFound(id)) if id == "7"
        ));
    }

    #[test]
    fn test_unavailable_decoder_fails() {
        let a = MemoryArchive::new().with("export/melodies_10.chc", "bin");
        assert!(matches!(
            resolve(&a, &UnavailableDecoder::default(), "7"),
            Err(MelodyError::Decode(_))
        ));
    }

    #[test]
    fn test_tempo_resolutions() {
        let h = header(r#"<MELODY Tempo="120" Resolution="Semiquaver"/>"#).unwrap();
        assert_eq!(h.tempo, 120.0);
        assert!(!h.duet);

        let h = header(r#"<MELODY Tempo="60.5" Resolution="Demisemiquaver" Duet="Yes"/>"#).unwrap();
        assert_eq!(h.tempo, 121.0);
        assert!(h.duet);
    }

    #[test]
    fn test_unknown_resolution() {
        assert!(matches!(
            header(r#"<MELODY Tempo="120" Resolution="Crotchet"/>"#),
            Err(MelodyError::UnknownTempoResolution(r)) if r == "Crotchet"
        ));
        assert!(matches!(
            header(r#"<MELODY Tempo="120"/>"#),
            Err(MelodyError::UnknownTempoResolution(_))
        ));
    }

    #[test]
    fn test_missing_tempo() {
        assert!(matches!(header("<SONG/>"), Err(MelodyError::MissingTempo)));
        assert!(matches!(
            header(r#"<MELODY Resolution="Semiquaver"/>"#),
            Err(MelodyError::MissingTempo)
        ));
    }
}
