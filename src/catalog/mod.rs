pub mod normalize;

use crate::archive::{Archive, ArchiveError};
use crate::dom::{Document, DomError, Element, XmlNode};
use crate::melody::{DecryptionKeys, MelodyDecoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use normalize::{normalize, pretty_edition};

const CONFIG_DOCUMENT: &str = "export/config.xml";
const SONG_DOCUMENT_PREFIX: &str = "export/songs";
const DEFAULT_FRAME_RATE: f64 = 25.0;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No PRODUCT_DESC or PRODUCT_NAME found")]
    MissingEdition,
    #[error("Malformed {path}: {source}")]
    Document {
        path: String,
        #[source]
        source: DomError,
    },
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// One song found on the disc.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SongRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub year: String,
    pub edition: String,
    /// Data archive holding the song's streams, e.g. `pak_iop0.pak`.
    pub data_archive: String,
    /// Beats per minute at semiquaver resolution; 0 until the melody is read.
    pub tempo: f64,
    pub duet: bool,
    /// 25 fps video (PAL disc).
    pub pal: bool,
    pub medley_start: f64,
    pub medley_end: f64,

    #[serde(skip)]
    pub music: Option<PathBuf>,
    #[serde(skip)]
    pub vocals: Option<PathBuf>,
    #[serde(skip)]
    pub video: Option<PathBuf>,
    #[serde(skip)]
    pub cover: Option<PathBuf>,
}

impl SongRecord {
    /// `"artist - title"`, used for filtering, logging and the output directory.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    pub fn has_medley(&self) -> bool {
        self.medley_end > 0.0
    }
}

/// All songs of a disc keyed by song ID, plus the disc-wide edition info.
#[derive(Debug, Default)]
pub struct Catalog {
    pub edition: String,
    pub language: String,
    songs: BTreeMap<String, SongRecord>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SongRecord> {
        self.songs.get(id)
    }

    /// Songs in ID order.
    pub fn songs(&self) -> impl Iterator<Item = &SongRecord> {
        self.songs.values()
    }

    pub fn into_songs(self) -> Vec<SongRecord> {
        self.songs.into_values().collect()
    }
}

/// Scan a disc's main archive for its configuration and song catalog
/// documents.
///
/// The configuration document provides the melody decryption keys, which
/// are handed to `decoder`, and the edition label. `search` keeps only songs
/// whose ID equals it or whose `"artist - title"` contains it.
pub fn build_catalog(
    archive: &dyn Archive,
    decoder: &mut dyn MelodyDecoder,
    search: Option<&str>,
) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::default();

    match archive.paths().into_iter().find(|p| p.starts_with(CONFIG_DOCUMENT)) {
        Some(path) => {
            let doc = parse(archive, path)?;
            let keys = DecryptionKeys {
                product_name: doc.value("/CONFIG/PRODUCT_NAME").unwrap_or_default(),
                product_code: doc.value("/CONFIG/PRODUCT_CODE").unwrap_or_default(),
                territory: doc.value("/CONFIG/TERRITORY").unwrap_or_default(),
                default_language: doc.value("/CONFIG/DEFAULT_LANG").unwrap_or_default(),
            };
            decoder.load(&keys);

            // SingStar Original and Party have no PRODUCT_DESC
            let edition = doc
                .value("/CONFIG/PRODUCT_DESC")
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| keys.product_name.clone());
            if edition.is_empty() {
                return Err(CatalogError::MissingEdition);
            }
            catalog.edition = pretty_edition(&edition);
            catalog.language = keys.default_language;
            log::info!("Edition: {}", catalog.edition);
        }
        None => log::warn!("No {CONFIG_DOCUMENT} on disc; edition unknown, no melody keys"),
    }

    for path in archive.paths() {
        if !path.starts_with(SONG_DOCUMENT_PREFIX) || !path.ends_with(".xml") {
            continue;
        }
        let doc = match parse(archive, path) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("Skipping song catalog: {e}");
                continue;
            }
        };
        let data_archive = data_archive_for(path);
        log::debug!("Reading {path} (data in {data_archive})");

        for element in doc.find("/SONG_SET/SONG") {
            let Some(mut song) = parse_song(element, search) else {
                continue;
            };
            song.edition = catalog.edition.clone();
            song.data_archive = data_archive.clone();
            catalog.songs.insert(song.id.clone(), song);
        }
    }

    Ok(catalog)
}

fn parse(archive: &dyn Archive, path: &str) -> Result<Document, CatalogError> {
    let bytes = archive.read(path)?;
    Document::parse(&bytes).map_err(|source| CatalogError::Document {
        path: path.to_string(),
        source,
    })
}

/// `export/songs_3_0.xml` → `pak_iop0.pak`
fn data_archive_for(path: &str) -> String {
    let stem = path.strip_suffix(".xml").unwrap_or(path);
    let part = stem.chars().last().unwrap_or('0');
    format!("{}{part}.pak", crate::archive::DATA_ARCHIVE_PREFIX)
}

fn parse_song(element: &Element, search: Option<&str>) -> Option<SongRecord> {
    let (Some(id), Some(title), Some(artist)) = (
        element.attr("ID"),
        element.attr("TITLE"),
        element.attr("PERFORMANCE_NAME"),
    ) else {
        log::warn!("Skipping SONG without ID, TITLE or PERFORMANCE_NAME");
        return None;
    };

    let mut song = SongRecord {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        ..SongRecord::default()
    };

    if let Some(search) = search.filter(|s| !s.is_empty()) {
        if search != id && !song.display_name().contains(search) {
            return None;
        }
    }

    collect_tags(element, &mut song.genre, &mut song.year);

    let fps = match element.find_attr("VIDEO/@FRAME_RATE") {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("[{id}] Bad FRAME_RATE {raw:?}, assuming {DEFAULT_FRAME_RATE}");
            DEFAULT_FRAME_RATE
        }),
        None => DEFAULT_FRAME_RATE,
    };
    song.pal = fps == DEFAULT_FRAME_RATE;

    if let Some(medleys) = element.children_named("MEDLEYS").next() {
        for medley in medleys.children_named("TYPE") {
            // Surrounding whitespace is ignored, case is not
            if medley.text() != "Normal" {
                continue;
            }
            match (seconds(medley, "Start"), seconds(medley, "End")) {
                (Some(start), Some(end)) => {
                    song.medley_start = start;
                    song.medley_end = end;
                }
                _ => log::warn!("[{id}] Medley without valid Start/End"),
            }
        }
    }

    Some(song)
}

/// Pick up GENRE/YEAR attributes anywhere below the song element. Later
/// matches in document order overwrite earlier ones.
fn collect_tags(element: &Element, genre: &mut String, year: &mut String) {
    for (name, value) in element.attributes() {
        match name {
            "GENRE" => *genre = normalize(value),
            "YEAR" => *year = normalize(value),
            _ => {}
        }
    }
    for child in element.children() {
        match child {
            XmlNode::Element(e) => collect_tags(e, genre, year),
            XmlNode::Text(_) | XmlNode::Comment(_) => {}
        }
    }
}

fn seconds(element: &Element, attribute: &str) -> Option<f64> {
    element.attr(attribute)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::melody::{MelodyError, UnavailableDecoder};

    const CONFIG: &str = r#"<ss:CONFIG xmlns:ss="http://www.singstargame.com">
        <ss:PRODUCT_NAME>SINGSTAR_ROCKS</ss:PRODUCT_NAME>
        <ss:PRODUCT_CODE>SCES-53602</ss:PRODUCT_CODE>
        <ss:TERRITORY>PAL</ss:TERRITORY>
        <ss:DEFAULT_LANG>en</ss:DEFAULT_LANG>
    </ss:CONFIG>"#;

    const SONGS: &str = r#"<ss:SONG_SET xmlns:ss="http://www.singstargame.com">
        <ss:SONG ID="101" TITLE="Song One" PERFORMANCE_NAME="Band A">
            <ss:GENRE GENRE="POP_ROCK"/>
            <ss:INFO><ss:YEAR YEAR="1985"/><ss:DEEP YEAR="1986"/></ss:INFO>
            <ss:VIDEO FRAME_RATE="29.97"/>
            <ss:MEDLEYS>
                <ss:TYPE Start="5" End="6">Short</ss:TYPE>
                <ss:TYPE Start="10.5" End="40">Normal</ss:TYPE>
            </ss:MEDLEYS>
        </ss:SONG>
        <ss:SONG ID="102" TITLE="Song Two" PERFORMANCE_NAME="Band B"/>
        <ss:SONG TITLE="No Id" PERFORMANCE_NAME="Band C"/>
    </ss:SONG_SET>"#;

    #[derive(Default)]
    struct RecordingDecoder {
        keys: Option<DecryptionKeys>,
    }

    impl MelodyDecoder for RecordingDecoder {
        fn load(&mut self, keys: &DecryptionKeys) {
            self.keys = Some(keys.clone());
        }

        fn decode(&self, _container: &[u8], _song_id: &str) -> Result<String, MelodyError> {
            Err(MelodyError::Decode("unused".to_string()))
        }
    }

    fn disc() -> MemoryArchive {
        MemoryArchive::new()
            .with("export/config.xml", CONFIG)
            .with("export/songs_1_0.xml", SONGS)
    }

    #[test]
    fn test_build_catalog() {
        let mut decoder = RecordingDecoder::default();
        let catalog = build_catalog(&disc(), &mut decoder, None).unwrap();

        assert_eq!(catalog.edition, "SingStar Rocks");
        assert_eq!(catalog.language, "en");
        assert_eq!(catalog.len(), 2);

        let keys = decoder.keys.unwrap();
        assert_eq!(keys.product_code, "SCES-53602");
        assert_eq!(keys.territory, "PAL");

        let one = catalog.get("101").unwrap();
        assert_eq!(one.artist, "Band A");
        assert_eq!(one.genre, "Pop Rock");
        assert_eq!(one.year, "1986");
        assert_eq!(one.edition, "SingStar Rocks");
        assert_eq!(one.data_archive, "pak_iop0.pak");
        assert!(!one.pal);
        assert_eq!(one.medley_start, 10.5);
        assert_eq!(one.medley_end, 40.0);
        assert_eq!(one.tempo, 0.0);

        let two = catalog.get("102").unwrap();
        assert!(two.pal);
        assert!(!two.has_medley());
        assert!(two.genre.is_empty());
    }

    #[test]
    fn test_search_filter() {
        let mut decoder = UnavailableDecoder::default();
        let by_id = build_catalog(&disc(), &mut decoder, Some("102")).unwrap();
        assert_eq!(by_id.songs().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["102"]);

        let by_name = build_catalog(&disc(), &mut decoder, Some("Band A - Song")).unwrap();
        assert_eq!(by_name.len(), 1);
        assert!(by_name.get("101").is_some());

        // substring match is case-sensitive
        let none = build_catalog(&disc(), &mut decoder, Some("band a")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_later_documents_overwrite() {
        let archive = disc().with(
            "export/songs_2_1.xml",
            r#"<SONG_SET><SONG ID="101" TITLE="Renamed" PERFORMANCE_NAME="Band A"/></SONG_SET>"#,
        );
        let catalog = build_catalog(&archive, &mut UnavailableDecoder::default(), None).unwrap();
        let one = catalog.get("101").unwrap();
        assert_eq!(one.title, "Renamed");
        assert_eq!(one.data_archive, "pak_iop1.pak");
    }

    #[test]
    fn test_description_preferred_over_product_name() {
        let archive = MemoryArchive::new().with(
            "export/config.xml",
            "<CONFIG><PRODUCT_NAME>X</PRODUCT_NAME><PRODUCT_DESC>SingStar Pop</PRODUCT_DESC></CONFIG>",
        );
        let catalog = build_catalog(&archive, &mut UnavailableDecoder::default(), None).unwrap();
        assert_eq!(catalog.edition, "SingStar Pop");
    }

    #[test]
    fn test_missing_edition() {
        let archive = MemoryArchive::new().with("export/config.xml", "<CONFIG><TERRITORY>US</TERRITORY></CONFIG>");
        assert!(matches!(
            build_catalog(&archive, &mut UnavailableDecoder::default(), None),
            Err(CatalogError::MissingEdition)
        ));
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        let archive = MemoryArchive::new().with("export/config.xml", "<CONFIG>");
        assert!(matches!(
            build_catalog(&archive, &mut UnavailableDecoder::default(), None),
            Err(CatalogError::Document { .. })
        ));
    }

    #[test]
    fn test_medley_type_match() {
        let archive = disc().with(
            "export/songs_1_1.xml",
            r#"<SONG_SET>
                <SONG ID="201" TITLE="Padded" PERFORMANCE_NAME="X">
                    <MEDLEYS><TYPE Start="1" End="2">
                        Normal
                    </TYPE></MEDLEYS>
                </SONG>
                <SONG ID="202" TITLE="Lower" PERFORMANCE_NAME="X">
                    <MEDLEYS><TYPE Start="1" End="2">normal</TYPE></MEDLEYS>
                </SONG>
            </SONG_SET>"#,
        );
        let catalog = build_catalog(&archive, &mut UnavailableDecoder::default(), None).unwrap();
        assert_eq!(catalog.get("201").unwrap().medley_end, 2.0);
        assert!(!catalog.get("202").unwrap().has_medley());
    }

    #[test]
    fn test_data_archive_for() {
        assert_eq!(data_archive_for("export/songs_1_0.xml"), "pak_iop0.pak");
        assert_eq!(data_archive_for("export/songs_12_3.xml"), "pak_iop3.pak");
    }
}
