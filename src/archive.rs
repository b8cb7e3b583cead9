use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Main archive holding catalog, config and melody documents (ISO-9660 spelling).
pub const MAIN_ARCHIVE: &str = "pack_ee.pak";
/// The same archive as seen through a UDF mount.
pub const MAIN_ARCHIVE_UDF: &str = "Pack_EE.PAK";
/// Data archives holding the audio/video streams: `pak_iop0.pak`, `pak_iop1.pak`, ...
pub const DATA_ARCHIVE_PREFIX: &str = "pak_iop";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No such archive entry: {0}")]
    NotFound(String),
    #[error("{0} is a packed archive; unpack it into a directory of the same name")]
    Packed(PathBuf),
    #[error(
        "SingStar discs carry both UDF and ISO-9660 filesystems and {0} is mounted as UDF, \
         which garbles the data files. Remount it as ISO-9660, e.g. \
         `mount -t iso9660 /dev/cdrom {0}`"
    )]
    UdfMount(PathBuf),
    #[error("No SingStar disc found at {0}. Enter a path to a folder with pack_ee.pak in it.")]
    NoDisc(PathBuf),
}

/// Read-only mapping from logical path to entry bytes.
///
/// Implementations must be safe to read from several threads at once:
/// reads are by path and keep no cursor.
pub trait Archive: Send + Sync {
    /// All entry paths, in ascending order.
    fn paths(&self) -> Vec<&str>;

    fn contains(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError>;

    /// First entry (in path order) starting with `prefix` and ending with `suffix`.
    fn find(&self, prefix: &str, suffix: &str) -> Option<&str> {
        self.paths()
            .into_iter()
            .find(|p| p.len() >= prefix.len() + suffix.len() && p.starts_with(prefix) && p.ends_with(suffix))
    }
}

/// An unpacked archive directory, keyed by `/`-separated relative path.
pub struct DirArchive {
    entries: BTreeMap<String, PathBuf>,
}

impl DirArchive {
    pub fn open(root: &Path) -> Result<Self, ArchiveError> {
        if root.is_file() {
            return Err(ArchiveError::Packed(root.to_path_buf()));
        }
        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| {
                ArchiveError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk loop")))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.insert(key, entry.path().to_path_buf());
        }
        log::debug!("Opened {} ({} entries)", root.display(), entries.len());
        Ok(Self { entries })
    }
}

impl Archive for DirArchive {
    fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let file = self
            .entries
            .get(path)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
        Ok(std::fs::read(file)?)
    }
}

/// Archive held entirely in memory.
#[derive(Default)]
pub struct MemoryArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.insert(path.into(), data.into());
    }

    pub fn with(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }
}

impl Archive for MemoryArchive {
    fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))
    }
}

/// A disc: its main archive plus the data archives the songs live in.
pub struct Disc {
    root: PathBuf,
    main: Box<dyn Archive>,
    parts: BTreeMap<String, Box<dyn Archive>>,
}

impl Disc {
    /// Open an unpacked disc rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, ArchiveError> {
        let main_path = root.join(MAIN_ARCHIVE);
        if !main_path.exists() {
            if root.join(MAIN_ARCHIVE_UDF).exists() {
                return Err(ArchiveError::UdfMount(root.to_path_buf()));
            }
            return Err(ArchiveError::NoDisc(root.to_path_buf()));
        }
        let main = DirArchive::open(&main_path)?;

        let mut parts: BTreeMap<String, Box<dyn Archive>> = BTreeMap::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(DATA_ARCHIVE_PREFIX) || !name.ends_with(".pak") {
                continue;
            }
            match DirArchive::open(&entry.path()) {
                Ok(part) => {
                    parts.insert(name, Box::new(part));
                }
                Err(e) => log::warn!("Skipping data archive {}: {}", name, e),
            }
        }

        Ok(Self::new(root, Box::new(main), parts))
    }

    pub fn new(
        root: &Path,
        main: Box<dyn Archive>,
        parts: BTreeMap<String, Box<dyn Archive>>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            main,
            parts,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn main(&self) -> &dyn Archive {
        self.main.as_ref()
    }

    /// A data archive by file name, e.g. `pak_iop0.pak`.
    pub fn part(&self, name: &str) -> Option<&dyn Archive> {
        self.parts.get(name).map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_prefix_suffix() {
        let a = MemoryArchive::new()
            .with("export/123/melody_1.xml", "x")
            .with("export/123/music.mih", "y")
            .with("export/melodies_10.chc", "z");
        assert_eq!(a.find("export/123/melody", ".xml"), Some("export/123/melody_1.xml"));
        assert_eq!(a.find("export/melodies_10", ".chc"), Some("export/melodies_10.chc"));
        assert_eq!(a.find("export/456/melody", ".xml"), None);
    }

    #[test]
    fn test_find_rejects_overlapping_prefix_and_suffix() {
        let a = MemoryArchive::new().with("a.xml", "");
        assert_eq!(a.find("a.x", "xml"), None);
    }

    #[test]
    fn test_memory_read_missing() {
        let a = MemoryArchive::new();
        assert!(matches!(a.read("nope"), Err(ArchiveError::NotFound(_))));
    }

    #[test]
    fn test_dir_archive_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("export/42")).unwrap();
        std::fs::write(dir.path().join("export/42/melody_1.xml"), b"<MELODY/>").unwrap();
        std::fs::write(dir.path().join("export/config.xml"), b"<CONFIG/>").unwrap();

        let a = DirArchive::open(dir.path()).unwrap();
        assert_eq!(a.paths(), vec!["export/42/melody_1.xml", "export/config.xml"]);
        assert_eq!(a.read("export/config.xml").unwrap(), b"<CONFIG/>");
    }

    #[test]
    fn test_disc_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Disc::open(dir.path()), Err(ArchiveError::NoDisc(_))));

        std::fs::create_dir(dir.path().join(MAIN_ARCHIVE_UDF)).unwrap();
        // Case-insensitive filesystems see the UDF name as the ISO one.
        if !dir.path().join(MAIN_ARCHIVE).exists() {
            assert!(matches!(Disc::open(dir.path()), Err(ArchiveError::UdfMount(_))));
        }
    }

    #[test]
    fn test_disc_open_with_parts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pack_ee.pak/export")).unwrap();
        std::fs::create_dir_all(dir.path().join("pak_iop0.pak/123")).unwrap();
        std::fs::write(dir.path().join("pak_iop0.pak/123/music.mib"), b"raw").unwrap();

        let disc = Disc::open(dir.path()).unwrap();
        let part = disc.part("pak_iop0.pak").unwrap();
        assert!(part.contains("123/music.mib"));
        assert!(disc.part("pak_iop1.pak").is_none());
    }
}
