//! Discovery of the files making up a transcoded package.

use std::path::{Path, PathBuf};

/// Why a package directory could not be turned into a manifest.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read package directory {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no playlist found in {0}")]
    NoPlaylist(PathBuf),
    #[error("package in {0} has no media segments")]
    NoSegments(PathBuf),
}

/// The playlist plus media segments produced by one successful transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    dir: PathBuf,
    files: Vec<String>,
}

impl PackageManifest {
    /// Enumerate regular files in `dir` whose extension is in `extensions`
    /// (case-insensitive, without the dot), sorted by name.
    ///
    /// The package must hold at least one `.m3u8` playlist and one other
    /// file.
    pub fn discover(dir: &Path, extensions: &[String]) -> Result<Self, DiscoveryError> {
        let io_err = |source| DiscoveryError::Io {
            dir: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!(dir = %dir.display(), "skipping non UTF-8 file name");
                continue;
            };
            if has_extension(&name, extensions) {
                files.push(name);
            }
        }
        files.sort();

        if !files.iter().any(|f| is_playlist(f)) {
            return Err(DiscoveryError::NoPlaylist(dir.to_path_buf()));
        }
        if files.iter().all(|f| is_playlist(f)) {
            return Err(DiscoveryError::NoSegments(dir.to_path_buf()));
        }

        tracing::debug!(dir = %dir.display(), files = files.len(), "package discovered");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All file names, in upload order.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The playlist file names.
    pub fn playlists(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str).filter(|f| is_playlist(f))
    }

    /// The media segment file names.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str).filter(|f| !is_playlist(f))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Full path of a file in the package.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    extension_of(name)
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn is_playlist(name: &str) -> bool {
    extension_of(name)
        .map(|ext| ext.eq_ignore_ascii_case("m3u8"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn default_exts() -> Vec<String> {
        vec!["m3u8".into(), "ts".into()]
    }

    fn package(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            fs::write(dir.path().join(f), b"x").unwrap();
        }
        dir
    }

    #[test]
    fn discovers_sorted_package_files_only() {
        let dir = package(&[
            "segment_002.ts",
            "playlist.m3u8",
            "segment_000.ts",
            "segment_001.ts",
            "ffmpeg2pass-0.log",
            "notes.txt",
        ]);
        fs::create_dir(dir.path().join("nested.ts")).unwrap();

        let manifest = PackageManifest::discover(dir.path(), &default_exts()).unwrap();
        assert_eq!(
            manifest.files(),
            &["playlist.m3u8", "segment_000.ts", "segment_001.ts", "segment_002.ts"]
        );
        assert_eq!(manifest.playlists().collect::<Vec<_>>(), vec!["playlist.m3u8"]);
        assert_eq!(manifest.segments().count(), 3);
        assert_eq!(manifest.path_of("playlist.m3u8"), dir.path().join("playlist.m3u8"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = package(&["playlist.M3U8", "segment_000.TS"]);
        let manifest = PackageManifest::discover(dir.path(), &default_exts()).unwrap();
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn missing_playlist_is_error() {
        let dir = package(&["segment_000.ts"]);
        let err = PackageManifest::discover(dir.path(), &default_exts()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoPlaylist(_)));
    }

    #[test]
    fn playlist_without_segments_is_error() {
        let dir = package(&["playlist.m3u8"]);
        let err = PackageManifest::discover(dir.path(), &default_exts()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoSegments(_)));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = PackageManifest::discover(Path::new("/nonexistent/pkg"), &default_exts())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Io { .. }));
    }
}
