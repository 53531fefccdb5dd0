//! Manifest loading from paths or URLs.

use crate::error::Result;
use crate::fetch::{is_url, FetchOptions, HttpSource};
use vpk_format::Manifest;

/// Load a manifest from a local path or an `http(s)://` URL.
pub fn load_manifest(location: &str, options: &FetchOptions) -> Result<Manifest> {
    if is_url(location) {
        log::debug!("Loading remote manifest: {}", location);
        let source = HttpSource::new(location, options.timeout)?;
        let body = source.get(location)?;
        Ok(Manifest::from_json(&body)?)
    } else {
        Ok(Manifest::load(location)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;
    use vpk_format::{ManifestEntry, ManifestMode};

    #[test]
    fn test_load_local_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::from_entries(
            ManifestMode::Basic,
            [(
                "a".to_string(),
                ManifestEntry::basic("0123456789abcdef0123456789abcdef"),
            )],
        )
        .unwrap();
        manifest.save(&path).unwrap();

        let loaded = load_manifest(path.to_str().unwrap(), &FetchOptions::default()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_missing_local_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_manifest(path.to_str().unwrap(), &FetchOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Format(vpk_format::Error::IoError(_))));
    }
}
