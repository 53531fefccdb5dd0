//! Comparing manifests and folding fetched entries back into a local one.

use crate::manifest::{Manifest, ManifestMode};
use crate::{Error, Result};
use std::collections::BTreeSet;

/// Paths that must be fetched to bring one manifest in line with another.
pub type UpdateSet = BTreeSet<String>;

/// Paths in `remote` that are absent from `local` or carry a different hash.
///
/// Paths present only in `local` are never reported.
pub fn diff(local: &Manifest, remote: &Manifest) -> UpdateSet {
    let update_set: UpdateSet = remote
        .iter()
        .filter(|(path, entry)| match local.get(path) {
            Some(local_entry) => local_entry.content_hash != entry.content_hash,
            None => true,
        })
        .map(|(path, _)| path.clone())
        .collect();

    log::debug!(
        "diff: {} remote entries, {} to update",
        remote.len(),
        update_set.len()
    );
    update_set
}

/// Replace every path of `update_set` in `local` with its entry from `new_entries`.
///
/// The result keeps the mode of `local` (an empty `local` adopts the mode of
/// `new_entries`). Full entries merged into a basic manifest lose their
/// metadata; basic entries cannot be merged into a full manifest.
pub fn merge(local: &Manifest, update_set: &UpdateSet, new_entries: &Manifest) -> Result<Manifest> {
    let mode = if local.is_empty() {
        new_entries.mode()
    } else {
        local.mode()
    };

    if mode == ManifestMode::Full && new_entries.mode() == ManifestMode::Basic && !update_set.is_empty()
    {
        return Err(Error::InvalidFormat(
            "cannot merge basic entries into a full manifest".to_string(),
        ));
    }

    let mut merged = Manifest::new(mode);
    for (path, entry) in local.iter() {
        if !update_set.contains(path) {
            merged.insert(path.clone(), entry.clone())?;
        }
    }

    for path in update_set {
        let entry = new_entries
            .get(path)
            .ok_or_else(|| Error::MissingEntry(path.clone()))?;
        let entry = match mode {
            ManifestMode::Basic => entry.to_basic(),
            ManifestMode::Full => entry.clone(),
        };
        merged.insert(path.clone(), entry)?;
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;

    const H1: &str = "11111111111111111111111111111111";
    const H2: &str = "22222222222222222222222222222222";
    const H3: &str = "33333333333333333333333333333333";
    const H4: &str = "44444444444444444444444444444444";

    fn basic(entries: &[(&str, &str)]) -> Manifest {
        Manifest::from_entries(
            ManifestMode::Basic,
            entries
                .iter()
                .map(|(path, hash)| (path.to_string(), ManifestEntry::basic(*hash))),
        )
        .unwrap()
    }

    fn set(paths: &[&str]) -> UpdateSet {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_diff_reports_missing_and_modified() {
        let local = basic(&[("a", H1), ("b", H2)]);
        let remote = basic(&[("a", H1), ("b", H3), ("c", H4)]);
        assert_eq!(diff(&local, &remote), set(&["b", "c"]));
    }

    #[test]
    fn test_diff_ignores_local_only_paths() {
        let local = basic(&[("a", H1), ("stale", H2)]);
        let remote = basic(&[("a", H1)]);
        assert!(diff(&local, &remote).is_empty());
    }

    #[test]
    fn test_diff_compares_hash_only_across_modes() {
        let local = Manifest::from_entries(
            ManifestMode::Full,
            [("a".to_string(), ManifestEntry::full(H1, 3, "2024-01-01 00:00:00"))],
        )
        .unwrap();
        let remote = basic(&[("a", H1)]);
        assert!(diff(&local, &remote).is_empty());
    }

    #[test]
    fn test_merge_replaces_updated_paths() {
        let local = basic(&[("a", H1), ("b", H2)]);
        let merged = merge(&local, &set(&["b"]), &basic(&[("b", H3)])).unwrap();
        assert_eq!(merged, basic(&[("a", H1), ("b", H3)]));
        // Input is untouched.
        assert_eq!(local.get("b").unwrap().content_hash, H2);
    }

    #[test]
    fn test_merge_adds_new_paths() {
        let local = basic(&[("a", H1)]);
        let merged = merge(&local, &set(&["c"]), &basic(&[("c", H4), ("ignored", H2)])).unwrap();
        assert_eq!(merged, basic(&[("a", H1), ("c", H4)]));
    }

    #[test]
    fn test_merge_missing_new_entry() {
        let local = basic(&[("a", H1)]);
        let err = merge(&local, &set(&["b"]), &basic(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingEntry(path) if path == "b"));
    }

    #[test]
    fn test_merge_mode_handling() {
        let full_new = Manifest::from_entries(
            ManifestMode::Full,
            [("b".to_string(), ManifestEntry::full(H3, 9, "2024-01-01 00:00:00"))],
        )
        .unwrap();

        let merged = merge(&basic(&[("a", H1)]), &set(&["b"]), &full_new).unwrap();
        assert_eq!(merged.mode(), ManifestMode::Basic);
        assert_eq!(merged.get("b").unwrap(), &ManifestEntry::basic(H3));

        let merged = merge(&Manifest::default(), &set(&["b"]), &full_new).unwrap();
        assert_eq!(merged.mode(), ManifestMode::Full);

        let err = merge(&full_new, &set(&["a"]), &basic(&[("a", H1)])).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
