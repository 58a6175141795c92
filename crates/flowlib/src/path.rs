//! Path expansion and the Bloom-index sidecar path derivation rule, both
//! named as external collaborators but small and deterministic enough to
//! give a concrete implementation.

use std::path::{Path, PathBuf};

/// The fixed flow-file name prefix the index path derivation rule keys off.
pub const FLOW_PREFIX: &str = "lnf";

/// Expand a list of base paths into a concrete list of flow-file paths.
/// The real collaborator also globs a `[begin, end)` time window into a
/// directory layout; here every path that is already a file is kept
/// as-is, and every path that is a directory is expanded one level deep
/// (non-recursively) in sorted order, which is enough to drive the
/// worker's file loop without re-implementing a full time-partitioned
/// directory scheme.
pub fn expand_paths(paths: &[impl AsRef<Path>]) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in paths {
        let p = p.as_ref();
        if p.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(p)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|e| e.is_file())
                .collect();
            entries.sort();
            out.extend(entries);
        } else {
            out.push(p.to_path_buf());
        }
    }
    Ok(out)
}

/// Derive a flow file's Bloom-index sidecar path:
/// `.../<prefix>.<tail>` → `.../bfi.<tail>`; `.../<name>` without the flow
/// prefix → `.../bfi.<name>`.
pub fn bfindex_path_for(flow_path: &Path) -> PathBuf {
    let dir = flow_path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = flow_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let bfi_name = match file_name.split_once('.') {
        Some((prefix, tail)) if prefix == FLOW_PREFIX => format!("bfi.{tail}"),
        _ => format!("bfi.{file_name}"),
    };
    dir.join(bfi_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_prefix_is_replaced_with_bfi() {
        assert_eq!(
            bfindex_path_for(Path::new("/d/lnf.20200101")),
            PathBuf::from("/d/bfi.20200101")
        );
    }

    #[test]
    fn non_flow_prefixed_name_is_prefixed_with_bfi() {
        assert_eq!(
            bfindex_path_for(Path::new("/d/other.bin")),
            PathBuf::from("/d/bfi.other.bin")
        );
    }
}
