//! Layer unpacking into a snapshot root filesystem.
//!
//! Layers are applied base first. Whiteouts (`.wh.<name>`) delete what lower
//! layers put at `<name>`; an opaque whiteout (`.wh..wh..opq`) empties its
//! directory of lower-layer content. Opaque directories are collected in a
//! first pass over the layer, so the layer's own entries survive wherever
//! they sit in the tar stream.
//!
//! Every entry path is checked for traversal before anything is written,
//! and the total unpacked size is capped at [`MAX_ROOTFS_SIZE`].
//!
//! **Security**: whiteout targets are resolved inside the rootfs one
//! component at a time. A whiteout below a symlink is skipped, so a lower
//! layer's `dir -> /host/path` can never redirect a deletion onto the host.

use crate::constants::{MAX_LAYER_SIZE, MAX_ROOTFS_SIZE};
use crate::error::{Error, Result};
use crate::registry::LayerInfo;
use crate::storage::BlobStore;
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{debug, warn};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Unpacks `layers` from the blob store into `rootfs`.
pub fn unpack_layers(layers: &[LayerInfo], rootfs: &Path, store: &BlobStore) -> Result<()> {
    let mut total_size = 0u64;

    for layer in layers {
        debug!("Unpacking layer {} into {}", layer.digest, rootfs.display());

        let data = store.get_blob(&layer.digest)?;
        if data.len() > MAX_LAYER_SIZE {
            return Err(Error::ImageTooLarge {
                size: data.len() as u64,
                limit: MAX_LAYER_SIZE as u64,
            });
        }

        for dir in opaque_dirs(&layer.digest, layer_reader(layer, &data)?)? {
            match resolve_in_rootfs(rootfs, &dir).map_err(|e| extraction(&layer.digest, e))? {
                Some(dir) => clear_dir(&dir).map_err(|e| extraction(&layer.digest, e))?,
                None => warn!(
                    "Skipping opaque whiteout under {} in layer {}",
                    dir.display(),
                    layer.digest
                ),
            }
        }

        unpack_archive(&layer.digest, layer_reader(layer, &data)?, rootfs, &mut total_size)?;
    }

    Ok(())
}

fn layer_reader<'a>(layer: &LayerInfo, data: &'a [u8]) -> Result<Box<dyn Read + 'a>> {
    if is_gzip(&layer.media_type, data) {
        Ok(Box::new(GzDecoder::new(data)))
    } else if layer.media_type.contains("zstd") {
        Err(Error::LayerExtractionFailed {
            digest: layer.digest.clone(),
            reason: format!("unsupported media type {}", layer.media_type),
        })
    } else {
        Ok(Box::new(data))
    }
}

fn extraction(digest: &str, e: io::Error) -> Error {
    Error::LayerExtractionFailed {
        digest: digest.to_string(),
        reason: e.to_string(),
    }
}

/// Rejects absolute paths and `..` components.
fn checked_entry_path(path: &Path) -> Result<()> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(Error::PathTraversal {
            path: path.to_string_lossy().to_string(),
        });
    }
    Ok(())
}

/// Directories carrying an opaque whiteout in this layer.
fn opaque_dirs(digest: &str, reader: impl Read) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    let mut dirs = Vec::new();
    for entry in archive.entries().map_err(|e| extraction(digest, e))? {
        let entry = entry.map_err(|e| extraction(digest, e))?;
        let path = entry.path().map_err(|e| extraction(digest, e))?;
        if path.file_name().and_then(|n| n.to_str()) == Some(OPAQUE_WHITEOUT) {
            checked_entry_path(&path)?;
            dirs.push(path.parent().unwrap_or(Path::new("")).to_path_buf());
        }
    }
    Ok(dirs)
}

fn unpack_archive(
    digest: &str,
    reader: impl Read,
    rootfs: &Path,
    total_size: &mut u64,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(|e| extraction(digest, e))? {
        let mut entry = entry.map_err(|e| extraction(digest, e))?;
        let path = entry.path().map_err(|e| extraction(digest, e))?.into_owned();
        checked_entry_path(&path)?;

        let parent = path.parent().unwrap_or(Path::new(""));
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if file_name == OPAQUE_WHITEOUT {
            continue;
        }
        if let Some(target) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            match resolve_in_rootfs(rootfs, parent).map_err(|e| extraction(digest, e))? {
                Some(dir) => remove_entry(&dir.join(target)).map_err(|e| extraction(digest, e))?,
                None => warn!("Skipping whiteout {} in layer {}", path.display(), digest),
            }
            continue;
        }

        *total_size += entry.size();
        if *total_size > MAX_ROOTFS_SIZE {
            return Err(Error::ImageTooLarge {
                size: *total_size,
                limit: MAX_ROOTFS_SIZE,
            });
        }

        entry.unpack_in(rootfs).map_err(|e| extraction(digest, e))?;
    }

    Ok(())
}

/// Walks `relative` under `rootfs` without following symlinks.
///
/// Returns `None` when a component is missing, is a symlink or is not a
/// directory. Nothing under such a path came from a lower layer's real
/// directory tree.
fn resolve_in_rootfs(rootfs: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
    let mut current = rootfs.to_path_buf();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        current.push(name);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(Some(current))
}

/// Removes a file, symlink or directory tree. The entry itself is never
/// followed.
fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Gzip if the media type says so, or (for Docker v2 layers that only say
/// `tar`) if the data starts with the gzip magic.
fn is_gzip(media_type: &str, data: &[u8]) -> bool {
    media_type.ends_with("gzip") || data.starts_with(&[0x1f, 0x8b])
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        remove_entry(&entry?.path())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sha256_digest;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    type LayerBuilder = tar::Builder<GzEncoder<Vec<u8>>>;

    fn build_layer(store: &BlobStore, fill: impl FnOnce(&mut LayerBuilder)) -> LayerInfo {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        fill(&mut builder);
        let data = builder.into_inner().unwrap().finish().unwrap();
        let digest = sha256_digest(&data);
        store.put_blob(&digest, &data).unwrap();
        LayerInfo {
            digest,
            size: data.len() as u64,
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
        }
    }

    fn append_file(builder: &mut LayerBuilder, path: &str, contents: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, contents).unwrap();
    }

    fn append_symlink(builder: &mut LayerBuilder, path: &str, target: &Path) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, path, target).unwrap();
    }

    fn layer(store: &BlobStore, files: &[(&str, &[u8])]) -> LayerInfo {
        build_layer(store, |builder| {
            for (path, contents) in files {
                append_file(builder, path, contents);
            }
        })
    }

    struct Fixture {
        _temp: TempDir,
        store: BlobStore,
        rootfs: PathBuf,
        outside: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::with_path(temp.path().join("blobs")).unwrap();
        let rootfs = temp.path().join("rootfs");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&rootfs).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("victim"), b"host data").unwrap();
        Fixture {
            _temp: temp,
            store,
            rootfs,
            outside,
        }
    }

    #[test]
    fn test_layers_apply_in_order_with_whiteouts() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::with_path(temp.path().join("blobs")).unwrap();
        let rootfs = temp.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();

        let base = layer(&store, &[("etc/a", b"1".as_slice()), ("etc/b", b"2".as_slice())]);
        let top = layer(&store, &[("etc/a", b"3".as_slice()), ("etc/.wh.b", b"".as_slice())]);

        unpack_layers(&[base, top], &rootfs, &store).unwrap();

        assert_eq!(fs::read(rootfs.join("etc/a")).unwrap(), b"3");
        assert!(!rootfs.join("etc/b").exists());
    }

    #[test]
    fn test_missing_blob_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::with_path(temp.path().join("blobs")).unwrap();
        let missing = LayerInfo {
            digest: format!("sha256:{}", "0".repeat(64)),
            size: 0,
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
        };
        let err = unpack_layers(&[missing], temp.path(), &store).unwrap_err();
        assert!(matches!(err, Error::BlobNotFound { .. }));
    }

    #[test]
    fn test_whiteout_below_symlink_leaves_host_untouched() {
        let fx = fixture();
        let outside = fx.outside.clone();
        let base = build_layer(&fx.store, |b| append_symlink(b, "evil", &outside));
        let top = layer(&fx.store, &[("evil/.wh.victim", b"".as_slice())]);

        unpack_layers(&[base, top], &fx.rootfs, &fx.store).unwrap();

        assert!(fx.outside.join("victim").exists());
        assert!(fs::symlink_metadata(fx.rootfs.join("evil")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_opaque_whiteout_below_symlink_leaves_host_untouched() {
        let fx = fixture();
        let outside = fx.outside.clone();
        let base = build_layer(&fx.store, |b| append_symlink(b, "evil", &outside));
        let top = layer(&fx.store, &[("evil/.wh..wh..opq", b"".as_slice())]);

        unpack_layers(&[base, top], &fx.rootfs, &fx.store).unwrap();

        assert!(fx.outside.join("victim").exists());
    }

    #[test]
    fn test_whiteout_removes_symlink_not_its_target() {
        let fx = fixture();
        let victim = fx.outside.join("victim");
        let base = build_layer(&fx.store, |b| append_symlink(b, "link", &victim));
        let top = layer(&fx.store, &[(".wh.link", b"".as_slice())]);

        unpack_layers(&[base, top], &fx.rootfs, &fx.store).unwrap();

        assert!(fs::symlink_metadata(fx.rootfs.join("link")).is_err());
        assert!(victim.exists());
    }

    #[test]
    fn test_opaque_whiteout_keeps_own_layer_entries() {
        let fx = fixture();
        let base = layer(&fx.store, &[("data/old", b"lower".as_slice())]);
        let top = layer(
            &fx.store,
            &[("data/new", b"upper".as_slice()), ("data/.wh..wh..opq", b"".as_slice())],
        );

        unpack_layers(&[base, top], &fx.rootfs, &fx.store).unwrap();

        assert!(!fx.rootfs.join("data/old").exists());
        assert_eq!(fs::read(fx.rootfs.join("data/new")).unwrap(), b"upper");
    }

    #[test]
    fn test_traversing_opaque_whiteout_rejected() {
        let fx = fixture();
        let top = build_layer(&fx.store, |b| {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o644);
            // `append_data` refuses `..`, so write the raw name.
            let name = b"../outside/.wh..wh..opq";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            b.append(&header, io::empty()).unwrap();
        });

        let err = unpack_layers(&[top], &fx.rootfs, &fx.store).unwrap_err();

        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(fx.outside.join("victim").exists());
    }
}
