use std::path::{Path, PathBuf};
use std::rc::Rc;

use flate2::Compression;
use flate2::write::GzEncoder;
use rhai::{Blob, EvalAltResult, Module};

use crate::env::TransformEnv;
use crate::error::EngineError;
use crate::script::script_err;

/// Builds the `archive` module exposed to scripts.
pub fn module(env: Rc<TransformEnv>) -> Module {
    let mut module = Module::new();

    let guard = env.clone();
    module.set_native_fn(
        "arch_tar_str",
        move |dir: &str| -> Result<Blob, Box<EvalAltResult>> {
            archive_checked(&guard, dir, false)
        },
    );
    let guard = env;
    module.set_native_fn(
        "arch_tar_gzip_str",
        move |dir: &str| -> Result<Blob, Box<EvalAltResult>> {
            archive_checked(&guard, dir, true)
        },
    );

    module
}

fn archive_checked(
    env: &TransformEnv,
    dir: &str,
    gzip: bool,
) -> Result<Blob, Box<EvalAltResult>> {
    let dir = PathBuf::from(dir);
    if !env.is_path_valid(&dir) {
        return Err(script_err("invalid path"));
    }
    tar_directory(&dir, gzip).map_err(|e| script_err(e.to_string()))
}

/// Tars a directory into memory. Entry names are rooted at the directory's
/// base name; file modes and symlink targets are preserved; sockets are
/// skipped.
pub fn tar_directory(dir: &Path, gzip: bool) -> Result<Vec<u8>, EngineError> {
    let base = dir
        .file_name()
        .map(|n| PathBuf::from(n))
        .unwrap_or_else(|| PathBuf::from("."));

    let bytes = if gzip {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_tree(&mut builder, dir, &base)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?
    } else {
        let mut builder = tar::Builder::new(Vec::new());
        append_tree(&mut builder, dir, &base)?;
        builder.into_inner()?
    };
    Ok(bytes)
}

fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    base: &Path,
) -> Result<(), EngineError> {
    builder.follow_symlinks(false);
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = base.join(entry.file_name());
        let metadata = std::fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_socket() {
                tracing::debug!(path = %path.display(), "skipping socket while archiving");
                continue;
            }
        }

        if file_type.is_dir() {
            builder.append_dir(&name, &path)?;
            append_tree(builder, &path, &name)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path)?;
            let mut header = tar::Header::new_gnu();
            header.set_metadata(&metadata);
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &name, &target)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}
