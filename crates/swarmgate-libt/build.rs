use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const MIN_VERSION: &str = "2.0.10";
const SHIM_SOURCE: &str = "src/ffi/engine.cpp";
const SHIM_HEADER: &str = "src/ffi/include/swarmgate/engine.h";

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), BuildError> {
    println!("cargo:rerun-if-env-changed=LIBTORRENT_INCLUDE_DIR");
    println!("cargo:rerun-if-env-changed=LIBTORRENT_LIB_DIR");
    emit_reruns();

    // The stub engine needs no native code.
    if env::var_os("CARGO_FEATURE_LIBTORRENT").is_none() {
        return Ok(());
    }

    let mut shim = cc::Build::new();
    shim.cpp(true)
        .flag_if_supported("-std=c++17")
        .file(SHIM_SOURCE)
        .include("src/ffi/include");

    let include_override = env::var_os("LIBTORRENT_INCLUDE_DIR").map(PathBuf::from);
    let lib_dir_override = env::var_os("LIBTORRENT_LIB_DIR").map(PathBuf::from);

    match (include_override, lib_dir_override) {
        (Some(include), Some(lib)) => {
            ensure_header_version(&include)?;
            shim.include(&include);
            shim.compile("swarmgate-engine");
            println!("cargo:rustc-link-search=native={}", lib.display());
            println!("cargo:rustc-link-lib=torrent-rasterbar");
        }
        (None, Some(_)) => return Err(BuildError::MissingIncludeDir),
        (include, None) => {
            if let Some(path) = include.as_ref() {
                ensure_header_version(path)?;
                shim.include(path);
            }
            let libtorrent = pkg_config::Config::new()
                .atleast_version(MIN_VERSION)
                .cargo_metadata(false)
                .probe("libtorrent-rasterbar")
                .map_err(BuildError::PkgConfig)?;
            for path in &libtorrent.include_paths {
                shim.include(path);
            }
            shim.compile("swarmgate-engine");
            for path in &libtorrent.link_paths {
                println!("cargo:rustc-link-search=native={}", path.display());
            }
            for lib in &libtorrent.libs {
                println!("cargo:rustc-link-lib={lib}");
            }
        }
    }
    Ok(())
}

fn emit_reruns() {
    println!("cargo:rerun-if-changed={SHIM_SOURCE}");
    println!("cargo:rerun-if-changed={SHIM_HEADER}");
}

fn ensure_header_version(include_dir: &Path) -> Result<(), BuildError> {
    let header = include_dir.join("libtorrent").join("version.hpp");
    let contents =
        fs::read_to_string(&header).map_err(|source| BuildError::ReadHeader { source })?;

    let major =
        parse_define(&contents, "LIBTORRENT_VERSION_MAJOR").ok_or(BuildError::MissingDefine)?;
    let minor =
        parse_define(&contents, "LIBTORRENT_VERSION_MINOR").ok_or(BuildError::MissingDefine)?;
    let patch =
        parse_define(&contents, "LIBTORRENT_VERSION_TINY").ok_or(BuildError::MissingDefine)?;

    if (major, minor, patch) < parse_min_version()? {
        return Err(BuildError::VersionTooOld);
    }
    Ok(())
}

fn parse_define(contents: &str, name: &str) -> Option<u32> {
    contents.lines().find_map(|line| {
        let mut parts = line.trim_start().strip_prefix("#define")?.split_whitespace();
        let key = parts.next()?;
        let value = parts.next()?;
        (key == name).then(|| value.parse::<u32>().ok()).flatten()
    })
}

fn parse_min_version() -> Result<(u32, u32, u32), BuildError> {
    let mut parts = MIN_VERSION.split('.').map(str::parse::<u32>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => Ok((major, minor, patch)),
        _ => Err(BuildError::InvalidMinVersion),
    }
}

#[derive(Debug)]
enum BuildError {
    MissingIncludeDir,
    PkgConfig(pkg_config::Error),
    ReadHeader { source: std::io::Error },
    MissingDefine,
    InvalidMinVersion,
    VersionTooOld,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIncludeDir => {
                write!(f, "LIBTORRENT_LIB_DIR requires LIBTORRENT_INCLUDE_DIR")
            }
            Self::PkgConfig(_) => write!(f, "libtorrent-rasterbar pkg-config lookup failed"),
            Self::ReadHeader { .. } => write!(f, "libtorrent version header read failed"),
            Self::MissingDefine => write!(f, "libtorrent version header missing field"),
            Self::InvalidMinVersion => write!(f, "invalid libtorrent minimum version"),
            Self::VersionTooOld => write!(f, "libtorrent version is older than {MIN_VERSION}"),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PkgConfig(err) => Some(err),
            Self::ReadHeader { source } => Some(source),
            _ => None,
        }
    }
}
