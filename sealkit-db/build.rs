//! Build script for sealkit-db.
//!
//! Downloads the sqlite3mc amalgamation from a pinned upstream release (if not
//! already cached in `OUT_DIR`), verifies its checksum, and compiles it into a
//! static library that `src/ffi.rs` links against.
//!
//! Set `SEALKIT_SQLITE3MC_ZIP` to a local copy of the release zip to build
//! without network access.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

// Pinned sqlite3mc release.
const SQLITE3MC_VERSION: &str = "2.2.7";
const SQLITE_VERSION: &str = "3.51.2";
const DOWNLOAD_URL: &str = "https://github.com/utelle/SQLite3MultipleCiphers/releases/download/v2.2.7/sqlite3mc-2.2.7-sqlite-3.51.2-amalgamation.zip";
const EXPECTED_SHA256: &str =
    "8e84aadc53bc09bda9cd307745a178191e7783e1b6478d74ffbcdf6a04f98085";
const LOCAL_ZIP_ENV: &str = "SEALKIT_SQLITE3MC_ZIP";
const AMALGAMATION_FILES: [&str; 2] =
    ["sqlite3mc_amalgamation.c", "sqlite3mc_amalgamation.h"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed={LOCAL_ZIP_ENV}");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set"));
    let source_dir = out_dir.join(format!("sqlite3mc-{SQLITE3MC_VERSION}"));
    let amalgamation_c = source_dir.join(AMALGAMATION_FILES[0]);
    let amalgamation_h = source_dir.join(AMALGAMATION_FILES[1]);

    if !amalgamation_c.exists() || !amalgamation_h.exists() {
        fs::create_dir_all(&source_dir).expect("failed to create source dir");
        let zip_path = match std::env::var_os(LOCAL_ZIP_ENV) {
            Some(local) => PathBuf::from(local),
            None => {
                let zip_path = out_dir.join("sqlite3mc-amalgamation.zip");
                download(&zip_path);
                zip_path
            }
        };
        verify_checksum(&zip_path);
        extract(&zip_path, &source_dir);
        assert!(
            amalgamation_c.exists() && amalgamation_h.exists(),
            "sqlite3mc amalgamation not found after extraction"
        );
    }

    compile(&amalgamation_c, &source_dir);
}

/// Downloads the pinned amalgamation zip using curl.
fn download(dest: &Path) {
    println!(
        "cargo:warning=Downloading sqlite3mc {SQLITE3MC_VERSION} (SQLite {SQLITE_VERSION})..."
    );
    let status = Command::new("curl")
        .args(["-fsSL", "-o"])
        .arg(dest)
        .arg(DOWNLOAD_URL)
        .status()
        .expect("failed to run curl -- is it installed?");
    assert!(status.success(), "curl failed with status {status}");
}

/// Verifies the SHA-256 checksum of the downloaded zip.
fn verify_checksum(zip_path: &Path) {
    let bytes = fs::read(zip_path).expect("failed to read amalgamation zip");
    let actual_hash = format!("{:x}", Sha256::digest(&bytes));
    assert_eq!(
        actual_hash, EXPECTED_SHA256,
        "sqlite3mc checksum mismatch!\n  expected: {EXPECTED_SHA256}\n  actual:   {actual_hash}\n\
         The download may be corrupted or the pinned release has changed."
    );
}

/// Extracts the amalgamation source and header from the zip into `dest_dir`,
/// flattening any directory prefix inside the archive.
fn extract(zip_path: &Path, dest_dir: &Path) {
    let file = File::open(zip_path).expect("failed to open amalgamation zip");
    let mut archive = zip::ZipArchive::new(file).expect("invalid amalgamation zip");
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).expect("failed to read zip entry");
        let file_name = entry
            .name()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if !AMALGAMATION_FILES.contains(&file_name.as_str()) {
            continue;
        }
        let mut out =
            File::create(dest_dir.join(&file_name)).expect("failed to create source file");
        io::copy(&mut entry, &mut out).expect("failed to extract source file");
    }
}

/// Compiles the sqlite3mc amalgamation into a static library.
fn compile(amalgamation_c: &Path, include_dir: &Path) {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    let mut build = cc::Build::new();
    build
        .file(amalgamation_c)
        .include(include_dir)
        // Core SQLite configuration
        .define("SQLITE_CORE", None)
        .define("SQLITE_THREADSAFE", "1")
        // Required for sqlite3_column_table_name
        .define("SQLITE_ENABLE_COLUMN_METADATA", None)
        .define("SQLITE_ENABLE_JSON1", None)
        .define("SQLITE_DEFAULT_WAL_SYNCHRONOUS", "1")
        .define("SQLITE_DQS", "0")
        // sqlite3mc cipher configuration -- default to ChaCha20-Poly1305
        .define("CODEC_TYPE", "CODEC_TYPE_CHACHA20")
        // Disable Argon2 threading (not needed, avoids pthread dep on some targets)
        .define("ARGON2_NO_THREADS", None)
        // Optimizations
        .define("SQLITE_DEFAULT_MEMSTATUS", "0")
        .define("SQLITE_LIKE_DOESNT_MATCH_BLOBS", None)
        .define("SQLITE_OMIT_DEPRECATED", None)
        .define("SQLITE_OMIT_SHARED_CACHE", None);

    match target_os.as_str() {
        "android" | "ios" | "macos" => {
            build.define("HAVE_USLEEP", "1");
            build.define("HAVE_LOCALTIME_R", "1");
        }
        "linux" => {
            build.define("HAVE_USLEEP", "1");
            build.define("HAVE_LOCALTIME_R", "1");
            build.define("HAVE_POSIX_FALLOCATE", "1");
        }
        _ => {}
    }

    // Suppress warnings from the amalgamation (third-party code)
    build.warnings(false);
    build.compile("sqlite3mc");

    if target_os == "linux" || target_os == "android" {
        println!("cargo:rustc-link-lib=m");
    }
}
