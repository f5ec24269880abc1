//! Provenance attributes and dated file names.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

/// Tool identity recorded in written files
pub const TOOL_IDENTITY: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// `"<user> on <host>"`, falling back to `unknown` for either part.
pub fn user_and_host() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{user} on {host}")
}

pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Insert `_cYYYYMMDD` before the `.nc` extension (or append it).
pub fn dated_path(path: &Path, date: NaiveDate) -> PathBuf {
    let stamp = date.format("_c%Y%m%d").to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}{stamp}"),
    };
    path.with_file_name(name)
}

/// [`dated_path`] with today's date.
pub fn dated_today(path: &Path) -> PathBuf {
    dated_path(path, Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_names_insert_before_extension() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            dated_path(Path::new("out/weights.nc"), date),
            PathBuf::from("out/weights_c20240307.nc")
        );
        assert_eq!(
            dated_path(Path::new("regridded"), date),
            PathBuf::from("regridded_c20240307")
        );
    }

    #[test]
    fn user_and_host_has_both_parts() {
        assert!(user_and_host().contains(" on "));
    }
}
