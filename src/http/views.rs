//! HTML pages rendered with askama.  Templates live in `templates/`.

use askama::Template;

use crate::index::query::{file_type, file_url};
use crate::index::PackageFile;

/// Human-readable byte count.
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.1} {}", size, UNITS[unit_idx])
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub tags: Vec<String>,
}

#[derive(Template)]
#[template(path = "files.html")]
pub struct FilesTemplate {
    pub tag: String,
    pub files: Vec<FileRow>,
}

#[derive(Template)]
#[template(path = "404.html")]
pub struct NotFoundTemplate {
    pub message: String,
}

pub struct FileRow {
    pub name: String,
    pub url: String,
    pub file_type: String,
    pub size: String,
}

impl FileRow {
    pub fn new(download_base_url: &str, tag: &str, file: &PackageFile) -> Self {
        Self {
            name: file.file_name().to_string(),
            url: file_url(download_base_url, tag, file),
            file_type: file_type(file).to_string(),
            size: format_size(file.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_humanised() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn latest_rows_link_to_redirect() {
        let mut file = PackageFile::new("packages/c2/vagrant_1.2.0_x86_64.deb");
        file.size = 1024;
        let row = FileRow::new("http://files.example.com", "latest", &file);
        assert_eq!(row.name, "vagrant_1.2.0_x86_64.deb");
        assert_eq!(row.url, "/tags/latest/vagrant_x86_64.deb");
        assert_eq!(row.file_type, "deb");
        assert_eq!(row.size, "1.0 KB");
    }

    #[test]
    fn index_marks_latest() {
        let html = IndexTemplate {
            tags: vec!["latest".into(), "1.0.0".into()],
        }
        .render()
        .unwrap();
        assert!(html.contains(r#"<li class="latest"><a href="/tags/latest">latest</a></li>"#));
        assert!(html.contains(r#"<a href="/tags/1.0.0">1.0.0</a>"#));
    }
}
