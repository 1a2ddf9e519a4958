use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use digest_cluster::manifest::MANIFEST_FILE;
use digest_cluster::DigestOutput;
use digest_common::Post;

/// Timeline exports come either as a bare array or wrapped with fetch stats.
#[derive(Deserialize)]
struct WrappedExport {
    #[serde(alias = "tweets")]
    posts: Vec<Post>,
}

pub fn read_posts(path: &Path) -> Result<Vec<Post>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read posts file: {}", path.display()))?;
    let posts = parse_posts(&content)
        .with_context(|| format!("Failed to parse posts file: {}", path.display()))?;
    info!(path = %path.display(), posts = posts.len(), "Loaded posts");
    Ok(posts)
}

/// Parse by shape so a bad post reports its own serde error and position.
fn parse_posts(content: &str) -> Result<Vec<Post>> {
    if content.trim_start().starts_with('[') {
        serde_json::from_str(content).context("Malformed post in bare array")
    } else {
        let wrapped: WrappedExport =
            serde_json::from_str(content).context("Malformed wrapped export")?;
        Ok(wrapped.posts)
    }
}

/// Write every bundle and a pretty-printed `manifest.json` into `dir`.
/// Returns the manifest path.
pub fn write_output(dir: &Path, output: &DigestOutput) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    for bundle in &output.bundles {
        let path = dir.join(&bundle.file_name);
        fs::write(&path, &bundle.contents)
            .with_context(|| format!("Failed to write bundle: {}", path.display()))?;
        info!(path = %path.display(), "Saved bundle");
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&output.manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("Failed to write manifest: {}", manifest_path.display()))?;
    info!(path = %manifest_path.display(), "Manifest saved");

    Ok(manifest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_bare_and_wrapped_exports() {
        let mut bare = tempfile::NamedTempFile::new().unwrap();
        write!(bare, r#"[{{"id": 1, "text": "a"}}, {{"id": "2", "text": "b"}}]"#).unwrap();
        let posts = read_posts(bare.path()).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "1");

        let mut wrapped = tempfile::NamedTempFile::new().unwrap();
        write!(
            wrapped,
            r#"{{"stats": {{"fetched": 1}}, "tweets": [{{"id": "9", "text": "c"}}]}}"#
        )
        .unwrap();
        let posts = read_posts(wrapped.path()).unwrap();
        assert_eq!(posts[0].id, "9");
    }

    #[test]
    fn malformed_post_reports_the_inner_error() {
        let mut bare = tempfile::NamedTempFile::new().unwrap();
        write!(bare, r#"[{{"id": "1", "text": "a"}}, {{"id": "2", "text": 42}}]"#).unwrap();
        let err = format!("{:#}", read_posts(bare.path()).unwrap_err());
        assert!(err.contains("Malformed post in bare array"), "{err}");
        assert!(err.contains("invalid type: integer `42`"), "{err}");
        assert!(!err.contains("did not match any variant"), "{err}");

        let mut wrapped = tempfile::NamedTempFile::new().unwrap();
        write!(wrapped, r#"{{"stats": {{}}, "tweets": [{{"text": ["x"]}}]}}"#).unwrap();
        let err = format!("{:#}", read_posts(wrapped.path()).unwrap_err());
        assert!(err.contains("Malformed wrapped export"), "{err}");
        assert!(err.contains("invalid type: sequence"), "{err}");
    }

    #[test]
    fn unreadable_input_names_the_file() {
        let err = read_posts(Path::new("/nonexistent/posts.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/posts.json"));
    }
}
