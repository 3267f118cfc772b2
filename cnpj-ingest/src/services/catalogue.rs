//! Release catalogue client
//!
//! Scrapes the Receita Federal open-data directory listings. The upstream is
//! a plain HTML directory index: release subdirectories named `YYYY-MM/` at
//! the top level, zip archives (with best-effort size / last-modified table
//! columns) inside each release directory.

use crate::error::{PipelineError, Result};
use crate::models::RemoteFile;
use regex::Regex;
use std::time::Duration;

/// Release directories sort lexicographically == chronologically (`YYYY-MM`).
const RELEASE_HREF: &str = r#"href="(\d{4}-\d{2})/""#;
/// Anchor whose target ends in `.zip`, case-insensitive.
const ZIP_HREF: &str = r#"(?i)href="([^"]+\.zip)""#;
/// Table cell contents, tags stripped afterwards.
const TABLE_CELL: &str = r"(?is)<td[^>]*>(.*?)</td>";

pub struct ReceitaClient {
    base_url: String,
    client: reqwest::Client,
    release_re: Regex,
    zip_re: Regex,
    cell_re: Regex,
}

impl ReceitaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
            release_re: Regex::new(RELEASE_HREF).expect("static regex"),
            zip_re: Regex::new(ZIP_HREF).expect("static regex"),
            cell_re: Regex::new(TABLE_CELL).expect("static regex"),
        })
    }

    /// All releases advertised by the index, ascending.
    pub async fn list_releases(&self) -> Result<Vec<String>> {
        let body = self.fetch(&self.base_url).await?;
        let mut releases: Vec<String> = self
            .release_re
            .captures_iter(&body)
            .map(|cap| cap[1].to_string())
            .collect();
        releases.sort();
        releases.dedup();
        Ok(releases)
    }

    /// The lexicographically greatest release (== most recent).
    pub async fn latest_release(&self) -> Result<String> {
        let releases = self.list_releases().await?;
        releases
            .into_iter()
            .next_back()
            .ok_or_else(|| PipelineError::NoReleasesFound(self.base_url.clone()))
    }

    /// Zip archives of one release, with best-effort size and last-modified
    /// text from the index table.
    pub async fn list_files(&self, release: &str) -> Result<Vec<RemoteFile>> {
        let release_url = format!("{}{}/", self.base_url, release);
        let body = self.fetch(&release_url).await?;

        let mut files = Vec::new();
        // Row-by-row so size/date cells stay associated with their archive.
        for row in body.split("<tr") {
            let Some(href) = self.zip_re.captures(row).map(|cap| cap[1].to_string()) else {
                continue;
            };
            let cells: Vec<String> = self
                .cell_re
                .captures_iter(row)
                .map(|cap| strip_tags(&cap[1]))
                .collect();
            let last_modified = cells.get(2).filter(|c| !c.is_empty()).cloned();
            let size = cells.get(3).filter(|c| !c.is_empty()).cloned();
            let url = if href.starts_with("http://") || href.starts_with("https://") {
                href.clone()
            } else {
                format!("{release_url}{href}")
            };
            let name = href.rsplit('/').next().unwrap_or(&href).to_string();
            files.push(RemoteFile {
                name,
                url,
                size,
                last_modified,
            });
        }

        if files.is_empty() {
            return Err(PipelineError::NoReleasesFound(release_url));
        }
        Ok(files)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::CatalogueUnavailable(format!("{url}: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| PipelineError::CatalogueUnavailable(format!("{url}: {e}")))
    }
}

fn strip_tags(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    let mut in_tag = false;
    for ch in cell.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ReceitaClient {
        ReceitaClient::new("http://example.test/dados/", 5).unwrap()
    }

    #[test]
    fn release_regex_accepts_only_year_month_dirs() {
        let c = client();
        let body = r#"
            <a href="2024-05/">2024-05/</a>
            <a href="2024-06/">2024-06/</a>
            <a href="regimes_tributarios/">regimes/</a>
            <a href="2024-07.zip">not a dir</a>
        "#;
        let releases: Vec<String> = c
            .release_re
            .captures_iter(body)
            .map(|cap| cap[1].to_string())
            .collect();
        assert_eq!(releases, vec!["2024-05", "2024-06"]);
    }

    #[test]
    fn strip_tags_flattens_index_cells() {
        assert_eq!(strip_tags(r#"<img src="x.gif" alt="[ ]">"#), "");
        assert_eq!(strip_tags("2024-05-14 10:01  "), "2024-05-14 10:01");
        assert_eq!(strip_tags("&nbsp;"), "");
        assert_eq!(strip_tags(r#"<a href="f.zip">f.zip</a>"#), "f.zip");
    }
}
