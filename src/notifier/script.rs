//! Retrieval scripts for multi-bundle jobs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of retrieval script
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFlavor {
    /// POSIX shell script using wget
    #[default]
    Wget,
    /// POSIX shell script using curl
    Curl,
    /// Plain list of URLs, one per line
    UrlsOnly,
}

impl ScriptFlavor {
    /// File extension including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ScriptFlavor::UrlsOnly => ".txt",
            _ => ".sh",
        }
    }
}

/// Extra steps appended after each download (ignored for [`ScriptFlavor::UrlsOnly`])
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScriptOptions {
    /// Unzip each archive after download
    #[serde(default)]
    pub unzip: bool,
    /// Delete each archive after unzipping
    #[serde(default)]
    pub remove_zip: bool,
}

/// A generated script and the name to save it under
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadScript {
    /// Suggested file name
    pub file_name: String,
    /// Script body
    pub content: String,
}

/// Name to save a script for `base_file_name` under
pub fn script_file_name(base_file_name: &str, flavor: ScriptFlavor) -> String {
    format!("{base_file_name}{}", flavor.extension())
}

/// Write a retrieval script for the given archive URLs
pub fn compose_download_script(
    urls: &[&str],
    data_source: &str,
    flavor: ScriptFlavor,
    options: ScriptOptions,
) -> String {
    if flavor == ScriptFlavor::UrlsOnly {
        let mut out = urls.join("\n");
        out.push('\n');
        return out;
    }

    let mut out = String::from("#!/bin/sh\n");
    out.push_str(&format!(
        "#\n# Retrieves {} archive(s) from {}\n#\n\n",
        urls.len(),
        if data_source.is_empty() { "the archive" } else { data_source }
    ));

    for url in urls {
        let name = shell_quote(&archive_file_name(url));
        let quoted_url = shell_quote(url);
        match flavor {
            ScriptFlavor::Wget => out.push_str(&format!("wget -O {name} {quoted_url}\n")),
            ScriptFlavor::Curl => out.push_str(&format!("curl -f -o {name} {quoted_url}\n")),
            ScriptFlavor::UrlsOnly => {}
        }
        if options.unzip {
            out.push_str(&format!("unzip -qo {name}\n"));
            if options.remove_zip {
                out.push_str(&format!("rm -f {name}\n"));
            }
        }
    }
    out
}

// file name an archive URL should be saved as: its `name` query parameter, else the
// last path segment
fn archive_file_name(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return "archive.zip".to_string();
    };
    if let Some((_, name)) = parsed.query_pairs().find(|(k, _)| k == "name") {
        if !name.is_empty() {
            return crate::utils::sanitize_file_name(&name);
        }
    }
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|s| !s.is_empty())
        .map(|s| crate::utils::sanitize_file_name(&s))
        .unwrap_or_else(|| "archive.zip".to_string())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
