//! URIs for virtual documents.
//!
//! A virtual document lives next to its host so backends resolve relative
//! imports and project configuration the same way they would for the host.
//! For "cannot-be-a-base" hosts (`untitled:`, `data:`) a `yosegi://` scheme
//! fallback is used.

use url::Url;

/// Prefix used for virtual document filenames.
const VIRTUAL_URI_PREFIX: &str = "yosegi-virtual-uri-";

/// Host URI + stable sub-id + language, encoded as a URI.
///
/// ## URI Format
///
/// - normal hosts: `{scheme}://{host_dir}/yosegi-virtual-uri-{host_file}-{sub_id}.{ext}`
///   e.g. `file:///app/yosegi-virtual-uri-App.vue-script.ts`
/// - cannot-be-a-base hosts:
///   `yosegi:///virtual/{encoded_host}/yosegi-virtual-uri-{sub_id}.{ext}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDocumentUri {
    host_uri: Url,
    sub_id: String,
    language: String,
}

impl VirtualDocumentUri {
    pub fn new(host_uri: &Url, sub_id: &str, language: &str) -> Self {
        debug_assert!(!sub_id.is_empty(), "sub_id must not be empty");
        Self {
            host_uri: host_uri.clone(),
            sub_id: sub_id.to_string(),
            language: language.to_string(),
        }
    }

    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Whether a URI string names a virtual document.
    pub fn is_virtual_uri(uri: &str) -> bool {
        let Ok(url) = Url::parse(uri) else {
            return false;
        };
        url.path_segments()
            .and_then(|mut s| s.next_back())
            .is_some_and(|filename| filename.starts_with(VIRTUAL_URI_PREFIX))
    }

    pub fn to_url(&self) -> Url {
        let extension = language_to_extension(&self.language);

        let mut url = self.host_uri.clone();
        let host_file = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .map(str::to_string)
            .unwrap_or_default();
        let virtual_filename =
            format!("{VIRTUAL_URI_PREFIX}{host_file}-{}.{extension}", self.sub_id);
        let modified = url
            .path_segments_mut()
            .map(|mut segments| {
                segments.pop();
                segments.push(&virtual_filename);
            })
            .is_ok();
        if modified {
            url.set_query(None);
            url.set_fragment(None);
            return url;
        }

        let encoded_host = percent_encoding::utf8_percent_encode(
            self.host_uri.as_str(),
            percent_encoding::NON_ALPHANUMERIC,
        );
        let fallback = format!(
            "yosegi:///virtual/{encoded_host}/{VIRTUAL_URI_PREFIX}{}.{extension}",
            self.sub_id
        );
        // The fallback is built from percent-encoded parts only.
        Url::parse(&fallback).unwrap_or_else(|_| self.host_uri.clone())
    }
}

/// Map a language id to the file extension backends expect.
///
/// Unknown languages get `txt`.
pub fn language_to_extension(language: &str) -> &'static str {
    match language {
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "jsx" | "javascriptreact" => "jsx",
        "tsx" | "typescriptreact" => "tsx",
        "json" => "json",
        "jsonc" => "jsonc",
        "yaml" => "yaml",
        "toml" => "toml",
        "markdown" | "md" => "md",
        "pug" => "pug",
        "python" => "py",
        "lua" => "lua",
        "rust" => "rs",
        _ => "txt",
    }
}
