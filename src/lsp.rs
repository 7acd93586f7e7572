//! Language server front end over `tower-lsp-server`.

mod lsp_impl;
mod progress;
mod settings;
mod text_sync;

use std::str::FromStr;

use tower_lsp_server::ls_types::Uri;
use url::Url;

use crate::error::{YosegiError, YosegiResult};

pub use lsp_impl::YosegiLs;
pub use settings::{SettingsEvent, SettingsEventKind, SettingsLoadOutcome, SettingsSource, load_settings};

/// Convert a `url::Url` into the LSP `Uri` type.
pub fn url_to_uri(url: &Url) -> YosegiResult<Uri> {
    Uri::from_str(url.as_str())
        .map_err(|e| YosegiError::invalid_request(format!("invalid URI {url}: {e}")))
}

/// Convert an LSP `Uri` into a `url::Url`.
pub fn uri_to_url(uri: &Uri) -> YosegiResult<Url> {
    Url::parse(uri.as_str())
        .map_err(|e| YosegiError::invalid_request(format!("invalid URI {}: {e}", uri.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_conversion_round_trips_encoded_paths() {
        let url = Url::parse("file:///app/my%20dir/App.vue").unwrap();
        let uri = url_to_uri(&url).unwrap();

        assert_eq!(uri.as_str(), "file:///app/my%20dir/App.vue");
        assert_eq!(uri_to_url(&uri).unwrap(), url);
    }
}
