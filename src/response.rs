//! # Response Module
//!
//! The [`Response`] value handed to the spider's parse callback.
//!
//! Text decoding is tolerant by design: declared encoding first, then UTF-8
//! with malformed-sequence replacement, then a single-byte fallback. Decoding
//! never fails, whatever bytes the server returned.

use std::collections::HashMap;

use url::Url;

use crate::request::Request;

/// An HTTP response paired with the request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    /// The originating request, including its metadata bag.
    pub request: Request,
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase, when the status code has a canonical one.
    pub reason: Option<String>,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Charset declared in the Content-Type header, if any.
    pub encoding: Option<String>,
    /// Final URL after redirects.
    pub url: Url,
}

impl Response {
    /// Whether the status code is in the success range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Metadata copied from the originating request.
    pub fn meta(&self) -> &HashMap<String, serde_json::Value> {
        &self.request.meta
    }

    /// Decodes the body into text.
    ///
    /// Tries, in order: the declared charset, UTF-8, windows-1252. Every step
    /// replaces malformed sequences instead of erroring, and windows-1252
    /// maps every byte to a character, so this is total.
    pub fn text(&self) -> String {
        if let Some(label) = &self.encoding {
            if let Some(enc) = encoding_rs::Encoding::for_label(label.as_bytes()) {
                let (decoded, _, _) = enc.decode(&self.body);
                return decoded.into_owned();
            }
        }

        match std::str::from_utf8(&self.body) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&self.body);
                decoded.into_owned()
            }
        }
    }
}
