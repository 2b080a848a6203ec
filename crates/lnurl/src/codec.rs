//! Turning user-supplied LNURL codes into URLs.

use bech32::{Bech32, Hrp};
use reqwest::Url;

use crate::error::{LnurlError, Result};

const HRP: &str = "lnurl";

/// Decode any supported LNURL form into its URL.
///
/// Accepts bech32 `lnurl1...` strings (with optional `lightning:` prefix),
/// LUD-17 schemes (`lnurlp://`, `lnurlw://`, `lnurlc://`, `keyauth://`),
/// lightning addresses (`user@domain`) and plain URLs.
pub fn decode(code: &str) -> Result<Url> {
    let code = code.trim();
    let code = strip_prefix_ignore_case(code, "lightning:").unwrap_or(code);

    if code.is_empty() {
        return Err(LnurlError::InvalidLnurl("empty code".to_string()));
    }

    let url = if strip_prefix_ignore_case(code, "lnurl1").is_some() {
        decode_bech32(code)?
    } else if let Some(url) = decode_lud17(code) {
        url
    } else if code.contains('@') && !code.contains("://") {
        lightning_address_url(code)?
    } else {
        code.to_string()
    };

    let parsed = Url::parse(&url).map_err(|e| LnurlError::InvalidLnurl(e.to_string()))?;
    check_scheme(&parsed)?;
    Ok(parsed)
}

/// Encode a URL as an uppercase bech32 LNURL.
pub fn encode(url: &str) -> Result<String> {
    let hrp = Hrp::parse(HRP).map_err(|e| LnurlError::InvalidLnurl(e.to_string()))?;
    let encoded = bech32::encode::<Bech32>(hrp, url.as_bytes())
        .map_err(|e| LnurlError::InvalidLnurl(e.to_string()))?;
    Ok(encoded.to_uppercase())
}

/// `user@domain` → `https://domain/.well-known/lnurlp/user`.
pub fn lightning_address_url(address: &str) -> Result<String> {
    let (user, domain) = address
        .split_once('@')
        .ok_or_else(|| LnurlError::InvalidLnurl("lightning address needs '@'".to_string()))?;

    let valid_user = !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if !valid_user || domain.is_empty() || domain.contains('@') || domain.contains('/') {
        return Err(LnurlError::InvalidLnurl(format!(
            "malformed lightning address: {address}"
        )));
    }

    let user = user.to_lowercase();
    let scheme = scheme_for(domain);
    Ok(format!("{scheme}://{domain}/.well-known/lnurlp/{user}"))
}

fn decode_bech32(code: &str) -> Result<String> {
    let (hrp, data) = bech32::decode(&code.to_lowercase())
        .map_err(|e| LnurlError::InvalidLnurl(e.to_string()))?;

    if hrp.as_str() != HRP {
        return Err(LnurlError::InvalidLnurl(format!("unexpected prefix {hrp}")));
    }

    String::from_utf8(data).map_err(|e| LnurlError::InvalidLnurl(e.to_string()))
}

fn decode_lud17(code: &str) -> Option<String> {
    ["lnurlp://", "lnurlw://", "lnurlc://", "keyauth://"]
        .iter()
        .find_map(|prefix| strip_prefix_ignore_case(code, prefix))
        .map(|rest| {
            let host = rest.split(['/', '?', ':']).next().unwrap_or_default();
            format!("{}://{}", scheme_for(host), rest)
        })
}

fn scheme_for(host: &str) -> &'static str {
    if host.ends_with(".onion") {
        "http"
    } else {
        "https"
    }
}

/// Plain http is only allowed for onion services and loopback development hosts.
fn check_scheme(url: &Url) -> Result<()> {
    let host = url.host_str().unwrap_or_default();
    match url.scheme() {
        "https" => Ok(()),
        "http" if host.ends_with(".onion") || is_loopback(host) => Ok(()),
        other => Err(LnurlError::InvalidLnurl(format!(
            "scheme {other} not allowed for {host}"
        ))),
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // LUD-01 example.
    const LUD01: &str = "LNURL1DP68GURN8GHJ7UM9WFMXJCM99E3K7MF0V9CXJ0M385EKVCENXC6R2C35XVUKXEFCV5MKVV34X5EKZD3EV56NYD3HXQURZEPEXEJXXEPNXSCRVWFNV9NXZCN9XQ6XYEFHVGCXXCMYXYMNSERXFQ5FNS";

    #[test]
    fn test_decode_bech32_roundtrip() {
        let url = "https://service.com/api?q=3fc3645b439ce8e7f2553a69e5267081d96dcd340693afabe04be7b0ccd178df";
        let encoded = encode(url).unwrap();
        assert!(encoded.starts_with("LNURL1"));
        assert_eq!(decode(&encoded).unwrap().as_str(), url);
        assert_eq!(decode(&encoded.to_lowercase()).unwrap().as_str(), url);
        assert_eq!(decode(&format!("lightning:{encoded}")).unwrap().as_str(), url);
    }

    #[test]
    fn test_decode_lud01_vector() {
        let url = decode(LUD01).unwrap();
        assert_eq!(url.host_str(), Some("service.com"));
        assert_eq!(url.path(), "/api");
    }

    #[test]
    fn test_lightning_address() {
        assert_eq!(
            decode("Alice@example.com").unwrap().as_str(),
            "https://example.com/.well-known/lnurlp/alice"
        );
        assert_eq!(
            lightning_address_url("bob@abc.onion").unwrap(),
            "http://abc.onion/.well-known/lnurlp/bob"
        );
        assert!(lightning_address_url("@example.com").is_err());
        assert!(lightning_address_url("a b@example.com").is_err());
    }

    #[test]
    fn test_lud17_schemes() {
        assert_eq!(
            decode("lnurlw://example.com/withdraw?k1=aa").unwrap().as_str(),
            "https://example.com/withdraw?k1=aa"
        );
        assert_eq!(
            decode("keyauth://example.onion/login?tag=login").unwrap().scheme(),
            "http"
        );
    }

    #[test]
    fn test_rejects_plain_http_and_garbage() {
        assert!(matches!(
            decode("http://example.com/lnurl"),
            Err(LnurlError::InvalidLnurl(_))
        ));
        assert!(decode("http://127.0.0.1:8080/lnurl").is_ok());
        assert!(decode("lnurl1qqqqqq").is_err());
        assert!(decode("   ").is_err());
    }
}
