//! WebVPN gateway URL codec.
//!
//! The gateway addresses an internal host as
//! `<gateway>/<scheme>[-<port>]/<iv hex><encrypted host hex>/<path>`, where
//! the host name is AES-128-CFB encrypted under a key the gateway publishes.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use thiserror::Error;
use url::Url;

const GATEWAY_KEY: &[u8; 16] = b"wrdvpnisthebest!";
const GATEWAY_IV: &[u8; 16] = b"wrdvpnisthebest!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebVpnError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Not a gateway URL: {0}")]
    NotGatewayUrl(String),
    #[error("Undecodable host segment: {0}")]
    BadHostSegment(String),
}

/// Translates between direct and gateway URLs.
#[derive(Debug, Clone)]
pub struct WebVpnCodec {
    gateway: Url,
}

impl WebVpnCodec {
    pub fn new(gateway_base: &str) -> Result<Self, WebVpnError> {
        let gateway =
            Url::parse(gateway_base).map_err(|e| WebVpnError::InvalidUrl(format!("{gateway_base}: {e}")))?;
        if gateway.host_str().is_none() {
            return Err(WebVpnError::InvalidUrl(gateway_base.to_string()));
        }
        Ok(Self { gateway })
    }

    pub fn gateway_host(&self) -> &str {
        self.gateway.host_str().unwrap_or_default()
    }

    /// True if `url` already points at the gateway.
    pub fn is_gateway_url(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(self.gateway_host())))
            .unwrap_or(false)
    }

    /// Rewrite a direct URL so that it is fetched through the gateway.
    /// Gateway URLs are returned unchanged.
    pub fn to_vpn_url(&self, url: &str) -> Result<String, WebVpnError> {
        if self.is_gateway_url(url) {
            return Ok(url.to_string());
        }
        let parsed = Url::parse(url).map_err(|e| WebVpnError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| WebVpnError::InvalidUrl(url.to_string()))?;

        let scheme = match parsed.port() {
            Some(port) => format!("{}-{port}", parsed.scheme()),
            None => parsed.scheme().to_string(),
        };
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(format!(
            "{}://{}/{scheme}/{}{}{path}",
            self.gateway.scheme(),
            self.gateway_host(),
            hex::encode(GATEWAY_IV),
            encrypt_host(host),
        ))
    }

    /// Recover the direct URL from a gateway URL.
    pub fn from_vpn_url(&self, vpn_url: &str) -> Result<String, WebVpnError> {
        if !self.is_gateway_url(vpn_url) {
            return Err(WebVpnError::NotGatewayUrl(vpn_url.to_string()));
        }
        let parsed =
            Url::parse(vpn_url).map_err(|e| WebVpnError::InvalidUrl(format!("{vpn_url}: {e}")))?;
        let mut segments = parsed.path().trim_start_matches('/').splitn(3, '/');
        let scheme_port = segments.next().unwrap_or_default();
        let host_segment = segments
            .next()
            .ok_or_else(|| WebVpnError::NotGatewayUrl(vpn_url.to_string()))?;
        let rest = segments.next().unwrap_or_default();

        let (scheme, port) = match scheme_port.split_once('-') {
            Some((scheme, port)) => (scheme, Some(port)),
            None => (scheme_port, None),
        };
        if scheme.is_empty() {
            return Err(WebVpnError::NotGatewayUrl(vpn_url.to_string()));
        }

        let iv_hex = hex::encode(GATEWAY_IV);
        let host_hex = host_segment
            .strip_prefix(iv_hex.as_str())
            .ok_or_else(|| WebVpnError::BadHostSegment(host_segment.to_string()))?;
        let host = decrypt_host(host_hex)?;

        let mut direct = format!("{scheme}://{host}");
        if let Some(port) = port {
            direct.push(':');
            direct.push_str(port);
        }
        direct.push('/');
        direct.push_str(rest);
        if let Some(query) = parsed.query() {
            direct.push('?');
            direct.push_str(query);
        }
        Ok(direct)
    }
}

/// Hex of the host name encrypted with AES-128 in 128-bit CFB mode.
pub fn encrypt_host(host: &str) -> String {
    let mut buf = host.as_bytes().to_vec();
    cfb_mode::Encryptor::<Aes128>::new(GATEWAY_KEY.into(), GATEWAY_IV.into()).encrypt(&mut buf);
    hex::encode(buf)
}

pub fn decrypt_host(cipher_hex: &str) -> Result<String, WebVpnError> {
    let mut buf =
        hex::decode(cipher_hex).map_err(|_| WebVpnError::BadHostSegment(cipher_hex.to_string()))?;
    cfb_mode::Decryptor::<Aes128>::new(GATEWAY_KEY.into(), GATEWAY_IV.into()).decrypt(&mut buf);
    String::from_utf8(buf).map_err(|_| WebVpnError::BadHostSegment(cipher_hex.to_string()))
}
